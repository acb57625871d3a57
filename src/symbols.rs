use serde::{Deserialize, Serialize};

/// Instrument metadata in the shape the charting widget expects.
///
/// Field names follow the widget's wire vocabulary, including the hyphenated
/// exchange keys.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SymbolInfo {
    pub ticker: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "exchange-traded", default)]
    pub exchange_traded: String,
    #[serde(rename = "exchange-listed", default)]
    pub exchange_listed: String,
    #[serde(rename = "type", default)]
    pub symbol_type: String,
    pub session: String,
    pub timezone: String,
    pub minmov: i64,
    #[serde(default)]
    pub minmov2: i64,
    pub pricescale: f64,
    #[serde(default = "default_pointvalue")]
    pub pointvalue: i64,
    #[serde(default)]
    pub volume_precision: i64,
    #[serde(default)]
    pub has_intraday: bool,
    #[serde(default)]
    pub has_daily: bool,
    #[serde(default)]
    pub has_weekly_and_monthly: bool,
    #[serde(default)]
    pub has_no_volume: bool,
    #[serde(default)]
    pub intraday_multipliers: Vec<String>,
    #[serde(default)]
    pub supported_resolutions: Vec<String>,
}

fn default_pointvalue() -> i64 {
    1
}

/// One row of a symbol search response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchResultItem {
    pub symbol: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub ticker: String,
    #[serde(rename = "type", default)]
    pub symbol_type: String,
}

/// Exchange-qualified ticker to the backend's pair form: the first `:`
/// becomes `_`, anything else passes through unchanged.
pub fn backend_pair(ticker: &str) -> String {
    ticker.replacen(':', "_", 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_exchange_qualified_tickers() {
        assert_eq!(backend_pair("BTC:USDT"), "BTC_USDT");
        assert_eq!(backend_pair("BTC_USDT"), "BTC_USDT");
        assert_eq!(backend_pair("AAPL"), "AAPL");
    }

    #[test]
    fn replaces_only_the_first_colon() {
        assert_eq!(backend_pair("A:B:C"), "A_B:C");
    }

    #[test]
    fn serializes_widget_field_names() {
        let info = SymbolInfo {
            ticker: "BTC_USDT".to_string(),
            name: "USDT".to_string(),
            description: "BTC_USDT".to_string(),
            exchange_traded: "BTC".to_string(),
            exchange_listed: "BTC".to_string(),
            symbol_type: "stock".to_string(),
            session: "24x7".to_string(),
            timezone: "America/New_York".to_string(),
            minmov: 1,
            minmov2: 0,
            pricescale: 100.0,
            pointvalue: 1,
            volume_precision: 3,
            has_intraday: true,
            has_daily: true,
            has_weekly_and_monthly: true,
            has_no_volume: false,
            intraday_multipliers: vec!["1".to_string()],
            supported_resolutions: vec!["1".to_string()],
        };
        let json = serde_json::to_value(&info).expect("symbol info serializes");
        assert_eq!(json["exchange-traded"], "BTC");
        assert_eq!(json["exchange-listed"], "BTC");
        assert_eq!(json["type"], "stock");
    }
}
