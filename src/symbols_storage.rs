use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::{FeedError, Result};
use crate::fetch::Requester;
use crate::marks::extract_field;
use crate::symbols::{SearchResultItem, SymbolInfo};

/// Client-side symbol index for group-request mode.
///
/// Fetches the bulk `symbol_info` payload for each configured exchange group
/// once, flattens the columnar response into per-symbol records, and serves
/// resolve/search lookups from the cached index. A single shared instance is
/// reused by all callers; the lazy init is serialized by the async mutex.
pub struct SymbolsStorage {
    base_url: String,
    exchanges: Vec<String>,
    supported_resolutions: Vec<String>,
    requester: Arc<Requester>,
    index: Mutex<Option<Arc<HashMap<String, SymbolInfo>>>>,
}

impl SymbolsStorage {
    pub fn new(
        base_url: impl Into<String>,
        exchanges: Vec<String>,
        supported_resolutions: Vec<String>,
        requester: Arc<Requester>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            exchanges,
            supported_resolutions,
            requester,
            index: Mutex::new(None),
        }
    }

    pub async fn resolve_symbol(&self, symbol_name: &str) -> Result<SymbolInfo> {
        let index = self.ensure_index().await?;
        index
            .get(&symbol_name.to_uppercase())
            .cloned()
            .ok_or_else(|| FeedError::message("unknown_symbol"))
    }

    pub async fn search_symbols(
        &self,
        query: &str,
        exchange: &str,
        symbol_type: &str,
        limit: usize,
    ) -> Result<Vec<SearchResultItem>> {
        let index = self.ensure_index().await?;
        Ok(search_entries(
            index.values(),
            query,
            exchange,
            symbol_type,
            limit,
        ))
    }

    /// Failed builds are not cached; the next lookup retries.
    async fn ensure_index(&self) -> Result<Arc<HashMap<String, SymbolInfo>>> {
        let mut guard = self.index.lock().await;
        if let Some(index) = guard.as_ref() {
            return Ok(Arc::clone(index));
        }

        let index = Arc::new(self.build_index().await?);
        debug!("SymbolsStorage: indexed {} symbols", index.len());
        *guard = Some(Arc::clone(&index));
        Ok(index)
    }

    async fn build_index(&self) -> Result<HashMap<String, SymbolInfo>> {
        let groups: Vec<String> = if self.exchanges.is_empty() {
            vec![String::new()]
        } else {
            self.exchanges.clone()
        };

        let mut index = HashMap::new();
        for group in groups {
            let params: Vec<(&str, String)> = if group.is_empty() {
                Vec::new()
            } else {
                vec![("group", group.clone())]
            };
            let response = self
                .requester
                .send_request(&self.base_url, "symbol_info", &params)
                .await?;
            for info in parse_group_payload(&response, &self.supported_resolutions)? {
                index.insert(info.ticker.to_uppercase(), info);
            }
        }
        Ok(index)
    }
}

/// Flatten a columnar symbol group payload into one `SymbolInfo` per entry.
/// The `symbol` array establishes the record count; scalar columns apply to
/// every record.
fn parse_group_payload(root: &Value, supported_resolutions: &[String]) -> Result<Vec<SymbolInfo>> {
    let data = root
        .as_object()
        .ok_or_else(|| FeedError::message("Symbol group payload is not an object"))?;
    let count = data
        .get("symbol")
        .and_then(Value::as_array)
        .map(|symbols| symbols.len())
        .ok_or_else(|| FeedError::message("Symbol group payload missing symbol array"))?;

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let Some(symbol) = field_string(data, "symbol", i) else {
            continue;
        };

        let ticker = field_string(data, "ticker", i).unwrap_or_else(|| symbol.clone());
        let description = field_string(data, "description", i).unwrap_or_else(|| symbol.clone());
        let exchange_listed = field_string(data, "exchange-listed", i).unwrap_or_default();
        let exchange_traded =
            field_string(data, "exchange-traded", i).unwrap_or_else(|| exchange_listed.clone());

        entries.push(SymbolInfo {
            ticker,
            name: symbol,
            description,
            exchange_traded,
            exchange_listed,
            symbol_type: field_string(data, "type", i).unwrap_or_else(|| "stock".to_string()),
            session: field_string(data, "session-regular", i)
                .unwrap_or_else(|| "24x7".to_string()),
            timezone: field_string(data, "timezone", i)
                .unwrap_or_else(|| "America/New_York".to_string()),
            minmov: field_i64(data, "minmovement", i)
                .or_else(|| field_i64(data, "minmov", i))
                .unwrap_or(1),
            minmov2: field_i64(data, "minmovement2", i).unwrap_or(0),
            pricescale: field_f64(data, "pricescale", i).unwrap_or(1.0),
            pointvalue: field_i64(data, "pointvalue", i).unwrap_or(1),
            volume_precision: field_i64(data, "volume-precision", i).unwrap_or(0),
            has_intraday: field_bool(data, "has-intraday", i).unwrap_or(false),
            has_daily: field_bool(data, "has-daily", i).unwrap_or(true),
            has_weekly_and_monthly: field_bool(data, "has-weekly-and-monthly", i).unwrap_or(true),
            has_no_volume: field_bool(data, "has-no-volume", i).unwrap_or(false),
            intraday_multipliers: supported_resolutions.to_vec(),
            supported_resolutions: supported_resolutions.to_vec(),
        });
    }

    Ok(entries)
}

fn search_entries<'a>(
    entries: impl Iterator<Item = &'a SymbolInfo>,
    query: &str,
    exchange: &str,
    symbol_type: &str,
    limit: usize,
) -> Vec<SearchResultItem> {
    let needle = query.to_uppercase();
    let mut items: Vec<SearchResultItem> = entries
        .filter(|info| exchange.is_empty() || info.exchange_listed.eq_ignore_ascii_case(exchange))
        .filter(|info| symbol_type.is_empty() || info.symbol_type.eq_ignore_ascii_case(symbol_type))
        .filter(|info| {
            info.ticker.to_uppercase().contains(&needle)
                || info.description.to_uppercase().contains(&needle)
        })
        .map(|info| SearchResultItem {
            symbol: info.name.clone(),
            full_name: info.ticker.clone(),
            description: info.description.clone(),
            exchange: info.exchange_listed.clone(),
            ticker: info.ticker.clone(),
            symbol_type: info.symbol_type.clone(),
        })
        .collect();

    items.sort_by(|a, b| a.ticker.cmp(&b.ticker));
    items.truncate(limit);
    items
}

fn field_string(data: &Map<String, Value>, field: &str, index: usize) -> Option<String> {
    match extract_field(data, field, index) {
        Value::String(s) => Some(s),
        _ => None,
    }
}

fn field_bool(data: &Map<String, Value>, field: &str, index: usize) -> Option<bool> {
    extract_field(data, field, index).as_bool()
}

fn field_i64(data: &Map<String, Value>, field: &str, index: usize) -> Option<i64> {
    match extract_field(data, field, index) {
        Value::Number(num) => num.as_i64(),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

fn field_f64(data: &Map<String, Value>, field: &str, index: usize) -> Option<f64> {
    match extract_field(data, field, index) {
        Value::Number(num) => num.as_f64(),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolutions() -> Vec<String> {
        vec!["1".to_string(), "60".to_string(), "1D".to_string()]
    }

    #[test]
    fn flattens_columnar_group_payload() {
        let raw = serde_json::json!({
            "symbol": ["BTC_USDT", "ETH_USDT"],
            "description": ["Bitcoin / Tether", "Ethereum / Tether"],
            "exchange-listed": "DEMO",
            "minmovement": 1,
            "pricescale": [100000, 1000],
            "has-intraday": true,
            "type": "crypto",
            "timezone": "UTC",
            "session-regular": "24x7"
        });

        let entries = parse_group_payload(&raw, &resolutions()).expect("group payload parses");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].ticker, "BTC_USDT");
        assert!((entries[0].pricescale - 100000.0).abs() < 1e-6);
        assert!((entries[1].pricescale - 1000.0).abs() < 1e-6);
        // Scalar columns apply to every record.
        assert!(entries.iter().all(|e| e.exchange_listed == "DEMO"));
        assert!(entries.iter().all(|e| e.has_intraday));
        assert_eq!(entries[1].session, "24x7");
        assert_eq!(entries[0].supported_resolutions, resolutions());
    }

    #[test]
    fn group_payload_without_symbols_fails() {
        let raw = serde_json::json!({"description": ["x"]});
        parse_group_payload(&raw, &resolutions()).expect_err("missing symbol array fails");
    }

    #[test]
    fn search_is_case_insensitive_and_capped() {
        let raw = serde_json::json!({
            "symbol": ["BTC_USDT", "ETH_USDT", "ETC_USDT"],
            "description": ["Bitcoin", "Ethereum", "Ethereum Classic"],
            "exchange-listed": "DEMO",
            "type": "crypto"
        });
        let entries = parse_group_payload(&raw, &resolutions()).expect("parses");

        let hits = search_entries(entries.iter(), "eth", "", "", 30);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.ticker.contains("ET")));

        let capped = search_entries(entries.iter(), "usdt", "", "", 2);
        assert_eq!(capped.len(), 2);

        let filtered = search_entries(entries.iter(), "usdt", "OTHER", "", 30);
        assert!(filtered.is_empty());

        let typed = search_entries(entries.iter(), "bitcoin", "", "crypto", 30);
        assert_eq!(typed.len(), 1);
        assert_eq!(typed[0].ticker, "BTC_USDT");
    }
}
