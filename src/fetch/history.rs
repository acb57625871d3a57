use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FeedError, Result};
use crate::symbols::{backend_pair, SymbolInfo};

use super::{Requester, STATUS_OK};

/// One OHLCV candle, chronological order as returned by the backend.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryMeta {
    #[serde(rename = "noData")]
    pub no_data: bool,
    /// Hint for where earlier data might resume; only meaningful when
    /// `no_data` is set.
    #[serde(rename = "nextTime", skip_serializing_if = "Option::is_none")]
    pub next_time: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct HistoryResult {
    pub bars: Vec<Bar>,
    pub meta: HistoryMeta,
}

/// Maps a widget resolution code to the backend's interval parameter.
///
/// Total over the resolution grammar: `\d*D` → `day<N>`, `\d*W` → `week<N>`,
/// `\d*M` → `month<N>`, bare `60` → `hour1`, any other bare value `<N>` →
/// `minute<N>`.
pub fn backend_interval(resolution: &str) -> String {
    if let Some(prefix) = resolution.strip_suffix('D') {
        format!("day{prefix}")
    } else if let Some(prefix) = resolution.strip_suffix('W') {
        format!("week{prefix}")
    } else if let Some(prefix) = resolution.strip_suffix('M') {
        format!("month{prefix}")
    } else if resolution == "60" {
        "hour1".to_string()
    } else {
        format!("minute{resolution}")
    }
}

/// Fetches historical bars for one (symbol, resolution, range) request.
pub struct HistoryProvider {
    base_url: String,
    requester: Arc<Requester>,
}

impl HistoryProvider {
    pub fn new(base_url: impl Into<String>, requester: Arc<Requester>) -> Self {
        Self {
            base_url: base_url.into(),
            requester,
        }
    }

    pub async fn get_bars(
        &self,
        symbol_info: &SymbolInfo,
        resolution: &str,
        _range_start: i64,
        _range_end: i64,
    ) -> Result<HistoryResult> {
        let params = [
            ("currencyPair", backend_pair(&symbol_info.ticker)),
            ("type", backend_interval(resolution)),
        ];

        let response = self
            .requester
            .send_request(&self.base_url, "kline/klineList", &params)
            .await
            .map_err(|err| {
                let reason = err.to_string();
                warn!("HistoryProvider: get_bars failed for {}: {reason}", symbol_info.ticker);
                FeedError::message(reason)
            })?;

        parse_history_payload(&response)
    }
}

fn parse_history_payload(root: &Value) -> Result<HistoryResult> {
    let status = root.get("status").and_then(Value::as_i64);
    if status != Some(STATUS_OK) {
        let errmsg = root
            .get("errmsg")
            .and_then(Value::as_str)
            .unwrap_or("history request rejected by backend");
        return Err(FeedError::backend(errmsg));
    }

    let kline = root["dataWrapper"]["kline"]
        .as_array()
        .ok_or_else(|| FeedError::message("History payload missing kline array"))?;

    if kline.is_empty() {
        return Ok(HistoryResult {
            bars: Vec::new(),
            meta: HistoryMeta {
                no_data: true,
                next_time: root.get("nextTime").and_then(Value::as_i64),
            },
        });
    }

    let mut bars = Vec::with_capacity(kline.len());
    for entry in kline {
        bars.push(Bar {
            time: integer_field(entry, "time_stamp")?,
            open: number_field(entry, "opening_price")?,
            high: number_field(entry, "max_price")?,
            low: number_field(entry, "min_price")?,
            close: number_field(entry, "closing_price")?,
            volume: number_field(entry, "volume_quantity")?,
        });
    }

    Ok(HistoryResult {
        bars,
        meta: HistoryMeta {
            no_data: false,
            next_time: None,
        },
    })
}

/// Candle fields may arrive as JSON numbers or as numeric strings.
fn number_field(entry: &Value, key: &str) -> Result<f64> {
    let value = entry
        .get(key)
        .ok_or_else(|| FeedError::message(format!("Candle entry missing `{key}`")))?;
    match value {
        Value::Number(num) => num
            .as_f64()
            .ok_or_else(|| FeedError::message(format!("Numeric value out of range for `{key}`"))),
        Value::String(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| FeedError::message(format!("Failed to parse `{key}` value '{raw}' as float"))),
        _ => Err(FeedError::message(format!(
            "Unexpected non-numeric value for `{key}` in candle entry"
        ))),
    }
}

fn integer_field(entry: &Value, key: &str) -> Result<i64> {
    let value = entry
        .get(key)
        .ok_or_else(|| FeedError::message(format!("Candle entry missing `{key}`")))?;
    match value {
        Value::Number(num) => num
            .as_i64()
            .ok_or_else(|| FeedError::message(format!("Numeric value out of range for `{key}`"))),
        Value::String(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| FeedError::message(format!("Failed to parse `{key}` value '{raw}' as integer"))),
        _ => Err(FeedError::message(format!(
            "Unexpected non-numeric value for `{key}` in candle entry"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_resolution_codes_to_backend_intervals() {
        assert_eq!(backend_interval("D"), "day");
        assert_eq!(backend_interval("1D"), "day1");
        assert_eq!(backend_interval("3D"), "day3");
        assert_eq!(backend_interval("1W"), "week1");
        assert_eq!(backend_interval("M"), "month");
        assert_eq!(backend_interval("60"), "hour1");
        assert_eq!(backend_interval("240"), "minute240");
        assert_eq!(backend_interval("1"), "minute1");
    }

    #[test]
    fn parses_candles_with_string_prices() {
        let raw = serde_json::json!({
            "status": 0,
            "dataWrapper": {
                "kline": [
                    {
                        "time_stamp": 1700000000,
                        "opening_price": "42000.5",
                        "closing_price": "42100",
                        "max_price": 42150.0,
                        "min_price": "41900.25",
                        "volume_quantity": "12.5"
                    },
                    {
                        "time_stamp": 1700003600,
                        "opening_price": 42100.0,
                        "closing_price": 42050.0,
                        "max_price": 42200.0,
                        "min_price": 42000.0,
                        "volume_quantity": 8.25
                    }
                ]
            }
        });

        let result = parse_history_payload(&raw).expect("history payload parses");
        assert_eq!(result.bars.len(), 2);
        assert!(!result.meta.no_data);
        assert!(result.meta.next_time.is_none());
        assert_eq!(result.bars[0].time, 1700000000);
        assert!((result.bars[0].open - 42000.5).abs() < 1e-6);
        assert!((result.bars[0].low - 41900.25).abs() < 1e-6);
        assert!((result.bars[0].volume - 12.5).abs() < 1e-6);
        assert!((result.bars[1].close - 42050.0).abs() < 1e-6);
    }

    #[test]
    fn empty_kline_yields_no_data_with_next_time_hint() {
        let raw = serde_json::json!({
            "status": 0,
            "dataWrapper": { "kline": [] },
            "nextTime": 1690000000
        });

        let result = parse_history_payload(&raw).expect("empty payload parses");
        assert!(result.bars.is_empty());
        assert!(result.meta.no_data);
        assert_eq!(result.meta.next_time, Some(1690000000));
    }

    #[test]
    fn empty_kline_without_hint_leaves_next_time_absent() {
        let raw = serde_json::json!({
            "status": 0,
            "dataWrapper": { "kline": [] }
        });

        let result = parse_history_payload(&raw).expect("empty payload parses");
        assert!(result.meta.no_data);
        assert!(result.meta.next_time.is_none());
    }

    #[test]
    fn non_ok_status_carries_backend_message() {
        let raw = serde_json::json!({
            "status": 1,
            "errmsg": "pair not listed"
        });

        let err = parse_history_payload(&raw).expect_err("backend rejection fails");
        assert_eq!(err.to_string(), "pair not listed");
    }

    #[test]
    fn missing_status_is_a_backend_rejection() {
        let raw = serde_json::json!({ "dataWrapper": { "kline": [] } });
        parse_history_payload(&raw).expect_err("missing status fails");
    }
}
