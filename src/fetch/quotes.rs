use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FeedError, Result};

use super::Requester;

/// One symbol's quote row: per-symbol status, display name, and the value
/// map (`lp`, `ch`, `chp`, `ask`, `bid`, ...) passed through to the widget.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuoteData {
    pub s: String,
    pub n: String,
    #[serde(default)]
    pub v: Value,
}

/// Fetches current quotes for a set of symbols in one backend call.
pub struct QuotesProvider {
    base_url: String,
    requester: Arc<Requester>,
}

impl QuotesProvider {
    pub fn new(base_url: impl Into<String>, requester: Arc<Requester>) -> Self {
        Self {
            base_url: base_url.into(),
            requester,
        }
    }

    pub async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<QuoteData>> {
        let params = [("symbols", symbols.join(","))];
        let response = self
            .requester
            .send_request(&self.base_url, "quotes", &params)
            .await?;
        parse_quotes_payload(response)
    }
}

fn parse_quotes_payload(root: Value) -> Result<Vec<QuoteData>> {
    match root.get("s").and_then(Value::as_str) {
        Some("ok") => {
            let data = root
                .get("d")
                .cloned()
                .ok_or_else(|| FeedError::message("Quotes payload missing data array"))?;
            serde_json::from_value(data).map_err(FeedError::from)
        }
        _ => {
            let errmsg = root
                .get("errmsg")
                .and_then(Value::as_str)
                .unwrap_or("quotes request rejected by backend");
            Err(FeedError::backend(errmsg))
        }
    }
}
