use log::debug;
use reqwest::Client;
use serde_json::Value;

use crate::error::Result;

/// Thin GET-and-parse wrapper shared by every backend call.
///
/// One request per invocation, no retries, no timeout beyond the client
/// default; transport and JSON-parse failures propagate unmodified so the
/// caller can extract the message.
pub struct Requester {
    client: Client,
}

impl Requester {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub async fn send_request(
        &self,
        base_url: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value> {
        let url = join_url(base_url, path);
        debug!("New request: {} {:?}", url, params);

        let mut request = self.client.get(&url);
        if !params.is_empty() {
            request = request.query(params);
        }

        let body = request.send().await?.text().await?;
        let value = serde_json::from_str(&body)?;
        Ok(value)
    }
}

impl Default for Requester {
    fn default() -> Self {
        Self::new()
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}
