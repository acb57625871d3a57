use serde::{Deserialize, Serialize};

use crate::error::{FeedError, Result};

/// Exchange descriptor advertised to the widget through the configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Exchange {
    pub value: String,
    pub name: String,
    pub desc: String,
}

/// Negotiated feed configuration. Built once at adapter construction and
/// never mutated afterwards; a backend-provided variant can be fetched via
/// `UdfDatafeed::request_configuration`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatafeedConfiguration {
    pub supports_search: bool,
    pub supports_group_request: bool,
    #[serde(default)]
    pub supports_marks: bool,
    #[serde(default)]
    pub supports_timescale_marks: bool,
    #[serde(default)]
    pub supports_time: bool,
    pub supported_resolutions: Vec<String>,
    #[serde(default)]
    pub exchanges: Vec<Exchange>,
}

pub const DEFAULT_RESOLUTIONS: &[&str] = &["1", "5", "15", "30", "60", "1D", "1W", "1M"];

impl Default for DatafeedConfiguration {
    fn default() -> Self {
        Self {
            supports_search: true,
            supports_group_request: false,
            supports_marks: false,
            supports_timescale_marks: false,
            supports_time: false,
            supported_resolutions: DEFAULT_RESOLUTIONS.iter().map(|s| s.to_string()).collect(),
            exchanges: Vec::new(),
        }
    }
}

impl DatafeedConfiguration {
    /// Capability invariant: symbol lookup must be possible through at least
    /// one of the search endpoint or the group request index.
    pub fn validate(&self) -> Result<()> {
        if !self.supports_search && !self.supports_group_request {
            return Err(FeedError::message(
                "Unsupported datafeed configuration. Must either support search, or support group request",
            ));
        }
        Ok(())
    }

    /// The symbols storage serves every lookup the search endpoint cannot.
    pub(crate) fn needs_symbols_storage(&self) -> bool {
        self.supports_group_request || !self.supports_search
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_is_valid() {
        let config = DatafeedConfiguration::default();
        config.validate().expect("default configuration validates");
        assert!(config.supports_search);
        assert!(!config.supports_group_request);
        assert_eq!(config.supported_resolutions.len(), 8);
        assert!(config.exchanges.is_empty());
        assert!(!config.needs_symbols_storage());
    }

    #[test]
    fn rejects_configuration_without_any_lookup_path() {
        let config = DatafeedConfiguration {
            supports_search: false,
            supports_group_request: false,
            ..DatafeedConfiguration::default()
        };
        let err = config.validate().expect_err("invariant violation is fatal");
        assert!(err.to_string().contains("Unsupported datafeed configuration"));
    }

    #[test]
    fn group_request_mode_needs_storage() {
        let config = DatafeedConfiguration {
            supports_group_request: true,
            ..DatafeedConfiguration::default()
        };
        assert!(config.needs_symbols_storage());

        let config = DatafeedConfiguration {
            supports_search: false,
            supports_group_request: true,
            ..DatafeedConfiguration::default()
        };
        assert!(config.needs_symbols_storage());
    }

    #[test]
    fn deserializes_backend_configuration_with_missing_exchanges() {
        let raw = r#"{
            "supports_search": true,
            "supports_group_request": false,
            "supports_marks": true,
            "supported_resolutions": ["1", "1D"]
        }"#;
        let config: DatafeedConfiguration =
            serde_json::from_str(raw).expect("backend configuration parses");
        assert!(config.supports_marks);
        assert!(!config.supports_time);
        assert!(config.exchanges.is_empty());
        assert_eq!(config.supported_resolutions, vec!["1", "1D"]);
    }
}
