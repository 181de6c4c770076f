use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings of the HTTP host, read from the `api_host` module section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    pub body_limit_bytes: usize,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub cors_enabled: bool,
    /// Serve `/openapi.json`.
    pub enable_docs: bool,
    pub title: String,
    pub version: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            body_limit_bytes: 16 * 1024 * 1024,
            request_timeout: Duration::from_secs(30),
            cors_enabled: false,
            enable_docs: true,
            title: "FoodHub API".to_string(),
            version: "0.1.0".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_section_keeps_defaults() {
        let cfg: HostConfig =
            serde_json::from_value(json!({ "request_timeout": "5s", "cors_enabled": true })).unwrap();
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert!(cfg.cors_enabled);
        assert_eq!(cfg.body_limit_bytes, HostConfig::default().body_limit_bytes);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_json::from_value::<HostConfig>(json!({ "bogus": 1 })).is_err());
    }
}
