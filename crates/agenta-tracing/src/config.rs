//! Tracer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default collector host.
pub const DEFAULT_HOST: &str = "http://localhost";

/// Default number of concurrent dispatch workers.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Default collector request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Settings fixed at [`Tracer`](crate::Tracer) construction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Base URL of the platform; `/api` is appended for collector calls.
    pub host: String,
    /// API key. Without one, traces are recorded locally but never dispatched.
    pub api_key: Option<String>,
    /// Application the spans belong to.
    pub app_id: String,
    /// Maximum concurrent dispatches.
    pub max_workers: usize,
    /// Collector request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            api_key: None,
            app_id: String::new(),
            max_workers: DEFAULT_MAX_WORKERS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl TracingConfig {
    pub fn new(host: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            app_id: app_id.into(),
            ..Self::default()
        }
    }

    /// Build from `AGENTA_HOST`, `AGENTA_API_KEY`, `AGENTA_APP_ID` and
    /// `AGENTA_MAX_WORKERS`, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("AGENTA_HOST") {
            config.host = host;
        }
        config.api_key = std::env::var("AGENTA_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        if let Ok(app_id) = std::env::var("AGENTA_APP_ID") {
            config.app_id = app_id;
        }
        if let Ok(workers) = std::env::var("AGENTA_MAX_WORKERS") {
            config.max_workers = workers.parse().map_err(|_| ConfigError::Invalid {
                field: "max_workers",
                reason: format!("'{workers}' is not a number"),
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Collector base URL (`{host}/api`).
    pub fn api_url(&self) -> String {
        format!("{}/api", self.host.trim_end_matches('/'))
    }

    /// Whether dispatch is enabled.
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Missing("host"));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "max_workers",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TracingConfig::default();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.timeout(), Duration::from_secs(120));
        assert!(!config.has_api_key());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_api_url_appends_suffix_once() {
        assert_eq!(
            TracingConfig::new("https://cloud.agenta.ai", "app").api_url(),
            "https://cloud.agenta.ai/api"
        );
        assert_eq!(
            TracingConfig::new("http://localhost/", "app").api_url(),
            "http://localhost/api"
        );
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = TracingConfig::default().with_max_workers(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "max_workers", .. })
        ));
    }

    #[test]
    fn test_empty_api_key_disables_dispatch() {
        let config = TracingConfig::default().with_api_key("");
        assert!(!config.has_api_key());
        assert!(TracingConfig::default().with_api_key("k").has_api_key());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: TracingConfig =
            serde_json::from_str(r#"{"host": "http://h", "app_id": "a1"}"#).unwrap();
        assert_eq!(config.host, "http://h");
        assert_eq!(config.app_id, "a1");
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
    }
}
