//! Error types for the tracing SDK.
//!
//! Lifecycle operations on [`Tracer`](crate::Tracer) never return these: misuse
//! is logged and ignored so instrumentation cannot break the host application.
//! Errors only surface from construction and from the sinks.

use thiserror::Error;

/// Result type alias for tracing operations.
pub type Result<T> = std::result::Result<T, TracingError>;

/// Top-level error for fallible SDK entry points.
#[derive(Debug, Error)]
pub enum TracingError {
    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Failure creating or talking to a sink.
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// No async runtime available for background dispatch.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Configuration problems detected at construction time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required value was empty.
    #[error("{0} must not be empty")]
    Missing(&'static str),

    /// A value was present but unusable.
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors raised while shipping a trace to a remote collector.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Transport-layer failure (connect, timeout, TLS).
    #[error("Network error: {0}")]
    Network(String),

    /// The collector answered with a non-success status.
    #[error("Collector returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Local file sink failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure injected by a test double.
    #[error("Rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        SinkError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        SinkError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SinkError::Status {
            status: 401,
            body: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "Collector returned HTTP 401: unauthorized");

        let err = TracingError::from(ConfigError::Missing("host"));
        assert_eq!(
            err.to_string(),
            "Configuration error: host must not be empty"
        );
    }

    #[test]
    fn test_invalid_config_display() {
        let err = ConfigError::Invalid {
            field: "max_workers",
            reason: "must be at least 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for max_workers: must be at least 1"
        );
    }
}
