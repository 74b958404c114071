//! Remote trace sinks.
//!
//! A [`TraceSink`] receives one finished trace at a time from the dispatch
//! queue. [`HttpSink`] posts to the platform's observability collector.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};

use crate::config::TracingConfig;
use crate::error::SinkError;
use crate::id::Id;
use crate::types::Span;

/// Acknowledgement returned by a sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    /// Number of spans the sink accepted.
    pub accepted: usize,
}

/// Destination for finished traces.
#[async_trait]
pub trait TraceSink: Send + Sync {
    /// Deliver all spans of one trace.
    async fn create_traces(&self, trace_id: &Id, spans: &[Span]) -> Result<Ack, SinkError>;

    /// Sink name for logging.
    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct CreateTracesRequest<'a> {
    trace: &'a Id,
    spans: &'a [Span],
}

/// Collector client over HTTP.
pub struct HttpSink {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpSink {
    /// Create a sink for the collector at `config.api_url()`.
    pub fn new(config: &TracingConfig) -> Result<Self, SinkError> {
        Self::with_timeout(
            config.api_url(),
            config.api_key.clone().unwrap_or_default(),
            config.timeout(),
        )
    }

    /// Create a sink for an explicit collector base URL.
    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    fn traces_url(&self) -> String {
        format!("{}/observability/traces/", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl TraceSink for HttpSink {
    async fn create_traces(&self, trace_id: &Id, spans: &[Span]) -> Result<Ack, SinkError> {
        let body = CreateTracesRequest {
            trace: trace_id,
            spans,
        };

        let response = self
            .client
            .post(self.traces_url())
            .header(header::AUTHORIZATION, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(trace_id = %trace_id, status = status.as_u16(), "Collector accepted trace");
        Ok(Ack {
            accepted: spans.len(),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}
