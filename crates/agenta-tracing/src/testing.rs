//! Test doubles.
//!
//! [`MemorySink`] records every delivered trace so tests can assert on what
//! the dispatch queue shipped without a network.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::id::Id;
use crate::sink::{Ack, TraceSink};
use crate::types::Span;

/// One recorded `create_traces` call.
#[derive(Debug, Clone)]
pub struct RecordedTrace {
    pub trace_id: Id,
    pub spans: Vec<Span>,
}

/// In-memory sink that captures calls.
///
/// Clones share the same record, so a test can keep one handle and give
/// another to the tracer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    calls: Arc<Mutex<Vec<RecordedTrace>>>,
    fail_with: Option<String>,
    latency: Option<Duration>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every call with the given message (calls are still recorded).
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    /// Delay every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> Vec<RecordedTrace> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TraceSink for MemorySink {
    async fn create_traces(&self, trace_id: &Id, spans: &[Span]) -> Result<Ack, SinkError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.calls.lock().unwrap().push(RecordedTrace {
            trace_id: trace_id.clone(),
            spans: spans.to_vec(),
        });

        match &self.fail_with {
            Some(message) => Err(SinkError::Rejected(message.clone())),
            None => Ok(Ack {
                accepted: spans.len(),
            }),
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}
