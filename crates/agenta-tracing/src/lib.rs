//! Client-side tracing for LLM applications.
//!
//! This crate records hierarchical execution spans for LLM calls and ships
//! finished traces to the platform's collector:
//!
//! - **Types**: `Span`, `SpanKind`, `SpanStatus` and `LlmTokens`
//! - **Context**: per-request `ExecutionContext`, passed explicitly or scoped task-locally
//! - **Tree**: ordered span storage and the nested debug document
//! - **Aggregation**: cost and token roll-up from children into parents
//! - **Dispatch**: bounded background delivery to a `TraceSink`
//! - **Tracer**: the facade tying the lifecycle together
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use agenta_tracing::{Attributes, ExecutionContext, Tracer, TracingConfig};
//!
//! #[tokio::main]
//! async fn main() -> agenta_tracing::Result<()> {
//!     let tracer = Tracer::new(TracingConfig::from_env()?)?;
//!     let mut ctx = ExecutionContext::new();
//!
//!     tracer.open_span(&mut ctx, "rag", "chain", Attributes::new(), None);
//!     tracer.open_span(&mut ctx, "generate", "llm", Attributes::new(), None);
//!     let outputs = serde_json::json!({"cost": 0.002});
//!     tracer.close_span(&mut ctx, outputs.as_object().cloned().unwrap_or_default());
//!     tracer.close_span(&mut ctx, Attributes::new());
//!     tracer.close_trace(&mut ctx);
//!
//!     tracer.flush_and_wait(Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod id;
pub mod sink;
pub mod testing;
pub mod tracer;
pub mod tree;
pub mod types;
pub mod writer;

// Re-export main types
pub use aggregate::Usage;
pub use config::TracingConfig;
pub use context::{
    ContextState, ExecutionContext, Trace, is_scoped, with_context, with_context_sync,
    with_current,
};
pub use dispatch::DispatchQueue;
pub use error::{ConfigError, Result, SinkError, TracingError};
pub use id::Id;
pub use sink::{Ack, HttpSink, TraceSink};
pub use tracer::{Tracer, TracerBuilder};
pub use tree::SpanTree;
pub use types::{Attributes, LlmTokens, Span, SpanKind, SpanStatus};
pub use writer::{FileLayout, FileSink, TraceRecord};
