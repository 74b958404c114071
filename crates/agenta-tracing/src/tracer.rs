//! The tracing facade.
//!
//! A [`Tracer`] holds the settings shared by every unit of work (collector
//! address, app id, baggage, dispatch queue). Trace state lives in the
//! caller's [`ExecutionContext`], passed to each operation.
//!
//! No operation here returns an error for misuse: closing without an open
//! span, tagging without a trace and similar mistakes are logged at
//! `error!` and ignored, so instrumentation never breaks the host program.

use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;

use crate::aggregate::{self, Usage};
use crate::config::TracingConfig;
use crate::context::{ExecutionContext, Trace};
use crate::dispatch::DispatchQueue;
use crate::error::{Result, TracingError};
use crate::id::Id;
use crate::sink::{HttpSink, TraceSink};
use crate::types::{Attributes, LOCALS_PREFIX, Span, SpanKind, SpanStatus};

/// Environment reported when neither baggage nor the process sets one.
const UNSET_ENVIRONMENT: &str = "unset";

static SHARED: OnceLock<Arc<Tracer>> = OnceLock::new();

/// Builder for [`Tracer`].
pub struct TracerBuilder {
    config: TracingConfig,
    sink: Option<Arc<dyn TraceSink>>,
    handle: Option<Handle>,
}

impl TracerBuilder {
    /// Deliver traces to `sink` instead of the HTTP collector.
    pub fn sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Run dispatch on `handle` instead of the current runtime.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn build(self) -> Result<Tracer> {
        self.config.validate()?;

        let handle = self.handle.or_else(|| Handle::try_current().ok());
        let queue = match handle {
            Some(handle) => {
                let sink = match self.sink {
                    Some(sink) => sink,
                    None => Arc::new(HttpSink::new(&self.config)?),
                };
                Some(DispatchQueue::new(sink, self.config.max_workers, handle))
            }
            None if self.config.has_api_key() => {
                return Err(TracingError::Runtime(
                    "dispatch requires a tokio runtime".to_string(),
                ));
            }
            None => None,
        };

        if !self.config.has_api_key() {
            tracing::warn!(app_id = %self.config.app_id, "No API key configured, traces will not be dispatched");
        }

        Ok(Tracer {
            config: self.config,
            baggage: RwLock::new(Attributes::new()),
            queue,
        })
    }
}

/// Orchestrates the trace and span lifecycle.
#[derive(Debug)]
pub struct Tracer {
    config: TracingConfig,
    baggage: RwLock<Attributes>,
    queue: Option<DispatchQueue>,
}

impl Tracer {
    /// Build a tracer that ships traces to the HTTP collector.
    pub fn new(config: TracingConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: TracingConfig) -> TracerBuilder {
        TracerBuilder {
            config,
            sink: None,
            handle: None,
        }
    }

    /// Install the process-wide instance. The first install wins; later
    /// calls get the existing instance back unchanged.
    pub fn init_shared(tracer: Tracer) -> Arc<Tracer> {
        let requested = tracer.config.clone();
        let mut installed = false;
        let shared = SHARED.get_or_init(|| {
            installed = true;
            Arc::new(tracer)
        });
        if !installed && shared.config != requested {
            tracing::warn!(
                app_id = %requested.app_id,
                "Shared tracer already installed, ignoring new configuration"
            );
        }
        Arc::clone(shared)
    }

    /// The process-wide instance, if one was installed.
    pub fn shared() -> Option<Arc<Tracer>> {
        SHARED.get().cloned()
    }

    pub fn config(&self) -> &TracingConfig {
        &self.config
    }

    pub fn queue(&self) -> Option<&DispatchQueue> {
        self.queue.as_ref()
    }

    /// Snapshot of the baggage.
    pub fn baggage(&self) -> Attributes {
        self.baggage
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge keys into the baggage shared by all contexts. Last write wins.
    pub fn update_baggage(&self, attributes: Attributes) {
        let mut baggage = self.baggage.write().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in attributes {
            baggage.insert(key, value);
        }
    }

    /// Allocate a trace id for an idle context.
    ///
    /// If a trace is already open its id is returned unchanged.
    pub fn open_trace(&self, ctx: &mut ExecutionContext) -> Id {
        if let Some(existing) = ctx.trace_id() {
            tracing::warn!(trace_id = %existing, "Trace already open");
            return existing.clone();
        }

        let trace_id = Id::next();
        tracing::info!(trace_id = %trace_id, "Opened trace");
        ctx.begin(trace_id.clone());
        trace_id
    }

    /// Extend the open trace's tag list.
    pub fn set_trace_tags(
        &self,
        ctx: &mut ExecutionContext,
        tags: impl IntoIterator<Item = impl Into<String>>,
    ) {
        if ctx.trace_id().is_none() {
            tracing::error!("Cannot set trace tags, no open trace");
            return;
        }
        ctx.extend_tags(tags.into_iter().map(Into::into));
    }

    /// Open a span as a child of the active span and make it active.
    ///
    /// The first span of an idle context opens the trace and becomes its
    /// root; the root is stamped with the environment and config baggage.
    pub fn open_span(
        &self,
        ctx: &mut ExecutionContext,
        name: impl Into<String>,
        kind: impl AsRef<str>,
        inputs: Attributes,
        config: Option<Attributes>,
    ) -> Id {
        if ctx.trace_id().is_none() {
            self.open_trace(ctx);
        }

        let parent_id = ctx.active_span_id().cloned();
        let mut span = Span::new(Id::next(), name, SpanKind::new(kind), inputs)
            .with_parent(parent_id)
            .with_app_id(&self.config.app_id);
        span.config = config;

        if span.is_root() {
            self.stamp_baggage(&mut span);
        }

        let span_id = span.id.clone();
        tracing::info!(span_id = %span_id, kind = %span.kind, name = %span.name, "Opened span");
        ctx.push(span);
        span_id
    }

    fn stamp_baggage(&self, span: &mut Span) {
        let baggage = self.baggage.read().unwrap_or_else(PoisonError::into_inner);

        span.environment = Some(resolve_environment(
            &baggage,
            std::env::var("environment").ok(),
        ));

        if span.config.is_none() {
            span.config = baggage.get("config").and_then(Value::as_object).cloned();
        }
    }

    /// Merge keys into the active span's attributes.
    pub fn set_attributes(&self, ctx: &mut ExecutionContext, attributes: Attributes) {
        let Some(span) = ctx.active_span_mut() else {
            tracing::error!(
                keys = ?attributes.keys().collect::<Vec<_>>(),
                "Cannot set attributes, no active span"
            );
            return;
        };

        tracing::debug!(span_id = %span.id, kind = %span.kind, count = attributes.len(), "Setting span attributes");
        for (key, value) in attributes {
            span.attributes.insert(key, value);
        }
    }

    /// Record local variables as `locals.*` attributes.
    pub fn store_locals(&self, ctx: &mut ExecutionContext, locals: Attributes) {
        let attributes = locals
            .into_iter()
            .map(|(k, v)| (format!("{LOCALS_PREFIX}{k}"), v))
            .collect();
        self.set_attributes(ctx, attributes);
    }

    /// Overwrite the active span's status.
    pub fn set_status(&self, ctx: &mut ExecutionContext, status: SpanStatus) {
        let Some(span) = ctx.active_span_mut() else {
            tracing::error!(%status, "Cannot set status, no active span");
            return;
        };

        tracing::debug!(span_id = %span.id, kind = %span.kind, %status, "Setting span status");
        span.status = status;
    }

    /// Textual form of [`set_status`](Self::set_status). Unknown values are
    /// logged and ignored.
    pub fn set_status_str(&self, ctx: &mut ExecutionContext, status: &str) {
        match status.parse() {
            Ok(status) => self.set_status(ctx, status),
            Err(e) => tracing::error!(error = %e, "Cannot set status"),
        }
    }

    /// Close the active span.
    ///
    /// Metered spans fold `outputs.cost` and `outputs.usage` into
    /// themselves; every span then adds its totals into its parent, which
    /// becomes active. Closing the root leaves no active span.
    pub fn close_span(&self, ctx: &mut ExecutionContext, outputs: Attributes) {
        let Some(span) = ctx.active_span_mut() else {
            tracing::error!("Cannot close span, no active span");
            return;
        };

        span.finish(outputs.clone());
        aggregate::fold_outputs(span, &outputs);

        let usage = Usage::of(span);
        let span_id = span.id.clone();
        let kind = span.kind.clone();
        let parent_id = span.parent_id.clone();

        if let Some(parent_id) = &parent_id {
            match ctx.span_mut(parent_id) {
                Some(parent) => {
                    if parent.is_closed() {
                        tracing::warn!(span_id = %span_id, parent_id = %parent_id, "Parent closed before child");
                    }
                    aggregate::accumulate(parent, usage);
                }
                None => {
                    tracing::error!(span_id = %span_id, parent_id = %parent_id, "Parent span missing from trace");
                }
            }
        }
        ctx.set_active(parent_id);

        tracing::info!(span_id = %span_id, kind = %kind, "Closed span");
    }

    /// Close the open trace and return it.
    ///
    /// With an API key the spans are handed to the dispatch queue. Either
    /// way the context returns to idle.
    pub fn close_trace(&self, ctx: &mut ExecutionContext) -> Option<Trace> {
        let Some(trace) = ctx.take_trace() else {
            tracing::error!("Cannot close trace, no trace to close");
            return None;
        };

        let open = trace.spans().iter().filter(|s| !s.is_closed()).count();
        if open > 0 {
            tracing::warn!(trace_id = %trace.trace_id, open, "Closing trace with open spans");
        }

        if !self.config.has_api_key() {
            tracing::warn!(trace_id = %trace.trace_id, "No API key, trace not dispatched");
        } else if let Some(queue) = &self.queue {
            tracing::info!(trace_id = %trace.trace_id, spans = trace.spans().len(), "Sending trace");
            queue.enqueue(trace.trace_id.clone(), trace.spans().to_vec());
        }

        tracing::info!(trace_id = %trace.trace_id, "Closed trace");
        Some(trace)
    }

    /// Serialized debug payload of the context's trace.
    pub fn dump_trace(&self, ctx: &ExecutionContext) -> Value {
        ctx.to_document()
    }

    /// Wait for scheduled dispatches to finish. `false` on timeout.
    pub async fn flush_and_wait(&self, timeout: Duration) -> bool {
        match &self.queue {
            Some(queue) => queue.flush_and_wait(timeout).await,
            None => true,
        }
    }
}

/// Pick the root span's environment: baggage first, then the process
/// `environment` variable, then [`UNSET_ENVIRONMENT`].
fn resolve_environment(baggage: &Attributes, process_env: Option<String>) -> String {
    baggage
        .get("environment")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or(process_env)
        .unwrap_or_else(|| UNSET_ENVIRONMENT.to_string())
}
