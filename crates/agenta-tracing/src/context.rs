//! Per-unit-of-work trace state.
//!
//! An [`ExecutionContext`] holds the trace being recorded by one logical unit
//! of work (one request, one task). It is passed explicitly to every
//! [`Tracer`](crate::Tracer) operation; contexts never share spans, so two
//! concurrent requests cannot observe each other's active span.
//!
//! When threading a `&mut ExecutionContext` through a call chain is awkward,
//! [`with_context`] installs one in task-local storage for the duration of a
//! future and [`with_current`] borrows it from anywhere inside that future.

use std::cell::RefCell;
use std::mem;

use serde_json::{Value, json};

use crate::id::Id;
use crate::tree::SpanTree;
use crate::types::Span;

tokio::task_local! {
    static CURRENT_CONTEXT: RefCell<ExecutionContext>;
}

/// Lifecycle state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// No trace open.
    Idle,
    /// A trace id is allocated; zero or more spans are open.
    Tracing,
}

/// Mutable trace state of one unit of work.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    trace_id: Option<Id>,
    active_span: Option<Id>,
    trace_tags: Vec<String>,
    tree: SpanTree,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ContextState {
        if self.trace_id.is_some() {
            ContextState::Tracing
        } else {
            ContextState::Idle
        }
    }

    pub fn trace_id(&self) -> Option<&Id> {
        self.trace_id.as_ref()
    }

    pub fn active_span_id(&self) -> Option<&Id> {
        self.active_span.as_ref()
    }

    pub fn active_span(&self) -> Option<&Span> {
        self.active_span.as_ref().and_then(|id| self.tree.get(id))
    }

    pub fn active_span_mut(&mut self) -> Option<&mut Span> {
        let id = self.active_span.as_ref()?;
        self.tree.get_mut(id)
    }

    pub fn span(&self, id: &Id) -> Option<&Span> {
        self.tree.get(id)
    }

    pub fn tags(&self) -> &[String] {
        &self.trace_tags
    }

    pub fn tree(&self) -> &SpanTree {
        &self.tree
    }

    /// Reset every trace-scoped field. The context stays usable.
    pub fn clear(&mut self) {
        self.trace_id = None;
        self.active_span = None;
        self.trace_tags.clear();
        self.tree = SpanTree::new();
    }

    /// Serialized debug payload of the trace held by this context.
    pub fn to_document(&self) -> Value {
        render(self.trace_id.as_ref(), &self.tree)
    }

    pub(crate) fn begin(&mut self, trace_id: Id) {
        self.trace_id = Some(trace_id);
    }

    /// Store a span and make it the active one.
    pub(crate) fn push(&mut self, span: Span) {
        self.active_span = Some(span.id.clone());
        self.tree.push(span);
    }

    pub(crate) fn set_active(&mut self, id: Option<Id>) {
        self.active_span = id;
    }

    pub(crate) fn span_mut(&mut self, id: &Id) -> Option<&mut Span> {
        self.tree.get_mut(id)
    }

    pub(crate) fn extend_tags(&mut self, tags: impl IntoIterator<Item = String>) {
        self.trace_tags.extend(tags);
    }

    /// Move the trace out, leaving the context idle.
    pub(crate) fn take_trace(&mut self) -> Option<Trace> {
        let trace_id = self.trace_id.take()?;
        self.active_span = None;
        Some(Trace {
            trace_id,
            tags: mem::take(&mut self.trace_tags),
            tree: mem::take(&mut self.tree),
        })
    }
}

/// A finished trace handed back by `close_trace`.
#[derive(Debug, Clone)]
pub struct Trace {
    pub trace_id: Id,
    pub tags: Vec<String>,
    pub tree: SpanTree,
}

impl Trace {
    pub fn spans(&self) -> &[Span] {
        self.tree.spans()
    }

    pub fn root(&self) -> Option<&Span> {
        self.tree.root()
    }

    /// Serialized debug payload.
    pub fn to_document(&self) -> Value {
        render(Some(&self.trace_id), &self.tree)
    }
}

fn render(trace_id: Option<&Id>, tree: &SpanTree) -> Value {
    let root = tree.root();
    json!({
        "trace_id": trace_id,
        "cost": root.and_then(|s| s.cost),
        "tokens": root.and_then(|s| s.tokens),
        "latency": root.and_then(Span::latency_secs),
        "spans": tree.to_document(),
    })
}

/// Run `f` with a fresh task-local context.
///
/// Returns the future's output together with the context as it was left,
/// so spans that were never closed are still inspectable.
pub async fn with_context<F, T>(f: F) -> (T, ExecutionContext)
where
    F: std::future::Future<Output = T>,
{
    CURRENT_CONTEXT
        .scope(RefCell::new(ExecutionContext::new()), async {
            let result = f.await;
            let ctx = CURRENT_CONTEXT.with(|c| mem::take(&mut *c.borrow_mut()));
            (result, ctx)
        })
        .await
}

/// Synchronous counterpart of [`with_context`].
pub fn with_context_sync<F, T>(f: F) -> (T, ExecutionContext)
where
    F: FnOnce() -> T,
{
    CURRENT_CONTEXT.sync_scope(RefCell::new(ExecutionContext::new()), || {
        let result = f();
        let ctx = CURRENT_CONTEXT.with(|c| mem::take(&mut *c.borrow_mut()));
        (result, ctx)
    })
}

/// Borrow the task-local context.
///
/// Returns `None` outside a scope, and also for a nested call made while
/// an outer `with_current` still holds the context.
pub fn with_current<R>(f: impl FnOnce(&mut ExecutionContext) -> R) -> Option<R> {
    CURRENT_CONTEXT
        .try_with(|c| match c.try_borrow_mut() {
            Ok(mut ctx) => Some(f(&mut ctx)),
            Err(_) => {
                tracing::error!("Execution context already borrowed, ignoring nested access");
                None
            }
        })
        .ok()
        .flatten()
}

/// Whether the current task runs inside [`with_context`].
pub fn is_scoped() -> bool {
    CURRENT_CONTEXT.try_with(|_| ()).is_ok()
}
