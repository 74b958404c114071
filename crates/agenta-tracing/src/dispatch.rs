//! Background dispatch of finished traces.
//!
//! [`DispatchQueue::enqueue`] returns immediately; delivery runs on the
//! queue's tokio runtime with at most `max_workers` sink calls in flight.
//! Jobs go through a channel to a single dispatcher task that hands out
//! permits in arrival order, so deliveries start in submission order. A
//! failed delivery is logged and dropped: there are no retries and nothing
//! is reported back to the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore, mpsc};

use crate::id::Id;
use crate::sink::TraceSink;
use crate::types::Span;

#[derive(Debug, Default)]
struct Stats {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight count even if the sink panics.
struct InFlight(Arc<Stats>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// One trace waiting for a worker.
struct Job {
    key: Id,
    spans: Vec<Span>,
    guard: InFlight,
}

/// Bounded fire-and-forget delivery queue.
pub struct DispatchQueue {
    sink: Arc<dyn TraceSink>,
    jobs: mpsc::UnboundedSender<Job>,
    max_workers: usize,
    stats: Arc<Stats>,
}

impl DispatchQueue {
    /// Create a queue that runs deliveries on `handle`.
    pub fn new(sink: Arc<dyn TraceSink>, max_workers: usize, handle: Handle) -> Self {
        let max_workers = max_workers.max(1);
        let stats = Arc::new(Stats::default());
        let (jobs, rx) = mpsc::unbounded_channel();

        handle.spawn(run_dispatcher(
            rx,
            Arc::clone(&sink),
            Arc::new(Semaphore::new(max_workers)),
            Arc::clone(&stats),
        ));

        Self {
            sink,
            jobs,
            max_workers,
            stats,
        }
    }

    /// Create a queue on the runtime of the calling task.
    ///
    /// Returns `None` outside a tokio runtime.
    pub fn for_current_runtime(sink: Arc<dyn TraceSink>, max_workers: usize) -> Option<Self> {
        Handle::try_current()
            .ok()
            .map(|handle| Self::new(sink, max_workers, handle))
    }

    /// Schedule delivery of one trace and return without waiting.
    pub fn enqueue(&self, key: Id, spans: Vec<Span>) {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.stats.in_flight.fetch_add(1, Ordering::AcqRel);

        tracing::debug!(trace_id = %key, spans = spans.len(), "Queued trace for dispatch");

        let job = Job {
            key,
            spans,
            guard: InFlight(Arc::clone(&self.stats)),
        };
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(job) {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(trace_id = %job.key, "Dispatcher stopped, dropping trace");
        }
    }

    /// Wait until every scheduled delivery has finished.
    ///
    /// Returns `false` if `timeout` elapsed first. In-flight deliveries are
    /// not cancelled either way.
    pub async fn flush_and_wait(&self, timeout: Duration) -> bool {
        let stats = Arc::clone(&self.stats);
        let drained = async move {
            loop {
                let notified = stats.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if stats.in_flight.load(Ordering::Acquire) == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }

    /// Traces handed to [`enqueue`](Self::enqueue).
    pub fn submitted(&self) -> usize {
        self.stats.submitted.load(Ordering::Relaxed)
    }

    /// Traces the sink acknowledged.
    pub fn completed(&self) -> usize {
        self.stats.completed.load(Ordering::Relaxed)
    }

    /// Traces dropped after a sink error.
    pub fn failed(&self) -> usize {
        self.stats.failed.load(Ordering::Relaxed)
    }

    /// Traces not yet finished.
    pub fn in_flight(&self) -> usize {
        self.stats.in_flight.load(Ordering::Acquire)
    }
}

/// Pull jobs in arrival order and start each one once a permit is free.
///
/// Exits when every sender is gone and the channel is drained.
async fn run_dispatcher(
    mut rx: mpsc::UnboundedReceiver<Job>,
    sink: Arc<dyn TraceSink>,
    permits: Arc<Semaphore>,
    stats: Arc<Stats>,
) {
    while let Some(job) = rx.recv().await {
        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(trace_id = %job.key, "Dispatch permits closed, dropping trace");
                continue;
            }
        };

        let sink = Arc::clone(&sink);
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            let _permit = permit;
            let Job { key, spans, guard } = job;
            let _guard = guard;

            match sink.create_traces(&key, &spans).await {
                Ok(ack) => {
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        trace_id = %key,
                        sink = sink.name(),
                        accepted = ack.accepted,
                        "Sent trace"
                    );
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        trace_id = %key,
                        sink = sink.name(),
                        error = %e,
                        "Trace dispatch failed, dropping trace"
                    );
                }
            }
        });
    }
    tracing::debug!("Dispatch queue closed");
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("sink", &self.sink.name())
            .field("max_workers", &self.max_workers)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
