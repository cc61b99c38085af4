//! A work queue that collapses any number of recompute requests into a single pending item.

use crate::rate_limit::TokenBucket;
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use std::future::Future;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Requests a recompute. Cheap to clone and safe to call from index callbacks.
#[derive(Clone, Debug)]
pub struct Handle(mpsc::Sender<()>);

#[derive(Debug)]
pub struct Queue {
    rx: mpsc::Receiver<()>,
    limiter: TokenBucket,
    metrics: QueueMetrics,
}

#[derive(Clone, Debug, Default)]
pub struct QueueMetrics {
    runs: Counter,
    failures: Counter,
}

// === impl Handle ===

impl Handle {
    /// Marks the queue as pending. Does nothing if a run is already pending or the queue has shut
    /// down.
    pub fn enqueue(&self) {
        match self.0.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => {
                tracing::trace!("Queue closed; dropping request");
            }
        }
    }
}

// === impl Queue ===

impl Queue {
    pub fn new(limiter: TokenBucket, metrics: QueueMetrics) -> (Handle, Self) {
        let (tx, rx) = mpsc::channel(1);
        let queue = Self {
            rx,
            limiter,
            metrics,
        };
        (Handle(tx), queue)
    }

    /// Runs `handler` once per pending item until `shutdown` fires.
    ///
    /// A failed run is re-enqueued, so it is retried once the rate limiter allows.
    pub async fn run<F, Fut>(mut self, mut handler: F, shutdown: CancellationToken)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let mut retry = false;
        loop {
            if !retry {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    next = self.rx.recv() => {
                        if next.is_none() {
                            break;
                        }
                    }
                }
            }
            retry = false;

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.limiter.acquire() => {}
            }

            // Requests that arrived while waiting on the limiter are satisfied by this run.
            while self.rx.try_recv().is_ok() {}

            self.metrics.runs.inc();
            if let Err(error) = handler().await {
                self.metrics.failures.inc();
                tracing::warn!(%error, "Recompute failed; retrying");
                retry = true;
            }
        }

        self.rx.close();
        tracing::debug!("Queue shut down");
    }
}

// === impl QueueMetrics ===

impl QueueMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let runs = Counter::default();
        prom.register("runs", "Count of recompute passes", runs.clone());

        let failures = Counter::default();
        prom.register(
            "failures",
            "Count of recompute passes that failed",
            failures.clone(),
        );

        Self {
            runs,
            failures,
        }
    }
}
