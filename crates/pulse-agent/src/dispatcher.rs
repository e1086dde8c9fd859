//! Worker pool that ships a report wave.
//!
//! A wave is pushed through a bounded channel shared by `workers` tasks.
//! Each worker sends one metric at a time, retrying transport failures
//! under the configured policy and dropping the metric once retries run
//! out or the server rejects it. The wave ends when the channel is closed
//! and every worker has drained it.

use std::ops::AddAssign;
use std::sync::Arc;

use pulse_core::{Metric, RetryPolicy, retry};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::transport::{MetricSender, SendError};

/// Outcome of one or more waves.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub dropped: usize,
}

impl AddAssign for DispatchReport {
    fn add_assign(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.dropped += other.dropped;
    }
}

pub struct Dispatcher<S> {
    sender: Arc<S>,
    workers: usize,
    retry: RetryPolicy,
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
            workers: self.workers,
            retry: self.retry,
        }
    }
}

impl<S: MetricSender> Dispatcher<S> {
    pub fn new(sender: S, workers: usize, retry: RetryPolicy) -> Self {
        Self {
            sender: Arc::new(sender),
            workers: workers.max(1),
            retry,
        }
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Deliver `metrics` and wait for the wave to finish.
    pub async fn dispatch(&self, metrics: Vec<Metric>) -> DispatchReport {
        if metrics.is_empty() {
            return DispatchReport::default();
        }
        let total = metrics.len();

        let (tx, rx) = mpsc::channel(self.workers);
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = JoinSet::new();
        for worker in 0..self.workers {
            let rx = Arc::clone(&rx);
            let sender = Arc::clone(&self.sender);
            let policy = self.retry;
            workers.spawn(async move { drain(worker, rx, sender, policy).await });
        }

        for metric in metrics {
            if tx.send(metric).await.is_err() {
                break;
            }
        }
        drop(tx);

        let mut report = DispatchReport::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(part) => report += part,
                Err(e) => warn!(error = %e, "dispatch worker failed"),
            }
        }
        info!(
            total,
            delivered = report.delivered,
            dropped = report.dropped,
            "report wave finished"
        );
        report
    }
}

async fn drain<S: MetricSender>(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Metric>>>,
    sender: Arc<S>,
    policy: RetryPolicy,
) -> DispatchReport {
    let mut report = DispatchReport::default();
    loop {
        let next = rx.lock().await.recv().await;
        let Some(metric) = next else {
            break;
        };
        match retry(policy, SendError::is_transport, || sender.send(&metric)).await {
            Ok(stored) => {
                report.delivered += 1;
                debug!(worker, id = %metric.id, stored = %stored.value, "metric delivered");
            }
            Err(e) => {
                report.dropped += 1;
                warn!(worker, kind = %metric.kind(), id = %metric.id, error = %e, "metric dropped");
            }
        }
    }
    report
}
