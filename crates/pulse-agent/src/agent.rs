//! Agent run loop: poll on one timer, report on another.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use pulse_core::Metric;

use crate::batch::PendingBatch;
use crate::collector::{Collector, Probe, SysinfoProbe};
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::transport::MetricSender;

/// Capacity of the per-tick handoff channel.
const TICK_CHANNEL_CAPACITY: usize = 64;

pub struct Agent<S, P: Probe = SysinfoProbe> {
    collector: Collector<P>,
    pending: PendingBatch,
    dispatcher: Dispatcher<S>,
    poll_interval: Duration,
    report_interval: Duration,
}

impl<S: MetricSender, P: Probe> Agent<S, P> {
    pub fn new(
        collector: Collector<P>,
        dispatcher: Dispatcher<S>,
        poll_interval: Duration,
        report_interval: Duration,
    ) -> Self {
        Self {
            collector,
            pending: PendingBatch::new(),
            dispatcher,
            poll_interval,
            report_interval,
        }
    }

    pub fn collector(&self) -> &Collector<P> {
        &self.collector
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sample one tick into the pending batch. Sampling plus accumulation
    /// is bounded by the poll interval; whatever arrived before a failure
    /// or the deadline is kept.
    pub async fn poll(&mut self) -> usize {
        let deadline = self.poll_interval;
        let (tx, mut rx) = mpsc::channel::<Metric>(TICK_CHANNEL_CAPACITY);
        let collector = &mut self.collector;
        let pending = &mut self.pending;

        let tick = async {
            let (produced, ()) = tokio::join!(collector.collect(tx), async {
                while let Some(metric) = rx.recv().await {
                    pending.add(metric);
                }
            });
            produced
        };

        match tokio::time::timeout(deadline, tick).await {
            Ok(Ok(produced)) => produced,
            Ok(Err(e)) => {
                warn!(error = %e, "tick aborted early");
                0
            }
            Err(_) => {
                warn!(timeout_ms = deadline.as_millis() as u64, "tick timed out");
                0
            }
        }
    }

    /// Deliver everything pending and wait for the wave.
    pub async fn flush(&mut self) -> DispatchReport {
        let batch = self.pending.drain();
        self.dispatcher.dispatch(batch).await
    }

    /// At most one wave runs at a time, so no more than `rate_limit` sends
    /// are ever in flight. A tick that finds a wave still running leaves
    /// the batch pending; it merges into the next wave.
    fn start_wave(&mut self, waves: &mut JoinSet<DispatchReport>) {
        if !waves.is_empty() {
            debug!(pending = self.pending.len(), "previous wave still in flight, deferring report");
            return;
        }
        let batch = self.pending.drain();
        if batch.is_empty() {
            return;
        }
        debug!(metrics = batch.len(), "report wave started");
        let dispatcher = self.dispatcher.clone();
        waves.spawn(async move { dispatcher.dispatch(batch).await });
    }

    /// Poll and report until `shutdown` fires, then send what is pending
    /// and wait for every wave in flight.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> DispatchReport {
        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            report_ms = self.report_interval.as_millis() as u64,
            workers = self.dispatcher.workers(),
            "agent started"
        );

        let mut poll = tokio::time::interval(self.poll_interval);
        let mut report = tokio::time::interval_at(
            tokio::time::Instant::now() + self.report_interval,
            self.report_interval,
        );
        let mut waves = JoinSet::new();
        let mut total = DispatchReport::default();

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.poll().await;
                }
                _ = report.tick() => {
                    self.start_wave(&mut waves);
                }
                Some(done) = waves.join_next(), if !waves.is_empty() => {
                    match done {
                        Ok(part) => total += part,
                        Err(e) => warn!(error = %e, "report wave failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!(pending = self.pending.len(), "agent shutting down, sending pending metrics");
                    break;
                }
            }
        }

        // The running wave finishes before the final one starts.
        total += join_waves(&mut waves).await;
        self.start_wave(&mut waves);
        total += join_waves(&mut waves).await;
        info!(
            polls = self.collector.poll_count(),
            delivered = total.delivered,
            dropped = total.dropped,
            "agent stopped"
        );
        total
    }
}

async fn join_waves(waves: &mut JoinSet<DispatchReport>) -> DispatchReport {
    let mut total = DispatchReport::default();
    while let Some(done) = waves.join_next().await {
        match done {
            Ok(part) => total += part,
            Err(e) => warn!(error = %e, "report wave failed"),
        }
    }
    total
}
