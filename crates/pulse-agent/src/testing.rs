//! Test doubles shared by the agent's unit tests.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pulse_core::Metric;

use crate::collector::{CollectError, MemorySample, Probe, ProcessSample};
use crate::transport::{MetricSender, SendError};

/// Fixed telemetry; host memory can be made to fail.
#[derive(Default)]
pub struct FakeProbe {
    pub memory_fails: bool,
}

impl Probe for FakeProbe {
    fn process(&mut self) -> Result<ProcessSample, CollectError> {
        Ok(ProcessSample {
            resident_bytes: 1024,
            ..Default::default()
        })
    }

    fn memory(&mut self) -> Result<MemorySample, CollectError> {
        if self.memory_fails {
            return Err(CollectError::Unavailable {
                what: "host memory",
                reason: "denied".into(),
            });
        }
        Ok(MemorySample {
            total: 8,
            free: 3,
            used: 5,
            ..Default::default()
        })
    }

    fn cpu(&mut self) -> Result<Vec<f32>, CollectError> {
        Ok(vec![12.5, 50.0])
    }
}

/// Records deliveries; can fail transiently, reject outright, lose the
/// reply, or take its time.
#[derive(Default)]
pub struct MockSender {
    transient_failures: AtomicU32,
    reject: bool,
    unanswered: bool,
    delay: Duration,
    attempts: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delivered: Mutex<Vec<Metric>>,
}

impl MockSender {
    pub fn ok() -> Self {
        Self::default()
    }

    /// Fails the first `n` attempts with a transport error.
    pub fn flaky(n: u32) -> Self {
        Self {
            transient_failures: AtomicU32::new(n),
            ..Self::default()
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    /// Every send goes out but no reply comes back.
    pub fn unanswered() -> Self {
        Self {
            unanswered: true,
            ..Self::default()
        }
    }

    /// Each send takes `delay` before it succeeds.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of sends observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<Metric> {
        self.delivered.lock().unwrap().clone()
    }

    fn outcome(&self, metric: &Metric) -> Result<Metric, SendError> {
        if self.reject {
            return Err(SendError::Rejected {
                status: "400 Bad Request".into(),
                message: "no".into(),
            });
        }
        if self.unanswered {
            return Err(SendError::Unconfirmed("no reply".into()));
        }
        let failed = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(SendError::Transport("connection refused".into()));
        }
        self.delivered.lock().unwrap().push(metric.clone());
        Ok(metric.clone())
    }
}

impl MetricSender for MockSender {
    async fn send(&self, metric: &Metric) -> Result<Metric, SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = self.outcome(metric);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Lets a test keep a handle on the mock after handing it to an agent.
impl MetricSender for Arc<MockSender> {
    async fn send(&self, metric: &Metric) -> Result<Metric, SendError> {
        self.as_ref().send(metric).await
    }
}
