//! Telemetry sampling.
//!
//! Each tick produces a fixed set of gauges (process, host memory, one
//! per CPU core, a random liveness value) plus the `PollCount` counter
//! onto a channel that is closed when the tick is done. If a probe
//! fails, the tick stops there; whatever was already sent stays sent.

use sysinfo::{Pid, System};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use pulse_core::Metric;

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("{what} statistics unavailable: {reason}")]
    Unavailable { what: &'static str, reason: String },

    #[error("metric channel closed")]
    ChannelClosed,
}

impl CollectError {
    fn unavailable(what: &'static str, reason: impl Into<String>) -> Self {
        CollectError::Unavailable {
            what,
            reason: reason.into(),
        }
    }
}

/// Resource usage of the agent process itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSample {
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
    pub cpu_percent: f32,
    pub disk_read_bytes: u64,
    pub disk_written_bytes: u64,
}

/// Host memory and swap, in bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemorySample {
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub total_swap: u64,
    pub free_swap: u64,
}

/// Source of raw telemetry.
pub trait Probe: Send {
    fn process(&mut self) -> Result<ProcessSample, CollectError>;
    fn memory(&mut self) -> Result<MemorySample, CollectError>;
    /// Utilisation of each core in percent, in core order.
    fn cpu(&mut self) -> Result<Vec<f32>, CollectError>;
}

/// [`Probe`] backed by `sysinfo`. CPU figures are relative to the
/// previous refresh, so the first tick reports zeros.
pub struct SysinfoProbe {
    system: System,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for SysinfoProbe {
    fn process(&mut self) -> Result<ProcessSample, CollectError> {
        let pid = self
            .pid
            .ok_or_else(|| CollectError::unavailable("process", "unknown pid"))?;
        if !self.system.refresh_process(pid) {
            return Err(CollectError::unavailable("process", format!("pid {pid} not found")));
        }
        let process = self
            .system
            .process(pid)
            .ok_or_else(|| CollectError::unavailable("process", format!("pid {pid} not found")))?;
        let disk = process.disk_usage();
        Ok(ProcessSample {
            resident_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
            cpu_percent: process.cpu_usage(),
            disk_read_bytes: disk.total_read_bytes,
            disk_written_bytes: disk.total_written_bytes,
        })
    }

    fn memory(&mut self) -> Result<MemorySample, CollectError> {
        self.system.refresh_memory();
        if self.system.total_memory() == 0 {
            return Err(CollectError::unavailable("host memory", "total memory reported as 0"));
        }
        Ok(MemorySample {
            total: self.system.total_memory(),
            free: self.system.free_memory(),
            used: self.system.used_memory(),
            total_swap: self.system.total_swap(),
            free_swap: self.system.free_swap(),
        })
    }

    fn cpu(&mut self) -> Result<Vec<f32>, CollectError> {
        self.system.refresh_cpu();
        let usage: Vec<f32> = self.system.cpus().iter().map(|c| c.cpu_usage()).collect();
        if usage.is_empty() {
            return Err(CollectError::unavailable("cpu", "no cores reported"));
        }
        Ok(usage)
    }
}

struct Emitter {
    tx: mpsc::Sender<Metric>,
    produced: usize,
}

impl Emitter {
    async fn emit(&mut self, metric: Metric) -> Result<(), CollectError> {
        self.tx
            .send(metric)
            .await
            .map_err(|_| CollectError::ChannelClosed)?;
        self.produced += 1;
        Ok(())
    }

    async fn gauge(&mut self, id: &str, value: f64) -> Result<(), CollectError> {
        self.emit(Metric::gauge(id, value)).await
    }
}

/// Periodic sampler.
pub struct Collector<P: Probe = SysinfoProbe> {
    probe: P,
    polls: i64,
}

impl Collector<SysinfoProbe> {
    pub fn new() -> Self {
        Self::with_probe(SysinfoProbe::new())
    }
}

impl Default for Collector<SysinfoProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Probe> Collector<P> {
    pub fn with_probe(probe: P) -> Self {
        Self { probe, polls: 0 }
    }

    /// Ticks sampled over the collector's lifetime.
    pub fn poll_count(&self) -> i64 {
        self.polls
    }

    /// Sample one tick onto `tx`, closing it on return. Returns the number
    /// of metrics produced.
    pub async fn collect(&mut self, tx: mpsc::Sender<Metric>) -> Result<usize, CollectError> {
        self.polls += 1;
        let mut out = Emitter { tx, produced: 0 };

        out.emit(Metric::counter(POLL_COUNT, 1)).await?;
        out.gauge(RANDOM_VALUE, rand::random::<f64>()).await?;

        let process = self.probe.process()?;
        out.gauge("ProcessResidentMemory", process.resident_bytes as f64).await?;
        out.gauge("ProcessVirtualMemory", process.virtual_bytes as f64).await?;
        out.gauge("ProcessCPUUsage", f64::from(process.cpu_percent)).await?;
        out.gauge("ProcessDiskReadBytes", process.disk_read_bytes as f64).await?;
        out.gauge("ProcessDiskWrittenBytes", process.disk_written_bytes as f64).await?;

        let memory = self.probe.memory()?;
        out.gauge("TotalMemory", memory.total as f64).await?;
        out.gauge("FreeMemory", memory.free as f64).await?;
        out.gauge("UsedMemory", memory.used as f64).await?;
        out.gauge("TotalSwap", memory.total_swap as f64).await?;
        out.gauge("FreeSwap", memory.free_swap as f64).await?;

        for (core, usage) in self.probe.cpu()?.into_iter().enumerate() {
            out.gauge(&format!("CPUutilization{}", core + 1), f64::from(usage))
                .await?;
        }

        debug!(poll = self.polls, produced = out.produced, "tick sampled");
        Ok(out.produced)
    }
}
