//! Latest-known values per entity, read by the display loop.
//!
//! Every field starts out as "not available" (`None` or
//! [`Percentage::NotApplicable`]) so a reader can never mistake an unset
//! field for a real zero.

use crate::collector::{SystemMemory, SystemSwap};
use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// A percentage rounded to two decimals, or "not applicable" when the
/// denominator is zero or unknown.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Percentage {
    Value(f64),
    #[default]
    NotApplicable,
}

impl Percentage {
    pub fn value(self) -> Option<f64> {
        match self {
            Percentage::Value(v) => Some(v),
            Percentage::NotApplicable => None,
        }
    }
}

/// `used / total * 100`, rounded to 2 decimal places.
pub fn percent(used: f64, total: f64) -> Percentage {
    if total == 0.0 || !total.is_finite() || !used.is_finite() {
        return Percentage::NotApplicable;
    }
    Percentage::Value((used / total * 10_000.0).round() / 100.0)
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Percentage::Value(v) => write!(f, "{:.2}%", v),
            Percentage::NotApplicable => f.write_str("NA"),
        }
    }
}

impl Serialize for Percentage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Percentage::Value(v) => serializer.serialize_f64(*v),
            Percentage::NotApplicable => serializer.serialize_none(),
        }
    }
}

/// Immutable identity of a process, known once its dispatcher validated it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub ppid: u32,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
struct ProcessMetrics {
    cpu_percent: Option<f64>,
    resident_mem: Option<u64>,
    num_threads: Option<u64>,
    num_children: Option<usize>,
    status: Option<String>,
    cpu_time: Option<f64>,
}

/// Frontend cache of one process.
///
/// Tracers write disjoint fields; the dispatcher owns `num_children` and the
/// CPU-time watermark.
#[derive(Debug)]
pub struct ProcessCache {
    pid: u32,
    identity: OnceLock<ProcessIdentity>,
    metrics: RwLock<ProcessMetrics>,
}

impl ProcessCache {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            identity: OnceLock::new(),
            metrics: RwLock::new(ProcessMetrics::default()),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Sets the identity. Later calls are ignored.
    pub fn set_identity(&self, ppid: u32, name: String) {
        let _ = self.identity.set(ProcessIdentity { ppid, name });
    }

    pub fn identity(&self) -> Option<&ProcessIdentity> {
        self.identity.get()
    }

    pub fn set_cpu_percent(&self, value: f64) {
        self.metrics.write().cpu_percent = Some(value);
    }

    pub fn set_resident_mem(&self, value: u64) {
        self.metrics.write().resident_mem = Some(value);
    }

    pub fn set_num_threads(&self, value: u64) {
        self.metrics.write().num_threads = Some(value);
    }

    pub fn set_num_children(&self, value: usize) {
        self.metrics.write().num_children = Some(value);
    }

    pub fn set_status(&self, value: String) {
        self.metrics.write().status = Some(value);
    }

    /// Raises the CPU-time watermark to `sample` and returns the watermark.
    ///
    /// Negative samples are the "could not read" sentinel and never lower or
    /// initialise the watermark.
    pub fn raise_cpu_time(&self, sample: f64) -> Option<f64> {
        let mut metrics = self.metrics.write();
        if sample >= 0.0 {
            metrics.cpu_time = Some(metrics.cpu_time.map_or(sample, |cur| cur.max(sample)));
        }
        metrics.cpu_time
    }

    pub fn cpu_time(&self) -> Option<f64> {
        self.metrics.read().cpu_time
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        let metrics = self.metrics.read().clone();
        let identity = self.identity.get();
        ProcessSnapshot {
            pid: self.pid,
            ppid: identity.map(|i| i.ppid),
            name: identity.map(|i| i.name.clone()),
            status: metrics.status,
            cpu_percent: metrics.cpu_percent,
            cpu_time: metrics.cpu_time,
            resident_mem: metrics.resident_mem,
            num_threads: metrics.num_threads,
            num_children: metrics.num_children,
        }
    }
}

/// Point-in-time copy of a [`ProcessCache`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub ppid: Option<u32>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub cpu_percent: Option<f64>,
    pub cpu_time: Option<f64>,
    pub resident_mem: Option<u64>,
    pub num_threads: Option<u64>,
    pub num_children: Option<usize>,
}

/// Aggregated system view, recomputed as a whole by the system dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemSummary {
    /// Mean utilisation across cores.
    pub cpu_percent: Percentage,
    pub vm_total: Option<u64>,
    pub vm_avail: Option<u64>,
    pub vm_buffered: Option<u64>,
    pub vm_shared: Option<u64>,
    pub vm_avail_percent: Percentage,
    pub swap_total: Option<u64>,
    pub swap_used: Option<u64>,
    pub swap_avail_percent: Percentage,
}

impl SystemSummary {
    /// Derives the summary from raw tracer samples.
    pub fn derive(
        per_core: Option<&[f64]>,
        memory: Option<&SystemMemory>,
        swap: Option<&SystemSwap>,
    ) -> Self {
        let cpu_percent = match per_core {
            Some(cores) if !cores.is_empty() => {
                percent(cores.iter().sum::<f64>() / cores.len() as f64, 100.0)
            }
            _ => Percentage::NotApplicable,
        };
        let vm_avail_percent = memory.map_or(Percentage::NotApplicable, |m| {
            percent(m.available as f64, m.total as f64)
        });
        let swap_avail_percent = swap.map_or(Percentage::NotApplicable, |s| {
            percent(s.total.saturating_sub(s.used) as f64, s.total as f64)
        });

        Self {
            cpu_percent,
            vm_total: memory.map(|m| m.total),
            vm_avail: memory.map(|m| m.available),
            vm_buffered: memory.map(|m| m.buffers),
            vm_shared: memory.map(|m| m.shared),
            vm_avail_percent,
            swap_total: swap.map(|s| s.total),
            swap_used: swap.map(|s| s.used),
            swap_avail_percent,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SystemSamples {
    per_core: Option<Vec<f64>>,
    memory: Option<SystemMemory>,
    swap: Option<SystemSwap>,
}

/// Frontend cache of the system entity.
#[derive(Debug, Default)]
pub struct SystemCache {
    samples: RwLock<SystemSamples>,
    summary: RwLock<SystemSummary>,
}

impl SystemCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_per_core(&self, per_core: Vec<f64>) {
        self.samples.write().per_core = Some(per_core);
    }

    pub fn set_memory(&self, memory: SystemMemory) {
        self.samples.write().memory = Some(memory);
    }

    pub fn set_swap(&self, swap: SystemSwap) {
        self.samples.write().swap = Some(swap);
    }

    /// Recomputes the summary from the latest samples and replaces it.
    pub fn refresh_summary(&self) {
        let summary = {
            let samples = self.samples.read();
            SystemSummary::derive(
                samples.per_core.as_deref(),
                samples.memory.as_ref(),
                samples.swap.as_ref(),
            )
        };
        *self.summary.write() = summary;
    }

    pub fn summary(&self) -> SystemSummary {
        self.summary.read().clone()
    }

    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot {
            per_core_cpu: self.samples.read().per_core.clone(),
            summary: self.summary(),
        }
    }
}

/// Point-in-time copy of a [`SystemCache`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub per_core_cpu: Option<Vec<f64>>,
    #[serde(flatten)]
    pub summary: SystemSummary,
}

/// The cache owned by one dispatcher.
#[derive(Debug, Clone)]
pub enum FrontendCache {
    System(Arc<SystemCache>),
    Process(Arc<ProcessCache>),
}
