//! The metric source capability consumed by dispatchers and tracers.
//!
//! Every per-process call may fail with [`SourceError::NotFound`] at any time:
//! the process can exit between two reads. Callers treat that as the entity
//! having exited, never as a fault.

use std::collections::BTreeMap;
use std::time::Duration;

/// Error type for metric reads.
#[derive(Debug)]
pub enum SourceError {
    /// The process no longer exists (or is a zombie).
    NotFound(u32),
    /// The metric exists but this user may not read it.
    PermissionDenied(u32),
    /// I/O error reading a source file.
    Io(std::io::Error),
    /// Parse error in a source file.
    Parse(String),
}

impl SourceError {
    /// True for the "entity has exited" class of failures.
    pub fn is_vanished(&self) -> bool {
        matches!(self, SourceError::NotFound(_))
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::NotFound(pid) => write!(f, "process {} disappeared", pid),
            SourceError::PermissionDenied(pid) => write!(f, "permission denied for process {}", pid),
            SourceError::Io(e) => write!(f, "I/O error: {}", e),
            SourceError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e)
    }
}

/// Identity of a process, read once when its dispatcher attaches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessMetadata {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    /// Arguments joined by a single space.
    pub cmdline: String,
    pub exe: String,
    pub cwd: String,
}

/// CPU time accounting of a process, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuTimes {
    /// Kernel-mode time.
    pub system: f64,
    /// User-mode time.
    pub user: f64,
    /// CPU the process last ran on.
    pub processor: i32,
}

impl CpuTimes {
    pub fn total(&self) -> f64 {
        self.system + self.user
    }
}

/// Memory usage of a process, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryInfo {
    pub resident: u64,
    pub virt: u64,
    pub shared: u64,
    pub text: u64,
    pub data: u64,
    pub swap: u64,
}

/// I/O counters of a process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoCounters {
    /// Bytes fetched from the storage layer.
    pub read_bytes: u64,
    /// Bytes sent to the storage layer.
    pub write_bytes: u64,
    /// Bytes passed to read-like syscalls.
    pub read_chars: u64,
    /// Bytes passed to write-like syscalls.
    pub write_chars: u64,
    pub read_ops: u64,
    pub write_ops: u64,
}

/// One file-backed region of a process address space, grouped by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryMap {
    pub path: String,
    pub resident: u64,
    pub size: u64,
    pub swap: u64,
}

/// System-wide memory, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemMemory {
    pub total: u64,
    pub available: u64,
    pub free: u64,
    pub buffers: u64,
    pub cached: u64,
    pub shared: u64,
}

impl SystemMemory {
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }
}

/// System-wide swap, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemSwap {
    pub total: u64,
    pub used: u64,
}

/// A mounted volume with its space accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountedVolume {
    pub device: String,
    pub mount_point: String,
    pub fstype: String,
    pub options: String,
    pub total: u64,
    pub used: u64,
}

/// Point-in-time readings for processes and for the system as a whole.
pub trait MetricSource: Send + Sync {
    /// True while the process exists and is not a zombie.
    fn process_exists(&self, pid: u32) -> bool;

    fn process_metadata(&self, pid: u32) -> Result<ProcessMetadata, SourceError>;

    /// Environment of the process as it was at exec time.
    fn environ(&self, pid: u32) -> Result<Vec<(String, String)>, SourceError>;

    fn memory_maps(&self, pid: u32) -> Result<Vec<MemoryMap>, SourceError>;

    fn cpu_times(&self, pid: u32) -> Result<CpuTimes, SourceError>;

    /// CPU utilisation over `window`. Blocks for the duration of the window.
    ///
    /// `Ok(None)` means no figure could be computed for this window.
    fn cpu_percent(&self, pid: u32, window: Duration) -> Result<Option<f64>, SourceError>;

    fn memory_info(&self, pid: u32) -> Result<MemoryInfo, SourceError>;

    fn io_counters(&self, pid: u32) -> Result<IoCounters, SourceError>;

    /// Direct children of the process.
    fn children(&self, pid: u32) -> Result<Vec<u32>, SourceError>;

    fn num_threads(&self, pid: u32) -> Result<u64, SourceError>;

    /// Scheduler state as a word (`running`, `sleeping`, ...).
    fn status(&self, pid: u32) -> Result<String, SourceError>;

    /// Open descriptors and what they point at.
    fn open_file_descriptors(&self, pid: u32) -> Result<BTreeMap<u32, String>, SourceError>;

    /// Number of logical CPUs.
    fn cpu_count(&self) -> usize;

    fn system_memory(&self) -> Result<SystemMemory, SourceError>;

    fn system_swap(&self) -> Result<SystemSwap, SourceError>;

    /// Per-core utilisation over `window`. Blocks for the duration of the window.
    fn system_cpu_percent_per_core(
        &self,
        window: Duration,
    ) -> Result<Option<Vec<f64>>, SourceError>;

    fn mounted_volumes(&self) -> Result<Vec<MountedVolume>, SourceError>;
}

/// Kernel plus user time of a process in seconds, or `-1.0` if it cannot be read.
///
/// Several callers read this opportunistically, so failure is a value rather
/// than an error.
pub fn total_cpu_time(source: &dyn MetricSource, pid: u32) -> f64 {
    source.cpu_times(pid).map(|t| t.total()).unwrap_or(-1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockProcess, MockSource};

    #[test]
    fn total_cpu_time_sums_kernel_and_user() {
        let source = MockSource::new();
        source.add_process(
            10,
            MockProcess {
                cpu: CpuTimes {
                    system: 1.25,
                    user: 2.5,
                    processor: 0,
                },
                ..MockProcess::new(1, "worker")
            },
        );
        assert_eq!(total_cpu_time(&source, 10), 3.75);
    }

    #[test]
    fn total_cpu_time_of_missing_process_is_negative() {
        let source = MockSource::new();
        assert_eq!(total_cpu_time(&source, 4242), -1.0);
    }

    #[test]
    fn vanished_classification() {
        assert!(SourceError::NotFound(1).is_vanished());
        assert!(!SourceError::PermissionDenied(1).is_vanished());
        assert!(!SourceError::Parse("x".into()).is_vanished());
    }
}
