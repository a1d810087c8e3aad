//! Process and system metrics for Linux.
//!
//! This module provides the metric source consumed by dispatchers and tracers,
//! a `/proc` implementation of it, and mocks for testing on any host.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  MetricSource (trait)                    │
//! │  ┌────────────────────────────┐   ┌───────────────────┐  │
//! │  │       ProcfsSource<F>      │   │    MockSource     │  │
//! │  │  - /proc/[pid]/*           │   │  (process table)  │  │
//! │  │  - /proc/{meminfo,stat,    │   └───────────────────┘  │
//! │  │    mounts}, statvfs        │                          │
//! │  └─────────────┬──────────────┘                          │
//! │         ┌──────▼──────┐                                  │
//! │         │  FileSystem │ (trait)                          │
//! │         └──────┬──────┘                                  │
//! └────────────────┼─────────────────────────────────────────┘
//!           ┌──────┴───────┐
//!    ┌──────▼──────┐ ┌─────▼───────┐
//!    │   RealFs    │ │   MockFs    │
//!    │  (Linux)    │ │  (Testing)  │
//!    └─────────────┘ └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use proctrace::collector::{ProcfsSource, RealFs};
//!
//! let source = ProcfsSource::new(RealFs::new(), "/proc");
//! let times = source.cpu_times(std::process::id())?;
//! ```

pub mod mock;
pub mod procfs;
pub mod source;
pub mod traits;

pub use mock::{MockFs, MockMetric, MockProcess, MockSource};
pub use procfs::ProcfsSource;
pub use source::{
    CpuTimes, IoCounters, MemoryInfo, MemoryMap, MetricSource, MountedVolume, ProcessMetadata,
    SourceError, SystemMemory, SystemSwap, total_cpu_time,
};
pub use traits::{DiskUsage, FileSystem, RealFs};
