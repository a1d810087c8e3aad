//! In-memory metric source with a mutable process table.
//!
//! Lets dispatcher and tracer tests fork, kill and starve processes
//! deterministically without touching the host.

use crate::collector::source::{
    CpuTimes, IoCounters, MemoryInfo, MemoryMap, MetricSource, MountedVolume, ProcessMetadata,
    SourceError, SystemMemory, SystemSwap,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

/// Individual readings that can be made to fail for one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockMetric {
    CpuTimes,
    CpuPercent,
    Memory,
    Io,
    Children,
    Threads,
    Status,
    FileDescriptors,
}

/// A simulated process.
#[derive(Debug, Clone, Default)]
pub struct MockProcess {
    pub ppid: u32,
    pub name: String,
    pub cmdline: String,
    pub exe: String,
    pub cwd: String,
    pub environ: Vec<(String, String)>,
    pub maps: Vec<MemoryMap>,
    pub cpu: CpuTimes,
    pub cpu_percent: Option<f64>,
    pub memory: MemoryInfo,
    pub io: IoCounters,
    pub threads: u64,
    pub status: String,
    /// `None` simulates a descriptor table this user may not read.
    pub fds: Option<BTreeMap<u32, String>>,
}

impl MockProcess {
    /// A sleeping single-threaded process with the given parent and name.
    pub fn new(ppid: u32, name: &str) -> Self {
        Self {
            ppid,
            name: name.to_string(),
            cmdline: name.to_string(),
            exe: format!("/usr/bin/{}", name),
            cwd: "/".to_string(),
            threads: 1,
            status: "sleeping".to_string(),
            cpu_percent: Some(0.0),
            fds: Some(BTreeMap::new()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    processes: HashMap<u32, MockProcess>,
    failing: HashSet<(u32, MockMetric)>,
    memory: SystemMemory,
    swap: SystemSwap,
    per_core: Option<Vec<f64>>,
    volumes: Vec<MountedVolume>,
    stalls: HashMap<u32, Duration>,
}

/// Metric source backed by an in-memory process table.
#[derive(Debug, Default)]
pub struct MockSource {
    state: RwLock<MockState>,
    cores: usize,
}

impl MockSource {
    /// Creates an empty source reporting two CPUs.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockState {
                per_core: Some(vec![0.0, 0.0]),
                ..MockState::default()
            }),
            cores: 2,
        }
    }

    /// Adds (or replaces) a process.
    pub fn add_process(&self, pid: u32, process: MockProcess) {
        self.state.write().processes.insert(pid, process);
    }

    /// Removes a process; every subsequent read for it reports `NotFound`.
    pub fn remove_process(&self, pid: u32) {
        let mut state = self.state.write();
        state.processes.remove(&pid);
        state.failing.retain(|(p, _)| *p != pid);
    }

    /// Makes a single reading report `NotFound` while the process stays alive.
    pub fn fail_metric(&self, pid: u32, metric: MockMetric) {
        self.state.write().failing.insert((pid, metric));
    }

    /// Sets the CPU times of a process.
    pub fn set_cpu_times(&self, pid: u32, cpu: CpuTimes) {
        if let Some(p) = self.state.write().processes.get_mut(&pid) {
            p.cpu = cpu;
        }
    }

    /// Makes every `children` call for `pid` block for `delay` first.
    pub fn stall_children(&self, pid: u32, delay: Duration) {
        self.state.write().stalls.insert(pid, delay);
    }

    pub fn set_system_memory(&self, memory: SystemMemory) {
        self.state.write().memory = memory;
    }

    pub fn set_system_swap(&self, swap: SystemSwap) {
        self.state.write().swap = swap;
    }

    /// Sets per-core utilisation; `None` simulates a window with no figure.
    pub fn set_per_core(&self, per_core: Option<Vec<f64>>) {
        self.state.write().per_core = per_core;
    }

    pub fn set_volumes(&self, volumes: Vec<MountedVolume>) {
        self.state.write().volumes = volumes;
    }

    fn read<T>(
        &self,
        pid: u32,
        metric: Option<MockMetric>,
        f: impl FnOnce(&MockProcess) -> T,
    ) -> Result<T, SourceError> {
        let state = self.state.read();
        if let Some(metric) = metric
            && state.failing.contains(&(pid, metric))
        {
            return Err(SourceError::NotFound(pid));
        }
        state
            .processes
            .get(&pid)
            .map(f)
            .ok_or(SourceError::NotFound(pid))
    }
}

impl MetricSource for MockSource {
    fn process_exists(&self, pid: u32) -> bool {
        self.state
            .read()
            .processes
            .get(&pid)
            .is_some_and(|p| p.status != "zombie")
    }

    fn process_metadata(&self, pid: u32) -> Result<ProcessMetadata, SourceError> {
        self.read(pid, None, |p| ProcessMetadata {
            pid,
            ppid: p.ppid,
            name: p.name.clone(),
            cmdline: p.cmdline.clone(),
            exe: p.exe.clone(),
            cwd: p.cwd.clone(),
        })
    }

    fn environ(&self, pid: u32) -> Result<Vec<(String, String)>, SourceError> {
        self.read(pid, None, |p| p.environ.clone())
    }

    fn memory_maps(&self, pid: u32) -> Result<Vec<MemoryMap>, SourceError> {
        self.read(pid, None, |p| p.maps.clone())
    }

    fn cpu_times(&self, pid: u32) -> Result<CpuTimes, SourceError> {
        self.read(pid, Some(MockMetric::CpuTimes), |p| p.cpu)
    }

    fn cpu_percent(&self, pid: u32, window: Duration) -> Result<Option<f64>, SourceError> {
        std::thread::sleep(window);
        self.read(pid, Some(MockMetric::CpuPercent), |p| p.cpu_percent)
    }

    fn memory_info(&self, pid: u32) -> Result<MemoryInfo, SourceError> {
        self.read(pid, Some(MockMetric::Memory), |p| p.memory)
    }

    fn io_counters(&self, pid: u32) -> Result<IoCounters, SourceError> {
        self.read(pid, Some(MockMetric::Io), |p| p.io)
    }

    fn children(&self, pid: u32) -> Result<Vec<u32>, SourceError> {
        let stall = self.state.read().stalls.get(&pid).copied();
        if let Some(delay) = stall {
            std::thread::sleep(delay);
        }
        let state = self.state.read();
        if !state.processes.contains_key(&pid) || state.failing.contains(&(pid, MockMetric::Children))
        {
            return Err(SourceError::NotFound(pid));
        }
        let mut children: Vec<u32> = state
            .processes
            .iter()
            .filter(|(_, p)| p.ppid == pid)
            .map(|(child, _)| *child)
            .collect();
        children.sort_unstable();
        Ok(children)
    }

    fn num_threads(&self, pid: u32) -> Result<u64, SourceError> {
        self.read(pid, Some(MockMetric::Threads), |p| p.threads)
    }

    fn status(&self, pid: u32) -> Result<String, SourceError> {
        self.read(pid, Some(MockMetric::Status), |p| p.status.clone())
    }

    fn open_file_descriptors(&self, pid: u32) -> Result<BTreeMap<u32, String>, SourceError> {
        self.read(pid, Some(MockMetric::FileDescriptors), |p| p.fds.clone())?
            .ok_or(SourceError::PermissionDenied(pid))
    }

    fn cpu_count(&self) -> usize {
        self.cores
    }

    fn system_memory(&self) -> Result<SystemMemory, SourceError> {
        Ok(self.state.read().memory)
    }

    fn system_swap(&self) -> Result<SystemSwap, SourceError> {
        Ok(self.state.read().swap)
    }

    fn system_cpu_percent_per_core(
        &self,
        window: Duration,
    ) -> Result<Option<Vec<f64>>, SourceError> {
        std::thread::sleep(window);
        Ok(self.state.read().per_core.clone())
    }

    fn mounted_volumes(&self) -> Result<Vec<MountedVolume>, SourceError> {
        Ok(self.state.read().volumes.clone())
    }
}
