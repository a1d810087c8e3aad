//! Per-process probes.

use super::{Probe, TracerKind};
use crate::collector::{MetricSource, SourceError};
use crate::dispatch::cache::ProcessCache;
use crate::storage::Value;
use std::sync::Arc;
use std::time::Duration;

/// Builds the probe of `kind` for process `pid`.
///
/// Returns `None` for kinds with no process-scope implementation.
pub(crate) fn process_probe(
    kind: TracerKind,
    pid: u32,
    source: Arc<dyn MetricSource>,
    cache: Arc<ProcessCache>,
    cpu_window: Duration,
) -> Option<Box<dyn Probe>> {
    let target = Target { pid, source, cache };
    let probe: Box<dyn Probe> = match kind {
        TracerKind::Cpu => Box::new(CpuProbe {
            target,
            window: cpu_window,
        }),
        TracerKind::Mem => Box::new(MemProbe(target)),
        TracerKind::Io => Box::new(IoProbe(target)),
        TracerKind::Fd => Box::new(FdProbe(target)),
        TracerKind::Child => Box::new(ChildProbe(target)),
        TracerKind::Stat => Box::new(StatProbe(target)),
        TracerKind::Swap => return None,
    };
    Some(probe)
}

struct Target {
    pid: u32,
    source: Arc<dyn MetricSource>,
    cache: Arc<ProcessCache>,
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

struct CpuProbe {
    target: Target,
    window: Duration,
}

impl Probe for CpuProbe {
    fn header(&self) -> Vec<String> {
        columns(&["OnCPU", "CPU_PERCENT"])
    }

    fn sample(&mut self) -> Result<Vec<Vec<Value>>, SourceError> {
        let t = &self.target;
        let Some(usage) = t.source.cpu_percent(t.pid, self.window)? else {
            return Ok(Vec::new());
        };
        let on_cpu = t.source.cpu_times(t.pid)?.processor;
        t.cache.set_cpu_percent(usage);
        Ok(vec![vec![Value::from(on_cpu), Value::from(usage)]])
    }
}

struct MemProbe(Target);

impl Probe for MemProbe {
    fn header(&self) -> Vec<String> {
        columns(&["VIRT", "RESIDENT", "SHARED", "TEXT", "DATA", "SWAP"])
    }

    fn sample(&mut self) -> Result<Vec<Vec<Value>>, SourceError> {
        let m = self.0.source.memory_info(self.0.pid)?;
        self.0.cache.set_resident_mem(m.resident);
        Ok(vec![vec![
            Value::from(m.virt),
            Value::from(m.resident),
            Value::from(m.shared),
            Value::from(m.text),
            Value::from(m.data),
            Value::from(m.swap),
        ]])
    }
}

struct IoProbe(Target);

impl Probe for IoProbe {
    fn header(&self) -> Vec<String> {
        columns(&[
            "DiskRead",
            "DiskWrite",
            "TotalRead",
            "TotalWrite",
            "ReadOps",
            "WriteOps",
        ])
    }

    fn sample(&mut self) -> Result<Vec<Vec<Value>>, SourceError> {
        let io = self.0.source.io_counters(self.0.pid)?;
        Ok(vec![vec![
            Value::from(io.read_bytes),
            Value::from(io.write_bytes),
            Value::from(io.read_chars),
            Value::from(io.write_chars),
            Value::from(io.read_ops),
            Value::from(io.write_ops),
        ]])
    }
}

struct FdProbe(Target);

impl Probe for FdProbe {
    fn header(&self) -> Vec<String> {
        columns(&["FD", "Path"])
    }

    fn sample(&mut self) -> Result<Vec<Vec<Value>>, SourceError> {
        let fds = self.0.source.open_file_descriptors(self.0.pid)?;
        Ok(fds
            .into_iter()
            .map(|(fd, path)| vec![Value::from(fd), Value::from(path)])
            .collect())
    }
}

struct ChildProbe(Target);

impl Probe for ChildProbe {
    fn header(&self) -> Vec<String> {
        columns(&["CHILD_PROCESS_NUMBER", "THREAD_NUMBER"])
    }

    fn sample(&mut self) -> Result<Vec<Vec<Value>>, SourceError> {
        let t = &self.0;
        let children = t.source.children(t.pid)?.len();
        let threads = t.source.num_threads(t.pid)?;
        t.cache.set_num_threads(threads);
        Ok(vec![vec![Value::from(children), Value::from(threads)]])
    }
}

struct StatProbe(Target);

impl Probe for StatProbe {
    fn header(&self) -> Vec<String> {
        columns(&["STAT"])
    }

    fn sample(&mut self) -> Result<Vec<Vec<Value>>, SourceError> {
        let status = self.0.source.status(self.0.pid)?;
        self.0.cache.set_status(status.clone());
        Ok(vec![vec![Value::from(status)]])
    }
}
