//! System-wide probes.

use super::{Probe, TracerKind};
use crate::collector::{MetricSource, SourceError};
use crate::dispatch::cache::SystemCache;
use crate::storage::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Builds the system probe of `kind`, or `None` for process-only kinds.
pub(crate) fn system_probe(
    kind: TracerKind,
    source: Arc<dyn MetricSource>,
    cache: Arc<SystemCache>,
    cpu_window: Duration,
) -> Option<Box<dyn Probe>> {
    let probe: Box<dyn Probe> = match kind {
        TracerKind::Cpu => Box::new(CpuProbe {
            cores: source.cpu_count(),
            source,
            cache,
            window: cpu_window,
        }),
        TracerKind::Mem => Box::new(MemProbe { source, cache }),
        TracerKind::Swap => Box::new(SwapProbe { source, cache }),
        TracerKind::Io | TracerKind::Fd | TracerKind::Child | TracerKind::Stat => return None,
    };
    Some(probe)
}

/// One column per core, named by index.
struct CpuProbe {
    cores: usize,
    source: Arc<dyn MetricSource>,
    cache: Arc<SystemCache>,
    window: Duration,
}

impl Probe for CpuProbe {
    fn header(&self) -> Vec<String> {
        (0..self.cores).map(|i| i.to_string()).collect()
    }

    fn sample(&mut self) -> Result<Vec<Vec<Value>>, SourceError> {
        let Some(per_core) = self.source.system_cpu_percent_per_core(self.window)? else {
            return Ok(Vec::new());
        };
        if per_core.len() != self.cores {
            debug!(
                expected = self.cores,
                got = per_core.len(),
                "core count changed, skipping sample"
            );
            return Ok(Vec::new());
        }
        let row = per_core.iter().copied().map(Value::from).collect();
        self.cache.set_per_core(per_core);
        Ok(vec![row])
    }
}

struct MemProbe {
    source: Arc<dyn MetricSource>,
    cache: Arc<SystemCache>,
}

impl Probe for MemProbe {
    fn header(&self) -> Vec<String> {
        ["TOTAL", "USED", "BUFFERED", "CACHED", "SHARED"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn sample(&mut self) -> Result<Vec<Vec<Value>>, SourceError> {
        let m = self.source.system_memory()?;
        self.cache.set_memory(m);
        Ok(vec![vec![
            Value::from(m.total),
            Value::from(m.used()),
            Value::from(m.buffers),
            Value::from(m.cached),
            Value::from(m.shared),
        ]])
    }
}

struct SwapProbe {
    source: Arc<dyn MetricSource>,
    cache: Arc<SystemCache>,
}

impl Probe for SwapProbe {
    fn header(&self) -> Vec<String> {
        vec!["TOTAL".to_string(), "USED".to_string()]
    }

    fn sample(&mut self) -> Result<Vec<Vec<Value>>, SourceError> {
        let s = self.source.system_swap()?;
        self.cache.set_swap(s);
        Ok(vec![vec![Value::from(s.total), Value::from(s.used)]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{MockSource, SystemMemory, SystemSwap};

    fn probe(kind: TracerKind, source: &Arc<MockSource>, cache: &Arc<SystemCache>) -> Box<dyn Probe> {
        let source: Arc<dyn MetricSource> = source.clone();
        system_probe(kind, source, Arc::clone(cache), Duration::ZERO).unwrap()
    }

    #[test]
    fn test_process_only_kinds_have_no_system_probe() {
        let source: Arc<dyn MetricSource> = Arc::new(MockSource::new());
        let cache = Arc::new(SystemCache::new());
        for kind in [TracerKind::Io, TracerKind::Fd, TracerKind::Child, TracerKind::Stat] {
            assert!(system_probe(kind, Arc::clone(&source), Arc::clone(&cache), Duration::ZERO).is_none());
        }
    }

    #[test]
    fn test_cpu_header_names_cores() {
        let source = Arc::new(MockSource::new());
        let cache = Arc::new(SystemCache::new());
        assert_eq!(probe(TracerKind::Cpu, &source, &cache).header(), vec!["0", "1"]);
    }

    #[test]
    fn test_cpu_skips_missing_or_mismatched_readings() {
        let source = Arc::new(MockSource::new());
        let cache = Arc::new(SystemCache::new());
        let mut cpu = probe(TracerKind::Cpu, &source, &cache);

        source.set_per_core(None);
        assert!(cpu.sample().unwrap().is_empty());

        source.set_per_core(Some(vec![10.0, 20.0, 30.0]));
        assert!(cpu.sample().unwrap().is_empty());
        assert!(cache.snapshot().per_core_cpu.is_none());

        source.set_per_core(Some(vec![10.0, 30.0]));
        assert_eq!(
            cpu.sample().unwrap(),
            vec![vec![Value::Float(10.0), Value::Float(30.0)]]
        );
        assert_eq!(cache.snapshot().per_core_cpu, Some(vec![10.0, 30.0]));
    }

    #[test]
    fn test_mem_and_swap_rows() {
        let source = Arc::new(MockSource::new());
        let cache = Arc::new(SystemCache::new());
        source.set_system_memory(SystemMemory {
            total: 1000,
            available: 250,
            free: 100,
            buffers: 50,
            cached: 200,
            shared: 10,
        });
        source.set_system_swap(SystemSwap {
            total: 400,
            used: 100,
        });

        let rows = probe(TracerKind::Mem, &source, &cache).sample().unwrap();
        assert_eq!(
            rows,
            vec![vec![
                Value::UInt(1000),
                Value::UInt(750),
                Value::UInt(50),
                Value::UInt(200),
                Value::UInt(10)
            ]]
        );
        let rows = probe(TracerKind::Swap, &source, &cache).sample().unwrap();
        assert_eq!(rows, vec![vec![Value::UInt(400), Value::UInt(100)]]);

        cache.refresh_summary();
        let summary = cache.summary();
        assert_eq!(summary.vm_total, Some(1000));
        assert_eq!(summary.swap_used, Some(100));
    }
}
