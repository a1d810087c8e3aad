//! Process-specific half of a dispatcher: one-shot tables, child discovery
//! and the CPU-time watermark.

use super::cache::ProcessCache;
use super::context::DispatchContext;
use super::dispatcher::{Dispatcher, SpawnedDispatcher, write_once};
use super::error::DispatchError;
use super::exit::ExitFlag;
use super::tracer::{Probe, TracerKind, process_probe};
use crate::collector::{SourceError, total_cpu_time};
use crate::storage::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) struct ProcessDispatch {
    pid: u32,
    cache: Arc<ProcessCache>,
    children: Mutex<HashMap<u32, SpawnedDispatcher>>,
    /// Serializes discover-then-attach so a child is never attached twice.
    creation_lock: Mutex<()>,
}

impl ProcessDispatch {
    pub(crate) fn new(pid: u32) -> Self {
        Self {
            pid,
            cache: Arc::new(ProcessCache::new(pid)),
            children: Mutex::new(HashMap::new()),
            creation_lock: Mutex::new(()),
        }
    }

    pub(crate) fn cache(&self) -> Arc<ProcessCache> {
        Arc::clone(&self.cache)
    }

    pub(crate) fn probe(&self, kind: TracerKind, ctx: &DispatchContext) -> Option<Box<dyn Probe>> {
        process_probe(
            kind,
            self.pid,
            Arc::clone(&ctx.source),
            self.cache(),
            ctx.config.cpu_window,
        )
    }

    /// Validates the process and writes its registry line, environment and
    /// memory map tables.
    pub(crate) fn register_once(&self, ctx: &DispatchContext) -> Result<(), DispatchError> {
        let meta = ctx.source.process_metadata(self.pid)?;
        self.cache.set_identity(meta.ppid, meta.name.clone());
        if let Err(e) = ctx.registry.record(&meta) {
            warn!(pid = self.pid, error = %e, "failed to write registry line");
        }

        match ctx.source.environ(self.pid) {
            Ok(vars) => write_once(
                ctx.sinks.as_ref(),
                &format!("{}.env", self.pid),
                &["NAME", "VALUE"],
                vars.into_iter()
                    .map(|(k, v)| vec![Value::from(k), Value::from(v)])
                    .collect(),
            ),
            Err(SourceError::PermissionDenied(_)) => {
                warn!(pid = self.pid, "environment not readable");
            }
            Err(e) => return Err(e.into()),
        }

        match ctx.source.memory_maps(self.pid) {
            Ok(maps) => write_once(
                ctx.sinks.as_ref(),
                &format!("{}.mapfile", self.pid),
                &["PATH", "RESIDENT", "VIRT", "SWAP"],
                maps.into_iter()
                    .map(|m| {
                        vec![
                            Value::from(m.path),
                            Value::from(m.resident),
                            Value::from(m.size),
                            Value::from(m.swap),
                        ]
                    })
                    .collect(),
            ),
            Err(SourceError::PermissionDenied(_)) => {
                warn!(pid = self.pid, "memory maps not readable");
            }
            Err(e) => return Err(e.into()),
        }

        self.cache
            .raise_cpu_time(total_cpu_time(ctx.source.as_ref(), self.pid));
        Ok(())
    }

    /// One loop iteration. Returns `false` once the process is gone.
    pub(crate) fn tick(&self, ctx: &Arc<DispatchContext>, exit: &ExitFlag) -> bool {
        if !ctx.source.process_exists(self.pid) {
            info!(pid = self.pid, "process exited");
            return false;
        }
        self.discover_children(ctx, exit);
        self.cache
            .raise_cpu_time(total_cpu_time(ctx.source.as_ref(), self.pid));
        true
    }

    /// Attaches and starts a dispatcher for every direct child not already
    /// dispatched anywhere in the tree.
    pub(crate) fn discover_children(&self, ctx: &Arc<DispatchContext>, exit: &ExitFlag) -> usize {
        let _creating = self.creation_lock.lock();

        let pids = match ctx.source.children(self.pid) {
            Ok(pids) => pids,
            Err(e) => {
                debug!(pid = self.pid, error = %e, "cannot list children");
                return 0;
            }
        };
        self.cache.set_num_children(pids.len());

        let mut owned = self.children.lock();
        owned.retain(|_, child| !child.is_finished());

        let active = ctx.controller.active_pids();
        let mut attached = 0;
        for pid in pids {
            if exit.is_set() {
                break;
            }
            if active.contains(&pid) {
                continue;
            }
            match Dispatcher::attach_process(pid, ctx).and_then(Dispatcher::start) {
                Ok(child) => {
                    info!(parent = self.pid, pid, "sub-process detected");
                    owned.insert(pid, child);
                    attached += 1;
                }
                Err(DispatchError::Vanished(_)) => {
                    debug!(parent = self.pid, pid, "child exited before attach");
                }
                Err(DispatchError::AlreadyDispatched(_) | DispatchError::ShuttingDown(_)) => {}
                Err(e) => warn!(parent = self.pid, pid, error = %e, "failed to attach child"),
            }
        }
        attached
    }

    /// Writes the final CPU-time watermark, `-1` if none was ever read.
    pub(crate) fn before_ending(&self, ctx: &DispatchContext) {
        let cpu_time = self
            .cache
            .raise_cpu_time(total_cpu_time(ctx.source.as_ref(), self.pid))
            .unwrap_or(-1.0);
        write_once(
            ctx.sinks.as_ref(),
            &format!("{}.cputime", self.pid),
            &["CPU_TIME"],
            vec![vec![Value::from(cpu_time)]],
        );
    }

    pub(crate) fn take_children(&self) -> Vec<SpawnedDispatcher> {
        std::mem::take(&mut *self.children.lock())
            .into_values()
            .collect()
    }

    pub(crate) fn child_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.children.lock().keys().copied().collect();
        pids.sort_unstable();
        pids
    }
}
