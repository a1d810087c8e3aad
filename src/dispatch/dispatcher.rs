//! Supervising worker of one entity.
//!
//! Lifecycle: `Created -> Registering -> Running -> Stopping -> Terminated`.
//!
//! Construction registers the dispatcher with the controller before any
//! fallible query, so a half-built dispatcher already holds its dedup slot.
//! It then performs the entity's one-shot writes and starts its tracers;
//! both happen before [`Dispatcher::start`] spawns the sampling loop.

use super::cache::FrontendCache;
use super::context::DispatchContext;
use super::entity::EntityId;
use super::error::DispatchError;
use super::exit::ExitFlag;
use super::process::ProcessDispatch;
use super::system::SystemDispatch;
use super::tracer::{Scope, TracerHandle, TracerKind, spawn_tracer};
use crate::storage::{SinkError, SinkFactory, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatcherState {
    Created = 0,
    Registering = 1,
    Running = 2,
    Stopping = 3,
    Terminated = 4,
}

impl DispatcherState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DispatcherState::Created,
            1 => DispatcherState::Registering,
            2 => DispatcherState::Running,
            3 => DispatcherState::Stopping,
            _ => DispatcherState::Terminated,
        }
    }
}

pub(crate) enum Variant {
    Process(ProcessDispatch),
    System(SystemDispatch),
}

pub struct Dispatcher {
    id: EntityId,
    ctx: Arc<DispatchContext>,
    exit: ExitFlag,
    state: AtomicU8,
    variant: Variant,
    tracers: Mutex<Vec<TracerHandle>>,
}

impl Dispatcher {
    fn new(id: EntityId, ctx: &Arc<DispatchContext>, variant: Variant) -> Arc<Self> {
        Arc::new(Self {
            id,
            ctx: Arc::clone(ctx),
            exit: ExitFlag::new(),
            state: AtomicU8::new(DispatcherState::Created as u8),
            variant,
            tracers: Mutex::new(Vec::new()),
        })
    }

    /// Attaches to process `pid`: registers, validates, writes the one-shot
    /// tables and starts the process tracers.
    ///
    /// Fails with [`DispatchError::Vanished`] when the process exited first.
    pub fn attach_process(pid: u32, ctx: &Arc<DispatchContext>) -> Result<Arc<Self>, DispatchError> {
        let dispatcher = Self::new(
            EntityId::Process(pid),
            ctx,
            Variant::Process(ProcessDispatch::new(pid)),
        );
        dispatcher.attach()?;
        Ok(dispatcher)
    }

    /// Attaches to the system as a whole.
    pub fn attach_system(ctx: &Arc<DispatchContext>) -> Result<Arc<Self>, DispatchError> {
        let dispatcher = Self::new(EntityId::System, ctx, Variant::System(SystemDispatch::new()));
        dispatcher.attach()?;
        Ok(dispatcher)
    }

    fn attach(self: &Arc<Self>) -> Result<(), DispatchError> {
        self.set_state(DispatcherState::Registering);
        if let Err(e) = self.ctx.controller.register_dispatcher(Arc::clone(self)) {
            self.set_state(DispatcherState::Terminated);
            return Err(e);
        }

        if let Err(e) = self.prepare() {
            self.ctx.controller.deregister_dispatcher(self.id);
            for tracer in std::mem::take(&mut *self.tracers.lock()) {
                tracer.stop();
            }
            self.set_state(DispatcherState::Terminated);
            return Err(e);
        }

        self.set_state(DispatcherState::Running);
        info!(entity = %self.id, "dispatcher attached");
        Ok(())
    }

    fn prepare(&self) -> Result<(), DispatchError> {
        match &self.variant {
            Variant::Process(p) => p.register_once(&self.ctx)?,
            Variant::System(s) => s.register_once(&self.ctx),
        }
        self.start_tracers()
    }

    fn start_tracers(&self) -> Result<(), DispatchError> {
        let scope = self.scope();
        let config = &self.ctx.config;
        for &kind in config.tracers(scope) {
            let probe = match &self.variant {
                Variant::Process(p) => p.probe(kind, &self.ctx),
                Variant::System(s) => s.probe(kind, &self.ctx),
            };
            let Some(probe) = probe else {
                warn!(entity = %self.id, tracer = %kind, "tracer not available for {} scope", scope);
                continue;
            };
            match spawn_tracer(self.id, kind, probe, self.ctx.sinks.as_ref(), config.interval) {
                Ok(handle) => self.tracers.lock().push(handle),
                Err(DispatchError::Sink(e)) => {
                    warn!(entity = %self.id, tracer = %kind, error = %e, "cannot open table, tracer skipped");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Spawns the sampling loop.
    ///
    /// If the thread cannot be spawned the dispatcher is torn down in place.
    pub fn start(self: Arc<Self>) -> Result<SpawnedDispatcher, DispatchError> {
        let worker = Arc::clone(&self);
        let spawned = std::thread::Builder::new()
            .name(format!("dispatch-{}", self.id))
            .spawn(move || worker.run());
        match spawned {
            Ok(join) => Ok(SpawnedDispatcher {
                dispatcher: self,
                join,
            }),
            Err(e) => {
                self.shutdown();
                Err(DispatchError::Spawn(e))
            }
        }
    }

    fn run(&self) {
        debug!(entity = %self.id, "dispatcher loop started");
        let interval = self.ctx.config.interval;
        while !self.exit.is_set() {
            let alive = match &self.variant {
                Variant::Process(p) => p.tick(&self.ctx, &self.exit),
                Variant::System(s) => s.tick(),
            };
            if !alive || self.exit.sleep(interval) {
                break;
            }
        }
        self.shutdown();
    }

    /// Tears the dispatcher down: final bookkeeping, deregistration, then a
    /// bounded wait for its tracers and children.
    pub(crate) fn shutdown(&self) {
        let stopping = DispatcherState::Stopping as u8;
        let claimed = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                (s < stopping).then_some(stopping)
            })
            .is_ok();
        if !claimed {
            return;
        }
        self.exit.set();

        if let Variant::Process(p) = &self.variant {
            p.before_ending(&self.ctx);
        }
        self.ctx.controller.deregister_dispatcher(self.id);

        let tracers = std::mem::take(&mut *self.tracers.lock());
        for tracer in &tracers {
            tracer.stop();
        }
        let children = match &self.variant {
            Variant::Process(p) => p.take_children(),
            Variant::System(_) => Vec::new(),
        };
        for child in &children {
            child.dispatcher.request_exit();
        }

        let deadline = Instant::now() + self.ctx.config.grace_period;
        let pending = || {
            tracers.iter().filter(|t| !t.is_finished()).count()
                + children.iter().filter(|c| !c.is_finished()).count()
        };
        while pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(POLL);
        }
        let left = pending();
        if left > 0 {
            warn!(entity = %self.id, workers = left, "grace period elapsed, detaching workers");
        }

        self.set_state(DispatcherState::Terminated);
        info!(entity = %self.id, "dispatcher terminated");
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: DispatcherState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn scope(&self) -> Scope {
        match self.variant {
            Variant::Process(_) => Scope::Process,
            Variant::System(_) => Scope::System,
        }
    }

    pub fn cache(&self) -> FrontendCache {
        match &self.variant {
            Variant::Process(p) => FrontendCache::Process(p.cache()),
            Variant::System(s) => FrontendCache::System(s.cache()),
        }
    }

    /// Asks the loop to stop at its next check.
    pub fn request_exit(&self) {
        self.exit.set();
    }

    /// Kinds of the tracers still sampling.
    pub fn running_tracers(&self) -> Vec<TracerKind> {
        self.tracers
            .lock()
            .iter()
            .filter(|t| !t.is_finished())
            .map(|t| t.kind())
            .collect()
    }

    /// Pids of the child dispatchers this dispatcher owns.
    pub fn child_pids(&self) -> Vec<u32> {
        match &self.variant {
            Variant::Process(p) => p.child_pids(),
            Variant::System(_) => Vec::new(),
        }
    }

    /// Runs one child-discovery pass. Returns how many children were attached.
    #[cfg(test)]
    pub(crate) fn discover_children(&self) -> usize {
        match &self.variant {
            Variant::Process(p) => p.discover_children(&self.ctx, &self.exit),
            Variant::System(_) => 0,
        }
    }
}

/// A dispatcher whose loop is running on its own thread.
pub struct SpawnedDispatcher {
    pub dispatcher: Arc<Dispatcher>,
    join: JoinHandle<()>,
}

impl SpawnedDispatcher {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Writes a table that is filled once and never appended to again.
///
/// Failures are logged; they never abort the dispatcher.
pub(crate) fn write_once(
    sinks: &dyn SinkFactory,
    name: &str,
    header: &[&str],
    rows: Vec<Vec<Value>>,
) {
    let result = (|| -> Result<(), SinkError> {
        let mut sink = sinks.open(name, header)?;
        for row in rows {
            sink.append(row)?;
        }
        sink.flush()?;
        sink.close()
    })();
    if let Err(e) = result {
        warn!(table = name, error = %e, "failed to write table");
    }
}
