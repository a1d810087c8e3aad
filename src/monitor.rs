//! Top-level wiring: builds the context, attaches the system and root
//! dispatchers, and tears the tree down when the root exits or a signal
//! arrives.

use crate::collector::MetricSource;
use crate::config::MonitorConfig;
use crate::dispatch::{
    DispatchContext, DispatchError, Dispatcher, DispatcherController, DispatcherState, EntityId,
    ExitFlag, SpawnedDispatcher,
};
use crate::storage::{SinkError, SinkFactory};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const POLL: Duration = Duration::from_millis(50);

/// Error type for starting a monitor.
#[derive(Debug)]
pub enum MonitorError {
    /// The root process does not exist (or exited before attach).
    RootUnreachable(u32),
    Config(String),
    Sink(SinkError),
    Dispatch(DispatchError),
}

impl MonitorError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            MonitorError::RootUnreachable(_) => 2,
            _ => 1,
        }
    }
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::RootUnreachable(pid) => write!(f, "process {} is not running", pid),
            MonitorError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            MonitorError::Sink(e) => write!(f, "cannot open output: {}", e),
            MonitorError::Dispatch(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Sink(e) => Some(e),
            MonitorError::Dispatch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SinkError> for MonitorError {
    fn from(e: SinkError) -> Self {
        MonitorError::Sink(e)
    }
}

impl From<DispatchError> for MonitorError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Vanished(pid) => MonitorError::RootUnreachable(pid),
            other => MonitorError::Dispatch(other),
        }
    }
}

/// What was monitored, reported once the tree is down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSummary {
    pub entities_seen: Vec<EntityId>,
}

impl MonitorSummary {
    pub fn processes_seen(&self) -> usize {
        self.entities_seen.iter().filter(|id| !id.is_system()).count()
    }
}

/// A running supervision tree rooted at one process.
pub struct Monitor {
    ctx: Arc<DispatchContext>,
    root_pid: u32,
    root: SpawnedDispatcher,
    system: SpawnedDispatcher,
}

impl Monitor {
    /// Validates `config`, opens the registry and starts the system and
    /// root dispatchers.
    ///
    /// Fails with [`MonitorError::RootUnreachable`] when `root_pid` is gone.
    pub fn start(
        config: MonitorConfig,
        root_pid: u32,
        source: Arc<dyn MetricSource>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Result<Self, MonitorError> {
        config.validate().map_err(MonitorError::Config)?;
        if !source.process_exists(root_pid) {
            return Err(MonitorError::RootUnreachable(root_pid));
        }
        let ctx = DispatchContext::new(config, source, sinks)?;

        let system = Dispatcher::attach_system(&ctx).and_then(Dispatcher::start)?;
        let root = match Dispatcher::attach_process(root_pid, &ctx).and_then(Dispatcher::start) {
            Ok(root) => root,
            Err(e) => {
                ctx.controller.terminate_all(None);
                return Err(e.into());
            }
        };

        info!(pid = root_pid, "monitoring started");
        Ok(Self {
            ctx,
            root_pid,
            root,
            system,
        })
    }

    pub fn root_pid(&self) -> u32 {
        self.root_pid
    }

    pub fn controller(&self) -> &DispatcherController {
        &self.ctx.controller
    }

    pub fn context(&self) -> &Arc<DispatchContext> {
        &self.ctx
    }

    /// True until the root dispatcher starts tearing down.
    pub fn root_alive(&self) -> bool {
        !self.root.is_finished() && self.root.dispatcher.state() == DispatcherState::Running
    }

    /// Blocks until the root process is gone or `stop` is set.
    pub fn wait(&self, stop: &ExitFlag) {
        while self.root_alive() {
            if stop.sleep(POLL) {
                break;
            }
        }
    }

    /// Stops the whole tree and closes the registry.
    pub fn shutdown(self, signal: Option<i32>) -> MonitorSummary {
        self.ctx.controller.terminate_all(signal);
        if !self.system.is_finished() {
            self.system.dispatcher.request_exit();
        }
        if let Err(e) = self.ctx.registry.close() {
            warn!(error = %e, "failed to close registry");
        }

        let summary = MonitorSummary {
            entities_seen: self.ctx.controller.all_ids_seen(),
        };
        info!(
            processes = summary.processes_seen(),
            "monitoring finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{MockProcess, MockSource};
    use crate::storage::MemorySinkFactory;
    use crate::testing::{fast_config, wait_for};

    fn start(source: &Arc<MockSource>, sinks: &MemorySinkFactory, pid: u32) -> Result<Monitor, MonitorError> {
        let dyn_source: Arc<dyn MetricSource> = source.clone();
        Monitor::start(fast_config(), pid, dyn_source, Arc::new(sinks.clone()))
    }

    #[test]
    fn test_root_unreachable() {
        let source = Arc::new(MockSource::new());
        let sinks = MemorySinkFactory::new();
        let err = start(&source, &sinks, 12345).err().unwrap();
        assert!(matches!(err, MonitorError::RootUnreachable(12345)));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.to_string(), "process 12345 is not running");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let source: Arc<dyn MetricSource> = Arc::new(MockSource::new());
        let config = MonitorConfig {
            system_tracers: vec![crate::dispatch::TracerKind::Stat],
            ..fast_config()
        };
        let err = Monitor::start(config, 1, source, Arc::new(MemorySinkFactory::new()))
            .err()
            .unwrap();
        assert!(matches!(err, MonitorError::Config(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_tree_runs_until_root_exits() {
        let source = Arc::new(MockSource::new());
        let sinks = MemorySinkFactory::new();
        source.add_process(10, MockProcess::new(1, "app"));
        source.add_process(11, MockProcess::new(10, "worker"));
        source.add_process(12, MockProcess::new(11, "helper"));

        let monitor = start(&source, &sinks, 10).unwrap();
        assert!(wait_for(Duration::from_secs(5), || monitor
            .controller()
            .is_active(EntityId::Process(12))));
        assert_eq!(monitor.controller().collect_all_process_info().len(), 3);
        assert!(monitor.controller().collect_system_info().is_some());

        source.remove_process(10);
        let stop = ExitFlag::new();
        monitor.wait(&stop);
        assert!(!monitor.root_alive());

        let summary = monitor.shutdown(None);
        assert_eq!(
            summary.entities_seen,
            vec![
                EntityId::System,
                EntityId::Process(10),
                EntityId::Process(11),
                EntityId::Process(12)
            ]
        );
        assert_eq!(summary.processes_seen(), 3);
        assert!(sinks.table("reg").unwrap().closed);
        assert!(sinks.table("10.cputime").is_some());
    }

    #[test]
    fn test_stop_flag_ends_wait() {
        let source = Arc::new(MockSource::new());
        let sinks = MemorySinkFactory::new();
        source.add_process(20, MockProcess::new(1, "daemon"));
        let monitor = start(&source, &sinks, 20).unwrap();

        let stop = ExitFlag::new();
        stop.set();
        monitor.wait(&stop);
        assert!(monitor.root_alive());

        let controller_ctx = Arc::clone(monitor.context());
        monitor.shutdown(Some(2));
        assert!(controller_ctx.controller.is_empty());
    }
}
