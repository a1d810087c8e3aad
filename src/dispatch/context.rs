use super::controller::DispatcherController;
use crate::collector::MetricSource;
use crate::config::MonitorConfig;
use crate::storage::{RegistryLog, SinkError, SinkFactory};
use std::sync::Arc;

/// Everything a dispatcher needs besides its own entity, shared by the tree.
pub struct DispatchContext {
    pub config: MonitorConfig,
    pub source: Arc<dyn MetricSource>,
    pub sinks: Arc<dyn SinkFactory>,
    /// Shared `reg` table.
    pub registry: RegistryLog,
    pub controller: DispatcherController,
}

impl DispatchContext {
    /// Opens the registry table and builds an empty controller.
    pub fn new(
        config: MonitorConfig,
        source: Arc<dyn MetricSource>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Result<Arc<Self>, SinkError> {
        let registry = RegistryLog::open(sinks.as_ref())?;
        let controller = DispatcherController::new(config.grace_period);
        Ok(Arc::new(Self {
            config,
            source,
            sinks,
            registry,
            controller,
        }))
    }
}
