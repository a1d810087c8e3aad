use super::cache::SystemCache;
use super::context::DispatchContext;
use super::dispatcher::write_once;
use super::tracer::{Probe, TracerKind, system_probe};
use crate::storage::Value;
use std::sync::Arc;
use tracing::warn;

/// System-specific half of a dispatcher: the mount table and the summary
/// aggregation.
pub(crate) struct SystemDispatch {
    cache: Arc<SystemCache>,
}

impl SystemDispatch {
    pub(crate) fn new() -> Self {
        Self {
            cache: Arc::new(SystemCache::new()),
        }
    }

    pub(crate) fn cache(&self) -> Arc<SystemCache> {
        Arc::clone(&self.cache)
    }

    pub(crate) fn probe(&self, kind: TracerKind, ctx: &DispatchContext) -> Option<Box<dyn Probe>> {
        system_probe(kind, Arc::clone(&ctx.source), self.cache(), ctx.config.cpu_window)
    }

    /// Writes the `mnt` table, one row per mounted physical volume.
    pub(crate) fn register_once(&self, ctx: &DispatchContext) {
        let volumes = match ctx.source.mounted_volumes() {
            Ok(volumes) => volumes,
            Err(e) => {
                warn!(error = %e, "cannot list mounted volumes");
                return;
            }
        };
        let rows = volumes
            .into_iter()
            .map(|v| {
                vec![
                    Value::from(v.device),
                    Value::from(v.mount_point),
                    Value::from(v.fstype),
                    Value::from(v.options),
                    Value::from(v.total),
                    Value::from(v.used),
                ]
            })
            .collect();
        write_once(
            ctx.sinks.as_ref(),
            "mnt",
            &["DEVICE", "MOUNT_POINT", "FSTYPE", "OPTS", "TOTAL", "USED"],
            rows,
        );
    }

    /// Recomputes the aggregated summary. The system never vanishes.
    pub(crate) fn tick(&self) -> bool {
        self.cache.refresh_summary();
        true
    }
}
