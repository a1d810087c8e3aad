//! Runtime configuration shared by the monitor, dispatchers and the frontend.

use crate::dispatch::{Scope, TracerKind};
use crate::storage::OutputFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// How the live view is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FrontendMode {
    /// Redrawn text table on the terminal.
    #[default]
    Table,
    /// One JSON object per refresh on stdout.
    Json,
    Off,
}

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Prefix of every output table.
    pub output_basename: PathBuf,
    pub output_format: OutputFormat,
    /// Sampling and child-discovery interval.
    pub interval: Duration,
    /// Measurement window of CPU-percent tracers.
    pub cpu_window: Duration,
    /// Upper bound on every shutdown wait.
    pub grace_period: Duration,
    pub process_tracers: Vec<TracerKind>,
    pub system_tracers: Vec<TracerKind>,
    pub frontend: FrontendMode,
    pub frontend_refresh: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            output_basename: PathBuf::from("proctrace"),
            output_format: OutputFormat::Tsv,
            interval: Duration::from_secs(1),
            cpu_window: Duration::from_secs(1),
            grace_period: Duration::from_secs(2),
            process_tracers: TracerKind::defaults(Scope::Process),
            system_tracers: TracerKind::defaults(Scope::System),
            frontend: FrontendMode::Table,
            frontend_refresh: Duration::from_millis(1500),
        }
    }
}

impl MonitorConfig {
    /// Checks that every tracer is loaded once, in a scope it supports.
    pub fn validate(&self) -> Result<(), String> {
        let lists = [
            (Scope::Process, &self.process_tracers),
            (Scope::System, &self.system_tracers),
        ];
        for (scope, kinds) in lists {
            if let Some(kind) = kinds.iter().find(|k| !k.supports(scope)) {
                return Err(format!("tracer '{}' is not available for {} scope", kind, scope));
            }
            // Each kind owns one table per entity.
            let mut loaded = HashSet::new();
            if let Some(kind) = kinds.iter().find(|k| !loaded.insert(**k)) {
                return Err(format!("tracer '{}' is listed twice for {} scope", kind, scope));
            }
        }
        if self.interval.is_zero() {
            return Err("interval must be positive".to_string());
        }
        Ok(())
    }

    /// Tracers configured for `scope`.
    pub fn tracers(&self, scope: Scope) -> &[TracerKind] {
        match scope {
            Scope::Process => &self.process_tracers,
            Scope::System => &self.system_tracers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.grace_period, Duration::from_secs(2));
        assert_eq!(config.process_tracers.len(), 6);
        assert_eq!(
            config.system_tracers,
            vec![TracerKind::Cpu, TracerKind::Mem, TracerKind::Swap]
        );
    }

    #[test]
    fn test_scope_mismatch_is_rejected() {
        let config = MonitorConfig {
            system_tracers: vec![TracerKind::Fd],
            ..MonitorConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err(),
            "tracer 'fd' is not available for system scope"
        );

        let config = MonitorConfig {
            process_tracers: vec![TracerKind::Swap],
            ..MonitorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_tracer_is_rejected() {
        let config = MonitorConfig {
            process_tracers: vec![TracerKind::Stat, TracerKind::Cpu, TracerKind::Stat],
            ..MonitorConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err(),
            "tracer 'stat' is listed twice for process scope"
        );

        let config = MonitorConfig {
            system_tracers: vec![TracerKind::Mem, TracerKind::Mem],
            ..MonitorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
