//! Shared fixtures for dispatcher, controller and monitor tests.

use crate::collector::{MetricSource, MockSource};
use crate::config::{FrontendMode, MonitorConfig};
use crate::dispatch::{DispatchContext, TracerKind};
use crate::storage::{MemorySinkFactory, SinkFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Polls `cond` until it holds or `timeout` elapses.
pub(crate) fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Millisecond-scale configuration writing nowhere but memory.
pub(crate) fn fast_config() -> MonitorConfig {
    MonitorConfig {
        interval: Duration::from_millis(10),
        cpu_window: Duration::from_millis(2),
        grace_period: Duration::from_millis(500),
        frontend: FrontendMode::Off,
        frontend_refresh: Duration::from_millis(10),
        ..MonitorConfig::default()
    }
}

pub(crate) struct Harness {
    pub source: Arc<MockSource>,
    pub sinks: MemorySinkFactory,
    pub ctx: Arc<DispatchContext>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self::with_config(MonitorConfig {
            grace_period: grace,
            ..fast_config()
        })
    }

    pub fn with_tracers(process: Vec<TracerKind>, system: Vec<TracerKind>) -> Self {
        Self::with_config(MonitorConfig {
            process_tracers: process,
            system_tracers: system,
            ..fast_config()
        })
    }

    pub fn with_config(config: MonitorConfig) -> Self {
        let source = Arc::new(MockSource::new());
        let sinks = MemorySinkFactory::new();
        let dyn_source: Arc<dyn MetricSource> = source.clone();
        let dyn_sinks: Arc<dyn SinkFactory> = Arc::new(sinks.clone());
        let ctx = match DispatchContext::new(config, dyn_source, dyn_sinks) {
            Ok(ctx) => ctx,
            Err(e) => panic!("memory sinks cannot fail to open: {}", e),
        };
        Self { source, sinks, ctx }
    }
}

/// Shared buffer the fmt subscriber writes into.
#[derive(Clone, Default)]
struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with an INFO-level subscriber on this thread and returns what it logged.
pub(crate) fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.0.lock().unwrap_or_else(|e| e.into_inner()).clone();
    (result, String::from_utf8_lossy(&bytes).into_owned())
}
