//! Tracers: one worker per (entity, metric kind).
//!
//! A tracer opens its table, then samples its [`Probe`] once per interval,
//! writing and flushing one row per sample (or one row per item for
//! enumerating kinds such as `fd`). A probe reporting the entity gone ends
//! the loop; nothing propagates to the owning dispatcher.

mod process;
mod system;

pub(crate) use process::process_probe;
pub(crate) use system::system_probe;

use super::error::DispatchError;
use super::{EntityId, ExitFlag};
use crate::collector::SourceError;
use crate::storage::{Sink, SinkFactory, Value};
use crate::util::timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Whether a tracer samples a process or the whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Process,
    System,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Process => "process",
            Scope::System => "system",
        })
    }
}

/// Metric kinds a tracer can sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracerKind {
    Cpu,
    Mem,
    Io,
    Fd,
    Child,
    Stat,
    Swap,
}

impl TracerKind {
    pub const ALL: [TracerKind; 7] = [
        TracerKind::Cpu,
        TracerKind::Mem,
        TracerKind::Io,
        TracerKind::Fd,
        TracerKind::Child,
        TracerKind::Stat,
        TracerKind::Swap,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TracerKind::Cpu => "cpu",
            TracerKind::Mem => "mem",
            TracerKind::Io => "io",
            TracerKind::Fd => "fd",
            TracerKind::Child => "child",
            TracerKind::Stat => "stat",
            TracerKind::Swap => "swap",
        }
    }

    pub fn supports(self, scope: Scope) -> bool {
        match self {
            TracerKind::Cpu | TracerKind::Mem => true,
            TracerKind::Io | TracerKind::Fd | TracerKind::Child | TracerKind::Stat => {
                scope == Scope::Process
            }
            TracerKind::Swap => scope == Scope::System,
        }
    }

    /// One-line description for `--list-tracers`.
    pub fn description(self, scope: Scope) -> &'static str {
        match (self, scope) {
            (TracerKind::Cpu, Scope::Process) => {
                "CPU usage in percent, and the CPU the process last ran on"
            }
            (TracerKind::Cpu, Scope::System) => "CPU usage in percent of every core",
            (TracerKind::Mem, Scope::Process) => {
                "virtual, resident, shared, text, data and swapped memory"
            }
            (TracerKind::Mem, Scope::System) => "total, used, buffered, cached and shared memory",
            (TracerKind::Io, _) => "disk and total bytes read and written, with syscall counts",
            (TracerKind::Fd, _) => "every open file descriptor and its target",
            (TracerKind::Child, _) => "number of direct child processes and of threads",
            (TracerKind::Stat, _) => "scheduler state",
            (TracerKind::Swap, _) => "total and used swap",
        }
    }

    /// Every kind supported by `scope`, in declaration order.
    pub fn defaults(scope: Scope) -> Vec<TracerKind> {
        Self::ALL
            .into_iter()
            .filter(|k| k.supports(scope))
            .collect()
    }
}

impl fmt::Display for TracerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TracerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown tracer '{}'", s))
    }
}

/// Samples one metric kind of one entity.
pub(crate) trait Probe: Send {
    /// Column names, without the leading `TIME`.
    fn header(&self) -> Vec<String>;

    /// Takes one sample. Returns the rows to write, without `TIME`, and
    /// publishes the values into the entity's frontend cache.
    ///
    /// An empty result skips the tick.
    fn sample(&mut self) -> Result<Vec<Vec<Value>>, SourceError>;
}

/// A running tracer.
pub struct TracerHandle {
    kind: TracerKind,
    exit: ExitFlag,
    join: JoinHandle<()>,
}

impl TracerHandle {
    pub fn kind(&self) -> TracerKind {
        self.kind
    }

    pub fn stop(&self) {
        self.exit.set();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Opens the tracer's table, writes the header and starts its thread.
pub(crate) fn spawn_tracer(
    entity: EntityId,
    kind: TracerKind,
    probe: Box<dyn Probe>,
    sinks: &dyn SinkFactory,
    interval: Duration,
) -> Result<TracerHandle, DispatchError> {
    let mut columns = vec!["TIME".to_string()];
    columns.extend(probe.header());
    let header: Vec<&str> = columns.iter().map(String::as_str).collect();
    let sink = sinks.open(&format!("{}.{}", entity, kind), &header)?;

    let exit = ExitFlag::new();
    let worker = TracerLoop {
        entity,
        kind,
        probe,
        sink,
        interval,
        exit: exit.clone(),
    };
    let join = std::thread::Builder::new()
        .name(format!("tracer-{}-{}", entity, kind))
        .spawn(move || worker.run())
        .map_err(DispatchError::Spawn)?;

    Ok(TracerHandle { kind, exit, join })
}

struct TracerLoop {
    entity: EntityId,
    kind: TracerKind,
    probe: Box<dyn Probe>,
    sink: Box<dyn Sink>,
    interval: Duration,
    exit: ExitFlag,
}

impl TracerLoop {
    fn run(mut self) {
        debug!(entity = %self.entity, tracer = %self.kind, "tracer started");
        let mut denied_reported = false;

        while !self.exit.is_set() {
            match self.probe.sample() {
                Ok(rows) => self.write(rows),
                Err(e) if e.is_vanished() => {
                    info!(entity = %self.entity, tracer = %self.kind, "entity vanished");
                    break;
                }
                Err(SourceError::PermissionDenied(_)) => {
                    if !denied_reported {
                        warn!(entity = %self.entity, tracer = %self.kind, "permission denied, skipping samples");
                        denied_reported = true;
                    }
                }
                Err(e) => {
                    warn!(entity = %self.entity, tracer = %self.kind, error = %e, "sample failed");
                }
            }
            if self.exit.sleep(self.interval) {
                break;
            }
        }

        if let Err(e) = self.sink.close() {
            warn!(entity = %self.entity, tracer = %self.kind, error = %e, "failed to close table");
        }
        debug!(entity = %self.entity, tracer = %self.kind, "tracer stopped");
    }

    fn write(&mut self, rows: Vec<Vec<Value>>) {
        if rows.is_empty() {
            return;
        }
        let time = timestamp();
        for row in rows {
            let mut full = Vec::with_capacity(row.len() + 1);
            full.push(Value::from(time.as_str()));
            full.extend(row);
            if let Err(e) = self.sink.append(full) {
                warn!(entity = %self.entity, tracer = %self.kind, error = %e, "dropping row");
            }
        }
        if let Err(e) = self.sink.flush() {
            warn!(entity = %self.entity, tracer = %self.kind, error = %e, "flush failed");
        }
    }
}
