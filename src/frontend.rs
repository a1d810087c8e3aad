//! Live view over the frontend caches.
//!
//! Runs on the main thread until the root process is gone or a stop is
//! requested. The table view redraws the terminal with `crossterm`; the JSON
//! view writes one object per refresh.

use crate::config::FrontendMode;
use crate::dispatch::{ExitFlag, ProcessSnapshot, SystemSnapshot};
use crate::fmt::{
    FmtStyle, format_cpu_time, format_opt, format_opt_bytes, format_percent, format_percentage,
    truncate,
};
use crate::monitor::Monitor;
use crate::util::timestamp;
use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};
use serde::Serialize;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::Duration;

const NAME_WIDTH: usize = 16;

/// One refresh of the JSON view.
#[derive(Debug, Serialize)]
pub struct Frame<'a> {
    pub time: String,
    pub root: u32,
    pub system: Option<&'a SystemSnapshot>,
    pub processes: &'a [ProcessSnapshot],
}

/// Renders the system line and the process table.
pub fn render_table(system: Option<&SystemSnapshot>, processes: &[ProcessSnapshot]) -> String {
    let mut out = String::new();
    match system {
        Some(sys) => {
            let s = &sys.summary;
            let _ = writeln!(
                out,
                "CPU {}  MEM total {} avail {} ({})  SWAP total {} used {} (avail {})",
                format_percentage(s.cpu_percent),
                format_opt_bytes(s.vm_total, FmtStyle::Detail),
                format_opt_bytes(s.vm_avail, FmtStyle::Detail),
                format_percentage(s.vm_avail_percent),
                format_opt_bytes(s.swap_total, FmtStyle::Detail),
                format_opt_bytes(s.swap_used, FmtStyle::Detail),
                format_percentage(s.swap_avail_percent),
            );
        }
        None => out.push_str("system: NA\n"),
    }
    out.push('\n');

    let _ = writeln!(
        out,
        "{:>7} {:>7} {:<w$} {:<10} {:>8} {:>9} {:>12} {:>11} {:>17}",
        "PID",
        "PPID",
        "NAME",
        "STAT",
        "CPU%",
        "CPU_TIME",
        "RESIDENT_MEM",
        "NUM_THREADS",
        "NUM_CHILD_PROCESS",
        w = NAME_WIDTH,
    );
    for p in processes {
        let name = p.name.as_deref().map_or_else(|| "NA".to_string(), |n| truncate(n, NAME_WIDTH));
        let cpu_time = p
            .cpu_time
            .map_or_else(|| "NA".to_string(), |t| format_cpu_time(t, FmtStyle::Compact));
        let _ = writeln!(
            out,
            "{:>7} {:>7} {:<w$} {:<10} {:>8} {:>9} {:>12} {:>11} {:>17}",
            p.pid,
            format_opt(p.ppid),
            name,
            format_opt(p.status.as_deref()),
            format_percent(p.cpu_percent),
            cpu_time,
            format_opt_bytes(p.resident_mem, FmtStyle::Compact),
            format_opt(p.num_threads),
            format_opt(p.num_children),
            w = NAME_WIDTH,
        );
    }
    out
}

/// Serializes one refresh as a single JSON line.
pub fn render_json(
    root: u32,
    system: Option<&SystemSnapshot>,
    processes: &[ProcessSnapshot],
) -> serde_json::Result<String> {
    serde_json::to_string(&Frame {
        time: timestamp(),
        root,
        system,
        processes,
    })
}

/// Refreshes the view every `refresh` until the root is gone or `stop` is set.
pub fn run<W: Write>(
    monitor: &Monitor,
    mode: FrontendMode,
    refresh: Duration,
    stop: &ExitFlag,
    out: &mut W,
) -> io::Result<()> {
    if mode == FrontendMode::Off {
        monitor.wait(stop);
        return Ok(());
    }

    while monitor.root_alive() {
        let system = monitor.controller().collect_system_info();
        let processes = monitor.controller().collect_all_process_info();
        match mode {
            FrontendMode::Table => {
                execute!(out, Clear(ClearType::All), MoveTo(0, 0))?;
                out.write_all(render_table(system.as_ref(), &processes).as_bytes())?;
            }
            FrontendMode::Json => {
                let line = render_json(monitor.root_pid(), system.as_ref(), &processes)
                    .map_err(io::Error::other)?;
                writeln!(out, "{}", line)?;
            }
            FrontendMode::Off => {}
        }
        out.flush()?;
        if stop.sleep(refresh) {
            break;
        }
    }
    Ok(())
}
