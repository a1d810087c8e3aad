//! proctrace - trace a process tree's resource usage.
//!
//! Attaches to a running pid, or starts a command and traces it, writing one
//! table per process and metric until the traced process exits or a
//! termination signal arrives.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitCode, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use nix::sys::signal::{SigSet, Signal, kill};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use proctrace::collector::{MetricSource, ProcfsSource, RealFs};
use proctrace::config::{FrontendMode, MonitorConfig};
use proctrace::dispatch::{ExitFlag, Scope, TracerKind};
use proctrace::frontend;
use proctrace::monitor::{Monitor, MonitorError};
use proctrace::storage::{FileSinkFactory, OutputFormat, SinkFactory};

/// Exit status when the traced command cannot be started.
const EXIT_NOT_STARTED: u8 = 127;

/// Trace the resource usage of a process and all of its descendants.
#[derive(Parser)]
#[command(name = "proctrace", about = "Per-process resource tracer", version)]
struct Args {
    /// Attach to this running process.
    #[arg(short, long, conflicts_with = "command")]
    pid: Option<u32>,

    /// Command to start and trace (after `--`).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,

    /// Output basename; tables are written to `<output>.<table>.<ext>`.
    #[arg(short, long, default_value = "proctrace")]
    output: PathBuf,

    /// Table format.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Tsv)]
    format: OutputFormat,

    /// Sampling and child-discovery interval in milliseconds.
    #[arg(short, long, default_value = "1000")]
    interval_ms: u64,

    /// CPU-percent measurement window in milliseconds.
    #[arg(long, default_value = "1000")]
    cpu_window_ms: u64,

    /// Upper bound on every shutdown wait in milliseconds.
    #[arg(long, default_value = "2000")]
    grace_ms: u64,

    /// Comma-separated process tracers (default: all process tracers).
    #[arg(long, value_delimiter = ',')]
    process_tracers: Option<Vec<TracerKind>>,

    /// Comma-separated system tracers (default: all system tracers).
    #[arg(long, value_delimiter = ',')]
    system_tracers: Option<Vec<TracerKind>>,

    /// Live view.
    #[arg(long, value_enum, default_value_t = FrontendMode::Table)]
    frontend: FrontendMode,

    /// Live view refresh period in milliseconds.
    #[arg(long, default_value = "1500")]
    refresh_ms: u64,

    /// Path to /proc filesystem.
    #[arg(long, default_value = "/proc")]
    proc_path: String,

    /// Log file. Defaults to `<output>.log` when the table view owns the terminal.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long)]
    quiet: bool,

    /// Print the available tracers and exit.
    #[arg(long)]
    list_tracers: bool,
}

impl Args {
    fn config(&self) -> MonitorConfig {
        let defaults = MonitorConfig::default();
        MonitorConfig {
            output_basename: self.output.clone(),
            output_format: self.format,
            interval: Duration::from_millis(self.interval_ms),
            cpu_window: Duration::from_millis(self.cpu_window_ms),
            grace_period: Duration::from_millis(self.grace_ms),
            process_tracers: self
                .process_tracers
                .clone()
                .unwrap_or(defaults.process_tracers),
            system_tracers: self
                .system_tracers
                .clone()
                .unwrap_or(defaults.system_tracers),
            frontend: self.frontend,
            frontend_refresh: Duration::from_millis(self.refresh_ms),
        }
    }

    /// Where logs go: a file while the table view owns the terminal.
    fn log_path(&self) -> Option<PathBuf> {
        match (&self.log_file, self.frontend) {
            (Some(path), _) => Some(path.clone()),
            (None, FrontendMode::Table) => Some(with_suffix(&self.output, "log")),
            (None, _) => None,
        }
    }
}

fn with_suffix(basename: &Path, suffix: &str) -> PathBuf {
    let mut name = basename.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Creates `path` after creating its parent directory.
fn create_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    File::create(path)
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool, log_path: Option<&Path>) -> std::io::Result<()> {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("proctrace={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match log_path {
        Some(path) => {
            let file = create_file(path)?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn list_tracers() {
    for scope in [Scope::Process, Scope::System] {
        println!("{} tracers:", scope);
        for kind in TracerKind::defaults(scope) {
            println!("  {:<6} {}", kind, kind.description(scope));
        }
    }
}

/// Starts the traced command with stdin closed and output captured to files.
fn spawn_command(command: &[String], basename: &Path) -> std::io::Result<Child> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"))?;
    let stdout = create_file(&with_suffix(basename, "stdout.log"))?;
    let stderr = create_file(&with_suffix(basename, "stderr.log"))?;
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .spawn()
}

/// Exit code of a finished command; 1 when a signal killed it.
fn command_exit_code(status: ExitStatus) -> u8 {
    status.code().map_or(1, |code| code as u8)
}

/// Starts monitoring `root_pid`.
///
/// On failure the traced command, if any, is reaped and the exit code to
/// return is decided: a command that already exited keeps its own status,
/// anything else is killed and the monitor error decides.
fn start_monitor(
    config: MonitorConfig,
    root_pid: u32,
    source: Arc<dyn MetricSource>,
    sinks: Arc<dyn SinkFactory>,
    child: &mut Option<Child>,
) -> Result<Monitor, u8> {
    let err = match Monitor::start(config, root_pid, source, sinks) {
        Ok(monitor) => return Ok(monitor),
        Err(e) => e,
    };
    let Some(mut c) = child.take() else {
        error!(error = %err, "cannot start monitoring");
        eprintln!("proctrace: {}", err);
        return Err(err.exit_code() as u8);
    };
    if let MonitorError::RootUnreachable(pid) = err {
        return match c.wait() {
            Ok(status) => {
                info!(pid, status = %status, "command exited before monitoring started");
                Err(command_exit_code(status))
            }
            Err(e) => {
                warn!(pid, error = %e, "failed to wait for command");
                Err(1)
            }
        };
    }
    error!(error = %err, "cannot start monitoring");
    eprintln!("proctrace: {}", err);
    if let Err(e) = c.kill() {
        warn!(error = %e, "failed to kill command");
    }
    let _ = c.wait();
    Err(err.exit_code() as u8)
}

/// Signals that stop the monitor.
const TERMINATION_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGHUP,
    Signal::SIGABRT,
    Signal::SIGQUIT,
];

/// Blocks the termination signals in the calling thread. Threads spawned
/// afterwards inherit the mask, so only the signal thread ever sees them.
fn block_termination_signals() -> nix::Result<SigSet> {
    let mut mask = SigSet::empty();
    for sig in TERMINATION_SIGNALS {
        mask.add(sig);
    }
    mask.thread_block()?;
    Ok(mask)
}

/// Reads termination signals on a dedicated thread. Each one stops the
/// monitor and is forwarded to the traced command, if any.
fn install_signal_handler(
    mask: &SigSet,
    stop: ExitFlag,
    received: Arc<Mutex<Option<i32>>>,
    forward_to: Option<u32>,
) -> std::io::Result<()> {
    let signals = SignalFd::with_flags(mask, SfdFlags::SFD_CLOEXEC)?;
    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            loop {
                let info = match signals.read_signal() {
                    Ok(Some(info)) => info,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(error = %e, "signal reader failed");
                        break;
                    }
                };
                let sig = info.ssi_signo as i32;
                info!(signal = sig, "received signal, shutting down");
                *received.lock() = Some(sig);
                if let Some(pid) = forward_to
                    && let Ok(signal) = Signal::try_from(sig)
                    && let Err(e) = kill(Pid::from_raw(pid as i32), signal)
                {
                    warn!(pid, error = %e, "failed to forward signal");
                }
                stop.set();
            }
        })?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.list_tracers {
        list_tracers();
        return ExitCode::SUCCESS;
    }
    if args.pid.is_none() && args.command.is_empty() {
        eprintln!("proctrace: either --pid or a command to trace is required");
        return ExitCode::from(2);
    }

    let mask = match block_termination_signals() {
        Ok(mask) => mask,
        Err(e) => {
            eprintln!("proctrace: cannot block signals: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(args.verbose, args.quiet, args.log_path().as_deref()) {
        eprintln!("proctrace: cannot open log file: {}", e);
        return ExitCode::FAILURE;
    }
    info!("proctrace v{} starting", env!("CARGO_PKG_VERSION"));

    let config = args.config();

    let mut child = None;
    let root_pid = match args.pid {
        Some(pid) => pid,
        None => match spawn_command(&args.command, &config.output_basename) {
            Ok(c) => {
                let pid = c.id();
                info!(pid, command = %args.command.join(" "), "command started");
                child = Some(c);
                pid
            }
            Err(e) => {
                error!(command = %args.command.join(" "), error = %e, "cannot start command");
                eprintln!("proctrace: cannot start {}: {}", args.command[0], e);
                return ExitCode::from(EXIT_NOT_STARTED);
            }
        },
    };

    let stop = ExitFlag::new();
    let received = Arc::new(Mutex::new(None));
    let forward_to = child.as_ref().map(|_| root_pid);
    if let Err(e) = install_signal_handler(&mask, stop.clone(), Arc::clone(&received), forward_to) {
        error!(error = %e, "cannot install signal handler");
        return ExitCode::FAILURE;
    }

    let source: Arc<dyn MetricSource> = Arc::new(ProcfsSource::new(RealFs::new(), &args.proc_path));
    let sinks: Arc<dyn SinkFactory> = Arc::new(FileSinkFactory::new(
        config.output_basename.clone(),
        config.output_format,
    ));
    let (mode, refresh) = (config.frontend, config.frontend_refresh);

    let monitor = match start_monitor(config, root_pid, source, sinks, &mut child) {
        Ok(monitor) => monitor,
        Err(code) => return ExitCode::from(code),
    };

    // The traced command is our child; reap it so it leaves the zombie state
    // and the monitor sees it exit.
    let reaper = child.map(|mut c| {
        std::thread::spawn(move || match c.wait() {
            Ok(status) => command_exit_code(status),
            Err(e) => {
                warn!(error = %e, "failed to wait for command");
                1
            }
        })
    });

    let mut stdout = std::io::stdout();
    if let Err(e) = frontend::run(&monitor, mode, refresh, &stop, &mut stdout) {
        warn!(error = %e, "live view failed, continuing without it");
        monitor.wait(&stop);
    }

    let signal = *received.lock();
    let summary = monitor.shutdown(signal);
    info!(
        entities = summary.entities_seen.len(),
        processes = summary.processes_seen(),
        "done"
    );

    match reaper {
        Some(handle) => match handle.join() {
            Ok(code) => ExitCode::from(code),
            Err(_) => ExitCode::FAILURE,
        },
        None => ExitCode::SUCCESS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proctrace::collector::MockSource;
    use proctrace::storage::MemorySinkFactory;

    fn quiet_config(basename: &Path) -> MonitorConfig {
        MonitorConfig {
            output_basename: basename.to_path_buf(),
            interval: Duration::from_millis(10),
            cpu_window: Duration::from_millis(2),
            grace_period: Duration::from_millis(500),
            frontend: FrontendMode::Off,
            ..MonitorConfig::default()
        }
    }

    /// Spawns `command` and waits until /proc reports it gone (a zombie).
    fn spawn_finished(command: &[&str], basename: &Path, source: &dyn MetricSource) -> Child {
        let command: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        let child = spawn_command(&command, basename).unwrap();
        let pid = child.id();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while source.process_exists(pid) {
            assert!(std::time::Instant::now() < deadline, "command {} never exited", pid);
            std::thread::sleep(Duration::from_millis(5));
        }
        child
    }

    fn try_start(basename: &Path, child: Child) -> Result<Monitor, u8> {
        let source = Arc::new(ProcfsSource::new(RealFs::new(), "/proc"));
        let pid = child.id();
        let mut child = Some(child);
        let result = start_monitor(
            quiet_config(basename),
            pid,
            source,
            Arc::new(MemorySinkFactory::new()),
            &mut child,
        );
        assert!(child.is_none());
        result
    }

    #[test]
    fn test_command_exiting_before_monitoring_keeps_its_status() {
        let dir = tempfile::tempdir().unwrap();
        let basename = dir.path().join("run");
        let source = ProcfsSource::new(RealFs::new(), "/proc");

        let child = spawn_finished(&["true"], &basename, &source);
        assert_eq!(try_start(&basename, child).err(), Some(0));

        let child = spawn_finished(&["sh", "-c", "exit 3"], &basename, &source);
        assert_eq!(try_start(&basename, child).err(), Some(3));

        assert!(with_suffix(&basename, "stdout.log").exists());
        assert!(with_suffix(&basename, "stderr.log").exists());
    }

    #[test]
    fn test_unreachable_pid_exits_with_two() {
        let dir = tempfile::tempdir().unwrap();
        let mut child = None;
        let result = start_monitor(
            quiet_config(&dir.path().join("run")),
            4242,
            Arc::new(MockSource::new()),
            Arc::new(MemorySinkFactory::new()),
            &mut child,
        );
        assert_eq!(result.err(), Some(2));
    }

    #[test]
    fn test_invalid_config_kills_command() {
        let dir = tempfile::tempdir().unwrap();
        let basename = dir.path().join("run");
        let command = vec!["sleep".to_string(), "30".to_string()];
        let mut child = Some(spawn_command(&command, &basename).unwrap());
        let pid = child.as_ref().map(Child::id).unwrap();
        let config = MonitorConfig {
            process_tracers: vec![TracerKind::Stat, TracerKind::Stat],
            ..quiet_config(&basename)
        };

        let source = Arc::new(ProcfsSource::new(RealFs::new(), "/proc"));
        let result = start_monitor(
            config,
            pid,
            source.clone(),
            Arc::new(MemorySinkFactory::new()),
            &mut child,
        );

        assert_eq!(result.err(), Some(1));
        assert!(child.is_none());
        assert!(!source.process_exists(pid));
    }

    #[test]
    fn test_signal_death_maps_to_one() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(command_exit_code(ExitStatus::from_raw(9)), 1);
        assert_eq!(command_exit_code(ExitStatus::from_raw(7 << 8)), 7);
    }
}
