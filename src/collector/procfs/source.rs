//! Metric source reading process and system state from `/proc`.

use crate::collector::procfs::parser::{
    CpuStat, ProcStat, parse_children, parse_cpu_lines, parse_environ, parse_meminfo, parse_mounts,
    parse_proc_io, parse_proc_stat, parse_proc_statm, parse_proc_status, parse_smaps,
};
use crate::collector::source::{
    CpuTimes, IoCounters, MemoryInfo, MemoryMap, MetricSource, MountedVolume, ProcessMetadata,
    SourceError, SystemMemory, SystemSwap,
};
use crate::collector::traits::FileSystem;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Clock ticks per second (USER_HZ). Standard value for Linux.
const CLK_TCK: f64 = 100.0;

/// Default page size, could be detected.
const PAGE_SIZE: u64 = 4096;

/// Metric source backed by a `/proc` tree.
pub struct ProcfsSource<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    page_size: u64,
}

impl<F: FileSystem> ProcfsSource<F> {
    /// Creates a new procfs source.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    pub fn new(fs: F, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            page_size: PAGE_SIZE,
        }
    }

    fn pid_path(&self, pid: u32, file: &str) -> PathBuf {
        self.proc_path.join(pid.to_string()).join(file)
    }

    fn read_pid_file(&self, pid: u32, file: &str) -> Result<String, SourceError> {
        self.fs
            .read_to_string(&self.pid_path(pid, file))
            .map_err(|e| map_io(pid, e))
    }

    fn read_stat(&self, pid: u32) -> Result<ProcStat, SourceError> {
        let content = self.read_pid_file(pid, "stat")?;
        parse_proc_stat(&content).map_err(|e| SourceError::Parse(e.message))
    }

    /// Reads a symlink such as `exe` or `cwd`. Kernel threads and other
    /// users' processes have none we can read, which yields an empty string.
    fn read_pid_link(&self, pid: u32, file: &str) -> Result<String, SourceError> {
        match self.fs.read_link(&self.pid_path(pid, file)) {
            Ok(target) => Ok(target.to_string_lossy().into_owned()),
            Err(e) => match map_io(pid, e) {
                SourceError::NotFound(_) if self.process_exists(pid) => Ok(String::new()),
                SourceError::PermissionDenied(_) => Ok(String::new()),
                other => Err(other),
            },
        }
    }

    fn read_cpu_lines(&self) -> Result<Vec<CpuStat>, SourceError> {
        let content = self.fs.read_to_string(&self.proc_path.join("stat"))?;
        parse_cpu_lines(&content).map_err(|e| SourceError::Parse(e.message))
    }

    fn scan_children(&self, pid: u32) -> Result<Vec<u32>, SourceError> {
        let mut children = Vec::new();
        for entry in self.fs.read_dir(&self.proc_path)? {
            let Some(candidate) = entry
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            if let Ok(stat) = self.read_stat(candidate)
                && stat.ppid == pid
                && !matches!(stat.state, 'Z' | 'X')
            {
                children.push(candidate);
            }
        }
        Ok(children)
    }
}

/// Maps an I/O error on `/proc/<pid>/...` to the source error taxonomy.
fn map_io(pid: u32, e: io::Error) -> SourceError {
    if e.raw_os_error() == Some(nix::libc::ESRCH) {
        return SourceError::NotFound(pid);
    }
    match e.kind() {
        io::ErrorKind::NotFound => SourceError::NotFound(pid),
        io::ErrorKind::PermissionDenied => SourceError::PermissionDenied(pid),
        _ => SourceError::Io(e),
    }
}

/// Human-readable scheduler state, as `ps` and `psutil` spell it.
fn state_name(state: char) -> &'static str {
    match state {
        'R' => "running",
        'S' => "sleeping",
        'D' => "disk-sleep",
        'T' => "stopped",
        't' => "tracing-stop",
        'Z' => "zombie",
        'X' | 'x' => "dead",
        'K' => "wake-kill",
        'W' => "waking",
        'P' => "parked",
        'I' => "idle",
        _ => "unknown",
    }
}

impl<F: FileSystem> MetricSource for ProcfsSource<F> {
    fn process_exists(&self, pid: u32) -> bool {
        self.read_stat(pid)
            .is_ok_and(|stat| !matches!(stat.state, 'Z' | 'X'))
    }

    fn process_metadata(&self, pid: u32) -> Result<ProcessMetadata, SourceError> {
        let stat = self.read_stat(pid)?;
        if matches!(stat.state, 'Z' | 'X') {
            return Err(SourceError::NotFound(pid));
        }
        let cmdline = self
            .read_pid_file(pid, "cmdline")?
            .split('\0')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(ProcessMetadata {
            pid,
            ppid: stat.ppid,
            name: stat.comm,
            cmdline,
            exe: self.read_pid_link(pid, "exe")?,
            cwd: self.read_pid_link(pid, "cwd")?,
        })
    }

    fn environ(&self, pid: u32) -> Result<Vec<(String, String)>, SourceError> {
        Ok(parse_environ(&self.read_pid_file(pid, "environ")?))
    }

    fn memory_maps(&self, pid: u32) -> Result<Vec<MemoryMap>, SourceError> {
        let content = self.read_pid_file(pid, "smaps")?;
        Ok(parse_smaps(&content)
            .into_iter()
            .map(|entry| MemoryMap {
                path: entry.path,
                resident: entry.rss * 1024,
                size: entry.size * 1024,
                swap: entry.swap * 1024,
            })
            .collect())
    }

    fn cpu_times(&self, pid: u32) -> Result<CpuTimes, SourceError> {
        let stat = self.read_stat(pid)?;
        Ok(CpuTimes {
            system: stat.stime as f64 / CLK_TCK,
            user: stat.utime as f64 / CLK_TCK,
            processor: stat.processor,
        })
    }

    fn cpu_percent(&self, pid: u32, window: Duration) -> Result<Option<f64>, SourceError> {
        let before = self.cpu_times(pid)?.total();
        let started = Instant::now();
        std::thread::sleep(window);
        let after = self.cpu_times(pid)?.total();

        let elapsed = started.elapsed().as_secs_f64();
        if elapsed <= 0.0 || after < before {
            return Ok(None);
        }
        Ok(Some((after - before) / elapsed * 100.0))
    }

    fn memory_info(&self, pid: u32) -> Result<MemoryInfo, SourceError> {
        let statm = parse_proc_statm(&self.read_pid_file(pid, "statm")?)
            .map_err(|e| SourceError::Parse(e.message))?;
        let status = parse_proc_status(&self.read_pid_file(pid, "status")?)
            .map_err(|e| SourceError::Parse(e.message))?;

        Ok(MemoryInfo {
            resident: statm.resident * self.page_size,
            virt: statm.size * self.page_size,
            shared: statm.shared * self.page_size,
            text: statm.text * self.page_size,
            data: statm.data * self.page_size,
            swap: status.vm_swap * 1024,
        })
    }

    fn io_counters(&self, pid: u32) -> Result<IoCounters, SourceError> {
        let io = parse_proc_io(&self.read_pid_file(pid, "io")?)
            .map_err(|e| SourceError::Parse(e.message))?;
        Ok(IoCounters {
            read_bytes: io.read_bytes,
            write_bytes: io.write_bytes,
            read_chars: io.rchar,
            write_chars: io.wchar,
            read_ops: io.syscr,
            write_ops: io.syscw,
        })
    }

    fn children(&self, pid: u32) -> Result<Vec<u32>, SourceError> {
        let task_dir = self.pid_path(pid, "task");
        let main_children = task_dir.join(pid.to_string()).join("children");

        if !self.fs.exists(&main_children) {
            if !self.process_exists(pid) {
                return Err(SourceError::NotFound(pid));
            }
            // Kernel built without CONFIG_PROC_CHILDREN.
            return self.scan_children(pid);
        }

        let mut children = BTreeSet::new();
        for task in self.fs.read_dir(&task_dir).map_err(|e| map_io(pid, e))? {
            // A thread may exit between listing and reading.
            if let Ok(content) = self.fs.read_to_string(&task.join("children")) {
                children.extend(parse_children(&content));
            }
        }
        Ok(children.into_iter().collect())
    }

    fn num_threads(&self, pid: u32) -> Result<u64, SourceError> {
        let status = parse_proc_status(&self.read_pid_file(pid, "status")?)
            .map_err(|e| SourceError::Parse(e.message))?;
        Ok(status.threads)
    }

    fn status(&self, pid: u32) -> Result<String, SourceError> {
        Ok(state_name(self.read_stat(pid)?.state).to_string())
    }

    fn open_file_descriptors(&self, pid: u32) -> Result<BTreeMap<u32, String>, SourceError> {
        let fd_dir = self.pid_path(pid, "fd");
        let entries = self.fs.read_dir(&fd_dir).map_err(|e| map_io(pid, e))?;

        let mut fds = BTreeMap::new();
        for entry in entries {
            let Some(fd) = fd_number(&entry) else {
                continue;
            };
            // Descriptors closed since the listing are skipped.
            if let Ok(target) = self.fs.read_link(&entry) {
                fds.insert(fd, target.to_string_lossy().into_owned());
            }
        }
        Ok(fds)
    }

    fn cpu_count(&self) -> usize {
        match self.read_cpu_lines() {
            Ok(cpus) => cpus.iter().filter(|c| c.cpu_id.is_some()).count().max(1),
            Err(e) => {
                debug!(error = %e, "falling back to available parallelism for cpu count");
                std::thread::available_parallelism().map_or(1, |n| n.get())
            }
        }
    }

    fn system_memory(&self) -> Result<SystemMemory, SourceError> {
        let content = self.fs.read_to_string(&self.proc_path.join("meminfo"))?;
        let info = parse_meminfo(&content).map_err(|e| SourceError::Parse(e.message))?;
        Ok(SystemMemory {
            total: info.mem_total * 1024,
            available: info.mem_available * 1024,
            free: info.mem_free * 1024,
            buffers: info.buffers * 1024,
            cached: (info.cached + info.s_reclaimable) * 1024,
            shared: info.shmem * 1024,
        })
    }

    fn system_swap(&self) -> Result<SystemSwap, SourceError> {
        let content = self.fs.read_to_string(&self.proc_path.join("meminfo"))?;
        let info = parse_meminfo(&content).map_err(|e| SourceError::Parse(e.message))?;
        Ok(SystemSwap {
            total: info.swap_total * 1024,
            used: info.swap_total.saturating_sub(info.swap_free) * 1024,
        })
    }

    fn system_cpu_percent_per_core(
        &self,
        window: Duration,
    ) -> Result<Option<Vec<f64>>, SourceError> {
        let per_core = |cpus: Vec<CpuStat>| -> Vec<CpuStat> {
            cpus.into_iter().filter(|c| c.cpu_id.is_some()).collect()
        };

        let before = per_core(self.read_cpu_lines()?);
        std::thread::sleep(window);
        let after = per_core(self.read_cpu_lines()?);

        // A core went on- or offline during the window.
        if before.len() != after.len() || before.is_empty() {
            return Ok(None);
        }

        Ok(Some(
            before
                .iter()
                .zip(&after)
                .map(|(b, a)| {
                    let total = a.total_ticks().saturating_sub(b.total_ticks());
                    let idle = a.idle_ticks().saturating_sub(b.idle_ticks());
                    if total == 0 {
                        0.0
                    } else {
                        total.saturating_sub(idle) as f64 / total as f64 * 100.0
                    }
                })
                .collect(),
        ))
    }

    fn mounted_volumes(&self) -> Result<Vec<MountedVolume>, SourceError> {
        let content = self.fs.read_to_string(&self.proc_path.join("mounts"))?;

        let mut volumes = Vec::new();
        for mount in parse_mounts(&content)
            .into_iter()
            .filter(|m| m.device.starts_with('/'))
        {
            match self.fs.disk_usage(Path::new(&mount.mount_point)) {
                Ok(usage) => volumes.push(MountedVolume {
                    device: mount.device,
                    mount_point: mount.mount_point,
                    fstype: mount.fstype,
                    options: mount.options,
                    total: usage.total,
                    used: usage.used,
                }),
                Err(e) => {
                    debug!(mount = %mount.mount_point, error = %e, "skipping unreadable mount")
                }
            }
        }
        Ok(volumes)
    }
}

fn fd_number(entry: &Path) -> Option<u32> {
    entry.file_name()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;
    use crate::collector::traits::DiskUsage;

    fn stat_line(pid: u32, comm: &str, state: char, ppid: u32, utime: u64, stime: u64) -> String {
        format!(
            "{pid} ({comm}) {state} {ppid} {pid} {pid} 0 -1 4194304 100 0 0 0 {utime} {stime} 0 0 20 0 1 0 500 10000000 250 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 3 0 0 0 0 0"
        )
    }

    fn status_text(name: &str, ppid: u32, threads: u64) -> String {
        format!("Name:\t{name}\nPPid:\t{ppid}\nThreads:\t{threads}\nVmSwap:\t       8 kB\n")
    }

    fn add_proc(fs: &mut MockFs, pid: u32, ppid: u32, name: &str, state: char) {
        fs.add_process(
            pid,
            &stat_line(pid, name, state, ppid, 250, 50),
            &status_text(name, ppid, 3),
            "2000 100 40 10 0 300 0",
            "rchar: 10\nwchar: 20\nsyscr: 1\nsyscw: 2\nread_bytes: 4096\nwrite_bytes: 0\n",
            &format!("/usr/bin/{name}\0--flag\0"),
        );
    }

    fn source(fs: MockFs) -> ProcfsSource<MockFs> {
        ProcfsSource::new(fs, "/proc")
    }

    #[test]
    fn test_zombie_counts_as_gone() {
        let mut fs = MockFs::new();
        add_proc(&mut fs, 10, 1, "alive", 'S');
        add_proc(&mut fs, 11, 1, "undead", 'Z');
        let src = source(fs);

        assert!(src.process_exists(10));
        assert!(!src.process_exists(11));
        assert!(!src.process_exists(12));
        assert!(src.process_metadata(11).unwrap_err().is_vanished());
    }

    #[test]
    fn test_metadata_and_links() {
        let mut fs = MockFs::new();
        add_proc(&mut fs, 42, 7, "server", 'R');
        fs.add_link("/proc/42/exe", "/usr/bin/server");
        fs.deny("/proc/42/cwd");
        let src = source(fs);

        let meta = src.process_metadata(42).unwrap();
        assert_eq!(meta.ppid, 7);
        assert_eq!(meta.name, "server");
        assert_eq!(meta.cmdline, "/usr/bin/server --flag");
        assert_eq!(meta.exe, "/usr/bin/server");
        assert_eq!(meta.cwd, "");
    }

    #[test]
    fn test_cpu_times_in_seconds() {
        let mut fs = MockFs::new();
        add_proc(&mut fs, 5, 1, "busy", 'R');
        let src = source(fs);

        let times = src.cpu_times(5).unwrap();
        assert_eq!(times.user, 2.5);
        assert_eq!(times.system, 0.5);
        assert_eq!(times.processor, 3);
        assert_eq!(times.total(), 3.0);
    }

    #[test]
    fn test_memory_io_threads_status() {
        let mut fs = MockFs::new();
        add_proc(&mut fs, 5, 1, "worker", 'D');
        let src = source(fs);

        let mem = src.memory_info(5).unwrap();
        assert_eq!(mem.resident, 100 * 4096);
        assert_eq!(mem.virt, 2000 * 4096);
        assert_eq!(mem.shared, 40 * 4096);
        assert_eq!(mem.data, 300 * 4096);
        assert_eq!(mem.swap, 8 * 1024);

        let io = src.io_counters(5).unwrap();
        assert_eq!(io.read_bytes, 4096);
        assert_eq!(io.write_chars, 20);
        assert_eq!(io.write_ops, 2);

        assert_eq!(src.num_threads(5).unwrap(), 3);
        assert_eq!(src.status(5).unwrap(), "disk-sleep");
    }

    #[test]
    fn test_missing_io_is_permission_or_gone() {
        let mut fs = MockFs::new();
        add_proc(&mut fs, 6, 1, "other", 'S');
        fs.deny("/proc/6/io");
        let src = source(fs);

        assert!(matches!(
            src.io_counters(6),
            Err(SourceError::PermissionDenied(6))
        ));
        assert!(src.io_counters(60).unwrap_err().is_vanished());
    }

    #[test]
    fn test_children_from_task_files() {
        let mut fs = MockFs::new();
        add_proc(&mut fs, 100, 1, "parent", 'S');
        fs.add_file("/proc/100/task/100/children", "101 102 ");
        fs.add_file("/proc/100/task/103/children", "104");
        let src = source(fs);

        assert_eq!(src.children(100).unwrap(), vec![101, 102, 104]);
    }

    #[test]
    fn test_children_scan_fallback() {
        let mut fs = MockFs::new();
        add_proc(&mut fs, 200, 1, "parent", 'S');
        add_proc(&mut fs, 201, 200, "kid", 'S');
        add_proc(&mut fs, 202, 200, "reaped", 'Z');
        add_proc(&mut fs, 300, 1, "stranger", 'S');
        fs.add_file("/proc/meminfo", "MemTotal: 1 kB\n");
        let src = source(fs);

        let mut children = src.children(200).unwrap();
        children.sort_unstable();
        assert_eq!(children, vec![201]);
        assert!(src.children(999).unwrap_err().is_vanished());
    }

    #[test]
    fn test_open_file_descriptors() {
        let mut fs = MockFs::new();
        add_proc(&mut fs, 8, 1, "files", 'S');
        fs.add_link("/proc/8/fd/0", "/dev/null");
        fs.add_link("/proc/8/fd/3", "/var/log/app.log");
        add_proc(&mut fs, 9, 1, "secret", 'S');
        fs.add_dir("/proc/9/fd");
        fs.deny("/proc/9/fd");
        let src = source(fs);

        let fds = src.open_file_descriptors(8).unwrap();
        assert_eq!(fds.len(), 2);
        assert_eq!(fds[&3], "/var/log/app.log");
        assert!(matches!(
            src.open_file_descriptors(9),
            Err(SourceError::PermissionDenied(9))
        ));
    }

    #[test]
    fn test_environ_and_maps() {
        let mut fs = MockFs::new();
        add_proc(&mut fs, 3, 1, "env", 'S');
        fs.add_file("/proc/3/environ", "LANG=C\0HOME=/root\0");
        fs.add_file(
            "/proc/3/smaps",
            "00400000-00452000 r-xp 00000000 08:02 173521 /usr/bin/env\nSize: 8 kB\nRss: 4 kB\nSwap: 0 kB\n",
        );
        let src = source(fs);

        assert_eq!(src.environ(3).unwrap().len(), 2);
        let maps = src.memory_maps(3).unwrap();
        assert_eq!(maps[0].path, "/usr/bin/env");
        assert_eq!(maps[0].resident, 4096);
        assert_eq!(maps[0].size, 8192);
    }

    #[test]
    fn test_system_memory_and_swap() {
        let mut fs = MockFs::new();
        fs.add_file(
            "/proc/meminfo",
            "MemTotal: 1000 kB\nMemFree: 100 kB\nMemAvailable: 400 kB\nBuffers: 10 kB\nCached: 200 kB\nShmem: 5 kB\nSReclaimable: 20 kB\nSwapTotal: 500 kB\nSwapFree: 125 kB\n",
        );
        let src = source(fs);

        let mem = src.system_memory().unwrap();
        assert_eq!(mem.total, 1000 * 1024);
        assert_eq!(mem.used(), 600 * 1024);
        assert_eq!(mem.cached, 220 * 1024);
        assert_eq!(mem.shared, 5 * 1024);

        let swap = src.system_swap().unwrap();
        assert_eq!(swap.total, 500 * 1024);
        assert_eq!(swap.used, 375 * 1024);
    }

    #[test]
    fn test_cpu_count_and_per_core_static() {
        let mut fs = MockFs::new();
        fs.add_file(
            "/proc/stat",
            "cpu  10 0 10 80 0 0 0 0\ncpu0 5 0 5 40 0 0 0 0\ncpu1 5 0 5 40 0 0 0 0\n",
        );
        let src = source(fs);

        assert_eq!(src.cpu_count(), 2);
        // Counters do not move in a static tree.
        let per_core = src
            .system_cpu_percent_per_core(Duration::from_millis(1))
            .unwrap()
            .unwrap();
        assert_eq!(per_core, vec![0.0, 0.0]);
    }

    #[test]
    fn test_mounted_volumes_only_physical() {
        let mut fs = MockFs::new();
        fs.add_file(
            "/proc/mounts",
            "/dev/sda1 / ext4 rw 0 0\nproc /proc proc rw 0 0\n/dev/sdb1 /data xfs ro 0 0\n",
        );
        fs.set_disk_usage(
            "/",
            DiskUsage {
                total: 1000,
                used: 250,
            },
        );
        let src = source(fs);

        let volumes = src.mounted_volumes().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].device, "/dev/sda1");
        assert_eq!(volumes[0].used, 250);
    }
}
