//! Parsers for `/proc` filesystem files.
//!
//! These are pure functions that parse the content of various `/proc` files
//! into structured data. They are designed to be easily testable with string inputs.

use std::collections::HashMap;

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parsed data from `/proc/[pid]/stat`.
#[derive(Debug, Clone, Default)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    pub utime: u64,
    pub stime: u64,
    pub num_threads: i32,
    pub processor: i32,
}

/// Parses `/proc/[pid]/stat` content.
///
/// The format is tricky because the comm field can contain spaces and parentheses.
/// Format: pid (comm) state ppid pgrp session tty_nr ...
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let content = content.trim();

    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;

    if close_paren <= open_paren {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let pid: u32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;

    let comm = content[open_paren + 1..close_paren].to_string();

    // Fields after the closing ')' start at "state" (field 3 in proc(5)).
    let fields: Vec<&str> = content[close_paren + 1..].split_whitespace().collect();

    if fields.len() < 18 {
        return Err(ParseError::new(format!(
            "not enough fields in stat: expected 18+, got {}",
            fields.len()
        )));
    }

    let parse_field = |idx: usize, name: &str| -> Result<i64, ParseError> {
        fields
            .get(idx)
            .ok_or_else(|| ParseError::new(format!("missing field {}", name)))?
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };

    let parse_field_u64 = |idx: usize, name: &str| -> Result<u64, ParseError> {
        fields
            .get(idx)
            .ok_or_else(|| ParseError::new(format!("missing field {}", name)))?
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };

    Ok(ProcStat {
        pid,
        comm,
        state: fields[0].chars().next().unwrap_or('?'),
        ppid: parse_field(1, "ppid")? as u32,
        utime: parse_field_u64(11, "utime")?,
        stime: parse_field_u64(12, "stime")?,
        num_threads: parse_field(17, "num_threads")? as i32,
        processor: fields.get(36).and_then(|s| s.parse().ok()).unwrap_or(0),
    })
}

/// Parsed data from `/proc/[pid]/status`.
#[derive(Debug, Clone, Default)]
pub struct ProcStatus {
    pub name: String,
    pub ppid: u32,
    pub threads: u64,
    pub vm_swap: u64,
}

/// Parses `/proc/[pid]/status` content.
///
/// Format is key:\tvalue pairs, one per line. Memory figures stay in kB.
pub fn parse_proc_status(content: &str) -> Result<ProcStatus, ParseError> {
    let mut fields: HashMap<&str, &str> = HashMap::new();

    for line in content.lines() {
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.trim(), value.trim());
        }
    }

    if !fields.contains_key("Name") {
        return Err(ParseError::new("missing Name in status"));
    }

    let parse_kb = |key: &str| -> u64 {
        fields
            .get(key)
            .and_then(|s| s.split_whitespace().next())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    };

    Ok(ProcStatus {
        name: fields.get("Name").unwrap_or(&"").to_string(),
        ppid: fields.get("PPid").and_then(|s| s.parse().ok()).unwrap_or(0),
        threads: fields.get("Threads").and_then(|s| s.parse().ok()).unwrap_or(0),
        vm_swap: parse_kb("VmSwap"),
    })
}

/// Parsed data from `/proc/[pid]/statm`, in pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcStatm {
    pub size: u64,
    pub resident: u64,
    pub shared: u64,
    pub text: u64,
    pub data: u64,
}

/// Parses `/proc/[pid]/statm` content: `size resident shared text lib data dt`.
pub fn parse_proc_statm(content: &str) -> Result<ProcStatm, ParseError> {
    let values: Vec<u64> = content
        .split_whitespace()
        .map(|s| s.parse().map_err(|_| ParseError::new("invalid statm value")))
        .collect::<Result<_, _>>()?;

    if values.len() < 6 {
        return Err(ParseError::new(format!(
            "not enough fields in statm: expected 6+, got {}",
            values.len()
        )));
    }

    Ok(ProcStatm {
        size: values[0],
        resident: values[1],
        shared: values[2],
        text: values[3],
        data: values[5],
    })
}

/// Parsed data from `/proc/[pid]/io`.
#[derive(Debug, Clone, Default)]
pub struct ProcIo {
    pub rchar: u64,
    pub wchar: u64,
    pub syscr: u64,
    pub syscw: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Parses `/proc/[pid]/io` content.
///
/// Format is key: value pairs, one per line.
pub fn parse_proc_io(content: &str) -> Result<ProcIo, ParseError> {
    let mut io = ProcIo::default();

    for line in content.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let value: u64 = value.trim().parse().unwrap_or(0);
            match key.trim() {
                "rchar" => io.rchar = value,
                "wchar" => io.wchar = value,
                "syscr" => io.syscr = value,
                "syscw" => io.syscw = value,
                "read_bytes" => io.read_bytes = value,
                "write_bytes" => io.write_bytes = value,
                _ => {}
            }
        }
    }

    Ok(io)
}

/// Parsed data from `/proc/meminfo`, in kB.
#[derive(Debug, Clone, Default)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_free: u64,
    pub mem_available: u64,
    pub buffers: u64,
    pub cached: u64,
    pub shmem: u64,
    pub s_reclaimable: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

/// Parses `/proc/meminfo` content.
pub fn parse_meminfo(content: &str) -> Result<MemInfo, ParseError> {
    let mut info = MemInfo::default();

    let parse_kb = |line: &str| -> u64 {
        line.split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    };

    for line in content.lines() {
        if line.starts_with("MemTotal:") {
            info.mem_total = parse_kb(line);
        } else if line.starts_with("MemFree:") {
            info.mem_free = parse_kb(line);
        } else if line.starts_with("MemAvailable:") {
            info.mem_available = parse_kb(line);
        } else if line.starts_with("Buffers:") {
            info.buffers = parse_kb(line);
        } else if line.starts_with("Cached:") {
            info.cached = parse_kb(line);
        } else if line.starts_with("Shmem:") {
            info.shmem = parse_kb(line);
        } else if line.starts_with("SReclaimable:") {
            info.s_reclaimable = parse_kb(line);
        } else if line.starts_with("SwapTotal:") {
            info.swap_total = parse_kb(line);
        } else if line.starts_with("SwapFree:") {
            info.swap_free = parse_kb(line);
        }
    }

    if info.mem_total == 0 {
        return Err(ParseError::new("missing MemTotal in meminfo"));
    }

    Ok(info)
}

/// Single CPU line from `/proc/stat`, in clock ticks.
#[derive(Debug, Clone, Default)]
pub struct CpuStat {
    pub cpu_id: Option<u32>, // None for aggregate "cpu" line
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuStat {
    /// Ticks spent doing nothing.
    pub fn idle_ticks(&self) -> u64 {
        self.idle + self.iowait
    }

    /// All accounted ticks. Guest time is already included in user/nice.
    pub fn total_ticks(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }
}

/// Parses the `cpu*` lines of `/proc/stat`.
pub fn parse_cpu_lines(content: &str) -> Result<Vec<CpuStat>, ParseError> {
    let mut cpus = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(label) = parts.first() else {
            continue;
        };
        if !label.starts_with("cpu") {
            continue;
        }

        let cpu_id = if *label == "cpu" {
            None
        } else {
            Some(
                label
                    .strip_prefix("cpu")
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| ParseError::new(format!("invalid cpu label {}", label)))?,
            )
        };

        let get_val =
            |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        cpus.push(CpuStat {
            cpu_id,
            user: get_val(1),
            nice: get_val(2),
            system: get_val(3),
            idle: get_val(4),
            iowait: get_val(5),
            irq: get_val(6),
            softirq: get_val(7),
            steal: get_val(8),
        });
    }

    if cpus.is_empty() {
        return Err(ParseError::new("no cpu lines in stat"));
    }

    Ok(cpus)
}

/// One line of `/proc/mounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: String,
    pub fstype: String,
    pub options: String,
}

/// Parses `/proc/mounts` content. Octal escapes (`\040`) in paths are decoded.
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some(MountEntry {
                device: unescape_mount_path(parts.next()?),
                mount_point: unescape_mount_path(parts.next()?),
                fstype: parts.next()?.to_string(),
                options: parts.next()?.to_string(),
            })
        })
        .collect()
}

fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..=i + 3].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let code =
                (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(code);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Per-path totals from `/proc/[pid]/smaps`, in kB.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmapsEntry {
    pub path: String,
    pub size: u64,
    pub rss: u64,
    pub swap: u64,
}

/// Parses `/proc/[pid]/smaps`, summing regions that map the same path.
///
/// Anonymous regions are reported under `[anon]`. Entries are returned in
/// order of first appearance.
pub fn parse_smaps(content: &str) -> Vec<SmapsEntry> {
    let mut entries: Vec<SmapsEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut current: Option<usize> = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let Some(first) = parts.next() else {
            continue;
        };

        if is_region_header(first) {
            // address perms offset dev inode [path]
            let path = parts
                .nth(4)
                .map(str::to_string)
                .unwrap_or_else(|| "[anon]".to_string());
            let idx = *index.entry(path.clone()).or_insert_with(|| {
                entries.push(SmapsEntry {
                    path,
                    ..SmapsEntry::default()
                });
                entries.len() - 1
            });
            current = Some(idx);
            continue;
        }

        let Some(idx) = current else {
            continue;
        };
        let value: u64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        match first {
            "Size:" => entries[idx].size += value,
            "Rss:" => entries[idx].rss += value,
            "Swap:" => entries[idx].swap += value,
            _ => {}
        }
    }

    entries
}

fn is_region_header(token: &str) -> bool {
    token
        .split_once('-')
        .is_some_and(|(lo, hi)| {
            !lo.is_empty()
                && !hi.is_empty()
                && lo.chars().all(|c| c.is_ascii_hexdigit())
                && hi.chars().all(|c| c.is_ascii_hexdigit())
        })
}

/// Parses `/proc/[pid]/environ` (NUL separated `NAME=VALUE`).
pub fn parse_environ(content: &str) -> Vec<(String, String)> {
    content
        .split('\0')
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => (entry.to_string(), String::new()),
        })
        .collect()
}

/// Parses `/proc/[pid]/task/[tid]/children` (space separated pids).
pub fn parse_children(content: &str) -> Vec<u32> {
    content
        .split_whitespace()
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_stat_basic() {
        let content = "1234 (bash) S 1233 1234 1234 34816 1235 4194304 5000 50000 10 20 100 50 200 100 20 0 1 0 100000 25000000 2000 18446744073709551615 0 0 0 0 0 0 65536 3670020 1266777851 0 0 0 17 2 0 0 5 0 0 0 0 0 0 0 0 0 0";
        let stat = parse_proc_stat(content).unwrap();

        assert_eq!(stat.pid, 1234);
        assert_eq!(stat.comm, "bash");
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.ppid, 1233);
        assert_eq!(stat.utime, 100);
        assert_eq!(stat.stime, 50);
        assert_eq!(stat.num_threads, 1);
        assert_eq!(stat.processor, 2);
    }

    #[test]
    fn test_parse_proc_stat_with_parentheses_in_comm() {
        let content = "77 (a) (b)) Z 1 77 77 0 -1 4194304 0 0 0 0 3 4 0 0 20 0 1 0 500 0 0 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";
        let stat = parse_proc_stat(content).unwrap();

        assert_eq!(stat.comm, "a) (b)");
        assert_eq!(stat.state, 'Z');
        assert_eq!(stat.utime, 3);
        assert_eq!(stat.stime, 4);
    }

    #[test]
    fn test_parse_proc_stat_truncated() {
        assert!(parse_proc_stat("1 (init) S 0 1").is_err());
        assert!(parse_proc_stat("garbage").is_err());
    }

    #[test]
    fn test_parse_proc_status() {
        let content = "\
Name:\tpostgres
State:\tS (sleeping)
PPid:\t1
Threads:\t4
VmSize:\t  217392 kB
VmRSS:\t   14220 kB
RssFile:\t    9000 kB
RssShmem:\t    1200 kB
VmSwap:\t      16 kB
";
        let status = parse_proc_status(content).unwrap();
        assert_eq!(status.name, "postgres");
        assert_eq!(status.ppid, 1);
        assert_eq!(status.threads, 4);
        assert_eq!(status.vm_swap, 16);
    }

    #[test]
    fn test_parse_proc_statm() {
        let statm = parse_proc_statm("6000 500 300 20 0 900 0\n").unwrap();
        assert_eq!(statm.size, 6000);
        assert_eq!(statm.resident, 500);
        assert_eq!(statm.shared, 300);
        assert_eq!(statm.text, 20);
        assert_eq!(statm.data, 900);
        assert!(parse_proc_statm("1 2").is_err());
    }

    #[test]
    fn test_parse_proc_io() {
        let content = "rchar: 1000\nwchar: 2000\nsyscr: 10\nsyscw: 20\nread_bytes: 4096\nwrite_bytes: 8192\ncancelled_write_bytes: 0\n";
        let io = parse_proc_io(content).unwrap();
        assert_eq!(io.rchar, 1000);
        assert_eq!(io.wchar, 2000);
        assert_eq!(io.syscr, 10);
        assert_eq!(io.syscw, 20);
        assert_eq!(io.read_bytes, 4096);
        assert_eq!(io.write_bytes, 8192);
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "\
MemTotal:       16384000 kB
MemFree:         1000000 kB
MemAvailable:    8192000 kB
Buffers:          200000 kB
Cached:          3000000 kB
SwapCached:         1000 kB
Shmem:            150000 kB
SwapTotal:       2000000 kB
SwapFree:        1500000 kB
";
        let info = parse_meminfo(content).unwrap();
        assert_eq!(info.mem_total, 16384000);
        assert_eq!(info.mem_available, 8192000);
        assert_eq!(info.cached, 3000000);
        assert_eq!(info.shmem, 150000);
        assert_eq!(info.swap_total - info.swap_free, 500000);
        assert!(parse_meminfo("").is_err());
    }

    #[test]
    fn test_parse_cpu_lines() {
        let content = "\
cpu  100 0 50 800 50 0 0 0 0 0
cpu0 60 0 30 400 10 0 0 0 0 0
cpu1 40 0 20 400 40 0 0 0 0 0
intr 12345
ctxt 999
";
        let cpus = parse_cpu_lines(content).unwrap();
        assert_eq!(cpus.len(), 3);
        assert_eq!(cpus[0].cpu_id, None);
        assert_eq!(cpus[1].cpu_id, Some(0));
        assert_eq!(cpus[2].cpu_id, Some(1));
        assert_eq!(cpus[1].total_ticks(), 500);
        assert_eq!(cpus[2].idle_ticks(), 440);
    }

    #[test]
    fn test_parse_mounts() {
        let content = "\
/dev/sda1 / ext4 rw,relatime 0 0
proc /proc proc rw,nosuid 0 0
/dev/sdb1 /mnt/my\\040disk xfs ro 0 0
";
        let mounts = parse_mounts(content);
        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[0].device, "/dev/sda1");
        assert_eq!(mounts[0].options, "rw,relatime");
        assert_eq!(mounts[2].mount_point, "/mnt/my disk");
    }

    #[test]
    fn test_parse_smaps_groups_by_path() {
        let content = "\
55d0c0000000-55d0c0021000 r--p 00000000 08:01 131 /usr/bin/cat
Size:                132 kB
Rss:                 100 kB
Swap:                  0 kB
55d0c0021000-55d0c0030000 r-xp 00021000 08:01 131 /usr/bin/cat
Size:                 60 kB
Rss:                  40 kB
Swap:                  4 kB
7ffd1000-7ffd2000 rw-p 00000000 00:00 0
Size:                  4 kB
Rss:                   4 kB
Swap:                  0 kB
";
        let entries = parse_smaps(content);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "/usr/bin/cat");
        assert_eq!(entries[0].size, 192);
        assert_eq!(entries[0].rss, 140);
        assert_eq!(entries[0].swap, 4);
        assert_eq!(entries[1].path, "[anon]");
    }

    #[test]
    fn test_parse_environ() {
        let env = parse_environ("HOME=/root\0PATH=/bin:/usr/bin\0EMPTY=\0WEIRD\0");
        assert_eq!(
            env,
            vec![
                ("HOME".to_string(), "/root".to_string()),
                ("PATH".to_string(), "/bin:/usr/bin".to_string()),
                ("EMPTY".to_string(), String::new()),
                ("WEIRD".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_parse_children() {
        assert_eq!(parse_children("12 15 99 \n"), vec![12, 15, 99]);
        assert!(parse_children("").is_empty());
    }
}
