//! In-memory mock filesystem for testing the procfs source without real `/proc`.
//!
//! `MockFs` simulates a filesystem in memory, allowing tests to run on macOS
//! and in CI environments without Linux.

use crate::collector::traits::{DiskUsage, FileSystem};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// In-memory filesystem for testing.
///
/// Stores files, directories and symbolic links in memory. Paths registered as
/// denied return `PermissionDenied` on every access, which is how `/proc`
/// behaves for other users' `fd/` directories.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    /// Map from path to file contents.
    files: HashMap<PathBuf, String>,
    /// Set of directories (for read_dir support).
    directories: HashSet<PathBuf>,
    /// Map from link path to its target.
    links: HashMap<PathBuf, PathBuf>,
    /// Paths that fail with `PermissionDenied`.
    denied: HashSet<PathBuf>,
    /// Disk usage per mount point.
    usage: HashMap<PathBuf, DiskUsage>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }

    /// Adds a file with the given content.
    ///
    /// Parent directories are automatically created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    /// Adds a symbolic link pointing at `target`.
    pub fn add_link(&mut self, path: impl AsRef<Path>, target: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.links.insert(path, target.as_ref().to_path_buf());
    }

    /// Makes every access to `path` fail with `PermissionDenied`.
    pub fn deny(&mut self, path: impl AsRef<Path>) {
        self.denied.insert(path.as_ref().to_path_buf());
    }

    /// Sets the disk usage reported for a mount point.
    pub fn set_disk_usage(&mut self, mount_point: impl AsRef<Path>, usage: DiskUsage) {
        self.usage.insert(mount_point.as_ref().to_path_buf(), usage);
    }

    /// Removes a path and everything below it, as the kernel does with
    /// `/proc/[pid]` when a process is reaped.
    pub fn remove_tree(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.files.retain(|p, _| !p.starts_with(path));
        self.links.retain(|p, _| !p.starts_with(path));
        self.directories.retain(|p| !p.starts_with(path));
    }

    /// Adds a process with its typical `/proc/[pid]/` files.
    ///
    /// # Arguments
    /// * `pid` - Process ID
    /// * `stat` - Content of `/proc/[pid]/stat`
    /// * `status` - Content of `/proc/[pid]/status`
    /// * `statm` - Content of `/proc/[pid]/statm`
    /// * `io` - Content of `/proc/[pid]/io` (can be empty if not accessible)
    /// * `cmdline` - Content of `/proc/[pid]/cmdline` (NUL separated)
    pub fn add_process(
        &mut self,
        pid: u32,
        stat: &str,
        status: &str,
        statm: &str,
        io: &str,
        cmdline: &str,
    ) {
        let base = PathBuf::from(format!("/proc/{}", pid));
        self.add_dir(&base);
        self.add_file(base.join("stat"), stat);
        self.add_file(base.join("status"), status);
        self.add_file(base.join("statm"), statm);
        if !io.is_empty() {
            self.add_file(base.join("io"), io);
        }
        self.add_file(base.join("cmdline"), cmdline);
    }

    fn check_denied(&self, path: &Path) -> io::Result<()> {
        if self.denied.iter().any(|d| path.starts_with(d)) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {:?}", path),
            ));
        }
        Ok(())
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.check_denied(path)?;
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
            || self.directories.contains(path)
            || self.links.contains_key(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        self.check_denied(path)?;
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let is_child = |p: &PathBuf| p.parent().is_some_and(|parent| parent == path);

        let mut entries = HashSet::new();
        entries.extend(self.files.keys().filter(|p| is_child(p)).cloned());
        entries.extend(self.links.keys().filter(|p| is_child(p)).cloned());
        entries.extend(
            self.directories
                .iter()
                .filter(|p| is_child(p) && p.as_path() != path)
                .cloned(),
        );

        Ok(entries.into_iter().collect())
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        self.check_denied(path)?;
        self.links.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("link not found: {:?}", path),
            )
        })
    }

    fn disk_usage(&self, mount_point: &Path) -> io::Result<DiskUsage> {
        self.usage.get(mount_point).copied().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("mount point not found: {:?}", mount_point),
            )
        })
    }
}
