//! Abstractions for filesystem access to enable testing and mocking.
//!
//! The `FileSystem` trait lets the procfs metric source read the real `/proc`
//! on Linux or an in-memory tree in tests.

use std::io;
use std::path::{Path, PathBuf};

/// Space accounting for a mounted filesystem, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
}

/// Abstraction for filesystem operations.
///
/// Implementations must be shareable across the sampling threads.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Lists entries in a directory.
    ///
    /// # Returns
    /// A vector of paths to entries in the directory, or an I/O error.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Resolves a symbolic link such as `/proc/[pid]/exe` or `/proc/[pid]/fd/3`.
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Returns total and used bytes of the filesystem mounted at `mount_point`.
    fn disk_usage(&self, mount_point: &Path) -> io::Result<DiskUsage>;
}

/// Real filesystem implementation that delegates to `std::fs`.
///
/// Use this in production to read from the actual `/proc` filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::read_link(path)
    }

    fn disk_usage(&self, mount_point: &Path) -> io::Result<DiskUsage> {
        let stat = nix::sys::statvfs::statvfs(mount_point).map_err(io::Error::from)?;
        let fragment = stat.fragment_size() as u64;
        let total = stat.blocks() as u64 * fragment;
        let free = stat.blocks_free() as u64 * fragment;
        Ok(DiskUsage {
            total,
            used: total.saturating_sub(free),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_real_fs_read_to_string() {
        let fs = RealFs::new();
        // Cargo.toml exists in the project root
        let cargo_toml = env::current_dir().unwrap().join("Cargo.toml");
        let content = fs.read_to_string(&cargo_toml).unwrap();
        assert!(content.contains("[package]"));
    }

    #[test]
    fn test_real_fs_exists() {
        let fs = RealFs::new();
        let cargo_toml = env::current_dir().unwrap().join("Cargo.toml");
        assert!(fs.exists(&cargo_toml));
        assert!(!fs.exists(Path::new("/nonexistent/path/12345")));
    }

    #[test]
    fn test_real_fs_read_dir() {
        let fs = RealFs::new();
        let src_dir = env::current_dir().unwrap().join("src");
        let entries = fs.read_dir(&src_dir).unwrap();
        assert!(entries.iter().any(|p| p.ends_with("lib.rs")));
    }

    #[test]
    fn test_real_fs_read_link_missing() {
        let fs = RealFs::new();
        let err = fs.read_link(Path::new("/nonexistent/link/12345")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_real_fs_disk_usage_of_root() {
        let fs = RealFs::new();
        let usage = fs.disk_usage(Path::new("/")).unwrap();
        assert!(usage.used <= usage.total);
    }
}
