//! Host metrics collection modules.
//!
//! Collectors read procfs and sysfs (Linux) or shell out to `lsblk` and
//! `ifconfig`. Filesystem locations go through [`HostPaths`] so tests can
//! point them at a temporary tree.

pub mod address;
pub mod cpu;
pub mod disk;
pub mod interfaces;
pub mod memory;
pub mod network;
pub mod speed;

use std::path::{Path, PathBuf};

/// Mount points of procfs and sysfs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub proc_root: PathBuf,
    pub sys_root: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            sys_root: PathBuf::from("/sys"),
        }
    }
}

impl HostPaths {
    /// Paths under `root/proc` and `root/sys`.
    pub fn rooted(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            proc_root: root.join("proc"),
            sys_root: root.join("sys"),
        }
    }

    pub fn proc_path(&self, rel: &str) -> PathBuf {
        self.proc_root.join(rel)
    }

    pub fn sys_path(&self, rel: &str) -> PathBuf {
        self.sys_root.join(rel)
    }

    pub fn proc_stat(&self) -> PathBuf {
        self.proc_path("stat")
    }

    pub fn net_dev(&self) -> PathBuf {
        self.proc_path("net/dev")
    }

    pub fn sys_class_net(&self) -> PathBuf {
        self.sys_path("class/net")
    }
}
