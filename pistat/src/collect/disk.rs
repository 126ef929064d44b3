//! Disk space usage per physical disk.
//!
//! Physical disks come from `lsblk`; filesystem usage comes from the mounted
//! partitions. A disk's usage is the sum over every partition whose device
//! node belongs to it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use nix::errno::Errno;
use nix::sys::statvfs::statvfs;
use tracing::{debug, trace, warn};

/// Errors that can occur during disk metrics collection.
#[derive(Error, Debug)]
pub enum DiskError {
    #[error("failed to run {command}: {source}")]
    SpawnError {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("failed to parse lsblk output: invalid line '{0}'")]
    ParseError(String),

    #[error("no mounted filesystem at {}", .0.display())]
    MountNotFound(PathBuf),

    #[error("statvfs failed for {}: {source}", path.display())]
    StatvfsError {
        path: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },
}

/// Space usage of a filesystem or a whole disk, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    /// Used share of `used + free`, one decimal. For a whole disk this is the
    /// fullest partition's percentage.
    pub percent: f64,
}

impl DiskInfo {
    /// Usage of a single filesystem.
    pub fn from_usage(total: u64, used: u64, free: u64) -> Self {
        let usable = used + free;
        let percent = if usable > 0 {
            ((used as f64 / usable as f64) * 1000.0).round() / 10.0
        } else {
            0.0
        };
        Self {
            total,
            used,
            free,
            percent,
        }
    }

    /// Usage from raw statvfs counters.
    ///
    /// `used` excludes the blocks reserved for root while `free` only counts
    /// what unprivileged users can allocate, so `used + free` may be less
    /// than `total`, exactly as `df` reports it.
    pub fn from_statvfs(
        blocks: u64,
        blocks_free: u64,
        blocks_avail: u64,
        fragment_size: u64,
    ) -> Self {
        Self::from_usage(
            blocks.saturating_mul(fragment_size),
            blocks.saturating_sub(blocks_free).saturating_mul(fragment_size),
            blocks_avail.saturating_mul(fragment_size),
        )
    }

    /// Combine partition usages into one disk: sizes add up, percent is the maximum.
    pub fn aggregate<'a>(partitions: impl IntoIterator<Item = &'a DiskInfo>) -> Self {
        partitions.into_iter().fold(Self::default(), |acc, p| Self {
            total: acc.total + p.total,
            used: acc.used + p.used,
            free: acc.free + p.free,
            percent: acc.percent.max(p.percent),
        })
    }
}

impl fmt::Display for DiskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total: {} B, used: {} B, free: {} B, percent: {}%",
            self.total, self.used, self.free, self.percent
        )
    }
}

/// A mounted partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Device node, e.g. `/dev/mmcblk0p2`.
    pub device: String,
    pub mount_point: PathBuf,
}

/// Enumerates physical block devices.
pub trait BlockDevices {
    /// Names (without `/dev/`) of devices whose type is `disk`.
    fn list_disks(&self) -> Result<Vec<String>, DiskError>;
}

/// Filesystem usage queries.
pub trait FilesystemUsage {
    fn partitions(&self) -> Result<Vec<Partition>, DiskError>;
    fn usage(&self, mount_point: &Path) -> Result<DiskInfo, DiskError>;
}

/// [`BlockDevices`] backed by `lsblk -o NAME,TYPE -n -l`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lsblk;

impl Lsblk {
    /// Extract disk names from `lsblk -o NAME,TYPE -n -l` output.
    ///
    /// ```text
    /// mmcblk0   disk
    /// mmcblk0p1 part
    /// mmcblk0p2 part
    /// sda       disk
    /// ```
    pub fn parse(output: &str) -> Result<Vec<String>, DiskError> {
        let mut disks = Vec::new();
        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(name), Some(kind)) = (fields.next(), fields.next()) else {
                return Err(DiskError::ParseError(line.to_string()));
            };
            if kind == "disk" {
                disks.push(name.to_string());
            }
        }
        Ok(disks)
    }
}

impl BlockDevices for Lsblk {
    fn list_disks(&self) -> Result<Vec<String>, DiskError> {
        const COMMAND: &str = "lsblk";
        let output = Command::new(COMMAND)
            .args(["-o", "NAME,TYPE", "-n", "-l"])
            .output()
            .map_err(|source| DiskError::SpawnError {
                command: COMMAND,
                source,
            })?;

        if !output.status.success() {
            return Err(DiskError::CommandFailed {
                command: COMMAND,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Self::parse(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Space usage of the filesystem mounted at `mount_point`, from `statvfs(3)`.
pub fn statvfs_usage(mount_point: &Path) -> Result<DiskInfo, DiskError> {
    let stat = statvfs(mount_point).map_err(|errno| match errno {
        Errno::ENOENT => DiskError::MountNotFound(mount_point.to_path_buf()),
        source => DiskError::StatvfsError {
            path: mount_point.to_path_buf(),
            source,
        },
    })?;

    let info = DiskInfo::from_statvfs(
        u64::from(stat.blocks()),
        u64::from(stat.blocks_free()),
        u64::from(stat.blocks_available()),
        u64::from(stat.fragment_size()),
    );
    trace!(mount = %mount_point.display(), %info, "statvfs");
    Ok(info)
}

/// [`FilesystemUsage`] listing partitions from a `sysinfo` snapshot of the
/// mount table and measuring them with [`statvfs_usage`].
///
/// The mount table is read once at construction; build a new value to see
/// newly mounted filesystems.
pub struct SysinfoFilesystems {
    disks: sysinfo::Disks,
}

impl SysinfoFilesystems {
    pub fn new() -> Self {
        Self {
            disks: sysinfo::Disks::new_with_refreshed_list(),
        }
    }
}

impl Default for SysinfoFilesystems {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SysinfoFilesystems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SysinfoFilesystems")
            .field("mounts", &self.disks.list().len())
            .finish()
    }
}

impl FilesystemUsage for SysinfoFilesystems {
    fn partitions(&self) -> Result<Vec<Partition>, DiskError> {
        Ok(self
            .disks
            .list()
            .iter()
            .map(|disk| Partition {
                device: disk.name().to_string_lossy().into_owned(),
                mount_point: disk.mount_point().to_path_buf(),
            })
            .collect())
    }

    fn usage(&self, mount_point: &Path) -> Result<DiskInfo, DiskError> {
        statvfs_usage(mount_point)
    }
}

/// Disk usage collector.
#[derive(Debug)]
pub struct DiskCollector<B = Lsblk, F = SysinfoFilesystems> {
    devices: B,
    filesystems: F,
}

impl DiskCollector {
    /// Collector over `lsblk` and the live mount table.
    pub fn system() -> Self {
        Self::new(Lsblk, SysinfoFilesystems::new())
    }
}

impl<B: BlockDevices, F: FilesystemUsage> DiskCollector<B, F> {
    pub fn new(devices: B, filesystems: F) -> Self {
        Self {
            devices,
            filesystems,
        }
    }

    /// Usage of the root filesystem.
    pub fn root_disk_info(&self) -> Result<DiskInfo, DiskError> {
        self.filesystems.usage(Path::new("/"))
    }

    /// Usage per physical disk, keyed by device name.
    ///
    /// A disk whose partitions cannot be queried is logged and left out; the
    /// remaining disks are still reported.
    pub fn disks_info(&self) -> Result<BTreeMap<String, DiskInfo>, DiskError> {
        let disks = self.devices.list_disks()?;
        let partitions = match self.filesystems.partitions() {
            Ok(partitions) => partitions,
            Err(err) => {
                warn!(error = %err, "Failed to list partitions; no disk usage available");
                return Ok(BTreeMap::new());
            }
        };

        let mut result = BTreeMap::new();
        for disk in disks {
            match self.disk_usage(&disk, &partitions) {
                Ok(info) => {
                    debug!(disk = %disk, %info, "Disk usage aggregated");
                    result.insert(disk, info);
                }
                Err(err) => {
                    warn!(disk = %disk, error = %err, "Failed to get disk information");
                }
            }
        }
        Ok(result)
    }

    fn disk_usage(&self, disk: &str, partitions: &[Partition]) -> Result<DiskInfo, DiskError> {
        let prefix = format!("/dev/{}", disk);
        let usages = partitions
            .iter()
            .filter(|p| p.device.starts_with(&prefix))
            .map(|p| self.filesystems.usage(&p.mount_point))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DiskInfo::aggregate(&usages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tracing::{Level, info};
    use tracing_subscriber::fmt;

    fn init_test_logging() {
        let _ = fmt()
            .with_max_level(Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    struct FixedDisks(Vec<&'static str>);

    impl BlockDevices for FixedDisks {
        fn list_disks(&self) -> Result<Vec<String>, DiskError> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    #[derive(Default)]
    struct FakeMounts {
        partitions: Vec<(&'static str, &'static str)>,
        usage: HashMap<PathBuf, DiskInfo>,
    }

    impl FakeMounts {
        fn mount(
            mut self,
            device: &'static str,
            mount: &'static str,
            total: u64,
            used: u64,
        ) -> Self {
            self.partitions.push((device, mount));
            self.usage.insert(
                PathBuf::from(mount),
                DiskInfo::from_usage(total, used, total - used),
            );
            self
        }

        fn mount_broken(mut self, device: &'static str, mount: &'static str) -> Self {
            self.partitions.push((device, mount));
            self
        }
    }

    impl FilesystemUsage for FakeMounts {
        fn partitions(&self) -> Result<Vec<Partition>, DiskError> {
            Ok(self
                .partitions
                .iter()
                .map(|(device, mount)| Partition {
                    device: device.to_string(),
                    mount_point: PathBuf::from(mount),
                })
                .collect())
        }

        fn usage(&self, mount_point: &Path) -> Result<DiskInfo, DiskError> {
            self.usage
                .get(mount_point)
                .copied()
                .ok_or_else(|| DiskError::MountNotFound(mount_point.to_path_buf()))
        }
    }

    #[test]
    fn test_parse_lsblk() {
        init_test_logging();
        info!("TEST START: test_parse_lsblk");

        let output = "mmcblk0   disk\nmmcblk0p1 part\nmmcblk0p2 part\nsda       disk\nsda1      part\nsr0       rom\n";
        let disks = Lsblk::parse(output).expect("parsing should succeed");

        info!(?disks, "RESULT: disks");
        assert_eq!(disks, vec!["mmcblk0", "sda"]);

        info!("TEST PASS: test_parse_lsblk");
    }

    #[test]
    fn test_parse_lsblk_rejects_single_column() {
        init_test_logging();
        assert!(matches!(
            Lsblk::parse("mmcblk0\n"),
            Err(DiskError::ParseError(_))
        ));
    }

    #[test]
    fn test_from_usage_percent() {
        let info = DiskInfo::from_usage(100, 40, 60);
        assert_eq!(info.percent, 40.0);

        assert_eq!(DiskInfo::from_usage(0, 0, 0).percent, 0.0);
    }

    #[test]
    fn test_from_statvfs_excludes_reserved_blocks() {
        init_test_logging();
        info!("TEST START: test_from_statvfs_excludes_reserved_blocks");

        // 1000 blocks of 4 KiB: 600 free, of which 50 are reserved for root.
        let info = DiskInfo::from_statvfs(1000, 600, 550, 4096);

        info!(%info, "RESULT: statvfs usage");
        assert_eq!(info.total, 4_096_000);
        assert_eq!(info.used, 400 * 4096);
        assert_eq!(info.free, 550 * 4096);
        assert!(info.used + info.free < info.total);
        // 400 / (400 + 550)
        assert_eq!(info.percent, 42.1);

        info!("TEST PASS: test_from_statvfs_excludes_reserved_blocks");
    }

    #[test]
    fn test_statvfs_usage_of_real_directory() {
        init_test_logging();
        let dir = tempfile::tempdir().unwrap();

        let info = statvfs_usage(dir.path()).unwrap();
        assert!(info.total > 0);
        assert!(info.used + info.free <= info.total);
        assert!((0.0..=100.0).contains(&info.percent));
    }

    #[test]
    fn test_statvfs_usage_missing_path() {
        init_test_logging();
        assert!(matches!(
            statvfs_usage(Path::new("/nonexistent/pistat/mount")),
            Err(DiskError::MountNotFound(_))
        ));
    }

    #[test]
    fn test_aggregate_two_partitions() {
        init_test_logging();
        info!("TEST START: test_aggregate_two_partitions");

        let collector = DiskCollector::new(
            FixedDisks(vec!["sda"]),
            FakeMounts::default()
                .mount("/dev/sda1", "/boot", 100, 40)
                .mount("/dev/sda2", "/data", 50, 10),
        );
        let disks = collector.disks_info().unwrap();
        let sda = disks.get("sda").expect("sda should be present");

        info!(%sda, "RESULT: aggregated disk");
        assert_eq!(sda.total, 150);
        assert_eq!(sda.used, 50);
        assert_eq!(sda.free, 100);
        assert_eq!(sda.percent, 40.0);

        info!("TEST PASS: test_aggregate_two_partitions");
    }

    #[test]
    fn test_disk_without_partitions_reports_zero() {
        init_test_logging();

        let collector = DiskCollector::new(FixedDisks(vec!["sdb"]), FakeMounts::default());
        let disks = collector.disks_info().unwrap();
        assert_eq!(disks.get("sdb"), Some(&DiskInfo::default()));
    }

    #[test]
    fn test_failing_disk_is_skipped() {
        init_test_logging();
        info!("TEST START: test_failing_disk_is_skipped");

        let collector = DiskCollector::new(
            FixedDisks(vec!["mmcblk0", "sda"]),
            FakeMounts::default()
                .mount("/dev/mmcblk0p1", "/boot/firmware", 512, 64)
                .mount("/dev/mmcblk0p2", "/", 32_000, 8_000)
                .mount_broken("/dev/sda1", "/mnt/usb"),
        );
        let disks = collector.disks_info().unwrap();

        assert!(disks.contains_key("mmcblk0"));
        assert!(!disks.contains_key("sda"));
        assert_eq!(disks["mmcblk0"].total, 32_512);

        info!("TEST PASS: test_failing_disk_is_skipped");
    }

    #[test]
    fn test_root_disk_info() {
        init_test_logging();

        let collector = DiskCollector::new(
            FixedDisks(vec![]),
            FakeMounts::default().mount("/dev/mmcblk0p2", "/", 1000, 250),
        );
        let root = collector.root_disk_info().unwrap();
        assert_eq!(root.used, 250);
        assert_eq!(root.percent, 25.0);
    }

    #[test]
    fn test_root_disk_missing() {
        init_test_logging();

        let collector = DiskCollector::new(FixedDisks(vec![]), FakeMounts::default());
        assert!(matches!(
            collector.root_disk_info(),
            Err(DiskError::MountNotFound(_))
        ));
    }
}
