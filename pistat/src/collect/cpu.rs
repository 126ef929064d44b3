//! CPU metrics from /proc/stat and sysfs.
//!
//! Load percentage is computed from /proc/stat jiffy deltas between two
//! readings, the same baseline scheme the network sampler uses. Temperature
//! and frequency are direct sysfs reads.

use crate::collect::HostPaths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Thermal sensor name used by Raspberry Pi kernels.
const CPU_THERMAL: &str = "cpu_thermal";

/// Errors that can occur during CPU metrics collection.
#[derive(Error, Debug)]
pub enum CpuError {
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse /proc/stat: {0}")]
    ParseError(String),

    #[error("failed to parse {}: '{value}'", path.display())]
    InvalidValue { path: PathBuf, value: String },
}

fn read_file(path: &Path) -> Result<String, CpuError> {
    fs::read_to_string(path).map_err(|source| CpuError::ReadError {
        path: path.to_path_buf(),
        source,
    })
}

/// Cumulative jiffies for one `cpu` line of /proc/stat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    fn parse(fields: &[&str]) -> Result<Self, CpuError> {
        if fields.len() < 4 {
            return Err(CpuError::ParseError(format!(
                "cpu line has {} fields, expected at least 4",
                fields.len()
            )));
        }

        let mut values = [0u64; 8];
        for (slot, raw) in values.iter_mut().zip(fields) {
            *slot = raw
                .parse()
                .map_err(|_| CpuError::ParseError(format!("invalid jiffy count '{}'", raw)))?;
        }

        let [user, nice, system, idle, iowait, irq, softirq, steal] = values;
        Ok(Self {
            user,
            nice,
            system,
            idle,
            iowait,
            irq,
            softirq,
            steal,
        })
    }

    /// All accounted time.
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    /// Time not spent idle or waiting on I/O.
    pub fn busy(&self) -> u64 {
        self.total() - self.idle - self.iowait
    }

    /// Busy percentage between two readings, rounded to one decimal.
    pub fn percent_since(&self, prev: &CpuTimes) -> f64 {
        let total_delta = self.total().saturating_sub(prev.total());
        if total_delta == 0 {
            return 0.0;
        }
        let busy_delta = self.busy().saturating_sub(prev.busy());
        let pct = (busy_delta as f64 / total_delta as f64 * 100.0).clamp(0.0, 100.0);
        (pct * 10.0).round() / 10.0
    }
}

/// Parsed /proc/stat content relevant to CPU telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcStat {
    /// Aggregate `cpu` line.
    pub total: CpuTimes,
    /// One entry per `cpuN` line, in kernel order.
    pub per_core: Vec<CpuTimes>,
    /// `btime`: boot time in seconds since the epoch.
    pub boot_time: Option<i64>,
}

impl ProcStat {
    pub fn read(paths: &HostPaths) -> Result<Self, CpuError> {
        let content = read_file(&paths.proc_stat())?;
        Self::parse(&content)
    }

    /// Parse /proc/stat content.
    ///
    /// ```text
    /// cpu  4705 356 584 3699176 23060 0 277 0 0 0
    /// cpu0 1393 280 307 924096 6038 0 197 0 0 0
    /// btime 1700000000
    /// ```
    pub fn parse(content: &str) -> Result<Self, CpuError> {
        let mut total = None;
        let mut per_core = Vec::new();
        let mut boot_time = None;

        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let Some(key) = parts.next() else {
                continue;
            };
            let fields: Vec<&str> = parts.collect();

            if key == "cpu" {
                total = Some(CpuTimes::parse(&fields)?);
            } else if key.starts_with("cpu") && key[3..].chars().all(|c| c.is_ascii_digit()) {
                per_core.push(CpuTimes::parse(&fields)?);
            } else if key == "btime" {
                boot_time = fields.first().and_then(|v| v.parse().ok());
            }
        }

        let total = total.ok_or_else(|| CpuError::ParseError("missing aggregate cpu line".into()))?;
        Ok(Self {
            total,
            per_core,
            boot_time,
        })
    }
}

/// CPU load percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    /// Utilization across all cores (0-100).
    pub overall_percent: f64,
    /// Per-core utilization, empty unless requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub per_core_percent: Vec<f64>,
}

/// Computes CPU load between consecutive calls.
#[derive(Debug)]
pub struct CpuSampler {
    paths: HostPaths,
    last: Option<ProcStat>,
}

impl CpuSampler {
    pub fn new(paths: HostPaths) -> Self {
        Self { paths, last: None }
    }

    /// Sample CPU load since the previous call.
    ///
    /// The first call stores the baseline and reports 0.0 everywhere.
    pub fn sample(&mut self, percpu: bool) -> Result<CpuUsage, CpuError> {
        let curr = ProcStat::read(&self.paths)?;

        let usage = match &self.last {
            Some(prev) => usage_between(prev, &curr, percpu),
            None => {
                debug!("CPU sampler initialized, first sample collected");
                CpuUsage {
                    overall_percent: 0.0,
                    per_core_percent: if percpu {
                        vec![0.0; curr.per_core.len()]
                    } else {
                        Vec::new()
                    },
                }
            }
        };

        self.last = Some(curr);
        Ok(usage)
    }

    /// Block for `interval` and return the load measured across it.
    pub fn sample_over(&mut self, interval: Duration, percpu: bool) -> Result<CpuUsage, CpuError> {
        self.sample(percpu)?;
        std::thread::sleep(interval);
        self.sample(percpu)
    }
}

fn usage_between(prev: &ProcStat, curr: &ProcStat, percpu: bool) -> CpuUsage {
    let per_core_percent = if percpu {
        curr.per_core
            .iter()
            .zip(prev.per_core.iter().chain(std::iter::repeat(&CpuTimes::default())))
            .map(|(c, p)| c.percent_since(p))
            .collect()
    } else {
        Vec::new()
    };

    CpuUsage {
        overall_percent: curr.total.percent_since(&prev.total),
        per_core_percent,
    }
}

/// Logical core count.
pub fn cpu_count(paths: &HostPaths) -> Result<usize, CpuError> {
    let stat = ProcStat::read(paths)?;
    if stat.per_core.is_empty() {
        return Err(CpuError::ParseError("no per-core cpu lines".into()));
    }
    Ok(stat.per_core.len())
}

/// Boot time reported by the kernel.
pub fn boot_time(paths: &HostPaths) -> Result<DateTime<Utc>, CpuError> {
    let stat = ProcStat::read(paths)?;
    stat.boot_time
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| CpuError::ParseError("missing or invalid btime".into()))
}

/// CPU temperature in degrees Celsius.
///
/// Looks for the `cpu_thermal` hwmon device first, then a thermal zone of the
/// same type, then `thermal_zone0`. Returns `None` when the board exposes no
/// sensor.
pub fn cpu_temperature(paths: &HostPaths) -> Result<Option<f64>, CpuError> {
    let Some(input) = find_temperature_input(paths) else {
        debug!("No CPU temperature sensor found");
        return Ok(None);
    };

    let raw = read_file(&input)?;
    let millidegrees: f64 = raw.trim().parse().map_err(|_| CpuError::InvalidValue {
        path: input.clone(),
        value: raw.trim().to_string(),
    })?;

    trace!(sensor = %input.display(), millidegrees, "Read CPU temperature");
    Ok(Some(millidegrees / 1000.0))
}

fn find_temperature_input(paths: &HostPaths) -> Option<PathBuf> {
    let hwmon = paths.sys_path("class/hwmon");
    if let Some(dir) = find_child_with(&hwmon, "name", |name| name == CPU_THERMAL) {
        let input = dir.join("temp1_input");
        if input.exists() {
            return Some(input);
        }
    }

    let thermal = paths.sys_path("class/thermal");
    if let Some(dir) = find_child_with(&thermal, "type", |kind| {
        kind == CPU_THERMAL || kind == "cpu-thermal"
    }) {
        return Some(dir.join("temp"));
    }

    let fallback = thermal.join("thermal_zone0/temp");
    fallback.exists().then_some(fallback)
}

/// First subdirectory of `root` whose `attr` file matches `pred`.
fn find_child_with(root: &Path, attr: &str, pred: impl Fn(&str) -> bool) -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    dirs.sort();

    dirs.into_iter().find(|dir| {
        fs::read_to_string(dir.join(attr))
            .map(|value| pred(value.trim()))
            .unwrap_or(false)
    })
}

/// CPU frequency in MHz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuFreq {
    /// Average current frequency across cores.
    pub current_mhz: f64,
    pub min_mhz: f64,
    pub max_mhz: f64,
}

/// Read CPU frequency from cpufreq, or `None` if the kernel has no cpufreq driver.
pub fn cpu_freq(paths: &HostPaths) -> Result<Option<CpuFreq>, CpuError> {
    let cpu_root = paths.sys_path("devices/system/cpu");
    let cpu0 = cpu_root.join("cpu0/cpufreq");
    if !cpu0.is_dir() {
        debug!(path = %cpu0.display(), "cpufreq not available");
        return Ok(None);
    }

    let mut current = Vec::new();
    let mut index = 0;
    loop {
        let path = cpu_root.join(format!("cpu{}/cpufreq/scaling_cur_freq", index));
        if !path.exists() {
            break;
        }
        match read_khz(&path) {
            Ok(khz) => current.push(khz),
            Err(err) => warn!(error = %err, "Skipping unreadable core frequency"),
        }
        index += 1;
    }

    let current_mhz = if current.is_empty() {
        0.0
    } else {
        current.iter().sum::<f64>() / current.len() as f64 / 1000.0
    };

    Ok(Some(CpuFreq {
        current_mhz,
        min_mhz: read_khz(&cpu0.join("cpuinfo_min_freq"))? / 1000.0,
        max_mhz: read_khz(&cpu0.join("cpuinfo_max_freq"))? / 1000.0,
    }))
}

fn read_khz(path: &Path) -> Result<f64, CpuError> {
    let raw = read_file(path)?;
    raw.trim().parse().map_err(|_| CpuError::InvalidValue {
        path: path.to_path_buf(),
        value: raw.trim().to_string(),
    })
}
