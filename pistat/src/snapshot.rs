//! Host status snapshot.
//!
//! [`collect_status`] runs every collector once and assembles the results
//! into a [`HostStatus`], the JSON document printed by `pistat status`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::collect::HostPaths;
use crate::collect::address::{Ifconfig, get_ips};
use crate::collect::cpu::{self, CpuFreq, CpuSampler, CpuUsage};
use crate::collect::disk::{DiskCollector, DiskInfo};
use crate::collect::interfaces::{ConnectionType, InterfaceInfo, SysNet, connection_types};
use crate::collect::memory::MemoryInfo;
use crate::collect::network::ProcNetDev;
use crate::collect::speed::{RateSample, RateSampler};
use crate::config::StatusConfig;
use crate::supervisor::{self, SupervisorClient};

/// Format version of [`HostStatus`].
pub const STATUS_PROTOCOL_VERSION: u32 = 1;

/// Everything pistat knows about the host at one moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostStatus {
    /// Format version for compatibility checks.
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    pub cpu: CpuStatus,
    pub memory: MemoryInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkStatus>,
    /// Wall time spent collecting, including the sampling window.
    pub collection_duration_ms: u64,
}

/// CPU section of a [`HostStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuStatus {
    pub count: usize,
    pub usage: CpuUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_celsius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<CpuFreq>,
}

/// Disk section of a [`HostStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<DiskInfo>,
    pub disks: BTreeMap<String, DiskInfo>,
}

/// Network section of a [`HostStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub ips: BTreeMap<String, IpAddr>,
    pub macs: BTreeMap<String, String>,
    pub interfaces: Vec<InterfaceInfo>,
    pub connection_types: Vec<ConnectionType>,
    /// Throughput across the sampling window.
    pub speed: RateSample,
}

impl HostStatus {
    /// Serialize to compact JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn is_compatible(&self) -> bool {
        self.version == STATUS_PROTOCOL_VERSION
    }

    /// One-line view for logs.
    pub fn summary(&self) -> StatusSummary {
        StatusSummary {
            hostname: self.hostname.clone(),
            timestamp: self.timestamp,
            cpu_percent: self.cpu.usage.overall_percent,
            temperature_celsius: self.cpu.temperature_celsius,
            memory_percent: self.memory.percent,
            root_disk_percent: self
                .disk
                .as_ref()
                .and_then(|d| d.root.as_ref())
                .map(|r| r.percent),
            speed: self.network.as_ref().map(|n| n.speed),
        }
    }
}

/// Compact summary of a [`HostStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub hostname: String,
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_celsius: Option<f64>,
    pub memory_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_disk_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<RateSample>,
}

impl std::fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] CPU: {:.1}%, Mem: {:.1}%",
            self.hostname, self.cpu_percent, self.memory_percent
        )?;
        if let Some(temp) = self.temperature_celsius {
            write!(f, ", Temp: {:.1}°C", temp)?;
        }
        if let Some(disk) = self.root_disk_percent {
            write!(f, ", Disk: {:.1}%", disk)?;
        }
        if let Some(speed) = &self.speed {
            write!(f, ", Net: {}", speed)?;
        }
        Ok(())
    }
}

/// Stateful collectors reused across snapshots.
#[derive(Debug)]
pub struct Collectors {
    pub paths: HostPaths,
    pub cpu: CpuSampler,
    pub network: RateSampler<ProcNetDev>,
    pub disks: DiskCollector,
    pub net: SysNet,
    pub supervisor: Option<SupervisorClient>,
}

impl Collectors {
    /// Collectors over the roots and Supervisor settings in `config`.
    ///
    /// The Supervisor client is only built inside a Home Assistant add-on.
    pub fn from_config(config: &StatusConfig) -> Self {
        let paths = config.host_paths();
        let supervisor = if supervisor::is_homeassistant_addon() {
            let timeout = Duration::from_secs(config.supervisor_timeout_secs.value);
            match SupervisorClient::from_env(&config.supervisor_url.value, timeout) {
                Ok(client) => Some(client),
                Err(err) => {
                    warn!(error = %err, "Supervisor client unavailable");
                    None
                }
            }
        } else {
            None
        };
        Self::new(paths, supervisor)
    }

    pub fn new(paths: HostPaths, supervisor: Option<SupervisorClient>) -> Self {
        Self {
            cpu: CpuSampler::new(paths.clone()),
            network: RateSampler::new(ProcNetDev::with_path(paths.net_dev())),
            disks: DiskCollector::system(),
            net: SysNet::new(paths.sys_class_net()),
            supervisor,
            paths,
        }
    }
}

/// Host name from the kernel, then `$HOSTNAME`, then `"unknown"`.
pub fn hostname(paths: &HostPaths) -> String {
    std::fs::read_to_string(paths.proc_path("sys/kernel/hostname"))
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Collect a full status snapshot.
///
/// CPU load and network speed are both measured over one
/// `cpu_sample_ms` window. Optional readings (temperature, frequency, boot
/// time) that fail are logged and left empty; memory and CPU load failures
/// abort the snapshot.
pub fn collect_status(collectors: &mut Collectors, config: &StatusConfig) -> Result<HostStatus> {
    let start = Instant::now();
    let percpu = config.percpu.value;
    let include_network = config.include_network.value;

    collectors.cpu.sample(percpu).context("Failed to read CPU times")?;
    if include_network {
        collectors
            .network
            .sample()
            .context("Failed to read network counters")?;
    }
    std::thread::sleep(Duration::from_millis(config.cpu_sample_ms.value));
    let usage = collectors
        .cpu
        .sample(percpu)
        .context("Failed to read CPU times")?;
    let speed = if include_network {
        Some(
            collectors
                .network
                .sample()
                .context("Failed to read network counters")?,
        )
    } else {
        None
    };

    let paths = &collectors.paths;
    let cpu = CpuStatus {
        count: cpu::cpu_count(paths).context("Failed to count CPUs")?,
        usage,
        temperature_celsius: optional("cpu temperature", cpu::cpu_temperature(paths)),
        frequency: optional("cpu frequency", cpu::cpu_freq(paths)),
    };

    let memory = MemoryInfo::read(paths).context("Failed to read memory info")?;

    let timestamp = Utc::now();
    let boot_time = match cpu::boot_time(paths) {
        Ok(boot) => Some(boot),
        Err(err) => {
            warn!(error = %err, "Boot time unavailable");
            None
        }
    };
    let uptime_secs = boot_time.map(|boot| (timestamp - boot).num_seconds().max(0) as u64);

    let disk = config.include_disks.value.then(|| collect_disks(&collectors.disks));

    let network = match speed {
        Some(speed) => Some(collect_network(collectors, speed)?),
        None => None,
    };

    let status = HostStatus {
        version: STATUS_PROTOCOL_VERSION,
        timestamp,
        hostname: hostname(&collectors.paths),
        boot_time,
        uptime_secs,
        cpu,
        memory,
        disk,
        network,
        collection_duration_ms: start.elapsed().as_millis() as u64,
    };

    info!(
        duration_ms = status.collection_duration_ms,
        "{}",
        status.summary()
    );
    Ok(status)
}

fn optional<T, E: std::fmt::Display>(what: &str, result: Result<Option<T>, E>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "Skipping {}", what);
            None
        }
    }
}

fn collect_disks(disks: &DiskCollector) -> DiskStatus {
    let root = match disks.root_disk_info() {
        Ok(info) => Some(info),
        Err(err) => {
            warn!(error = %err, "Root filesystem usage unavailable");
            None
        }
    };
    let disks = match disks.disks_info() {
        Ok(map) => map,
        Err(err) => {
            warn!(error = %err, "Disk enumeration failed");
            BTreeMap::new()
        }
    };
    debug!(disks = disks.len(), "Collected disk usage");
    DiskStatus { root, disks }
}

fn collect_network(collectors: &Collectors, speed: RateSample) -> Result<NetworkStatus> {
    let interfaces = collectors
        .net
        .interfaces()
        .context("Failed to enumerate network interfaces")?;
    let macs = interfaces
        .iter()
        .filter_map(|i| i.mac.clone().map(|mac| (i.name.clone(), mac)))
        .collect();
    let ips = get_ips(collectors.supervisor.as_ref(), &collectors.net, &Ifconfig)
        .context("Failed to resolve IP addresses")?;

    Ok(NetworkStatus {
        ips,
        macs,
        connection_types: connection_types(&interfaces),
        interfaces,
        speed,
    })
}
