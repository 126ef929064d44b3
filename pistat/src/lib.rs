//! Host status reporting for single-board computers.
//!
//! The stateful piece is [`RateSampler`], which turns absolute network byte
//! counters into throughput. The remaining collectors are direct reads of
//! procfs, sysfs and a few system tools, assembled into a [`HostStatus`].
#![forbid(unsafe_code)]

pub mod collect;
pub mod config;
pub mod snapshot;
pub mod supervisor;

pub use collect::HostPaths;
pub use collect::cpu::{CpuFreq, CpuSampler, CpuUsage};
pub use collect::disk::{DiskCollector, DiskInfo};
pub use collect::interfaces::{ConnectionType, InterfaceInfo, SysNet};
pub use collect::memory::MemoryInfo;
pub use collect::network::{NetworkError, ProcNetDev};
pub use collect::speed::{
    CounterSnapshot, CounterSource, RateSample, RateSampler, SharedRateSampler,
};
pub use config::StatusConfig;
pub use snapshot::{Collectors, HostStatus, collect_status};
pub use supervisor::SupervisorClient;

pub use pistat_common::{LogConfig, init_logging};
