//! Network byte counters from /proc/net/dev.
//!
//! Reads the cumulative per-interface counters and folds them into the
//! host-wide totals consumed by the rate sampler.

use crate::collect::speed::{CounterSnapshot, CounterSource};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, trace};

/// Default location of the kernel network device counters.
pub const PROC_NET_DEV: &str = "/proc/net/dev";

/// Errors that can occur during network counter collection.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse /proc/net/dev: invalid format at line '{0}'")]
    ParseError(String),

    #[error("no network interfaces found")]
    NoInterfaces,
}

/// Raw network interface counters parsed from /proc/net/dev.
///
/// All byte values are cumulative since boot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetDevStats {
    /// Interface name (e.g., "eth0", "wlan0").
    pub interface: String,
    /// Bytes received.
    pub rx_bytes: u64,
    /// Bytes transmitted.
    pub tx_bytes: u64,
}

impl NetDevStats {
    /// Parse /proc/net/dev content into a list of interface statistics.
    ///
    /// Format:
    /// ```text
    /// Inter-|   Receive                                                |  Transmit
    ///  face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    ///   eth0: 12345678   12345    0    0    0     0          0         0 87654321   54321    0    0    0     0       0          0
    /// ```
    pub fn parse_all(content: &str) -> Result<Vec<Self>, NetworkError> {
        let mut stats = Vec::new();

        for line in content.lines().skip(2) {
            if let Some(stat) = Self::parse_line(line)? {
                stats.push(stat);
            }
        }

        if stats.is_empty() {
            return Err(NetworkError::NoInterfaces);
        }

        Ok(stats)
    }

    fn parse_line(line: &str) -> Result<Option<Self>, NetworkError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (interface, rest) = line
            .split_once(':')
            .ok_or_else(|| NetworkError::ParseError(line.to_string()))?;
        let interface = interface.trim().to_string();

        let values: Vec<u64> = rest
            .split_whitespace()
            .filter_map(|s| s.parse::<u64>().ok())
            .collect();

        // 8 receive fields followed by 8 transmit fields
        if values.len() < 16 {
            debug!(
                interface = %interface,
                field_count = values.len(),
                "Skipping interface with incomplete counters"
            );
            return Ok(None);
        }

        Ok(Some(Self {
            interface,
            rx_bytes: values[0],
            tx_bytes: values[8],
        }))
    }
}

/// Host-wide byte totals across every interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteTotals {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl ByteTotals {
    /// Sum counters over all interfaces, loopback included.
    pub fn sum(stats: &[NetDevStats]) -> Self {
        stats.iter().fold(Self::default(), |acc, s| Self {
            bytes_sent: acc.bytes_sent.wrapping_add(s.tx_bytes),
            bytes_received: acc.bytes_received.wrapping_add(s.rx_bytes),
        })
    }
}

/// Counter source backed by a /proc/net/dev style file.
#[derive(Debug, Clone)]
pub struct ProcNetDev {
    path: PathBuf,
}

impl ProcNetDev {
    /// Read from the live kernel counters.
    pub fn new() -> Self {
        Self::with_path(PROC_NET_DEV)
    }

    /// Read from an alternate file (used by tests and containers with a remapped /proc).
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read and parse every interface's counters.
    pub fn read_stats(&self) -> Result<Vec<NetDevStats>, NetworkError> {
        let content =
            std::fs::read_to_string(&self.path).map_err(|source| NetworkError::ReadError {
                path: self.path.clone(),
                source,
            })?;
        NetDevStats::parse_all(&content)
    }
}

impl Default for ProcNetDev {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSource for ProcNetDev {
    fn read_counters(&self) -> Result<CounterSnapshot, NetworkError> {
        let stats = self.read_stats()?;
        let taken_at = Instant::now();
        let totals = ByteTotals::sum(&stats);

        trace!(
            interfaces = stats.len(),
            bytes_sent = totals.bytes_sent,
            bytes_received = totals.bytes_received,
            "Read network counters"
        );

        Ok(CounterSnapshot {
            bytes_sent: totals.bytes_sent,
            bytes_received: totals.bytes_received,
            taken_at,
        })
    }
}
