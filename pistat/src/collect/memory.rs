//! Virtual memory usage from /proc/meminfo.

use crate::collect::HostPaths;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during memory metrics collection.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("/proc/meminfo is missing required field '{0}'")]
    MissingField(&'static str),
}

/// Memory usage in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total: u64,
    /// Memory that can be handed to new allocations without swapping.
    pub available: u64,
    /// Used by processes: total minus free, buffers and page cache.
    pub used: u64,
    /// Completely unused memory.
    pub free: u64,
    /// `(total - available) / total` as a percentage, one decimal.
    pub percent: f64,
}

impl MemoryInfo {
    pub fn read(paths: &HostPaths) -> Result<Self, MemoryError> {
        let path = paths.proc_path("meminfo");
        let content = std::fs::read_to_string(&path)
            .map_err(|source| MemoryError::ReadError { path, source })?;
        Self::parse(&content)
    }

    /// Parse /proc/meminfo content (values in kB).
    pub fn parse(content: &str) -> Result<Self, MemoryError> {
        let fields: HashMap<&str, u64> = content
            .lines()
            .filter_map(|line| {
                let (key, rest) = line.split_once(':')?;
                let kb = rest.split_whitespace().next()?.parse::<u64>().ok()?;
                Some((key.trim(), kb * 1024))
            })
            .collect();

        let get = |key: &'static str| {
            fields
                .get(key)
                .copied()
                .ok_or(MemoryError::MissingField(key))
        };
        let total = get("MemTotal")?;
        let free = get("MemFree")?;
        let buffers = fields.get("Buffers").copied().unwrap_or(0);
        let cached = fields.get("Cached").copied().unwrap_or(0)
            + fields.get("SReclaimable").copied().unwrap_or(0);

        // Kernels before 3.14 have no MemAvailable.
        let available = match fields.get("MemAvailable") {
            Some(v) => *v,
            None => {
                debug!("MemAvailable missing, estimating from free + buffers + cached");
                (free + buffers + cached).min(total)
            }
        };

        let used = match total.checked_sub(free + buffers + cached) {
            Some(used) => used,
            None => total.saturating_sub(free),
        };

        let percent = if total > 0 {
            let pct = (total - available.min(total)) as f64 / total as f64 * 100.0;
            (pct * 10.0).round() / 10.0
        } else {
            0.0
        };

        Ok(Self {
            total,
            available,
            used,
            free,
            percent,
        })
    }
}

impl fmt::Display for MemoryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total: {} B, available: {} B, percent: {}%, used: {} B, free: {} B",
            self.total, self.available, self.percent, self.used, self.free
        )
    }
}
