//! Network throughput sampling.
//!
//! A [`RateSampler`] keeps the previous counter reading and turns each new
//! reading into a bytes-per-second estimate for upload and download. The first
//! call only establishes the baseline and reports a zero rate.

use crate::collect::network::{NetworkError, ProcNetDev};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Host-wide byte counters paired with the moment they were read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Cumulative bytes transmitted since boot.
    pub bytes_sent: u64,
    /// Cumulative bytes received since boot.
    pub bytes_received: u64,
    /// Monotonic time of the reading.
    pub taken_at: Instant,
}

/// Throughput estimate derived from two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSample {
    /// Upload rate in bytes per second.
    pub upload_bytes_per_sec: u64,
    /// Download rate in bytes per second.
    pub download_bytes_per_sec: u64,
}

impl RateSample {
    /// Rate with both directions at zero.
    pub const ZERO: Self = Self {
        upload_bytes_per_sec: 0,
        download_bytes_per_sec: 0,
    };

    /// Compute the rate between two snapshots.
    ///
    /// Returns `None` when `curr` was not taken strictly after `prev`, since no
    /// rate can be derived from a zero-length interval. A counter that went
    /// backwards (interface reset) yields zero for that direction.
    pub fn between(prev: &CounterSnapshot, curr: &CounterSnapshot) -> Option<Self> {
        let elapsed = curr.taken_at.checked_duration_since(prev.taken_at)?;
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }

        let per_sec = |delta: u64| (delta as f64 / secs).round() as u64;

        Some(Self {
            upload_bytes_per_sec: per_sec(curr.bytes_sent.saturating_sub(prev.bytes_sent)),
            download_bytes_per_sec: per_sec(
                curr.bytes_received.saturating_sub(prev.bytes_received),
            ),
        })
    }
}

impl fmt::Display for RateSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "upload: {} B/s, download: {} B/s",
            self.upload_bytes_per_sec, self.download_bytes_per_sec
        )
    }
}

/// Source of host-wide network byte counters.
pub trait CounterSource {
    /// Read the current counters, stamped with a monotonic timestamp.
    fn read_counters(&self) -> Result<CounterSnapshot, NetworkError>;
}

impl<S: CounterSource + ?Sized> CounterSource for &S {
    fn read_counters(&self) -> Result<CounterSnapshot, NetworkError> {
        (**self).read_counters()
    }
}

/// Stateful sampler that reports throughput between consecutive calls.
#[derive(Debug)]
pub struct RateSampler<S = ProcNetDev> {
    source: S,
    last: Option<CounterSnapshot>,
}

impl RateSampler<ProcNetDev> {
    /// Sampler over the live /proc/net/dev counters.
    pub fn from_proc() -> Self {
        Self::new(ProcNetDev::new())
    }
}

impl Default for RateSampler<ProcNetDev> {
    fn default() -> Self {
        Self::from_proc()
    }
}

impl<S: CounterSource> RateSampler<S> {
    /// Create a sampler with no baseline.
    pub fn new(source: S) -> Self {
        Self { source, last: None }
    }

    /// The stored baseline, if any.
    pub fn last_snapshot(&self) -> Option<&CounterSnapshot> {
        self.last.as_ref()
    }

    /// Read the counters and return the rate since the previous call.
    ///
    /// The first call stores the baseline and returns [`RateSample::ZERO`].
    /// A reading that does not advance the clock also returns zero and keeps
    /// the existing baseline. Counter read failures propagate unchanged and
    /// leave the state untouched.
    pub fn sample(&mut self) -> Result<RateSample, NetworkError> {
        let curr = self.source.read_counters()?;

        let Some(prev) = self.last else {
            info!("First network sample - establishing baseline");
            self.last = Some(curr);
            return Ok(RateSample::ZERO);
        };

        let Some(rate) = RateSample::between(&prev, &curr) else {
            debug!("Counter read did not advance the clock; keeping previous baseline");
            return Ok(RateSample::ZERO);
        };

        if curr.bytes_sent < prev.bytes_sent || curr.bytes_received < prev.bytes_received {
            warn!(
                prev_sent = prev.bytes_sent,
                curr_sent = curr.bytes_sent,
                prev_received = prev.bytes_received,
                curr_received = curr.bytes_received,
                "Network counters went backwards; clamping rate to zero"
            );
        }

        self.last = Some(curr);

        debug!(
            upload = rate.upload_bytes_per_sec,
            download = rate.download_bytes_per_sec,
            "Network rate sampled"
        );
        Ok(rate)
    }

    /// Discard the baseline so the next call starts over.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// A [`RateSampler`] that can be shared between threads.
///
/// The mutex covers the whole read-modify-write of the baseline, so
/// concurrent callers each see a rate against a consistent previous reading.
#[derive(Debug)]
pub struct SharedRateSampler<S = ProcNetDev> {
    inner: Mutex<RateSampler<S>>,
}

impl Default for SharedRateSampler<ProcNetDev> {
    fn default() -> Self {
        Self::new(ProcNetDev::new())
    }
}

impl<S: CounterSource> SharedRateSampler<S> {
    pub fn new(source: S) -> Self {
        Self {
            inner: Mutex::new(RateSampler::new(source)),
        }
    }

    /// See [`RateSampler::sample`].
    pub fn sample(&self) -> Result<RateSample, NetworkError> {
        // A panic mid-sample cannot leave the baseline half-written.
        let mut sampler = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        sampler.sample()
    }
}
