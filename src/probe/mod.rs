//! Measurement sources polled by the samplers.
//!
//! A probe performs one bounded measurement per call. Failures are returned
//! as [`ProbeError`] values and recorded by the sampler; they never stop the
//! sampling loop.

mod obs;
mod ping;
mod system;

use std::future::Future;
use std::time::Duration;

pub use obs::{ObsStatsProbe, StreamProbe};
pub use ping::{parse_rtt, PingProbe};
pub use system::SystemProbe;

use crate::error::ProbeError;

/// One OBS process resource usage reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ObsStatsReading {
    /// CPU usage in percent.
    pub cpu_usage: f64,
    /// Resident memory in megabytes.
    pub memory_usage: f64,
}

/// One snapshot of the streaming output's cumulative counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamReading {
    pub active: bool,
    pub output_bytes: f64,
    pub skipped_frames: f64,
    pub total_frames: f64,
}

/// One host resource usage reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemReading {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// A single-shot measurement source.
pub trait Probe: Send + Sync + 'static {
    type Reading: Send + 'static;

    /// Take one measurement.
    fn probe(&self) -> impl Future<Output = Result<Self::Reading, ProbeError>> + Send;
}

/// Runs `fut` with an upper bound, mapping both failure modes into a
/// [`ProbeError`].
pub async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, ProbeError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ProbeError::from_anyhow(&e)),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

/// Rejects NaN and infinite values reported by a remote source.
fn finite(field: &str, value: f64) -> Result<f64, ProbeError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ProbeError::Malformed(format!("{field} is not a finite number")))
    }
}
