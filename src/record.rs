//! Per-source summaries and the merged record handed to sinks.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ProbeError;

/// Source label for the RTT to the stream ingest server.
pub const OBS_PING: &str = "obs_ping";
/// Source label for the RTT to the reference host.
pub const REFERENCE_PING: &str = "google_ping";
/// Source label for the streaming output counters.
pub const STREAM: &str = "stream";
/// Source label for OBS process resource usage.
pub const OBS_STATS: &str = "obs_stats";
/// Source label for local host resource usage.
pub const SYSTEM: &str = "system";

/// Peak OBS resource usage since the previous read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ObsStatsSummary {
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

/// Streaming output increments since the previous read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamSummary {
    /// Last observed output state.
    pub active: bool,
    pub output_bytes: f64,
    pub skipped_frames: f64,
    pub total_frames: f64,
}

/// Peak host resource usage since the previous read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemSummary {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// One source's contribution to a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceValue<T> {
    pub value: T,
    pub error: Option<ProbeError>,
}

impl<T> SourceValue<T> {
    pub fn ok(value: T) -> Self {
        Self { value, error: None }
    }
}

/// The merged, per-tick output row.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeRecord {
    pub timestamp: DateTime<Utc>,
    pub obs_ping: SourceValue<Duration>,
    pub reference_ping: SourceValue<Duration>,
    pub stream: SourceValue<StreamSummary>,
    pub obs_stats: SourceValue<ObsStatsSummary>,
    pub system: SourceValue<SystemSummary>,
}

impl CompositeRecord {
    /// A record with every source at its "no data" placeholder.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            obs_ping: SourceValue::default(),
            reference_ping: SourceValue::default(),
            stream: SourceValue::default(),
            obs_stats: SourceValue::default(),
            system: SourceValue::default(),
        }
    }

    pub fn stream_active(&self) -> bool {
        self.stream.value.active
    }

    /// Per-source errors in column order.
    pub fn errors(&self) -> Vec<(&'static str, &ProbeError)> {
        [
            (OBS_PING, self.obs_ping.error.as_ref()),
            (REFERENCE_PING, self.reference_ping.error.as_ref()),
            (STREAM, self.stream.error.as_ref()),
            (OBS_STATS, self.obs_stats.error.as_ref()),
            (SYSTEM, self.system.error.as_ref()),
        ]
        .into_iter()
        .filter_map(|(source, err)| err.map(|e| (source, e)))
        .collect()
    }

    /// All errors joined as `source: message; source: message`.
    pub fn error_summary(&self) -> String {
        self.errors()
            .iter()
            .map(|(source, err)| format!("{source}: {err}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// RTT in milliseconds with microsecond resolution, or `None` when the
/// source failed or has not measured anything.
pub fn rtt_millis(rtt: &SourceValue<Duration>) -> Option<f64> {
    if rtt.error.is_some() || rtt.value.is_zero() {
        return None;
    }
    Some(rtt.value.as_micros() as f64 / 1000.0)
}
