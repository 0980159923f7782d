use std::sync::Arc;
use std::time::Duration;

use super::{bounded, finite, ObsStatsReading, Probe, StreamReading};
use crate::error::ProbeError;
use crate::obs::ObsClient;

/// Polls `GetStats` for OBS CPU and memory usage.
pub struct ObsStatsProbe<C> {
    client: Arc<C>,
    timeout: Duration,
}

impl<C: ObsClient> ObsStatsProbe<C> {
    pub fn new(client: Arc<C>, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl<C: ObsClient> Probe for ObsStatsProbe<C> {
    type Reading = ObsStatsReading;

    async fn probe(&self) -> Result<ObsStatsReading, ProbeError> {
        let stats = bounded(self.timeout, self.client.stats()).await?;

        Ok(ObsStatsReading {
            cpu_usage: finite("cpuUsage", stats.cpu_usage)?,
            memory_usage: finite("memoryUsage", stats.memory_usage)?,
        })
    }
}

/// Polls `GetStreamStatus` for the output state and cumulative counters.
pub struct StreamProbe<C> {
    client: Arc<C>,
    timeout: Duration,
}

impl<C: ObsClient> StreamProbe<C> {
    pub fn new(client: Arc<C>, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl<C: ObsClient> Probe for StreamProbe<C> {
    type Reading = StreamReading;

    async fn probe(&self) -> Result<StreamReading, ProbeError> {
        let status = bounded(self.timeout, self.client.stream_status()).await?;

        Ok(StreamReading {
            active: status.output_active,
            output_bytes: finite("outputBytes", status.output_bytes)?,
            skipped_frames: finite("outputSkippedFrames", status.output_skipped_frames)?,
            total_frames: finite("outputTotalFrames", status.output_total_frames)?,
        })
    }
}
