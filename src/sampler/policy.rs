//! Reduction strategies applied between two reads of a sampler.
//!
//! Gauges report the peak since the previous read and start over at zero.
//! Monotonic counters report the increment since the previous read; the
//! running maximum is kept and becomes the next baseline.

use std::time::Duration;

use crate::probe::{ObsStatsReading, StreamReading, SystemReading};
use crate::record::{ObsStatsSummary, StreamSummary, SystemSummary};

/// Folds probe readings into a summary, reset on every read.
pub trait Aggregator: Send + 'static {
    type Reading: Send + 'static;
    type Summary: Clone + Default + Send + Sync + 'static;

    /// Apply one successful reading.
    fn record(&mut self, reading: &Self::Reading);

    /// Produce the summary since the previous call and reset for the next window.
    fn take(&mut self) -> Self::Summary;
}

/// Maximum value seen since the last reset.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaugeMax<T> {
    current_max: T,
}

impl<T: PartialOrd + Copy + Default> GaugeMax<T> {
    pub fn observe(&mut self, value: T) {
        if value > self.current_max {
            self.current_max = value;
        }
    }

    pub fn peek(&self) -> T {
        self.current_max
    }

    /// Returns the maximum and resets it to zero.
    pub fn take(&mut self) -> T {
        std::mem::take(&mut self.current_max)
    }
}

/// Increment of a monotonically increasing cumulative value between reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterDelta {
    current_max: f64,
    baseline: f64,
    observations: u64,
}

impl CounterDelta {
    pub fn observe(&mut self, cumulative: f64) {
        if cumulative > self.current_max {
            self.current_max = cumulative;
        }
        self.observations += 1;
    }

    /// Returns `current_max - baseline` and moves the baseline forward.
    ///
    /// With fewer than two observations in the counter's lifetime there is
    /// no delta to report yet: the reading becomes the baseline and zero is
    /// returned.
    pub fn take(&mut self) -> f64 {
        if self.observations < 2 {
            self.baseline = self.current_max;
            return 0.0;
        }

        let delta = self.current_max - self.baseline;
        self.baseline = self.current_max;
        delta
    }

    pub fn baseline(&self) -> f64 {
        self.baseline
    }
}

/// Gauge over round-trip times.
#[derive(Debug, Default)]
pub struct RttAggregator {
    max: GaugeMax<Duration>,
}

impl Aggregator for RttAggregator {
    type Reading = Duration;
    type Summary = Duration;

    fn record(&mut self, reading: &Duration) {
        self.max.observe(*reading);
    }

    fn take(&mut self) -> Duration {
        self.max.take()
    }
}

/// Gauges over OBS CPU and memory usage.
#[derive(Debug, Default)]
pub struct ObsStatsAggregator {
    cpu: GaugeMax<f64>,
    memory: GaugeMax<f64>,
}

impl Aggregator for ObsStatsAggregator {
    type Reading = ObsStatsReading;
    type Summary = ObsStatsSummary;

    fn record(&mut self, reading: &ObsStatsReading) {
        self.cpu.observe(reading.cpu_usage);
        self.memory.observe(reading.memory_usage);
    }

    fn take(&mut self) -> ObsStatsSummary {
        ObsStatsSummary {
            cpu_percent: self.cpu.take(),
            memory_mb: self.memory.take(),
        }
    }
}

/// Gauges over host CPU and memory usage.
#[derive(Debug, Default)]
pub struct SystemAggregator {
    cpu: GaugeMax<f64>,
    memory: GaugeMax<f64>,
}

impl Aggregator for SystemAggregator {
    type Reading = SystemReading;
    type Summary = SystemSummary;

    fn record(&mut self, reading: &SystemReading) {
        self.cpu.observe(reading.cpu_percent);
        self.memory.observe(reading.memory_percent);
    }

    fn take(&mut self) -> SystemSummary {
        SystemSummary {
            cpu_percent: self.cpu.take(),
            memory_percent: self.memory.take(),
        }
    }
}

/// Counters over the streaming output; the active flag is last-write-wins.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    active: bool,
    bytes: CounterDelta,
    skipped_frames: CounterDelta,
    total_frames: CounterDelta,
}

impl Aggregator for StreamAggregator {
    type Reading = StreamReading;
    type Summary = StreamSummary;

    fn record(&mut self, reading: &StreamReading) {
        self.active = reading.active;
        self.bytes.observe(reading.output_bytes);
        self.skipped_frames.observe(reading.skipped_frames);
        self.total_frames.observe(reading.total_frames);
    }

    fn take(&mut self) -> StreamSummary {
        StreamSummary {
            active: self.active,
            output_bytes: self.bytes.take(),
            skipped_frames: self.skipped_frames.take(),
            total_frames: self.total_frames.take(),
        }
    }
}
