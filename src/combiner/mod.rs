//! Fan-in of every sampler into one [`CompositeRecord`] per tick.
//!
//! The combiner pulls: on each tick it drains every source with
//! `read_and_reset`, merges the results over the last known values, and
//! hands the record to each sink in order. Sources that produced nothing
//! new repeat their previous value without an error.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{ProbeError, StaleRead};
use crate::export::health::HealthMetrics;
use crate::record::{CompositeRecord, ObsStatsSummary, SourceValue, StreamSummary, SystemSummary};
use crate::sampler::{Summary, SummarySource};
use crate::sink::Sink;

/// The five inputs of a record.
pub struct Sources {
    pub obs_ping: Arc<dyn SummarySource<Duration>>,
    pub reference_ping: Arc<dyn SummarySource<Duration>>,
    pub stream: Arc<dyn SummarySource<StreamSummary>>,
    pub obs_stats: Arc<dyn SummarySource<ObsStatsSummary>>,
    pub system: Arc<dyn SummarySource<SystemSummary>>,
}

/// Last known value of one source.
#[derive(Debug, Default)]
struct Latest<T> {
    value: T,
    reported: bool,
}

impl<T: Clone + Default> Latest<T> {
    /// Drain `source` and fold the result in.
    ///
    /// Returns the source's contribution to the record and the timestamp of
    /// its summary when it brought fresh data.
    fn pull(
        &mut self,
        source: &dyn SummarySource<T>,
        health: Option<&HealthMetrics>,
    ) -> (SourceValue<T>, Option<DateTime<Utc>>) {
        match source.read_and_reset() {
            Ok(Summary {
                timestamp,
                value,
                error,
                samples,
            }) if samples > 0 => {
                self.value = value;
                self.reported = true;
                (
                    SourceValue {
                        value: self.value.clone(),
                        error,
                    },
                    Some(timestamp),
                )
            }
            // Never sampled yet: placeholder.
            Ok(_) => (SourceValue::ok(self.value.clone()), None),
            Err(StaleRead) => {
                if let Some(health) = health {
                    health
                        .stale_reads_total
                        .with_label_values(&[source.name()])
                        .inc();
                }
                tracing::trace!(source = source.name(), "no new sample, repeating last value");
                (SourceValue::ok(self.value.clone()), None)
            }
        }
    }
}

/// Merges sampler output into records and writes them to every sink.
pub struct Combiner {
    sources: Sources,
    sinks: Vec<Arc<dyn Sink>>,
    interval: Duration,
    health: Option<Arc<HealthMetrics>>,

    obs_ping: Latest<Duration>,
    reference_ping: Latest<Duration>,
    stream: Latest<StreamSummary>,
    obs_stats: Latest<ObsStatsSummary>,
    system: Latest<SystemSummary>,
}

impl Combiner {
    pub fn new(sources: Sources, sinks: Vec<Arc<dyn Sink>>, interval: Duration) -> Self {
        Self {
            sources,
            sinks,
            interval,
            health: None,
            obs_ping: Latest::default(),
            reference_ping: Latest::default(),
            stream: Latest::default(),
            obs_stats: Latest::default(),
            system: Latest::default(),
        }
    }

    /// Count stale reads, records and sink failures in the given registry.
    pub fn with_health(mut self, health: Arc<HealthMetrics>) -> Self {
        self.health = Some(health);
        self
    }

    /// Pull every source once and merge.
    ///
    /// The record's timestamp is the newest fresh summary's timestamp, or
    /// `now` when no source brought fresh data. Returns `None` until at
    /// least one source has reported.
    pub fn collect(&mut self, now: DateTime<Utc>) -> Option<CompositeRecord> {
        let health = self.health.as_deref();

        let (obs_ping, t1) = self.obs_ping.pull(self.sources.obs_ping.as_ref(), health);
        let (reference_ping, t2) = self
            .reference_ping
            .pull(self.sources.reference_ping.as_ref(), health);
        let (stream, t3) = self.stream.pull(self.sources.stream.as_ref(), health);
        let (obs_stats, t4) = self.obs_stats.pull(self.sources.obs_stats.as_ref(), health);
        let (system, t5) = self.system.pull(self.sources.system.as_ref(), health);

        let any_reported = self.obs_ping.reported
            || self.reference_ping.reported
            || self.stream.reported
            || self.obs_stats.reported
            || self.system.reported;
        if !any_reported {
            return None;
        }

        let timestamp = [t1, t2, t3, t4, t5]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(now);

        Some(CompositeRecord {
            timestamp,
            obs_ping,
            reference_ping,
            stream,
            obs_stats,
            system,
        })
    }

    /// Hand `record` to every sink in order. Failures are logged and counted.
    pub fn emit(&self, record: &CompositeRecord) {
        for sink in &self.sinks {
            if let Err(e) = sink.write(record) {
                tracing::warn!(sink = sink.name(), error = %e, "sink write failed");
                if let Some(health) = &self.health {
                    health
                        .sink_write_errors_total
                        .with_label_values(&[sink.name()])
                        .inc();
                }
            }
        }

        if let Some(health) = &self.health {
            health.records_emitted_total.inc();
        }
    }

    /// Tick until `cancel` fires.
    ///
    /// The first record is produced one interval after start, so samplers
    /// have a window to fill.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(interval = ?self.interval, sinks = self.sinks.len(), "combiner started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.collect(Utc::now()) {
                Some(record) => {
                    for (source, err) in record.errors() {
                        log_probe_error(source, err);
                    }
                    self.emit(&record);
                }
                None => tracing::debug!("no source has reported yet, skipping tick"),
            }
        }

        tracing::debug!("combiner stopped");
    }
}

fn log_probe_error(source: &str, err: &ProbeError) {
    tracing::warn!(source, error = %err, "probe failed during interval");
}
