//! Periodic probe loops with reset-on-read aggregation.
//!
//! A [`Sampler`] owns one probe and runs it on a fixed ticker. Readings are
//! folded by an [`Aggregator`]; the combiner drains the aggregate with
//! [`Sampler::read_and_reset`]. Both sides contend on a single mutex whose
//! critical sections never await.

pub mod policy;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub use policy::{
    Aggregator, CounterDelta, GaugeMax, ObsStatsAggregator, RttAggregator, StreamAggregator,
    SystemAggregator,
};

use crate::error::{ProbeError, StaleRead};
use crate::export::health::HealthMetrics;
use crate::probe::Probe;

/// Result of a successful [`Sampler::read_and_reset`].
#[derive(Debug, Clone, PartialEq)]
pub struct Summary<T> {
    /// Time of the newest sample in this window, or the read time when the
    /// source has never produced a sample.
    pub timestamp: DateTime<Utc>,
    pub value: T,
    /// Last probe failure since the previous read. Reported exactly once.
    pub error: Option<ProbeError>,
    /// Samples taken in this window. Zero only before the first sample.
    pub samples: u64,
}

/// Anything the combiner can drain once per tick.
pub trait SummarySource<T>: Send + Sync {
    /// Source label used in logs, metrics and the error column.
    fn name(&self) -> &'static str;

    fn read_and_reset(&self) -> Result<Summary<T>, StaleRead>;
}

/// Aggregate state guarded by the sampler mutex.
struct AggregateState<A> {
    aggregator: A,
    sticky_error: Option<ProbeError>,
    samples_since_reset: u64,
    total_samples: u64,
    last_sample_at: Option<DateTime<Utc>>,
}

/// One probe, its ticker, and its reset-on-read aggregate.
pub struct Sampler<P, A> {
    name: &'static str,
    interval: Duration,
    probe: P,
    state: Mutex<AggregateState<A>>,
    health: Option<Arc<HealthMetrics>>,
}

impl<P, A> Sampler<P, A>
where
    P: Probe,
    A: Aggregator<Reading = P::Reading>,
{
    pub fn new(name: &'static str, interval: Duration, probe: P, aggregator: A) -> Self {
        Self {
            name,
            interval,
            probe,
            state: Mutex::new(AggregateState {
                aggregator,
                sticky_error: None,
                samples_since_reset: 0,
                total_samples: 0,
                last_sample_at: None,
            }),
            health: None,
        }
    }

    /// Count samples and failures in the given health registry.
    pub fn with_health(mut self, health: Arc<HealthMetrics>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Samples taken over the sampler's lifetime.
    pub fn total_samples(&self) -> u64 {
        self.state.lock().total_samples
    }

    /// Apply one probe outcome.
    ///
    /// A failure still counts as a sample: it is fresh information the
    /// reader has not seen. The aggregate value is left untouched and the
    /// error replaces any earlier one.
    pub fn record(&self, outcome: Result<P::Reading, ProbeError>) {
        let failed = outcome.is_err();

        {
            let mut state = self.state.lock();
            match outcome {
                Ok(reading) => state.aggregator.record(&reading),
                Err(err) => state.sticky_error = Some(err),
            }
            state.samples_since_reset += 1;
            state.total_samples += 1;
            state.last_sample_at = Some(Utc::now());
        }

        if let Some(health) = &self.health {
            let counter = if failed {
                &health.probe_failures_total
            } else {
                &health.samples_total
            };
            counter.with_label_values(&[self.name]).inc();
        }
    }

    /// Drain the aggregate and reset it for the next window.
    ///
    /// Returns [`StaleRead`] without touching any state when samples were
    /// taken before but none since the previous read. Before the very first
    /// sample the placeholder summary is returned with `samples == 0`.
    pub fn read_and_reset(&self) -> Result<Summary<A::Summary>, StaleRead> {
        let mut state = self.state.lock();

        if state.samples_since_reset == 0 {
            if state.total_samples > 0 {
                return Err(StaleRead);
            }
            return Ok(Summary {
                timestamp: Utc::now(),
                value: A::Summary::default(),
                error: None,
                samples: 0,
            });
        }

        let samples = std::mem::take(&mut state.samples_since_reset);
        Ok(Summary {
            timestamp: state.last_sample_at.unwrap_or_else(Utc::now),
            value: state.aggregator.take(),
            error: state.sticky_error.take(),
            samples,
        })
    }

    /// Probe on every tick until `cancel` fires.
    ///
    /// The first probe runs immediately. Ticks missed while a probe is in
    /// flight are skipped, so probes never overlap. A probe already running
    /// when `cancel` fires completes and is recorded; probes are bounded by
    /// their own timeout.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(source = self.name, interval = ?self.interval, "sampler started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let outcome = self.probe.probe().await;

            if let Err(e) = &outcome {
                tracing::debug!(source = self.name, error = %e, "probe failed");
            }
            self.record(outcome);
        }

        tracing::debug!(source = self.name, "sampler stopped");
    }
}

impl<P, A> SummarySource<A::Summary> for Sampler<P, A>
where
    P: Probe,
    A: Aggregator<Reading = P::Reading>,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn read_and_reset(&self) -> Result<Summary<A::Summary>, StaleRead> {
        Sampler::read_and_reset(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    /// Probe returning an increasing RTT, failing on every third call.
    struct FlakyProbe {
        calls: AtomicU64,
    }

    impl Probe for FlakyProbe {
        type Reading = Duration;

        async fn probe(&self) -> Result<Duration, ProbeError> {
            let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
            if n % 3 == 0 {
                Err(ProbeError::Failed(format!("echo {n} lost")))
            } else {
                Ok(Duration::from_millis(n * 10))
            }
        }
    }

    fn rtt_sampler() -> Sampler<FlakyProbe, RttAggregator> {
        Sampler::new(
            "obs_ping",
            Duration::from_millis(100),
            FlakyProbe {
                calls: AtomicU64::new(0),
            },
            RttAggregator::default(),
        )
    }

    #[test]
    fn test_first_read_returns_placeholder() {
        let sampler = rtt_sampler();
        let summary = sampler.read_and_reset().expect("placeholder");

        assert_eq!(summary.samples, 0);
        assert_eq!(summary.value, Duration::ZERO);
        assert!(summary.error.is_none());

        // Still not stale: nothing has ever been sampled.
        assert!(sampler.read_and_reset().is_ok());
    }

    #[test]
    fn test_read_returns_max_and_resets() {
        let sampler = rtt_sampler();
        for ms in [40, 120, 75] {
            sampler.record(Ok(Duration::from_millis(ms)));
        }

        let summary = sampler.read_and_reset().expect("fresh");
        assert_eq!(summary.value, Duration::from_millis(120));
        assert_eq!(summary.samples, 3);

        sampler.record(Ok(Duration::from_millis(20)));
        let summary = sampler.read_and_reset().expect("fresh");
        assert_eq!(summary.value, Duration::from_millis(20));
    }

    #[test]
    fn test_stale_read_leaves_state_untouched() {
        let sampler = rtt_sampler();
        sampler.record(Ok(Duration::from_millis(30)));
        sampler.read_and_reset().expect("fresh");

        assert_eq!(sampler.read_and_reset(), Err(StaleRead));
        assert_eq!(sampler.read_and_reset(), Err(StaleRead));

        sampler.record(Ok(Duration::from_millis(45)));
        let summary = sampler.read_and_reset().expect("fresh again");
        assert_eq!(summary.value, Duration::from_millis(45));
        assert_eq!(summary.samples, 1);
        assert_eq!(sampler.total_samples(), 2);
    }

    #[test]
    fn test_sticky_error_reported_once_last_write_wins() {
        let sampler = rtt_sampler();
        sampler.record(Err(ProbeError::Failed("first".into())));
        sampler.record(Ok(Duration::from_millis(10)));
        sampler.record(Err(ProbeError::Failed("second".into())));

        let summary = sampler.read_and_reset().expect("fresh");
        assert_eq!(summary.error, Some(ProbeError::Failed("second".into())));
        assert_eq!(summary.value, Duration::from_millis(10));
        assert_eq!(summary.samples, 3);

        sampler.record(Ok(Duration::from_millis(15)));
        let summary = sampler.read_and_reset().expect("fresh");
        assert!(summary.error.is_none());
    }

    #[test]
    fn test_failure_only_window_is_fresh_with_zero_value() {
        let sampler = rtt_sampler();
        sampler.record(Err(ProbeError::Timeout(Duration::from_secs(1))));

        let summary = sampler.read_and_reset().expect("a failure is fresh");
        assert_eq!(summary.value, Duration::ZERO);
        assert_eq!(summary.error, Some(ProbeError::Timeout(Duration::from_secs(1))));
    }

    #[test]
    fn test_concurrent_record_and_read() {
        let sampler = Arc::new(rtt_sampler());
        let mut handles = Vec::new();

        for i in 0..50u64 {
            let sampler = Arc::clone(&sampler);
            handles.push(std::thread::spawn(move || {
                for j in 0..20u64 {
                    sampler.record(Ok(Duration::from_micros(i * 100 + j)));
                }
            }));
        }

        let observed = Arc::new(AtomicU64::new(0));
        for _ in 0..100 {
            let sampler = Arc::clone(&sampler);
            let observed = Arc::clone(&observed);
            handles.push(std::thread::spawn(move || {
                for _ in 0..20 {
                    if let Ok(summary) = sampler.read_and_reset() {
                        observed.fetch_add(summary.samples, Ordering::Relaxed);
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().expect("thread panicked");
        }

        if let Ok(summary) = sampler.read_and_reset() {
            observed.fetch_add(summary.samples, Ordering::Relaxed);
        }

        // Every sample is drained by exactly one reader.
        assert_eq!(observed.load(Ordering::Relaxed), 1000);
        assert_eq!(sampler.total_samples(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_samples_until_cancelled() {
        let sampler = Arc::new(rtt_sampler());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&sampler).run(cancel.clone()));

        // Immediate first tick, then ticks at 100ms and 200ms.
        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
        handle.await.expect("sampler task");

        assert_eq!(sampler.total_samples(), 3);

        let summary = sampler.read_and_reset().expect("fresh");
        assert_eq!(summary.value, Duration::from_millis(20));
        assert_eq!(summary.error, Some(ProbeError::Failed("echo 3 lost".into())));
    }

    /// Takes a fixed time to answer.
    struct SlowProbe {
        delay: Duration,
    }

    impl Probe for SlowProbe {
        type Reading = Duration;

        async fn probe(&self) -> Result<Duration, ProbeError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.delay)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_keeps_reading_in_flight() {
        let sampler = Arc::new(Sampler::new(
            "google_ping",
            Duration::from_secs(10),
            SlowProbe {
                delay: Duration::from_millis(100),
            },
            RttAggregator::default(),
        ));
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();
        let handle = tokio::spawn(Arc::clone(&sampler).run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.expect("sampler task");

        // The reading finishing after cancel is kept, and no second tick ran.
        assert_eq!(sampler.total_samples(), 1);
        assert!(started.elapsed() < Duration::from_secs(10));

        let summary = sampler.read_and_reset().expect("fresh");
        assert_eq!(summary.value, Duration::from_millis(100));
    }
}
