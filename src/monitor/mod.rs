use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::combiner::{Combiner, Sources};
use crate::config::Config;
use crate::error::MonitorError;
use crate::export::health::HealthMetrics;
use crate::obs::{self, extract_domain, ObsClient};
use crate::probe::{ObsStatsProbe, PingProbe, Probe, StreamProbe, SystemProbe};
use crate::record::{OBS_PING, OBS_STATS, REFERENCE_PING, STREAM, SYSTEM};
use crate::sampler::{
    Aggregator, ObsStatsAggregator, RttAggregator, Sampler, StreamAggregator, SystemAggregator,
};
use crate::sink::{ConsoleSink, CsvSink, Provenance, Sink};

/// Monitor lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    NotStarted,
    Running,
    ShuttingDown,
    Stopped,
}

impl Lifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        }
    }

    pub(crate) fn as_gauge(self) -> f64 {
        match self {
            Self::NotStarted => 0.0,
            Self::Running => 1.0,
            Self::ShuttingDown => 2.0,
            Self::Stopped => 3.0,
        }
    }
}

/// Session facts fetched from OBS at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub obs_version: String,
    pub stream_domain: String,
}

/// Resources released once every loop has exited.
struct Resources<C> {
    client: Arc<C>,
    sinks: Vec<Arc<dyn Sink>>,
}

/// Monitor orchestrates the OBS connection, samplers, combiner and sinks.
///
/// Startup order is connection, samplers, combiner. Shutdown reverses it:
/// every loop is cancelled and awaited before sinks are closed and the OBS
/// connection is dropped.
pub struct Monitor<C: ObsClient = obs::Client> {
    cfg: Config,
    health: Arc<HealthMetrics>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    starting: AtomicBool,
    state: watch::Sender<Lifecycle>,
    resources: Mutex<Option<Resources<C>>>,
    session: parking_lot::Mutex<Option<SessionInfo>>,
}

impl<C: ObsClient> Monitor<C> {
    /// Creates a new monitor, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health = Arc::new(HealthMetrics::new().context("creating health metrics")?);
        health.set_lifecycle(Lifecycle::NotStarted);

        Ok(Self {
            cfg,
            health,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            starting: AtomicBool::new(false),
            state: watch::Sender::new(Lifecycle::NotStarted),
            resources: Mutex::new(None),
            session: parking_lot::Mutex::new(None),
        })
    }

    pub fn state(&self) -> Lifecycle {
        *self.state.borrow()
    }

    /// Receiver notified on every lifecycle transition.
    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.state.subscribe()
    }

    pub fn health(&self) -> &Arc<HealthMetrics> {
        &self.health
    }

    /// OBS version and stream domain, once started.
    pub fn session(&self) -> Option<SessionInfo> {
        self.session.lock().clone()
    }

    /// Connect to OBS and start every loop.
    ///
    /// Connection failure is fatal and not retried. On any error no
    /// background task is left running and the state stays `NotStarted`.
    pub async fn start(&self) -> Result<(), MonitorError> {
        self.claim_start()?;

        info!(host = %self.cfg.obs.host, "connecting to OBS");
        let client = match C::connect(&self.cfg.obs).await {
            Ok(client) => Arc::new(client),
            Err(e) => {
                self.starting.store(false, Ordering::SeqCst);
                return Err(MonitorError::Connection(e));
            }
        };

        self.launch(client).await
    }

    /// Start every loop on an already connected client.
    pub async fn start_with_client(&self, client: Arc<C>) -> Result<(), MonitorError> {
        self.claim_start()?;
        self.launch(client).await
    }

    /// Request shutdown. Non-blocking and idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.mark_shutting_down();
    }

    /// `Running -> ShuttingDown`; any other state is left alone.
    fn mark_shutting_down(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == Lifecycle::Running {
                *state = Lifecycle::ShuttingDown;
                true
            } else {
                false
            }
        });

        if changed {
            info!("shutting down");
            self.health.set_lifecycle(Lifecycle::ShuttingDown);
        }
    }

    /// Block until shutdown has been requested and every loop has exited,
    /// then close sinks and disconnect. Safe to call from several callers.
    pub async fn wait_stopped(&self) {
        self.cancel.cancelled().await;

        // Waits out a start() that is still launching tasks.
        let mut resources = self.resources.lock().await;

        self.tasks.close();
        self.tasks.wait().await;

        if let Some(Resources { client, sinks }) = resources.take() {
            for sink in &sinks {
                if let Err(e) = sink.close() {
                    error!(sink = sink.name(), error = %e, "error closing sink");
                }
            }
            client.disconnect().await;
            debug!("OBS connection closed");
        }

        let changed = self.state.send_if_modified(|state| {
            if *state == Lifecycle::Stopped {
                false
            } else {
                *state = Lifecycle::Stopped;
                true
            }
        });
        if changed {
            self.health.set_lifecycle(Lifecycle::Stopped);
            info!("monitor stopped");
        }
    }

    fn claim_start(&self) -> Result<(), MonitorError> {
        if self.cancel.is_cancelled() {
            return Err(MonitorError::ShutDown);
        }
        if self.starting.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::AlreadyStarted);
        }
        Ok(())
    }

    async fn launch(&self, client: Arc<C>) -> Result<(), MonitorError> {
        let mut resources = self.resources.lock().await;

        let prepared = match self.prepare(&client).await {
            Ok(prepared) => prepared,
            Err(e) => {
                client.disconnect().await;
                self.starting.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let Prepared { session, sinks } = prepared;

        // Health server last: nothing fallible may follow a spawned task.
        if !self.cfg.health.addr.is_empty() {
            if let Err(e) = self
                .health
                .start(&self.cfg.health.addr, &self.tasks, self.cancel.child_token())
                .await
            {
                close_all(&sinks);
                client.disconnect().await;
                self.starting.store(false, Ordering::SeqCst);
                return Err(MonitorError::Setup(e.context("starting health metrics server")));
            }
        }

        // Shutdown may have been requested while connecting or binding. A
        // health server already spawned exits on its own token.
        if self.cancel.is_cancelled() {
            close_all(&sinks);
            client.disconnect().await;
            return Err(MonitorError::ShutDown);
        }

        self.spawn_loops(&client, &session, sinks.clone());

        *resources = Some(Resources { client, sinks });
        *self.session.lock() = Some(session);

        self.state.send_replace(Lifecycle::Running);
        self.health.set_lifecycle(Lifecycle::Running);
        info!("monitor running");

        // shutdown() cancels before it looks at the state, so one that saw
        // NotStarted above is caught here.
        if self.cancel.is_cancelled() {
            self.mark_shutting_down();
        }

        Ok(())
    }

    /// Everything fallible that has to succeed before a loop is spawned.
    async fn prepare(&self, client: &C) -> Result<Prepared, MonitorError> {
        let version = client
            .version()
            .await
            .context("fetching OBS version")
            .map_err(MonitorError::Setup)?;

        let settings = client
            .stream_service_settings()
            .await
            .context("fetching stream service settings")
            .map_err(MonitorError::Setup)?;

        let server = &settings.stream_service_settings.server;
        let stream_domain = extract_domain(server)
            .context("resolving stream ingest host")
            .map_err(MonitorError::Setup)?;

        info!(
            obs_version = %version.obs_version,
            service = %settings.stream_service_type,
            stream_domain = %stream_domain,
            "connected to OBS"
        );

        let session = SessionInfo {
            obs_version: version.obs_version,
            stream_domain,
        };

        let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
        if let Some(path) = self.cfg.csv_path() {
            let provenance = Provenance {
                obs_version: session.obs_version.clone(),
                stream_domain: session.stream_domain.clone(),
                os: std::env::consts::OS.to_string(),
            };
            let sink = CsvSink::create(path, &provenance)?;
            info!(path = %path.display(), "writing metrics to CSV");
            sinks.push(Arc::new(sink));
        }
        if self.cfg.console {
            sinks.push(Arc::new(ConsoleSink::stdout()));
        }
        if sinks.is_empty() {
            warn!("no sinks configured, records will only update health metrics");
        }

        Ok(Prepared { session, sinks })
    }

    fn spawn_loops(&self, client: &Arc<C>, session: &SessionInfo, sinks: Vec<Arc<dyn Sink>>) {
        let interval = self.cfg.metric_interval;
        let ping_timeout = self.cfg.ping_probe_timeout();
        let obs_timeout = self.cfg.obs_probe_timeout();

        let obs_ping = self.sampler(
            OBS_PING,
            PingProbe::new(session.stream_domain.clone(), ping_timeout),
            RttAggregator::default(),
        );
        let reference_ping = self.sampler(
            REFERENCE_PING,
            PingProbe::new(self.cfg.ping.reference_host.clone(), ping_timeout),
            RttAggregator::default(),
        );
        let stream = self.sampler(
            STREAM,
            StreamProbe::new(Arc::clone(client), obs_timeout),
            StreamAggregator::default(),
        );
        let obs_stats = self.sampler(
            OBS_STATS,
            ObsStatsProbe::new(Arc::clone(client), obs_timeout),
            ObsStatsAggregator::default(),
        );
        let system = self.sampler(SYSTEM, SystemProbe::new(), SystemAggregator::default());

        debug!(interval = ?interval, "samplers started");

        let combiner = Combiner::new(
            Sources {
                obs_ping,
                reference_ping,
                stream,
                obs_stats,
                system,
            },
            sinks,
            self.cfg.writer_interval,
        )
        .with_health(Arc::clone(&self.health));

        self.tasks.spawn(combiner.run(self.cancel.child_token()));
    }

    /// Build a sampler and spawn its loop.
    fn sampler<P, A>(&self, name: &'static str, probe: P, aggregator: A) -> Arc<Sampler<P, A>>
    where
        P: Probe,
        A: Aggregator<Reading = P::Reading>,
    {
        let sampler = Arc::new(
            Sampler::new(name, self.cfg.metric_interval, probe, aggregator)
                .with_health(Arc::clone(&self.health)),
        );
        self.tasks
            .spawn(Arc::clone(&sampler).run(self.cancel.child_token()));
        sampler
    }
}

struct Prepared {
    session: SessionInfo,
    sinks: Vec<Arc<dyn Sink>>,
}

fn close_all(sinks: &[Arc<dyn Sink>]) {
    for sink in sinks {
        if let Err(e) = sink.close() {
            warn!(sink = sink.name(), error = %e, "error closing sink");
        }
    }
}
