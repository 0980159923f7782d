use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::monitor::Lifecycle;

/// Prometheus metrics describing the monitor itself.
///
/// All metrics use the "obs_monitor" namespace. Per-source series are
/// labelled with the source name used in the CSV error column.
pub struct HealthMetrics {
    registry: Registry,

    /// Successful probe readings by source.
    pub samples_total: CounterVec,
    /// Failed probe invocations by source.
    pub probe_failures_total: CounterVec,
    /// Combiner reads that found no new sample, by source.
    pub stale_reads_total: CounterVec,
    /// Composite records handed to the sinks.
    pub records_emitted_total: Counter,
    /// Record writes that failed, by sink.
    pub sink_write_errors_total: CounterVec,
    /// Current lifecycle state (0=not started, 1=running, 2=shutting down, 3=stopped).
    pub lifecycle_state: Gauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let samples_total = CounterVec::new(
            Opts::new("samples_total", "Total successful probe readings by source.")
                .namespace("obs_monitor"),
            &["source"],
        )?;
        let probe_failures_total = CounterVec::new(
            Opts::new(
                "probe_failures_total",
                "Total failed probe invocations by source.",
            )
            .namespace("obs_monitor"),
            &["source"],
        )?;
        let stale_reads_total = CounterVec::new(
            Opts::new(
                "stale_reads_total",
                "Total reads that found no new measurement, by source.",
            )
            .namespace("obs_monitor"),
            &["source"],
        )?;
        let records_emitted_total = Counter::with_opts(
            Opts::new(
                "records_emitted_total",
                "Total composite records handed to sinks.",
            )
            .namespace("obs_monitor"),
        )?;
        let sink_write_errors_total = CounterVec::new(
            Opts::new(
                "sink_write_errors_total",
                "Total failed record writes by sink.",
            )
            .namespace("obs_monitor"),
            &["sink"],
        )?;
        let lifecycle_state = Gauge::with_opts(
            Opts::new("lifecycle_state", "Current monitor lifecycle state.")
                .namespace("obs_monitor"),
        )?;

        registry.register(Box::new(samples_total.clone()))?;
        registry.register(Box::new(probe_failures_total.clone()))?;
        registry.register(Box::new(stale_reads_total.clone()))?;
        registry.register(Box::new(records_emitted_total.clone()))?;
        registry.register(Box::new(sink_write_errors_total.clone()))?;
        registry.register(Box::new(lifecycle_state.clone()))?;

        Ok(Self {
            registry,
            samples_total,
            probe_failures_total,
            stale_reads_total,
            records_emitted_total,
            sink_write_errors_total,
            lifecycle_state,
        })
    }

    pub fn set_lifecycle(&self, state: Lifecycle) {
        self.lifecycle_state.set(state.as_gauge());
    }

    /// Renders the registry in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        render_registry(&self.registry)
    }

    /// Starts the HTTP server serving /metrics and /healthz on `addr`.
    ///
    /// The server task is spawned on `tasks` and drains once `cancel` fires.
    /// Returns the bound address.
    pub async fn start(
        &self,
        addr: &str,
        tasks: &TaskTracker,
        cancel: CancellationToken,
    ) -> Result<SocketAddr> {
        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        tasks.spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }

            tracing::debug!("health metrics server stopped");
        });

        Ok(local_addr)
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

fn render_registry(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;

    String::from_utf8(buffer).context("converting metrics to string")
}

/// GET /metrics
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match render_registry(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "rendering metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
