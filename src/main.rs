use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use humantime_serde::re::humantime;
use tracing_subscriber::{fmt, EnvFilter};

use obs_monitor::config::Config;
use obs_monitor::monitor::Monitor;

/// Samples OBS Studio, ingest latency and host load into one row per interval.
#[derive(Parser)]
#[command(name = "obs-monitor", about)]
struct Cli {
    /// Path to a YAML configuration file. Flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// obs-websocket address (host:port).
    #[arg(long)]
    host: Option<String>,

    /// obs-websocket password.
    #[arg(long, env = "OBS_WEBSOCKET_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Write records to this CSV file.
    #[arg(long)]
    csv: Option<String>,

    /// Sampling interval, e.g. "1s" or "500ms".
    #[arg(long, value_parser = humantime::parse_duration)]
    metric_interval: Option<Duration>,

    /// Record output interval, e.g. "5s".
    #[arg(long, value_parser = humantime::parse_duration)]
    writer_interval: Option<Duration>,

    /// Do not print records to stdout.
    #[arg(long)]
    no_console: bool,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied.
    fn resolve_config(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(host) = &self.host {
            cfg.obs.host.clone_from(host);
        }
        if let Some(password) = &self.password {
            cfg.obs.password.clone_from(password);
        }
        if let Some(csv) = &self.csv {
            cfg.csv_file.clone_from(csv);
        }
        if let Some(interval) = self.metric_interval {
            cfg.metric_interval = interval;
        }
        if let Some(interval) = self.writer_interval {
            cfg.writer_interval = interval;
        }
        if self.no_console {
            cfg.console = false;
        }
        if let Some(level) = &self.log_level {
            cfg.log_level.clone_from(level);
        }

        cfg.validate().context("invalid configuration")?;

        Ok(cfg)
    }
}

/// Build-time version info.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("obs-monitor {}", version::full());
        return Ok(());
    }

    let cfg = cli.resolve_config()?;

    // Initialize tracing. Logs go to stderr so the console table stays clean.
    let filter = EnvFilter::try_new(&cfg.log_level)
        .with_context(|| format!("invalid log level: {}", cfg.log_level))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting obs-monitor",
    );

    if cfg.writer_faster_than_samplers() {
        tracing::warn!(
            metric_interval = ?cfg.metric_interval,
            writer_interval = ?cfg.writer_interval,
            "writer interval is shorter than the metric interval, rows will repeat values",
        );
    }

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<()> {
    // Set up signal handling.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<&'static str>();

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("registering SIGTERM handler")?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = sigterm.recv();
        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        let signal = tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = terminate => "SIGTERM",
        };

        let _ = shutdown_tx.send(signal);
    });

    let monitor: Monitor = Monitor::new(cfg)?;
    monitor.start().await?;

    // Wait for shutdown signal.
    if let Ok(signal) = shutdown_rx.await {
        tracing::info!(signal, "received signal, shutting down");
    }

    // Graceful shutdown.
    monitor.shutdown();
    monitor.wait_stopped().await;

    tracing::info!("obs-monitor stopped");

    Ok(())
}
