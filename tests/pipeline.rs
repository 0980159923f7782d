//! Sampler, combiner and sink wiring with an in-memory OBS client.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use obs_monitor::config::{Config, ObsConfig, PingConfig};
use obs_monitor::error::MonitorError;
use obs_monitor::monitor::{Lifecycle, Monitor};
use obs_monitor::obs::protocol::StreamServiceDetails;
use obs_monitor::obs::{ObsClient, Stats, StreamServiceSettings, StreamStatus, VersionInfo};

/// Counts calls and serves a stream whose counters grow on every poll.
#[derive(Default)]
struct FakeObs {
    server: String,
    fail_stats: bool,
    polls: AtomicU64,
    disconnected: AtomicBool,
}

impl FakeObs {
    fn streaming_to(server: &str) -> Self {
        Self {
            server: server.to_string(),
            ..Default::default()
        }
    }
}

impl ObsClient for FakeObs {
    async fn connect(_cfg: &ObsConfig) -> Result<Self> {
        Ok(Self::streaming_to("rtmp://fake-ingest.local/live"))
    }

    async fn version(&self) -> Result<VersionInfo> {
        Ok(VersionInfo {
            obs_version: "31.0.2".to_string(),
            ..Default::default()
        })
    }

    async fn stream_service_settings(&self) -> Result<StreamServiceSettings> {
        Ok(StreamServiceSettings {
            stream_service_type: "rtmp_custom".to_string(),
            stream_service_settings: StreamServiceDetails {
                server: self.server.clone(),
            },
        })
    }

    async fn stats(&self) -> Result<Stats> {
        if self.fail_stats {
            bail!("GetStats failed with code 702: output not running");
        }
        Ok(Stats {
            cpu_usage: 12.0,
            memory_usage: 300.0,
        })
    }

    async fn stream_status(&self) -> Result<StreamStatus> {
        let n = self.polls.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(StreamStatus {
            output_active: true,
            output_bytes: (n * 50_000) as f64,
            output_skipped_frames: 0.0,
            output_total_frames: (n * 3) as f64,
        })
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

fn config(csv: &std::path::Path) -> Config {
    Config {
        ping: PingConfig {
            reference_host: "127.0.0.1".to_string(),
            ..Default::default()
        },
        csv_file: csv.to_string_lossy().into_owned(),
        console: false,
        metric_interval: Duration::from_millis(50),
        writer_interval: Duration::from_millis(200),
        ..Default::default()
    }
}

fn data_rows(content: &str) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());
    reader
        .records()
        .skip(2)
        .map(|r| r.unwrap().iter().map(String::from).collect())
        .collect()
}

#[tokio::test]
async fn pipeline_counters_and_errors_reach_csv() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("run.csv");

    let client = Arc::new(FakeObs {
        fail_stats: true,
        ..FakeObs::streaming_to("fake-ingest.local:1935/live")
    });

    let monitor = Monitor::<FakeObs>::new(config(&csv_path)).unwrap();
    monitor
        .start_with_client(Arc::clone(&client))
        .await
        .expect("start");

    tokio::time::sleep(Duration::from_millis(700)).await;
    monitor.shutdown();
    monitor.wait_stopped().await;

    assert!(client.disconnected.load(Ordering::SeqCst));
    assert_eq!(monitor.state(), Lifecycle::Stopped);

    let content = std::fs::read_to_string(&csv_path).unwrap();
    assert!(content.starts_with("OBS Studio version: 31.0.2,Stream domain: fake-ingest.local,"));

    let rows = data_rows(&content);
    assert!(rows.len() >= 2, "expected at least two rows:\n{content}");

    for row in &rows {
        assert_eq!(row.len(), 12);
        assert_eq!(row[3], "true");
        assert!(
            row[11].contains("obs_stats: GetStats failed with code 702"),
            "errors column: {}",
            row[11]
        );
    }

    // The writer ticks slower than the sampler, so every row drains fresh
    // counters and no delta is repeated. The last undrained window is lost.
    let reported: f64 = rows.iter().map(|r| r[4].parse::<f64>().unwrap()).sum();
    let polls = client.polls.load(Ordering::Relaxed) as f64;
    assert!(reported > 0.0);
    assert!(reported <= polls * 50_000.0);
    assert_eq!(reported % 50_000.0, 0.0);
}

#[tokio::test]
async fn pipeline_setup_failure_disconnects_and_stays_not_started() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("run.csv");
    let client = Arc::new(FakeObs::streaming_to(""));

    let monitor = Monitor::<FakeObs>::new(config(&csv_path)).unwrap();
    let err = monitor
        .start_with_client(Arc::clone(&client))
        .await
        .unwrap_err();

    assert!(matches!(err, MonitorError::Setup(_)), "got {err}");
    assert!(client.disconnected.load(Ordering::SeqCst));
    assert_eq!(monitor.state(), Lifecycle::NotStarted);
    assert!(!csv_path.exists());

    // A corrected retry is allowed.
    let retry = Arc::new(FakeObs::streaming_to("rtmp://fake-ingest.local/live"));
    monitor.start_with_client(retry).await.expect("retry");
    monitor.shutdown();
    monitor.wait_stopped().await;
}

#[tokio::test]
async fn pipeline_rejects_second_start() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = Monitor::<FakeObs>::new(config(&dir.path().join("run.csv"))).unwrap();

    monitor.start().await.expect("start via connect");
    let err = monitor
        .start_with_client(Arc::new(FakeObs::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, MonitorError::AlreadyStarted));

    // Concurrent waiters all observe the stopped state.
    let monitor = Arc::new(monitor);
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move {
                monitor.wait_stopped().await;
                monitor.state()
            })
        })
        .collect();

    monitor.shutdown();
    monitor.shutdown();

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), Lifecycle::Stopped);
    }
}
