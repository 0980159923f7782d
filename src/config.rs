use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// OBS websocket connection configuration.
    #[serde(default)]
    pub obs: ObsConfig,

    /// Ping probe configuration.
    #[serde(default)]
    pub ping: PingConfig,

    /// CSV output path. Empty disables the CSV sink.
    #[serde(default)]
    pub csv_file: String,

    /// Print each merged record to stdout. Default: true.
    #[serde(default = "default_true")]
    pub console: bool,

    /// Tick interval shared by every sampler. Default: 1s.
    #[serde(default = "default_metric_interval", with = "humantime_serde")]
    pub metric_interval: Duration,

    /// Tick interval of the combiner that writes merged rows. Default: 5s.
    #[serde(default = "default_writer_interval", with = "humantime_serde")]
    pub writer_interval: Duration,

    /// Prometheus health endpoint configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// OBS websocket connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ObsConfig {
    /// obs-websocket address, e.g. "localhost:4455". A `ws://` prefix is optional.
    #[serde(default = "default_obs_host")]
    pub host: String,

    /// obs-websocket password. Empty when authentication is disabled.
    #[serde(default)]
    pub password: String,

    /// Connect and per-request timeout. Default: 2s.
    #[serde(default = "default_obs_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Ping probe configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PingConfig {
    /// Second RTT target, reported in the `google_rtt_ms` column.
    #[serde(default = "default_reference_host")]
    pub reference_host: String,

    /// Upper bound on a single echo. Default: 1s.
    #[serde(default = "default_ping_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthConfig {
    /// Listen address, e.g. ":9090". Empty disables the server.
    #[serde(default)]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metric_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_writer_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_obs_host() -> String {
    "localhost:4455".to_string()
}

fn default_obs_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_reference_host() -> String {
    "google.com".to_string()
}

fn default_ping_timeout() -> Duration {
    Duration::from_secs(1)
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            obs: ObsConfig::default(),
            ping: PingConfig::default(),
            csv_file: String::new(),
            console: true,
            metric_interval: default_metric_interval(),
            writer_interval: default_writer_interval(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            host: default_obs_host(),
            password: String::new(),
            timeout: default_obs_timeout(),
        }
    }
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            reference_host: default_reference_host(),
            timeout: default_ping_timeout(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::from_yaml(&data).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(data: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as an empty map.
        let cfg: Config = if data.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(data).context("decoding yaml")?
        };

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.obs.host.trim().is_empty() {
            bail!("obs.host is required");
        }

        if self.metric_interval.is_zero() {
            bail!("metric_interval must be positive");
        }

        if self.writer_interval.is_zero() {
            bail!("writer_interval must be positive");
        }

        if self.ping.reference_host.trim().is_empty() {
            bail!("ping.reference_host is required");
        }

        if self.ping.timeout.is_zero() {
            bail!("ping.timeout must be positive");
        }

        if self.obs.timeout.is_zero() {
            bail!("obs.timeout must be positive");
        }

        Ok(())
    }

    /// True when the combiner ticks faster than the samplers, which produces
    /// repeated rows. Accepted, but worth a warning.
    pub fn writer_faster_than_samplers(&self) -> bool {
        self.writer_interval < self.metric_interval
    }

    /// Upper bound for a single OBS request issued by a sampler.
    pub fn obs_probe_timeout(&self) -> Duration {
        self.obs.timeout.min(self.metric_interval)
    }

    /// Upper bound for a single ping issued by a sampler.
    pub fn ping_probe_timeout(&self) -> Duration {
        self.ping.timeout.min(self.metric_interval)
    }

    /// CSV output path, if the CSV sink is enabled.
    pub fn csv_path(&self) -> Option<&Path> {
        if self.csv_file.is_empty() {
            None
        } else {
            Some(Path::new(&self.csv_file))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.obs.host, "localhost:4455");
        assert_eq!(cfg.metric_interval, Duration::from_secs(1));
        assert_eq!(cfg.writer_interval, Duration::from_secs(5));
        assert_eq!(cfg.ping.reference_host, "google.com");
        assert!(cfg.console);
        assert!(cfg.health.addr.is_empty());
        assert!(cfg.csv_path().is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_empty_document_uses_defaults() {
        let cfg = Config::from_yaml("").expect("empty config is valid");
        assert_eq!(cfg.obs.host, "localhost:4455");
    }

    #[test]
    fn test_from_yaml_parses_durations_and_paths() {
        let yaml = r#"
obs:
  host: "studio.lan:4455"
  password: "secret"
  timeout: 750ms
csv_file: /tmp/metrics.csv
metric_interval: 500ms
writer_interval: 2s
ping:
  reference_host: 1.1.1.1
"#;
        let cfg = Config::from_yaml(yaml).expect("valid config");
        assert_eq!(cfg.obs.host, "studio.lan:4455");
        assert_eq!(cfg.obs.password, "secret");
        assert_eq!(cfg.obs.timeout, Duration::from_millis(750));
        assert_eq!(cfg.metric_interval, Duration::from_millis(500));
        assert_eq!(cfg.writer_interval, Duration::from_secs(2));
        assert_eq!(cfg.ping.reference_host, "1.1.1.1");
        assert_eq!(cfg.csv_path(), Some(Path::new("/tmp/metrics.csv")));
    }

    #[test]
    fn test_validation_rejects_empty_host() {
        let cfg = Config {
            obs: ObsConfig {
                host: "  ".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("obs.host"));
    }

    #[test]
    fn test_validation_rejects_zero_intervals() {
        let cfg = Config {
            metric_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(cfg
            .validate()
            .unwrap_err()
            .to_string()
            .contains("metric_interval"));

        let cfg = Config {
            writer_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(cfg
            .validate()
            .unwrap_err()
            .to_string()
            .contains("writer_interval"));
    }

    #[test]
    fn test_writer_faster_than_samplers_is_accepted() {
        let cfg = Config {
            metric_interval: Duration::from_secs(2),
            writer_interval: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
        assert!(cfg.writer_faster_than_samplers());
    }

    #[test]
    fn test_probe_timeouts_bounded_by_metric_interval() {
        let cfg = Config {
            metric_interval: Duration::from_millis(200),
            ..Default::default()
        };
        assert_eq!(cfg.obs_probe_timeout(), Duration::from_millis(200));
        assert_eq!(cfg.ping_probe_timeout(), Duration::from_millis(200));

        let cfg = Config::default();
        assert_eq!(cfg.obs_probe_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.ping_probe_timeout(), Duration::from_secs(1));
    }
}
