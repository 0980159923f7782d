use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;

use super::Probe;
use crate::error::ProbeError;

static RTT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // Matches "time=12.3 ms", "time=12ms" and Windows' "time<1ms".
    Regex::new(r"time[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").expect("valid rtt regex")
});

/// Single ICMP echo to a host, via the system `ping` binary.
///
/// Shelling out avoids the raw-socket privileges an in-process ICMP
/// implementation needs.
#[derive(Debug, Clone)]
pub struct PingProbe {
    target: String,
    timeout: Duration,
}

impl PingProbe {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("ping");
        cmd.args(ping_args(&self.target, self.timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Probe for PingProbe {
    type Reading = Duration;

    async fn probe(&self) -> Result<Duration, ProbeError> {
        let output = match tokio::time::timeout(self.timeout, self.command().output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ProbeError::Failed(format!("running ping: {e}"))),
            Err(_) => return Err(ProbeError::Timeout(self.timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(rtt) = parse_rtt(&stdout) {
            return Ok(rtt);
        }

        if output.status.success() {
            return Err(ProbeError::Malformed(format!(
                "no round-trip time in ping output for {}",
                self.target
            )));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim();
        if detail.is_empty() {
            Err(ProbeError::Failed(format!(
                "no response received from {}",
                self.target
            )))
        } else {
            Err(ProbeError::Failed(detail.to_string()))
        }
    }
}

/// Extracts the first round-trip time from `ping` output.
pub fn parse_rtt(output: &str) -> Option<Duration> {
    let captures = RTT_PATTERN.captures(output)?;
    let millis: f64 = captures.get(1)?.as_str().parse().ok()?;
    if !millis.is_finite() || millis < 0.0 {
        return None;
    }
    Some(Duration::from_micros((millis * 1000.0).round() as u64))
}

fn ping_args(target: &str, timeout: Duration) -> Vec<String> {
    let secs = timeout.as_millis().div_ceil(1000).max(1).to_string();

    if cfg!(target_os = "windows") {
        let millis = timeout.as_millis().max(1).to_string();
        vec!["-n".into(), "1".into(), "-w".into(), millis, target.into()]
    } else if cfg!(target_os = "macos") {
        vec!["-c".into(), "1".into(), "-t".into(), secs, target.into()]
    } else {
        vec!["-c".into(), "1".into(), "-W".into(), secs, target.into()]
    }
}
