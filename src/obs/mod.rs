mod client;
pub mod protocol;

use std::future::Future;

use anyhow::{bail, Context, Result};
use url::Url;

pub use client::Client;
pub use protocol::{Stats, StreamServiceSettings, StreamStatus, VersionInfo};

use crate::config::ObsConfig;

/// OBS websocket API client trait.
pub trait ObsClient: Send + Sync + 'static {
    /// Open an authenticated session.
    fn connect(cfg: &ObsConfig) -> impl Future<Output = Result<Self>> + Send
    where
        Self: Sized;

    /// Fetch the OBS and obs-websocket versions.
    fn version(&self) -> impl Future<Output = Result<VersionInfo>> + Send;

    /// Fetch the configured stream destination.
    fn stream_service_settings(
        &self,
    ) -> impl Future<Output = Result<StreamServiceSettings>> + Send;

    /// Fetch OBS process resource usage.
    fn stats(&self) -> impl Future<Output = Result<Stats>> + Send;

    /// Fetch the streaming output state and cumulative counters.
    fn stream_status(&self) -> impl Future<Output = Result<StreamStatus>> + Send;

    /// Close the session. Idempotent.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}

/// Hostname of a stream server URL, used as the ingest ping target.
///
/// A URL without a scheme is treated as `rtmp://`. Ports, paths and IPv6
/// brackets are stripped.
pub fn extract_domain(server_url: &str) -> Result<String> {
    let raw = server_url.trim();
    if raw.is_empty() {
        bail!("stream server URL is empty");
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("rtmp://{raw}")
    };

    let parsed =
        Url::parse(&with_scheme).with_context(|| format!("parsing stream server URL {raw:?}"))?;

    match parsed.host_str() {
        Some(host) if !host.is_empty() => {
            Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
        }
        _ => bail!("no hostname in stream server URL {raw:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        let cases = [
            ("rtmp://live.twitch.tv/app", "live.twitch.tv"),
            ("rtmps://a.rtmps.youtube.com:443/live2", "a.rtmps.youtube.com"),
            ("live.twitch.tv:1935/app", "live.twitch.tv"),
            ("ingest.example.com", "ingest.example.com"),
            ("srt://10.0.0.5:9000?streamid=abc", "10.0.0.5"),
            ("rtmp://[2001:db8::1]:1935/live", "2001:db8::1"),
        ];

        for (input, want) in cases {
            assert_eq!(extract_domain(input).expect(input), want, "input {input}");
        }
    }

    #[test]
    fn test_extract_domain_rejects_empty() {
        assert!(extract_domain("").is_err());
        assert!(extract_domain("   ").is_err());
        assert!(extract_domain("rtmp://").is_err());
    }
}
