//! obs-websocket v5 message types.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const OP_HELLO: u8 = 0;
pub const OP_IDENTIFY: u8 = 1;
pub const OP_IDENTIFIED: u8 = 2;
pub const OP_EVENT: u8 = 5;
pub const OP_REQUEST: u8 = 6;
pub const OP_REQUEST_RESPONSE: u8 = 7;

/// RPC version this client speaks.
pub const RPC_VERSION: u32 = 1;

/// Status code for a successful request.
pub const STATUS_SUCCESS: u32 = 100;

/// Every frame is `{"op": <opcode>, "d": <payload>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u8,
    pub d: Value,
}

impl Envelope {
    pub fn new<T: Serialize>(op: u8, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            op,
            d: serde_json::to_value(payload)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(default)]
    pub obs_web_socket_version: String,
    pub rpc_version: u32,
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub rpc_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    /// Bitmask of event categories. Only `General` (ExitStarted) is needed.
    pub event_subscriptions: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    #[serde(default)]
    pub negotiated_rpc_version: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request<'a> {
    pub request_type: &'a str,
    pub request_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: u32,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: String,
}

/// `GetVersion` response data.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub obs_version: String,
    #[serde(default)]
    pub obs_web_socket_version: String,
    #[serde(default)]
    pub platform: String,
}

/// `GetStreamServiceSettings` response data.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamServiceSettings {
    #[serde(default)]
    pub stream_service_type: String,
    #[serde(default)]
    pub stream_service_settings: StreamServiceDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamServiceDetails {
    #[serde(default)]
    pub server: String,
}

/// `GetStats` response data. Memory is in megabytes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub cpu_usage: f64,
    pub memory_usage: f64,
}

/// `GetStreamStatus` response data. Counters are cumulative for the
/// current output session.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub output_active: bool,
    #[serde(default)]
    pub output_bytes: f64,
    #[serde(default)]
    pub output_skipped_frames: f64,
    #[serde(default)]
    pub output_total_frames: f64,
}

/// Identify `authentication` string:
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`.
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = STANDARD.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    STANDARD.encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_response_shape() {
        let a = auth_response("supersecret", "salt==", "challenge==");
        let b = auth_response("supersecret", "salt==", "challenge==");
        let c = auth_response("supersecret", "salt==", "other==");

        assert_eq!(a, b);
        assert_ne!(a, c);
        // base64 of a 32-byte digest.
        assert_eq!(a.len(), 44);
        assert!(a.ends_with('='));
    }

    #[test]
    fn test_request_response_decodes() {
        let text = r#"{"op":7,"d":{"requestType":"GetStreamStatus","requestId":"3",
            "requestStatus":{"result":true,"code":100},
            "responseData":{"outputActive":true,"outputBytes":123456,
            "outputSkippedFrames":2,"outputTotalFrames":900,"outputTimecode":"00:00:30.000"}}}"#;

        let env: Envelope = serde_json::from_str(text).expect("envelope");
        assert_eq!(env.op, OP_REQUEST_RESPONSE);

        let resp: RequestResponse = serde_json::from_value(env.d).expect("response");
        assert_eq!(resp.request_id, "3");
        assert!(resp.request_status.result);

        let status: StreamStatus =
            serde_json::from_value(resp.response_data.expect("data")).expect("status");
        assert!(status.output_active);
        assert_eq!(status.output_bytes, 123_456.0);
        assert_eq!(status.output_total_frames, 900.0);
    }

    #[test]
    fn test_identify_omits_missing_authentication() {
        let identify = Identify {
            rpc_version: RPC_VERSION,
            authentication: None,
            event_subscriptions: 1,
        };
        let json = serde_json::to_string(&Envelope::new(OP_IDENTIFY, &identify).expect("env"))
            .expect("json");

        assert_eq!(
            json,
            r#"{"op":1,"d":{"eventSubscriptions":1,"rpcVersion":1}}"#
        );
    }
}
