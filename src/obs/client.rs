use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::protocol::{
    auth_response, Envelope, Event, Hello, Identified, Identify, Request, RequestResponse,
    OP_EVENT, OP_HELLO, OP_IDENTIFIED, OP_IDENTIFY, OP_REQUEST, OP_REQUEST_RESPONSE,
    RPC_VERSION, STATUS_SUCCESS,
};
use super::{ObsClient, Stats, StreamServiceSettings, StreamStatus, VersionInfo};
use crate::config::ObsConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<RequestResponse>>>>;

/// `General` event category: carries `ExitStarted`.
const EVENT_SUBSCRIPTION_GENERAL: u32 = 1;

/// obs-websocket v5 client over a single websocket connection.
///
/// Requests are multiplexed by request id: callers enqueue frames on the
/// writer task and park on a oneshot until the reader task routes the
/// matching response back.
pub struct Client {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingMap,
    next_request_id: AtomicU64,
    timeout: Duration,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Client {
    /// Send one request and decode its response data.
    async fn request<T: DeserializeOwned>(&self, request_type: &str) -> Result<T> {
        if self.cancel.is_cancelled() {
            bail!("OBS connection closed");
        }

        let request_id = self
            .next_request_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();

        let frame = Envelope::new(
            OP_REQUEST,
            &Request {
                request_type,
                request_id: &request_id,
            },
        )?;
        let text = serde_json::to_string(&frame).context("encoding request")?;

        let (tx, rx) = oneshot::channel();
        let _guard = PendingGuard::register(&self.pending, &request_id, tx);

        if self.outgoing.send(Message::Text(text)).is_err() {
            bail!("OBS connection closed");
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => bail!("OBS connection closed while waiting for {request_type}"),
            Err(_) => bail!("{request_type} timed out after {:?}", self.timeout),
        };

        let status = &response.request_status;
        if !status.result || status.code != STATUS_SUCCESS {
            bail!(
                "{request_type} failed with code {}: {}",
                status.code,
                status.comment.as_deref().unwrap_or("no comment")
            );
        }

        serde_json::from_value(response.response_data.unwrap_or(Value::Null))
            .with_context(|| format!("decoding {request_type} response"))
    }
}

impl ObsClient for Client {
    async fn connect(cfg: &ObsConfig) -> Result<Self> {
        let url = websocket_url(&cfg.host);

        let (mut ws, _) = tokio::time::timeout(cfg.timeout, connect_async(url.as_str()))
            .await
            .with_context(|| format!("connecting to {url}: timed out after {:?}", cfg.timeout))?
            .with_context(|| format!("connecting to {url}"))?;

        tokio::time::timeout(cfg.timeout, handshake(&mut ws, &cfg.password))
            .await
            .with_context(|| format!("handshake with {url} timed out"))??;

        debug!(url = %url, "obs-websocket session identified");

        let (write, read) = ws.split();
        let (outgoing, rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();

        tasks.spawn(write_loop(write, rx, cancel.clone()));
        tasks.spawn(read_loop(read, Arc::clone(&pending), cancel.clone()));
        tasks.close();

        Ok(Self {
            outgoing,
            pending,
            next_request_id: AtomicU64::new(1),
            timeout: cfg.timeout,
            cancel,
            tasks,
        })
    }

    async fn version(&self) -> Result<VersionInfo> {
        self.request("GetVersion").await
    }

    async fn stream_service_settings(&self) -> Result<StreamServiceSettings> {
        self.request("GetStreamServiceSettings").await
    }

    async fn stats(&self) -> Result<Stats> {
        self.request("GetStats").await
    }

    async fn stream_status(&self) -> Result<StreamStatus> {
        self.request("GetStreamStatus").await
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
        self.tasks.wait().await;
    }
}

/// Removes a pending entry when the caller stops waiting, including when
/// the request future is dropped by an outer timeout.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    request_id: &'a str,
}

impl<'a> PendingGuard<'a> {
    fn register(
        pending: &'a PendingMap,
        request_id: &'a str,
        tx: oneshot::Sender<RequestResponse>,
    ) -> Self {
        pending.lock().insert(request_id.to_string(), tx);
        Self {
            pending,
            request_id,
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.request_id);
    }
}

/// `host:port` becomes `ws://host:port`; explicit schemes are kept.
fn websocket_url(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("ws://{host}")
    }
}

/// Hello, Identify, Identified.
async fn handshake(ws: &mut WsStream, password: &str) -> Result<()> {
    let hello: Hello = read_op(ws, OP_HELLO).await.context("waiting for Hello")?;

    let authentication = match hello.authentication {
        Some(challenge) => {
            if password.is_empty() {
                bail!("OBS requires a password but none is configured");
            }
            Some(auth_response(password, &challenge.salt, &challenge.challenge))
        }
        None => None,
    };

    let identify = Envelope::new(
        OP_IDENTIFY,
        &Identify {
            rpc_version: RPC_VERSION.min(hello.rpc_version),
            authentication,
            event_subscriptions: EVENT_SUBSCRIPTION_GENERAL,
        },
    )?;
    ws.send(Message::Text(serde_json::to_string(&identify)?))
        .await
        .context("sending Identify")?;

    let identified: Identified = read_op(ws, OP_IDENTIFIED)
        .await
        .context("waiting for Identified (wrong password?)")?;

    debug!(
        obs_websocket = %hello.obs_web_socket_version,
        rpc_version = identified.negotiated_rpc_version,
        "negotiated obs-websocket session"
    );

    Ok(())
}

/// Reads frames until one with opcode `op` arrives.
async fn read_op<T: DeserializeOwned>(ws: &mut WsStream, op: u8) -> Result<T> {
    while let Some(msg) = ws.next().await {
        match msg.context("reading frame")? {
            Message::Text(text) => {
                let envelope: Envelope =
                    serde_json::from_str(&text).context("decoding frame envelope")?;
                if envelope.op == op {
                    return serde_json::from_value(envelope.d)
                        .with_context(|| format!("decoding op {op} payload"));
                }
            }
            Message::Close(frame) => match frame {
                Some(frame) => bail!(
                    "connection closed: {} {}",
                    u16::from(frame.code),
                    frame.reason
                ),
                None => bail!("connection closed"),
            },
            _ => {}
        }
    }

    bail!("connection closed")
}

async fn write_loop(
    mut write: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = write.send(msg).await {
                    warn!(error = %e, "writing to OBS websocket");
                    cancel.cancel();
                    break;
                }
            }
        }
    }
}

async fn read_loop(
    mut read: SplitStream<WsStream>,
    pending: PendingMap,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = read.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => dispatch(&pending, &text),
            Some(Ok(Message::Close(frame))) => {
                info!(frame = ?frame, "OBS closed the websocket");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "reading from OBS websocket");
                break;
            }
            None => break,
        }
    }

    // Fail every in-flight request by dropping its sender.
    cancel.cancel();
    pending.lock().clear();
}

fn dispatch(pending: &PendingMap, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "undecodable OBS frame");
            return;
        }
    };

    match envelope.op {
        OP_REQUEST_RESPONSE => match serde_json::from_value::<RequestResponse>(envelope.d) {
            Ok(response) => {
                if let Some(tx) = pending.lock().remove(&response.request_id) {
                    let _ = tx.send(response);
                } else {
                    debug!(request_id = %response.request_id, "response without waiter");
                }
            }
            Err(e) => warn!(error = %e, "undecodable OBS request response"),
        },
        OP_EVENT => {
            if let Ok(event) = serde_json::from_value::<Event>(envelope.d) {
                if event.event_type == "ExitStarted" {
                    warn!("OBS is shutting down");
                }
            }
        }
        op => debug!(op, "ignoring OBS frame"),
    }
}
