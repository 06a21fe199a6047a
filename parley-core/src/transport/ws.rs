//! WebSocket bridge transport.
//!
//! Talks to a protocol bridge over a WebSocket using JSON text frames. The
//! bridge owns the messaging protocol itself; parley only sees session
//! lifecycle events and message acknowledgments.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{OpenedSession, ProtocolVersion, SendAck, SessionHandle, Transport, TransportEvent};
use crate::credentials::Credentials;
use crate::error::TransportError;
use crate::pairing::PairingChallenge;
use crate::state::CloseReason;

/// Default bridge endpoint
pub const DEFAULT_BRIDGE_URL: &str = "ws://127.0.0.1:3001/session";

/// How long a send waits for the bridge to acknowledge it
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `close()` waits for each side of the close handshake
pub const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

type SendReply = oneshot::Sender<Result<SendAck, TransportError>>;

/// Sends awaiting a bridge reply. `None` once the socket has ended.
type PendingSends = Arc<Mutex<Option<HashMap<String, SendReply>>>>;

/// Configuration for [`WsTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsTransportConfig {
    /// Bridge endpoint, e.g. `ws://127.0.0.1:3001/session`.
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_send_timeout", with = "humantime_serde")]
    pub send_timeout: Duration,
}

fn default_url() -> String {
    DEFAULT_BRIDGE_URL.to_string()
}

fn default_send_timeout() -> Duration {
    DEFAULT_SEND_TIMEOUT
}

impl Default for WsTransportConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            send_timeout: default_send_timeout(),
        }
    }
}

impl WsTransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

/// Frames sent to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame on every socket.
    Hello {
        credentials: Credentials,
        version: ProtocolVersion,
    },
    Send {
        request_id: String,
        destination: String,
        text: String,
    },
}

/// Frames received from the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    PairingChallenge {
        code: String,
    },
    Established,
    Closed {
        code: Option<u16>,
        #[serde(default)]
        logged_out: bool,
    },
    Credentials {
        credentials: Credentials,
    },
    Ack {
        request_id: String,
        message_id: Option<String>,
    },
    SendFailed {
        request_id: String,
        error: String,
    },
}

/// Transport that opens one WebSocket per session.
#[derive(Debug, Clone)]
pub struct WsTransport {
    config: WsTransportConfig,
}

impl WsTransport {
    pub fn new(config: WsTransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WsTransportConfig {
        &self.config
    }

    /// Task that forwards outgoing frames to the WebSocket.
    async fn outgoing_task<S>(mut rx: mpsc::Receiver<Message>, mut ws_sender: S)
    where
        S: SinkExt<Message> + Unpin,
        S::Error: std::fmt::Debug,
    {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = ws_sender.send(msg).await {
                warn!("Failed to send WebSocket frame: {:?}", e);
                break;
            }
            if closing {
                break;
            }
        }
    }

    /// Task that turns bridge frames into session events and send results.
    async fn incoming_task<S>(
        mut ws_receiver: S,
        events: mpsc::UnboundedSender<TransportEvent>,
        pending: PendingSends,
    ) where
        S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let mut close_code = None;
        let mut reported_close = false;

        while let Some(result) = ws_receiver.next().await {
            let frame = match result {
                Ok(Message::Text(text)) => {
                    let text: &str = &text;
                    match serde_json::from_str::<ServerFrame>(text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("Failed to parse bridge frame: {}", e);
                            continue;
                        }
                    }
                }
                Ok(Message::Close(frame)) => {
                    close_code = frame.map(|f| u16::from(f.code));
                    debug!(code = ?close_code, "Bridge closed the socket");
                    break;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {
                    continue;
                }
                Err(e) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
            };

            let event = match frame {
                ServerFrame::PairingChallenge { code } => {
                    TransportEvent::PairingChallenge(PairingChallenge::new(code))
                }
                ServerFrame::Established => TransportEvent::Established,
                ServerFrame::Closed { code, logged_out } => {
                    reported_close = true;
                    TransportEvent::Closed(CloseReason { code, logged_out })
                }
                ServerFrame::Credentials { credentials } => {
                    TransportEvent::CredentialsChanged(credentials)
                }
                ServerFrame::Ack {
                    request_id,
                    message_id,
                } => {
                    complete(&pending, &request_id, Ok(SendAck { message_id })).await;
                    continue;
                }
                ServerFrame::SendFailed { request_id, error } => {
                    complete(&pending, &request_id, Err(TransportError::Rejected(error))).await;
                    continue;
                }
            };

            if events.send(event).is_err() {
                debug!("Session listener detached");
            }
            if reported_close {
                break;
            }
        }

        if !reported_close {
            let _ = events.send(TransportEvent::Closed(CloseReason::transient(close_code)));
        }
        fail_pending(&pending).await;
        info!("Bridge connection closed");
    }
}

async fn complete(pending: &PendingSends, request_id: &str, result: Result<SendAck, TransportError>) {
    let reply = pending
        .lock()
        .await
        .as_mut()
        .and_then(|sends| sends.remove(request_id));
    match reply {
        Some(tx) => {
            let _ = tx.send(result);
        }
        None => debug!(request_id, "Acknowledgment for unknown request"),
    }
}

/// Fail every waiting send and refuse new ones.
async fn fail_pending(pending: &PendingSends) {
    let Some(sends) = pending.lock().await.take() else {
        return;
    };
    for tx in sends.into_values() {
        let _ = tx.send(Err(TransportError::Closed));
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(
        &self,
        credentials: Credentials,
        version: ProtocolVersion,
    ) -> Result<OpenedSession, TransportError> {
        let hello = encode(&ClientFrame::Hello {
            credentials,
            version,
        })?;

        let (ws_stream, _response) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {}", self.config.url, e)))?;

        // No await past this point: the socket tasks are only spawned once the
        // session is certain to be handed back.
        let (ws_sender, ws_receiver) = ws_stream.split();

        let (outgoing_tx, outgoing_rx) = mpsc::channel::<Message>(32);
        outgoing_tx
            .try_send(hello)
            .map_err(|_| TransportError::Closed)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending: PendingSends = Arc::new(Mutex::new(Some(HashMap::new())));

        let outgoing = tokio::spawn(Self::outgoing_task(outgoing_rx, ws_sender));
        let incoming = tokio::spawn(Self::incoming_task(
            ws_receiver,
            events_tx,
            Arc::clone(&pending),
        ));

        info!(url = %self.config.url, %version, "Opened bridge session");

        Ok(OpenedSession {
            handle: Arc::new(WsSession {
                outgoing: outgoing_tx,
                pending,
                send_timeout: self.config.send_timeout,
                closed: AtomicBool::new(false),
                tasks: Mutex::new(SocketTasks {
                    outgoing: Some(outgoing),
                    incoming: Some(incoming),
                }),
            }),
            events: events_rx,
        })
    }
}

fn encode(frame: &ClientFrame) -> Result<Message, TransportError> {
    serde_json::to_string(frame)
        .map(|json| Message::Text(json.into()))
        .map_err(|e| TransportError::Protocol(e.to_string()))
}

/// The two socket tasks of a session, taken by `close()`.
struct SocketTasks {
    outgoing: Option<JoinHandle<()>>,
    incoming: Option<JoinHandle<()>>,
}

struct WsSession {
    outgoing: mpsc::Sender<Message>,
    pending: PendingSends,
    send_timeout: Duration,
    closed: AtomicBool,
    tasks: Mutex<SocketTasks>,
}

impl Drop for WsSession {
    fn drop(&mut self) {
        // Never closed: stop reading so the socket is released with the session
        if let Some(incoming) = self.tasks.get_mut().incoming.take() {
            incoming.abort();
        }
    }
}

#[async_trait]
impl SessionHandle for WsSession {
    async fn send(&self, destination: &str, text: &str) -> Result<SendAck, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let request_id = Uuid::new_v4().to_string();
        let frame = encode(&ClientFrame::Send {
            request_id: request_id.clone(),
            destination: destination.to_string(),
            text: text.to_string(),
        })?;

        let (tx, rx) = oneshot::channel();
        match self.pending.lock().await.as_mut() {
            Some(sends) => {
                sends.insert(request_id.clone(), tx);
            }
            None => return Err(TransportError::Closed),
        }

        if self.outgoing.send(frame).await.is_err() {
            self.forget(&request_id).await;
            return Err(TransportError::Closed);
        }

        match tokio::time::timeout(self.send_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.forget(&request_id).await;
                Err(TransportError::Protocol(format!(
                    "no acknowledgment within {:?}",
                    self.send_timeout
                )))
            }
        }
    }

    /// Send a Close frame and wait for the bridge to answer it.
    ///
    /// Each half of the handshake is bounded by [`CLOSE_HANDSHAKE_TIMEOUT`].
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outgoing.send(Message::Close(None)).await;

        let mut tasks = self.tasks.lock().await;
        if let Some(outgoing) = tasks.outgoing.take()
            && tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, outgoing)
                .await
                .is_err()
        {
            warn!("Close frame not flushed in time");
        }
        if let Some(mut incoming) = tasks.incoming.take()
            && tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, &mut incoming)
                .await
                .is_err()
        {
            warn!("Bridge did not answer the close handshake, dropping socket");
            incoming.abort();
        }
        drop(tasks);

        fail_pending(&self.pending).await;
        debug!("Closed bridge session");
    }
}

impl WsSession {
    async fn forget(&self, request_id: &str) {
        if let Some(sends) = self.pending.lock().await.as_mut() {
            sends.remove(request_id);
        }
    }
}
