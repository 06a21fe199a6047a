//! Scripted transport for tests
//!
//! MockTransport records every session it opens and lets the test drive each
//! session's event stream by hand, enabling fast, deterministic testing of the
//! lifecycle manager without a messaging service.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};

use super::{OpenedSession, ProtocolVersion, SendAck, SessionHandle, Transport, TransportEvent};
use crate::credentials::Credentials;
use crate::error::TransportError;
use crate::pairing::PairingChallenge;
use crate::state::CloseReason;

/// Mock implementation of [`Transport`].
pub struct MockTransport {
    sessions: Mutex<Vec<MockSession>>,
    opened: watch::Sender<usize>,
    open_calls: AtomicUsize,
    failing_opens: AtomicUsize,
    hanging_opens: AtomicUsize,
    auto_establish: bool,
    latest_version: Option<ProtocolVersion>,
}

impl MockTransport {
    /// A transport whose sessions stay connecting until the test establishes them.
    pub fn new() -> Self {
        let (opened, _) = watch::channel(0);
        Self {
            sessions: Mutex::new(Vec::new()),
            opened,
            open_calls: AtomicUsize::new(0),
            failing_opens: AtomicUsize::new(0),
            hanging_opens: AtomicUsize::new(0),
            auto_establish: false,
            latest_version: Some(ProtocolVersion::default()),
        }
    }

    /// A transport whose sessions are established as soon as they open.
    pub fn auto_establishing() -> Self {
        Self {
            auto_establish: true,
            ..Self::new()
        }
    }

    /// Report `version` from `protocol_version()`, or fail the lookup with `None`.
    #[must_use]
    pub fn with_latest_version(mut self, version: Option<ProtocolVersion>) -> Self {
        self.latest_version = version;
        self
    }

    /// Make the next `count` calls to `open()` fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` calls to `open()` never complete.
    pub fn hang_next_opens(&self, count: usize) {
        self.hanging_opens.store(count, Ordering::SeqCst);
    }

    /// Number of sessions successfully opened.
    pub async fn open_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Number of `open()` calls, including failed ones.
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// The session opened at `index` (0-based), if any.
    pub async fn session(&self, index: usize) -> Option<MockSession> {
        self.sessions.lock().await.get(index).cloned()
    }

    /// Wait until a session has been opened at `index`.
    pub async fn wait_for_session(&self, index: usize) -> MockSession {
        let mut rx = self.opened.subscribe();
        // The sender lives in self, so this only returns once the count is reached.
        let _ = rx.wait_for(|count| *count > index).await;
        self.sessions.lock().await[index].clone()
    }
}

/// Decrement `counter` if it is non-zero, reporting whether it was.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn protocol_version(&self) -> Result<ProtocolVersion, TransportError> {
        self.latest_version
            .ok_or_else(|| TransportError::Protocol("version lookup unavailable".to_string()))
    }

    async fn open(
        &self,
        credentials: Credentials,
        version: ProtocolVersion,
    ) -> Result<OpenedSession, TransportError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);

        let failing = take_one(&self.failing_opens);
        if failing {
            return Err(TransportError::Connect("scripted open failure".to_string()));
        }

        if take_one(&self.hanging_opens) {
            return std::future::pending().await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if self.auto_establish {
            let _ = tx.send(TransportEvent::Established);
        }

        let mut sessions = self.sessions.lock().await;
        let inner = Arc::new(MockSessionInner {
            index: sessions.len(),
            credentials,
            version,
            events: tx,
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            send_results: Mutex::new(VecDeque::new()),
        });
        sessions.push(MockSession {
            inner: Arc::clone(&inner),
        });
        let count = sessions.len();
        drop(sessions);
        self.opened.send_replace(count);

        Ok(OpenedSession {
            handle: inner,
            events: rx,
        })
    }
}

struct MockSessionInner {
    index: usize,
    credentials: Credentials,
    version: ProtocolVersion,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: AtomicBool,
    sent: Mutex<Vec<(String, String)>>,
    send_results: Mutex<VecDeque<Result<SendAck, TransportError>>>,
}

#[async_trait]
impl SessionHandle for MockSessionInner {
    async fn send(&self, destination: &str, text: &str) -> Result<SendAck, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let mut sent = self.sent.lock().await;
        sent.push((destination.to_string(), text.to_string()));
        let seq = sent.len();
        drop(sent);

        match self.send_results.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(SendAck {
                message_id: Some(format!("mock-{}-{}", self.index, seq)),
            }),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Test-side control of one session opened by [`MockTransport`].
#[derive(Clone)]
pub struct MockSession {
    inner: Arc<MockSessionInner>,
}

impl std::fmt::Debug for MockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession")
            .field("index", &self.inner.index)
            .field("closed", &self.is_closed())
            .field("detached", &self.is_detached())
            .finish()
    }
}

impl MockSession {
    /// Position in open order.
    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// Credentials the session was opened with.
    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    /// Protocol version the session was opened with.
    pub fn version(&self) -> ProtocolVersion {
        self.inner.version
    }

    /// Deliver an event. Returns `false` if nobody is listening any more.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.inner.events.send(event).is_ok()
    }

    pub fn establish(&self) -> bool {
        self.emit(TransportEvent::Established)
    }

    pub fn challenge(&self, code: &str) -> bool {
        self.emit(TransportEvent::PairingChallenge(PairingChallenge::new(code)))
    }

    pub fn close_transient(&self, code: Option<u16>) -> bool {
        self.emit(TransportEvent::Closed(CloseReason::transient(code)))
    }

    pub fn log_out(&self) -> bool {
        self.emit(TransportEvent::Closed(CloseReason::logged_out(Some(401))))
    }

    pub fn rotate_credentials(&self, credentials: Credentials) -> bool {
        self.emit(TransportEvent::CredentialsChanged(credentials))
    }

    /// Whether the listener has dropped its event receiver.
    pub fn is_detached(&self) -> bool {
        self.inner.events.is_closed()
    }

    /// Whether `close()` was called on the handle.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Messages sent through this session, in order.
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.inner.sent.lock().await.clone()
    }

    /// Script the result of the next `send()`.
    pub async fn queue_send_result(&self, result: Result<SendAck, TransportError>) {
        self.inner.send_results.lock().await.push_back(result);
    }
}
