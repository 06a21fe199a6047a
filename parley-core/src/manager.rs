//! Connection lifecycle manager
//!
//! [`ConnectionManager`] owns the single messaging session. All lifecycle
//! decisions happen on one driver task, which consumes commands from the
//! public handle and events from the current session in arrival order. The
//! handle reads the published [`Snapshot`] for state queries and sends, so
//! `send_message` never waits on the driver.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::credentials::{CredentialStore, Credentials};
use crate::error::{ConnectError, SendError, StoreError, TransportError};
use crate::gate::{GateWaiter, ReadinessGate};
use crate::pairing::PairingPresenter;
use crate::state::{CloseReason, ConnectionState, DisconnectReason, LifecycleEvent};
use crate::transport::{ProtocolVersion, SendAck, SessionHandle, Transport, TransportEvent};

/// Capacity of the command channel to the driver
const COMMAND_BUFFER: usize = 32;

/// Capacity of the lifecycle event broadcast
const EVENT_BUFFER: usize = 64;

/// What the handle may read without asking the driver.
///
/// `session` is `Some` exactly when `state` is [`ConnectionState::Open`].
#[derive(Clone, Default)]
struct Snapshot {
    state: ConnectionState,
    session: Option<Arc<dyn SessionHandle>>,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("state", &self.state)
            .field("has_session", &self.session.is_some())
            .finish()
    }
}

enum Command {
    Connect { reply: oneshot::Sender<Joined> },
    Disconnect { reply: oneshot::Sender<()> },
}

/// How a `connect()` caller was attached to the lifecycle.
enum Joined {
    Ready,
    Wait(GateWaiter),
    Failed(ConnectError),
}

/// Handle to the connection lifecycle.
///
/// Cheap to clone; every clone talks to the same driver task. When the last
/// clone is dropped the driver closes the session and exits, and pending
/// `connect()` callers fail with [`ConnectError::Shutdown`].
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager in [`ConnectionState::Idle`] and spawn its driver.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        presenter: Arc<dyn PairingPresenter>,
        config: ConnectionConfig,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);

        let persist = spawn_persister(Arc::clone(&store), events_tx.clone());

        let driver = Driver {
            transport,
            store,
            presenter,
            config,
            commands: commands_rx,
            snapshot: snapshot_tx,
            events: events_tx.clone(),
            persist,
            phase: Phase::Idle,
            generation: 0,
            retries: 0,
        };
        tokio::spawn(driver.run());

        Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
            events: events_tx,
        }
    }

    /// Establish a session, or join the attempt already in flight.
    ///
    /// Returns immediately when already open. Concurrent callers share one
    /// attempt and observe the same outcome. A call made while a reconnect is
    /// scheduled waits for that retry instead of starting its own.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { reply })
            .await
            .map_err(|_| ConnectError::Shutdown)?;

        match rx.await.map_err(|_| ConnectError::Shutdown)? {
            Joined::Ready => Ok(()),
            Joined::Wait(waiter) => waiter.wait().await,
            Joined::Failed(e) => Err(e),
        }
    }

    /// Whether a session is open and usable right now.
    pub fn is_connected(&self) -> bool {
        let snapshot = self.snapshot.borrow();
        snapshot.state == ConnectionState::Open && snapshot.session.is_some()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    /// Wait until the lifecycle reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<(), ConnectError> {
        let mut rx = self.snapshot.clone();
        rx.wait_for(|snapshot| snapshot.state == state)
            .await
            .map(|_| ())
            .map_err(|_| ConnectError::Shutdown)
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Send `text` to `destination` over the open session.
    ///
    /// Fails fast with [`SendError::NotConnected`] unless the state is open.
    /// Send failures never change the connection state.
    pub async fn send_message(&self, destination: &str, text: &str) -> Result<SendAck, SendError> {
        let session = self.snapshot.borrow().session.clone();
        let Some(session) = session else {
            return Err(SendError::NotConnected);
        };

        match session.send(destination, text).await {
            Ok(ack) => {
                info!(destination, message_id = ?ack.message_id, "Message sent");
                Ok(ack)
            }
            Err(e) => {
                warn!(destination, error = %e, "Failed to send message");
                Err(SendError::Transport(e.to_string()))
            }
        }
    }

    /// Close the session and cancel any pending attempt or retry.
    ///
    /// Idempotent. Afterwards the state is idle, or stays terminated.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Saves credential updates in arrival order, off the driver task.
fn spawn_persister(
    store: Arc<dyn CredentialStore>,
    events: broadcast::Sender<LifecycleEvent>,
) -> mpsc::UnboundedSender<Credentials> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Credentials>();
    tokio::spawn(async move {
        while let Some(credentials) = rx.recv().await {
            match store.save(&credentials).await {
                Ok(()) => debug!("Persisted updated credentials"),
                Err(e) => {
                    warn!(error = %e, "Failed to persist credentials");
                    let _ = events.send(LifecycleEvent::CredentialsPersistFailed {
                        error: e.to_string(),
                    });
                }
            }
        }
    });
    tx
}

/// A session and its event stream, owned by the driver.
struct SessionLink {
    generation: u64,
    handle: Arc<dyn SessionHandle>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl SessionLink {
    /// Detach from the session's events, then close it.
    async fn release(self) {
        let Self {
            generation,
            handle,
            events,
        } = self;
        drop(events);
        handle.close().await;
        debug!(generation, "Released session");
    }
}

enum OpenFailure {
    Credentials(StoreError),
    Transport(TransportError),
}

enum AttemptStage {
    Opening(BoxFuture<'static, Result<SessionLink, OpenFailure>>),
    Awaiting(SessionLink),
}

struct Attempt {
    generation: u64,
    gate: ReadinessGate,
    stage: AttemptStage,
}

enum Phase {
    Idle,
    Connecting(Attempt),
    Open(SessionLink),
    Reconnecting {
        retry_at: Instant,
        parked: Vec<oneshot::Sender<Joined>>,
    },
    Terminated,
}

impl Phase {
    fn state(&self) -> ConnectionState {
        match self {
            Self::Idle => ConnectionState::Idle,
            Self::Connecting(_) => ConnectionState::Connecting,
            Self::Open(_) => ConnectionState::Open,
            Self::Reconnecting { .. } => ConnectionState::Reconnecting,
            Self::Terminated => ConnectionState::Terminated,
        }
    }

    fn deadline(&self) -> Option<Instant> {
        match self {
            Self::Connecting(attempt) => Some(attempt.gate.deadline()),
            Self::Reconnecting { retry_at, .. } => Some(*retry_at),
            _ => None,
        }
    }
}

enum Step {
    Opened(Result<SessionLink, OpenFailure>),
    Event(Option<TransportEvent>),
}

/// Progress of the current attempt or session. Pending when there is none.
async fn next_step(phase: &mut Phase) -> Step {
    match phase {
        Phase::Connecting(Attempt {
            stage: AttemptStage::Opening(opening),
            ..
        }) => Step::Opened(opening.as_mut().await),
        Phase::Connecting(Attempt {
            stage: AttemptStage::Awaiting(link),
            ..
        })
        | Phase::Open(link) => Step::Event(link.events.recv().await),
        _ => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn open_session(
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    pinned: Option<ProtocolVersion>,
    generation: u64,
) -> Result<SessionLink, OpenFailure> {
    let credentials = store.load().await.map_err(OpenFailure::Credentials)?;
    if credentials.is_empty() {
        info!("No stored credentials, pairing will be required");
    }

    let version = match pinned {
        Some(version) => version,
        None => match transport.protocol_version().await {
            Ok(version) => version,
            Err(e) => {
                let fallback = ProtocolVersion::default();
                warn!(error = %e, %fallback, "Protocol version lookup failed, using fallback");
                fallback
            }
        },
    };

    debug!(generation, %version, "Opening session");
    let opened = transport
        .open(credentials, version)
        .await
        .map_err(OpenFailure::Transport)?;

    Ok(SessionLink {
        generation,
        handle: opened.handle,
        events: opened.events,
    })
}

struct Driver {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    presenter: Arc<dyn PairingPresenter>,
    config: ConnectionConfig,
    commands: mpsc::Receiver<Command>,
    snapshot: watch::Sender<Snapshot>,
    events: broadcast::Sender<LifecycleEvent>,
    persist: mpsc::UnboundedSender<Credentials>,
    phase: Phase,
    generation: u64,
    /// Consecutive transient closes since the last established session
    retries: u32,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let deadline = self.phase.deadline();
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Connect { reply }) => self.connect(reply),
                    Some(Command::Disconnect { reply }) => {
                        self.stop(ConnectError::Cancelled).await;
                        let _ = reply.send(());
                    }
                    None => {
                        self.stop(ConnectError::Shutdown).await;
                        break;
                    }
                },
                step = next_step(&mut self.phase) => match step {
                    Step::Opened(result) => self.opened(result),
                    Step::Event(event) => self.event(event).await,
                },
                () = sleep_until(deadline) => self.deadline_reached().await,
            }
        }
        debug!("Connection driver stopped");
    }

    fn take_phase(&mut self) -> Phase {
        std::mem::replace(&mut self.phase, Phase::Idle)
    }

    /// Install `phase` and publish it, announcing the state change if any.
    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;

        let to = self.phase.state();
        let session = match &self.phase {
            Phase::Open(link) => Some(Arc::clone(&link.handle)),
            _ => None,
        };
        let from = self.snapshot.send_replace(Snapshot { state: to, session }).state;

        if from != to {
            debug!(%from, %to, "Connection state changed");
            self.emit(LifecycleEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn connect(&mut self, reply: oneshot::Sender<Joined>) {
        match &mut self.phase {
            Phase::Open(_) => {
                let _ = reply.send(Joined::Ready);
            }
            Phase::Connecting(attempt) => {
                debug!(generation = attempt.generation, "Joining connection attempt in flight");
                let _ = reply.send(Joined::Wait(attempt.gate.waiter()));
            }
            Phase::Reconnecting { parked, .. } => {
                debug!("Connect requested while reconnecting, waiting for scheduled retry");
                parked.push(reply);
            }
            Phase::Idle | Phase::Terminated => self.begin_attempt(vec![reply]),
        }
    }

    fn begin_attempt(&mut self, joiners: Vec<oneshot::Sender<Joined>>) {
        self.generation += 1;
        let generation = self.generation;
        let gate = ReadinessGate::new(self.config.connect_timeout);

        for reply in joiners {
            let _ = reply.send(Joined::Wait(gate.waiter()));
        }

        info!(
            generation,
            timeout = ?self.config.connect_timeout,
            "Starting connection attempt"
        );

        let opening = open_session(
            Arc::clone(&self.transport),
            Arc::clone(&self.store),
            self.config.protocol_version,
            generation,
        );
        self.set_phase(Phase::Connecting(Attempt {
            generation,
            gate,
            stage: AttemptStage::Opening(Box::pin(opening)),
        }));
    }

    fn opened(&mut self, result: Result<SessionLink, OpenFailure>) {
        let Phase::Connecting(attempt) = self.take_phase() else {
            return;
        };

        match result {
            Ok(link) => {
                debug!(generation = link.generation, "Session opened, awaiting establishment");
                self.phase = Phase::Connecting(Attempt {
                    stage: AttemptStage::Awaiting(link),
                    ..attempt
                });
            }
            Err(OpenFailure::Credentials(e)) => {
                error!(error = %e, "Failed to load credentials");
                self.set_phase(Phase::Idle);
                attempt.gate.reject(ConnectError::Credentials(e.to_string()));
            }
            Err(OpenFailure::Transport(e)) => {
                warn!(generation = attempt.generation, error = %e, "Failed to open session");
                self.schedule_reconnect(Vec::new());
                attempt.gate.reject(ConnectError::Open(e.to_string()));
            }
        }
    }

    async fn event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::PairingChallenge(challenge)) => {
                if matches!(self.phase, Phase::Connecting(_)) {
                    info!("Pairing challenge received");
                    self.presenter.present(&challenge);
                    self.emit(LifecycleEvent::PairingRequested);
                } else {
                    debug!("Ignoring pairing challenge outside a connection attempt");
                }
            }
            Some(TransportEvent::Established) => self.established(),
            Some(TransportEvent::Closed(reason)) => self.closed(reason).await,
            Some(TransportEvent::CredentialsChanged(credentials)) => {
                if self.persist.send(credentials).is_err() {
                    warn!("Credential persister is gone, dropping update");
                }
            }
            None => {
                debug!("Session event stream ended");
                self.closed(CloseReason::transient(None)).await;
            }
        }
    }

    fn established(&mut self) {
        match self.take_phase() {
            Phase::Connecting(Attempt {
                generation,
                gate,
                stage: AttemptStage::Awaiting(link),
            }) => {
                info!(generation, "Session established");
                self.retries = 0;
                self.set_phase(Phase::Open(link));
                gate.resolve();
            }
            other => {
                debug!("Ignoring repeated establishment");
                self.phase = other;
            }
        }
    }

    async fn closed(&mut self, reason: CloseReason) {
        let (gate, link) = match self.take_phase() {
            Phase::Connecting(Attempt {
                gate,
                stage: AttemptStage::Awaiting(link),
                ..
            }) => (Some(gate), link),
            Phase::Open(link) => (None, link),
            other => {
                self.phase = other;
                return;
            }
        };
        let generation = link.generation;

        match reason.classify() {
            DisconnectReason::LoggedOut => {
                error!(
                    generation,
                    code = ?reason.code,
                    "Session logged out; clear stored credentials and pair again"
                );
                self.retries = 0;
                self.set_phase(Phase::Terminated);
                link.release().await;
                if let Some(gate) = gate {
                    gate.reject(ConnectError::LoggedOut);
                }
            }
            DisconnectReason::Transient => {
                warn!(generation, code = ?reason.code, "Session closed");
                self.schedule_reconnect(Vec::new());
                link.release().await;
                if let Some(gate) = gate {
                    gate.reject(ConnectError::Interrupted { code: reason.code });
                }
            }
        }
    }

    fn schedule_reconnect(&mut self, parked: Vec<oneshot::Sender<Joined>>) {
        let delay = self.config.reconnect.delay_for_attempt(self.retries);
        self.retries = self.retries.saturating_add(1);
        let attempt = self.retries;

        info!(attempt, delay = ?delay, "Reconnect scheduled");
        self.set_phase(Phase::Reconnecting {
            retry_at: Instant::now() + delay,
            parked,
        });
        self.emit(LifecycleEvent::ReconnectScheduled { attempt, delay });
    }

    async fn deadline_reached(&mut self) {
        match self.take_phase() {
            Phase::Connecting(attempt) => {
                warn!(
                    generation = attempt.generation,
                    timeout = ?self.config.connect_timeout,
                    "Connection attempt timed out before pairing completed"
                );
                self.retries = 0;
                self.set_phase(Phase::Idle);
                if let AttemptStage::Awaiting(link) = attempt.stage {
                    link.release().await;
                }
                attempt.gate.expire();
            }
            Phase::Reconnecting { parked, .. } => self.begin_attempt(parked),
            other => self.phase = other,
        }
    }

    /// Tear down whatever is in flight, failing pending callers with `error`.
    async fn stop(&mut self, error: ConnectError) {
        self.retries = 0;

        match self.take_phase() {
            Phase::Idle => {}
            Phase::Terminated => self.phase = Phase::Terminated,
            Phase::Connecting(attempt) => {
                info!(generation = attempt.generation, "Connection attempt cancelled");
                self.set_phase(Phase::Idle);
                if let AttemptStage::Awaiting(link) = attempt.stage {
                    link.release().await;
                }
                attempt.gate.reject(error);
            }
            Phase::Open(link) => {
                info!(generation = link.generation, "Disconnecting");
                self.set_phase(Phase::Idle);
                link.release().await;
            }
            Phase::Reconnecting { parked, .. } => {
                info!("Scheduled reconnect cancelled");
                self.set_phase(Phase::Idle);
                for reply in parked {
                    let _ = reply.send(Joined::Failed(error.clone()));
                }
            }
        }
    }
}
