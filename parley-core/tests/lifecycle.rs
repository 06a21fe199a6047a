//! Lifecycle tests for ConnectionManager
//!
//! These run on a paused clock, so the 120s attempt deadline and the 3s
//! reconnect delay elapse instantly once every task is idle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use parley_core::{
    ConnectError, ConnectionConfig, ConnectionManager, ConnectionState, CredentialStore,
    Credentials, LifecycleEvent, MemoryCredentialStore, MockTransport, PairingChallenge,
    PairingPresenter, ProtocolVersion, ReconnectPolicy, SendError, StoreError, TransportError,
};

/// Presenter that remembers every challenge it was shown
#[derive(Default)]
struct RecordingPresenter {
    codes: Mutex<Vec<String>>,
}

impl PairingPresenter for RecordingPresenter {
    fn present(&self, challenge: &PairingChallenge) {
        self.codes.lock().unwrap().push(challenge.code.clone());
    }
}

struct Harness {
    transport: Arc<MockTransport>,
    store: Arc<MemoryCredentialStore>,
    presenter: Arc<RecordingPresenter>,
    manager: ConnectionManager,
}

fn harness_with(transport: MockTransport, config: ConnectionConfig) -> Harness {
    let transport = Arc::new(transport);
    let store = Arc::new(MemoryCredentialStore::new());
    let presenter = Arc::new(RecordingPresenter::default());
    let manager = ConnectionManager::new(
        transport.clone(),
        store.clone(),
        presenter.clone(),
        config,
    );
    Harness {
        transport,
        store,
        presenter,
        manager,
    }
}

fn harness(transport: MockTransport) -> Harness {
    harness_with(transport, ConnectionConfig::default())
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn changed(from: ConnectionState, to: ConnectionState) -> LifecycleEvent {
    LifecycleEvent::StateChanged { from, to }
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_session() {
    let h = harness(MockTransport::new());

    let callers: Vec<_> = (0..3)
        .map(|_| {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.connect().await })
        })
        .collect();

    let session = h.transport.wait_for_session(0).await;
    assert_eq!(h.manager.state(), ConnectionState::Connecting);
    assert!(session.establish());

    for caller in callers {
        assert_eq!(caller.await.unwrap(), Ok(()));
    }
    assert_eq!(h.transport.open_count().await, 1);
    assert!(h.manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_all_time_out() {
    let h = harness(MockTransport::new());
    let start = Instant::now();

    let callers: Vec<_> = (0..3)
        .map(|_| {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.connect().await })
        })
        .collect();

    for caller in callers {
        assert_eq!(
            caller.await.unwrap(),
            Err(ConnectError::ConnectTimeout(Duration::from_secs(120)))
        );
    }

    assert!(start.elapsed() >= Duration::from_secs(120));
    assert_eq!(h.transport.open_count().await, 1);
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert!(!h.manager.is_connected());

    let session = h.transport.session(0).await.unwrap();
    assert!(session.is_closed());
    assert!(session.is_detached());
}

#[tokio::test(start_paused = true)]
async fn timeout_is_configurable() {
    let h = harness_with(
        MockTransport::new(),
        ConnectionConfig::default().with_connect_timeout(Duration::from_secs(5)),
    );

    assert_eq!(
        h.manager.connect().await,
        Err(ConnectError::ConnectTimeout(Duration::from_secs(5)))
    );
}

#[tokio::test(start_paused = true)]
async fn connect_when_open_returns_immediately() {
    let h = harness(MockTransport::auto_establishing());
    h.manager.connect().await.unwrap();

    let start = Instant::now();
    h.manager.connect().await.unwrap();

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(h.transport.open_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn transient_close_reconnects_after_delay() {
    let h = harness(MockTransport::auto_establishing());
    h.manager.connect().await.unwrap();
    let mut events = h.manager.subscribe();

    let first = h.transport.session(0).await.unwrap();
    assert!(first.close_transient(Some(515)));

    h.manager
        .wait_for_state(ConnectionState::Reconnecting)
        .await
        .unwrap();
    assert!(!h.manager.is_connected());
    let start = Instant::now();

    h.manager.wait_for_state(ConnectionState::Open).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(3));
    assert_eq!(h.transport.open_count().await, 2);
    assert!(first.is_detached());
    assert!(first.is_closed());

    let seen = drain(&mut events);
    assert_eq!(
        seen,
        vec![
            changed(ConnectionState::Open, ConnectionState::Reconnecting),
            LifecycleEvent::ReconnectScheduled {
                attempt: 1,
                delay: Duration::from_secs(3)
            },
            changed(ConnectionState::Reconnecting, ConnectionState::Connecting),
            changed(ConnectionState::Connecting, ConnectionState::Open),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn logged_out_terminates_without_retry() {
    let h = harness(MockTransport::auto_establishing());
    h.manager.connect().await.unwrap();

    let session = h.transport.session(0).await.unwrap();
    assert!(session.log_out());
    h.manager
        .wait_for_state(ConnectionState::Terminated)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.manager.state(), ConnectionState::Terminated);
    assert_eq!(h.transport.open_calls(), 1);
    assert!(session.is_closed());

    // An explicit connect starts over with a fresh session.
    h.manager.connect().await.unwrap();
    assert_eq!(h.transport.open_count().await, 2);
    assert_eq!(h.manager.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn logged_out_during_attempt_rejects_callers() {
    let h = harness(MockTransport::new());
    let manager = h.manager.clone();
    let caller = tokio::spawn(async move { manager.connect().await });

    let session = h.transport.wait_for_session(0).await;
    assert!(session.log_out());

    assert_eq!(caller.await.unwrap(), Err(ConnectError::LoggedOut));
    assert_eq!(h.manager.state(), ConnectionState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn transient_close_during_attempt_rejects_and_retries() {
    let h = harness(MockTransport::new());
    let manager = h.manager.clone();
    let caller = tokio::spawn(async move { manager.connect().await });

    let session = h.transport.wait_for_session(0).await;
    assert!(session.close_transient(Some(428)));

    let err = caller.await.unwrap().unwrap_err();
    assert_eq!(err, ConnectError::Interrupted { code: Some(428) });
    assert!(err.is_reconnecting());
    assert_eq!(h.manager.state(), ConnectionState::Reconnecting);

    let retry = h.transport.wait_for_session(1).await;
    assert!(retry.establish());
    h.manager.wait_for_state(ConnectionState::Open).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_open_schedules_reconnect() {
    let transport = MockTransport::auto_establishing();
    transport.fail_next_opens(1);
    let h = harness(transport);

    let err = h.manager.connect().await.unwrap_err();
    assert!(matches!(err, ConnectError::Open(_)));
    assert_eq!(h.manager.state(), ConnectionState::Reconnecting);

    h.manager.wait_for_state(ConnectionState::Open).await.unwrap();
    assert_eq!(h.transport.open_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn disconnect_twice_is_noop() {
    let h = harness(MockTransport::auto_establishing());
    h.manager.connect().await.unwrap();
    let mut events = h.manager.subscribe();

    h.manager.disconnect().await;
    h.manager.disconnect().await;

    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(
        drain(&mut events),
        vec![changed(ConnectionState::Open, ConnectionState::Idle)]
    );
    assert!(h.transport.session(0).await.unwrap().is_closed());
}

#[tokio::test(start_paused = true)]
async fn disconnect_on_idle_manager_is_noop() {
    let h = harness(MockTransport::new());
    h.manager.disconnect().await;
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(h.transport.open_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_attempt() {
    let h = harness(MockTransport::new());
    let manager = h.manager.clone();
    let caller = tokio::spawn(async move { manager.connect().await });

    let session = h.transport.wait_for_session(0).await;
    h.manager.disconnect().await;

    assert_eq!(caller.await.unwrap(), Err(ConnectError::Cancelled));
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert!(session.is_closed());
    assert!(!session.establish());
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_scheduled_reconnect() {
    let h = harness(MockTransport::auto_establishing());
    h.manager.connect().await.unwrap();
    h.transport.session(0).await.unwrap().close_transient(None);
    h.manager
        .wait_for_state(ConnectionState::Reconnecting)
        .await
        .unwrap();

    let manager = h.manager.clone();
    let parked = tokio::spawn(async move { manager.connect().await });
    tokio::task::yield_now().await;

    h.manager.disconnect().await;
    assert_eq!(parked.await.unwrap(), Err(ConnectError::Cancelled));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(h.transport.open_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_while_reconnecting_waits_for_retry() {
    let h = harness(MockTransport::auto_establishing());
    h.manager.connect().await.unwrap();
    h.transport.session(0).await.unwrap().close_transient(None);
    h.manager
        .wait_for_state(ConnectionState::Reconnecting)
        .await
        .unwrap();

    let start = Instant::now();
    h.manager.connect().await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(3));
    assert_eq!(h.transport.open_count().await, 2);
    assert!(h.manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn send_fails_fast_unless_open() {
    let h = harness(MockTransport::new());

    assert_eq!(
        h.manager.send_message("a@s.whatsapp.net", "hi").await,
        Err(SendError::NotConnected)
    );

    let manager = h.manager.clone();
    let _caller = tokio::spawn(async move { manager.connect().await });
    h.transport.wait_for_session(0).await;
    assert_eq!(h.manager.state(), ConnectionState::Connecting);

    let result = tokio::time::timeout(
        Duration::from_millis(1),
        h.manager.send_message("a@s.whatsapp.net", "hi"),
    )
    .await;
    assert_eq!(result, Ok(Err(SendError::NotConnected)));
}

#[tokio::test(start_paused = true)]
async fn send_delivers_over_open_session() {
    let h = harness(MockTransport::auto_establishing());
    h.manager.connect().await.unwrap();

    let ack = h
        .manager
        .send_message("15550001111@s.whatsapp.net", "hello")
        .await
        .unwrap();

    assert_eq!(ack.message_id.as_deref(), Some("mock-0-1"));
    let session = h.transport.session(0).await.unwrap();
    assert_eq!(
        session.sent().await,
        vec![(
            "15550001111@s.whatsapp.net".to_string(),
            "hello".to_string()
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn send_failure_keeps_session_open() {
    let h = harness(MockTransport::auto_establishing());
    h.manager.connect().await.unwrap();
    let session = h.transport.session(0).await.unwrap();
    session
        .queue_send_result(Err(TransportError::Rejected("unknown recipient".into())))
        .await;

    let result = h.manager.send_message("nobody", "hi").await;

    assert!(matches!(result, Err(SendError::Transport(msg)) if msg.contains("unknown recipient")));
    assert_eq!(h.manager.state(), ConnectionState::Open);
    assert!(h.manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn stale_sessions_cannot_affect_state() {
    let h = harness(MockTransport::auto_establishing());
    h.manager.connect().await.unwrap();

    let first = h.transport.session(0).await.unwrap();
    first.close_transient(None);
    h.manager
        .wait_for_state(ConnectionState::Reconnecting)
        .await
        .unwrap();
    h.manager.wait_for_state(ConnectionState::Open).await.unwrap();

    let second = h.transport.session(1).await.unwrap();
    second.close_transient(None);
    h.manager
        .wait_for_state(ConnectionState::Reconnecting)
        .await
        .unwrap();
    h.manager.wait_for_state(ConnectionState::Open).await.unwrap();

    assert!(!first.establish());
    assert!(!first.log_out());
    assert!(!second.close_transient(Some(500)));
    tokio::task::yield_now().await;

    assert_eq!(h.transport.open_count().await, 3);
    assert_eq!(h.manager.state(), ConnectionState::Open);
    assert!(h.transport.session(2).await.unwrap().establish());
}

#[tokio::test(start_paused = true)]
async fn pairing_challenge_reaches_presenter() {
    let h = harness(MockTransport::new());
    let mut events = h.manager.subscribe();
    let manager = h.manager.clone();
    let caller = tokio::spawn(async move { manager.connect().await });

    let session = h.transport.wait_for_session(0).await;
    assert!(session.challenge("2@AbCd,EfGh"));
    assert!(session.establish());
    caller.await.unwrap().unwrap();

    assert_eq!(
        *h.presenter.codes.lock().unwrap(),
        vec!["2@AbCd,EfGh".to_string()]
    );
    assert!(drain(&mut events).contains(&LifecycleEvent::PairingRequested));
}

#[tokio::test(start_paused = true)]
async fn rotated_credentials_are_persisted_and_reused() {
    let h = harness(MockTransport::auto_establishing());
    h.manager.connect().await.unwrap();

    let creds = Credentials::new(json!({"me": {"id": "15550001111"}, "registered": true}));
    assert!(
        h.transport
            .session(0)
            .await
            .unwrap()
            .rotate_credentials(creds.clone())
    );
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(h.store.save_count().await, 1);
    assert_eq!(h.store.current().await, creds);

    h.manager.disconnect().await;
    h.manager.connect().await.unwrap();
    assert_eq!(h.transport.session(1).await.unwrap().credentials(), &creds);
}

#[tokio::test(start_paused = true)]
async fn protocol_version_is_negotiated_or_pinned() {
    let latest = ProtocolVersion::new(2, 3000, 1_015_901_307);
    let negotiated = harness(MockTransport::auto_establishing().with_latest_version(Some(latest)));
    negotiated.manager.connect().await.unwrap();
    assert_eq!(
        negotiated.transport.session(0).await.unwrap().version(),
        latest
    );

    let pinned_version = ProtocolVersion::new(2, 2413, 1);
    let pinned = harness_with(
        MockTransport::auto_establishing().with_latest_version(Some(latest)),
        ConnectionConfig::default().with_protocol_version(pinned_version),
    );
    pinned.manager.connect().await.unwrap();
    assert_eq!(
        pinned.transport.session(0).await.unwrap().version(),
        pinned_version
    );

    let fallback = harness(MockTransport::auto_establishing().with_latest_version(None));
    fallback.manager.connect().await.unwrap();
    assert_eq!(
        fallback.transport.session(0).await.unwrap().version(),
        ProtocolVersion::default()
    );
}

#[tokio::test(start_paused = true)]
async fn exponential_policy_grows_between_failures() {
    let policy = ReconnectPolicy::Exponential {
        initial: Duration::from_secs(1),
        max: Duration::from_secs(60),
        multiplier: 2.0,
        jitter: 0.0,
    };
    let transport = MockTransport::auto_establishing();
    transport.fail_next_opens(3);
    let h = harness_with(transport, ConnectionConfig::default().with_reconnect(policy));
    let mut events = h.manager.subscribe();

    let _ = h.manager.connect().await;
    h.manager.wait_for_state(ConnectionState::Open).await.unwrap();

    let delays: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            LifecycleEvent::ReconnectScheduled { delay, .. } => Some(delay),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
    assert_eq!(h.transport.open_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn dropping_manager_closes_session() {
    let Harness {
        transport, manager, ..
    } = harness(MockTransport::auto_establishing());
    manager.connect().await.unwrap();
    let session = transport.session(0).await.unwrap();

    drop(manager);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(session.is_closed());
    assert!(session.is_detached());
}

/// Store that loads nothing and refuses every save
struct ReadOnlyStore;

#[async_trait::async_trait]
impl CredentialStore for ReadOnlyStore {
    async fn load(&self) -> Result<Credentials, StoreError> {
        Ok(Credentials::default())
    }

    async fn save(&self, _credentials: &Credentials) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::other("read-only file system")))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn failed_credential_save_keeps_session_open() {
    let transport = Arc::new(MockTransport::auto_establishing());
    let manager = ConnectionManager::new(
        transport.clone(),
        Arc::new(ReadOnlyStore),
        Arc::new(RecordingPresenter::default()),
        ConnectionConfig::default(),
    );
    manager.connect().await.unwrap();
    let mut events = manager.subscribe();

    let session = transport.session(0).await.unwrap();
    assert!(session.rotate_credentials(Credentials::new(json!({"me": "15550001111"}))));

    let error = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let Ok(LifecycleEvent::CredentialsPersistFailed { error }) = events.recv().await {
                return error;
            }
        }
    })
    .await
    .expect("persist failure should be reported");

    assert!(error.contains("read-only file system"));
    assert_eq!(manager.state(), ConnectionState::Open);
    assert!(manager.is_connected());
    assert!(!session.is_closed());
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn hanging_open_is_bounded_by_attempt_deadline() {
    let transport = MockTransport::new();
    transport.hang_next_opens(1);
    let h = harness(transport);
    let start = Instant::now();

    let result = h.manager.connect().await;

    assert_eq!(
        result,
        Err(ConnectError::ConnectTimeout(Duration::from_secs(120)))
    );
    assert!(start.elapsed() >= Duration::from_secs(120));
    assert_eq!(h.manager.state(), ConnectionState::Idle);
    assert_eq!(h.transport.open_calls(), 1);
    assert_eq!(h.transport.open_count().await, 0);
    assert!(!h.manager.is_connected());
}
