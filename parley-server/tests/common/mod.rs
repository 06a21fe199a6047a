//! Shared test utilities for parley-server integration tests

use std::net::SocketAddr;
use std::sync::Arc;

use parley_core::{
    ConnectionConfig, ConnectionManager, LogPresenter, MemoryCredentialStore, MockTransport,
};
use parley_server::{AppState, ParleyServer, ServerConfig};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const API_KEY: &str = "test-key";
pub const ALLOWED: &str = "+1 (555) 000-1111";

/// Manager over a mock transport, plus the transport for scripting sessions
pub fn mock_manager() -> (Arc<MockTransport>, ConnectionManager) {
    let transport = Arc::new(MockTransport::auto_establishing());
    let manager = ConnectionManager::new(
        transport.clone(),
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(LogPresenter),
        ConnectionConfig::default(),
    );
    (transport, manager)
}

/// State guarded by [`API_KEY`] that allows only [`ALLOWED`]
pub fn test_state(manager: ConnectionManager) -> AppState {
    AppState::new(manager, API_KEY, [ALLOWED])
}

/// Running server handle
#[allow(dead_code)]
pub struct RunningServer {
    pub addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), parley_server::ServerError>>,
}

#[allow(dead_code)]
impl RunningServer {
    /// Trigger graceful shutdown and wait for the server to stop
    pub async fn stop(self) -> Result<(), parley_server::ServerError> {
        let _ = self.shutdown.send(());
        self.task.await.unwrap()
    }
}

/// Spawns server in background task on a random port
#[allow(dead_code)]
pub async fn spawn_server(state: AppState) -> RunningServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, rx) = oneshot::channel::<()>();

    let server = ParleyServer::new(ServerConfig::new("127.0.0.1", addr.port()), Arc::new(state));
    let task = tokio::spawn(server.run_with_listener(listener, async move {
        let _ = rx.await;
    }));

    RunningServer {
        addr,
        shutdown,
        task,
    }
}
