//! parley-core: Connection lifecycle for a single messaging session
//!
//! This crate provides the building blocks of the parley relay:
//!
//! - **Lifecycle** - [`ConnectionManager`] owns the one session, deduplicates
//!   concurrent connects, enforces the attempt deadline and reconnects after
//!   transient closes
//! - **Readiness** - [`ReadinessGate`] lets every caller of an attempt share its outcome
//! - **Transports** - the [`Transport`] trait, a WebSocket bridge ([`WsTransport`])
//!   and a scripted [`MockTransport`] for tests
//! - **Credentials** - [`CredentialStore`] with file and in-memory implementations
//! - **Pairing** - [`PairingPresenter`] hands challenges to a human
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use parley_core::{
//!     ConnectionConfig, ConnectionManager, FileCredentialStore, LogPresenter, WsTransport,
//!     WsTransportConfig,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConnectionManager::new(
//!     Arc::new(WsTransport::new(WsTransportConfig::default())),
//!     Arc::new(FileCredentialStore::new("./auth_info")),
//!     Arc::new(LogPresenter),
//!     ConnectionConfig::default(),
//! );
//!
//! manager.connect().await?;
//! manager.send_message("15550001111@s.whatsapp.net", "hello").await?;
//! manager.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! # States
//!
//! ```text
//!            connect()            established
//!   Idle ───────────────▶ Connecting ───────────▶ Open
//!    ▲  ▲                   │  │  ▲                 │
//!    │  └── timeout ────────┘  │  └── retry delay ──┤ transient close
//!    │                         │                    ▼
//!    │                         └──transient──▶ Reconnecting
//!    │
//!    └── disconnect()        logged out ──▶ Terminated
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod gate;
pub mod manager;
pub mod pairing;
pub mod reconnect;
pub mod state;
pub mod transport;

// Re-export key types for convenience
pub use config::{ConnectionConfig, DEFAULT_CONNECT_TIMEOUT};
pub use credentials::{CredentialStore, Credentials, FileCredentialStore, MemoryCredentialStore};
pub use error::{ConnectError, SendError, StoreError, TransportError};
pub use gate::{GateWaiter, ReadinessGate};
pub use manager::ConnectionManager;
pub use pairing::{LogPresenter, PairingChallenge, PairingPresenter, TerminalPresenter};
pub use reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectPolicy};
pub use state::{CloseReason, ConnectionState, DisconnectReason, LifecycleEvent};
pub use transport::{
    MockSession, MockTransport, OpenedSession, ProtocolVersion, SendAck, SessionHandle, Transport,
    TransportEvent, WsTransport, WsTransportConfig,
};
