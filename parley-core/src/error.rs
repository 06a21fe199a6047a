//! Error types for parley-core

use std::time::Duration;

use thiserror::Error;

/// Why a `connect()` call did not produce a usable session.
///
/// Every caller joined to the same attempt receives a clone of the same value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Pairing was not completed before the attempt deadline.
    #[error("connection timed out after {0:?}; complete pairing and try again")]
    ConnectTimeout(Duration),

    /// The service revoked the session. A human must re-pair.
    #[error("logged out by the messaging service; re-pair to continue")]
    LoggedOut,

    /// The session closed transiently during the attempt; a reconnect is scheduled.
    #[error("connection closed during attempt (code {code:?}); reconnecting")]
    Interrupted { code: Option<u16> },

    /// The transport refused to open a session; a reconnect is scheduled.
    #[error("failed to open session: {0}")]
    Open(String),

    /// Stored credentials could not be loaded.
    #[error("failed to load credentials: {0}")]
    Credentials(String),

    /// `disconnect()` was called while the attempt was pending.
    #[error("connection attempt cancelled")]
    Cancelled,

    /// The lifecycle manager is gone.
    #[error("connection manager has shut down")]
    Shutdown,
}

impl ConnectError {
    /// Whether the manager is already working on a new attempt.
    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Interrupted { .. } | Self::Open(_))
    }
}

/// Errors from `send_message()`. Neither variant affects connection state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("not connected to the messaging service")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors reported by a [`Transport`](crate::transport::Transport) or its sessions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("session is closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("send rejected: {0}")]
    Rejected(String),
}

/// Errors from a [`CredentialStore`](crate::credentials::CredentialStore).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("credential storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential file is malformed: {0}")]
    Format(#[from] serde_json::Error),
}
