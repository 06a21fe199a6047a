//! Connection state and lifecycle event types

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Current state of the messaging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session and no attempt in flight.
    #[default]
    Idle,
    /// A session is being opened and has not been established yet.
    Connecting,
    /// A session is established and owned by the manager.
    Open,
    /// The session closed transiently and a retry is scheduled.
    Reconnecting,
    /// The service logged the session out. No retries until `connect()` is called again.
    Terminated,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Close details as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CloseReason {
    /// Provider status code, when one was given.
    pub code: Option<u16>,
    /// Whether the provider revoked the session.
    #[serde(default)]
    pub logged_out: bool,
}

impl CloseReason {
    /// A retry-worthy close.
    pub fn transient(code: Option<u16>) -> Self {
        Self {
            code,
            logged_out: false,
        }
    }

    /// A close that requires re-pairing.
    pub fn logged_out(code: Option<u16>) -> Self {
        Self {
            code,
            logged_out: true,
        }
    }

    /// Classify this close for reconnect policy.
    pub fn classify(&self) -> DisconnectReason {
        if self.logged_out {
            DisconnectReason::LoggedOut
        } else {
            DisconnectReason::Transient
        }
    }
}

/// Why a session closed, as far as reconnect policy is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Terminal. Human re-authorization is required.
    LoggedOut,
    /// Network error, server restart, protocol renegotiation.
    Transient,
}

/// Events broadcast by the [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// The connection state changed.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// A pairing challenge was handed to the presenter.
    PairingRequested,
    /// A transient close scheduled a new attempt.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Persisting updated credentials failed.
    CredentialsPersistFailed { error: String },
}
