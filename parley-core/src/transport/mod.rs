//! Transport abstraction
//!
//! A [`Transport`] opens sessions against the messaging service. Each opened
//! session comes with exactly one event receiver; the lifecycle manager is the
//! only listener, and dropping that receiver detaches it from the session.

pub mod mock;
pub mod ws;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::credentials::Credentials;
use crate::error::TransportError;
use crate::pairing::PairingChallenge;
use crate::state::CloseReason;

pub use mock::{MockSession, MockTransport};
pub use ws::{WsTransport, WsTransportConfig};

/// Protocol version negotiated for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProtocolVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(format!("expected MAJOR.MINOR.PATCH, got '{}'", s));
        };
        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|e| format!("invalid version component '{}': {}", part, e))
        };
        Ok(Self::new(parse(*major)?, parse(*minor)?, parse(*patch)?))
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(version: ProtocolVersion) -> Self {
        version.to_string()
    }
}

/// Lifecycle events emitted by an open session, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A human must approve this challenge before the session is established.
    PairingChallenge(PairingChallenge),
    /// The session is usable.
    Established,
    /// The session closed.
    Closed(CloseReason),
    /// The protocol rotated credential material; persist it.
    CredentialsChanged(Credentials),
}

/// Acknowledgment of a delivered message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAck {
    /// Provider-assigned message identifier, when the provider gave one.
    pub message_id: Option<String>,
}

/// A freshly opened session and its only event subscription.
pub struct OpenedSession {
    pub handle: Arc<dyn SessionHandle>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl std::fmt::Debug for OpenedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedSession").finish_non_exhaustive()
    }
}

/// Opens sessions against the messaging service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Latest protocol version the service accepts.
    async fn protocol_version(&self) -> Result<ProtocolVersion, TransportError> {
        Ok(ProtocolVersion::default())
    }

    /// Start opening a session. Progress is reported through the returned event receiver.
    async fn open(
        &self,
        credentials: Credentials,
        version: ProtocolVersion,
    ) -> Result<OpenedSession, TransportError>;
}

/// An open session with the messaging service.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Deliver `text` to `destination`.
    async fn send(&self, destination: &str, text: &str) -> Result<SendAck, TransportError>;

    /// Close the session. Must be idempotent.
    async fn close(&self);
}
