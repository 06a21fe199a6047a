//! Configuration for the connection lifecycle manager.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reconnect::ReconnectPolicy;
use crate::transport::ProtocolVersion;

/// Default deadline for completing pairing / establishing a session.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// How long a connection attempt may take before it is abandoned.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Delay policy applied after transient closes.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Pin a protocol version instead of asking the transport for the latest.
    #[serde(default)]
    pub protocol_version: Option<ProtocolVersion>,
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            reconnect: ReconnectPolicy::default(),
            protocol_version: None,
        }
    }
}

impl ConnectionConfig {
    /// Use a custom attempt deadline.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Use a custom reconnect policy.
    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Pin the protocol version.
    #[must_use]
    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = Some(version);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_values() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(120));
        assert_eq!(
            config.reconnect.delay_for_attempt(0),
            Duration::from_secs(3)
        );
        assert!(config.protocol_version.is_none());
    }

    #[test]
    fn config_builder_pattern() {
        let config = ConnectionConfig::default()
            .with_connect_timeout(Duration::from_secs(30))
            .with_reconnect(ReconnectPolicy::fixed(Duration::from_secs(1)))
            .with_protocol_version(ProtocolVersion::new(2, 3000, 7));

        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.reconnect, ReconnectPolicy::fixed(Duration::from_secs(1)));
        assert_eq!(config.protocol_version, Some(ProtocolVersion::new(2, 3000, 7)));
    }

    #[test]
    fn config_parses_humantime_from_toml() {
        let config: ConnectionConfig = toml::from_str(
            r#"
connect_timeout = "2m 30s"
protocol_version = "2.3000.1015901307"

[reconnect]
strategy = "fixed"
delay = "10s"
"#,
        )
        .unwrap();

        assert_eq!(config.connect_timeout, Duration::from_secs(150));
        assert_eq!(config.reconnect, ReconnectPolicy::fixed(Duration::from_secs(10)));
        assert_eq!(
            config.protocol_version,
            Some(ProtocolVersion::new(2, 3000, 1_015_901_307))
        );
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: ConnectionConfig = toml::from_str("").unwrap();
        assert_eq!(config, ConnectionConfig::default());
    }
}
