use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use parley_core::{ConnectionConfig, ProtocolVersion, ReconnectPolicy, WsTransportConfig};
use serde::{Deserialize, Serialize};

/// Default bind address for the HTTP server
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default port for the HTTP server
pub const DEFAULT_PORT: u16 = parley_server::DEFAULT_PORT;

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawParleyConfig {
    #[serde(default)]
    pub server: RawServerConfig,

    #[serde(default)]
    pub access: RawAccessConfig,

    #[serde(default)]
    pub session: RawSessionConfig,

    #[serde(default)]
    pub connection: RawConnectionConfig,

    pub log_level: Option<String>,

    /// PORT value from the environment that failed to parse
    #[serde(skip)]
    pub invalid_port: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawAccessConfig {
    pub api_key: Option<String>,
    pub allowed_phones: Option<Vec<String>>,
    pub address_domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawSessionConfig {
    pub auth_dir: Option<PathBuf>,
    pub bridge_url: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub send_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConnectionConfig {
    #[serde(default, with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
    pub reconnect: Option<ReconnectPolicy>,
    pub protocol_version: Option<ProtocolVersion>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParleyConfig {
    pub log_level: LogLevel,
    pub server: ServerConfig,
    pub access: AccessConfig,
    pub session: SessionConfig,
    pub connection: ConnectionConfig,
}

impl ParleyConfig {
    /// Copy safe to print: the API key is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.access.api_key = "********".to_string();
        copy
    }

    /// Transport settings for the bridge
    pub fn transport(&self) -> WsTransportConfig {
        WsTransportConfig::new(self.session.bridge_url.clone())
            .with_send_timeout(self.session.send_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessConfig {
    /// Key required on every `/send` request
    pub api_key: String,
    /// Phone numbers `/send` may deliver to
    pub allowed_phones: Vec<String>,
    pub address_domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionConfig {
    /// Directory holding persisted session credentials
    pub auth_dir: PathBuf,
    /// WebSocket endpoint of the protocol bridge
    pub bridge_url: String,
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
}

/// Accepted log levels. `fatal` is kept for compatibility and logs as `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Directive for `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error | Self::Fatal => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            other => Err(format!(
                "log_level must be one of trace, debug, info, warn, error, fatal (got '{}')",
                other
            )),
        }
    }
}
