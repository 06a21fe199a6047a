use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parley_core::{ConnectionConfig, DEFAULT_CONNECT_TIMEOUT};
use parley_core::transport::ws::{DEFAULT_BRIDGE_URL, DEFAULT_SEND_TIMEOUT};
use parley_server::{AllowList, DEFAULT_ADDRESS_DOMAIN};

use super::ConfigError;
use super::types::{
    AccessConfig, DEFAULT_HOST, DEFAULT_PORT, LogLevel, ParleyConfig, RawAccessConfig,
    RawConnectionConfig, RawParleyConfig, RawServerConfig, RawSessionConfig, ServerConfig,
    SessionConfig,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project + environment) and validate it
    pub fn load() -> Result<ParleyConfig> {
        let raw = Self::load_raw()?;
        Ok(Self::finalize(raw)?)
    }

    /// Merge every layer without validating
    pub fn load_raw() -> Result<RawParleyConfig> {
        Self::load_layers(
            Some(&Self::user_config_path()),
            &Self::project_config_path(),
            |key| std::env::var(key).ok(),
        )
    }

    /// Merge the given files, then environment overrides looked up through `env`
    pub fn load_layers(
        user: Option<&Path>,
        project: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<RawParleyConfig> {
        let mut raw = RawParleyConfig::default();

        // Layer 1: User config
        if let Some(user_path) = user
            && let Some(user_config) = Self::read_layer(user_path)?
        {
            raw = Self::merge_raw(raw, user_config);
        }

        // Layer 2: Project config
        if let Some(project_config) = Self::read_layer(project)? {
            raw = Self::merge_raw(raw, project_config);
        }

        // Layer 3: Environment
        Ok(Self::merge_raw(raw, Self::env_layer(env)))
    }

    fn read_layer(path: &Path) -> Result<Option<RawParleyConfig>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let layer = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded config layer");
        Ok(Some(layer))
    }

    /// Get user config path
    pub fn user_config_path() -> PathBuf {
        parley_paths::config_dir().join("config.toml")
    }

    /// Get project config path
    /// Can be overridden with PARLEY_PROJECT_CONFIG_DIR env var (useful for isolated tests)
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("PARLEY_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".parley/config.toml")
        }
    }

    /// Directory of stored credentials, without requiring a valid config
    pub fn auth_dir() -> Result<PathBuf> {
        let raw = Self::load_raw()?;
        Ok(raw.session.auth_dir.unwrap_or_else(parley_paths::auth_dir))
    }

    /// Environment overrides: HOST, PORT, API_KEY, ALLOWED_PHONES, AUTH_DIR, LOG_LEVEL, BRIDGE_URL
    ///
    /// A PORT that is not a valid port number is kept as a raw string so it can be
    /// reported alongside the other validation errors.
    fn env_layer(env: impl Fn(&str) -> Option<String>) -> RawParleyConfig {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let mut layer = RawParleyConfig {
            server: RawServerConfig {
                host: non_empty("HOST"),
                port: None,
            },
            access: RawAccessConfig {
                api_key: non_empty("API_KEY"),
                allowed_phones: non_empty("ALLOWED_PHONES").map(|v| parse_phone_list(&v)),
                address_domain: None,
            },
            session: RawSessionConfig {
                auth_dir: non_empty("AUTH_DIR").map(PathBuf::from),
                bridge_url: non_empty("BRIDGE_URL"),
                send_timeout: None,
            },
            connection: RawConnectionConfig::default(),
            log_level: non_empty("LOG_LEVEL"),
            invalid_port: None,
        };

        if let Some(port) = non_empty("PORT") {
            match port.trim().parse::<u16>() {
                Ok(p) if p > 0 => layer.server.port = Some(p),
                _ => layer.invalid_port = Some(port),
            }
        }
        layer
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawParleyConfig, overlay: RawParleyConfig) -> RawParleyConfig {
        RawParleyConfig {
            server: RawServerConfig {
                host: overlay.server.host.or(base.server.host),
                port: overlay.server.port.or(base.server.port),
            },
            access: RawAccessConfig {
                api_key: overlay.access.api_key.or(base.access.api_key),
                allowed_phones: overlay.access.allowed_phones.or(base.access.allowed_phones),
                address_domain: overlay.access.address_domain.or(base.access.address_domain),
            },
            session: RawSessionConfig {
                auth_dir: overlay.session.auth_dir.or(base.session.auth_dir),
                bridge_url: overlay.session.bridge_url.or(base.session.bridge_url),
                send_timeout: overlay.session.send_timeout.or(base.session.send_timeout),
            },
            connection: RawConnectionConfig {
                connect_timeout: overlay
                    .connection
                    .connect_timeout
                    .or(base.connection.connect_timeout),
                reconnect: overlay.connection.reconnect.or(base.connection.reconnect),
                protocol_version: overlay
                    .connection
                    .protocol_version
                    .or(base.connection.protocol_version),
            },
            log_level: overlay.log_level.or(base.log_level),
            invalid_port: overlay.invalid_port.or(base.invalid_port),
        }
    }

    /// Convert raw config to final config with defaults applied.
    ///
    /// Every violation is collected so they can be reported together.
    pub fn finalize(raw: RawParleyConfig) -> Result<ParleyConfig, ConfigError> {
        let mut problems = Vec::new();

        if let Some(port) = &raw.invalid_port {
            problems.push(format!("PORT must be a port number between 1 and 65535 (got '{}')", port));
        }

        let api_key = raw.access.api_key.unwrap_or_default();
        if api_key.trim().is_empty() {
            problems.push("api_key is required (set API_KEY or access.api_key)".to_string());
        }

        let allowed_phones = raw.access.allowed_phones.unwrap_or_default();
        if AllowList::new(&allowed_phones).is_empty() {
            problems.push(
                "at least one phone number must be allowed (set ALLOWED_PHONES or access.allowed_phones)"
                    .to_string(),
            );
        }

        let log_level = match raw.log_level.as_deref() {
            None => LogLevel::default(),
            Some(value) => value.parse().unwrap_or_else(|e: String| {
                problems.push(e);
                LogLevel::default()
            }),
        };

        if let Some(policy) = &raw.connection.reconnect
            && let Err(e) = policy.validate()
        {
            problems.push(e);
        }

        if !problems.is_empty() {
            return Err(ConfigError::Invalid(problems));
        }

        let connection_defaults = ConnectionConfig::default();
        Ok(ParleyConfig {
            log_level,
            server: ServerConfig {
                host: raw.server.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: raw.server.port.unwrap_or(DEFAULT_PORT),
            },
            access: AccessConfig {
                api_key,
                allowed_phones,
                address_domain: raw
                    .access
                    .address_domain
                    .unwrap_or_else(|| DEFAULT_ADDRESS_DOMAIN.to_string()),
            },
            session: SessionConfig {
                auth_dir: raw.session.auth_dir.unwrap_or_else(parley_paths::auth_dir),
                bridge_url: raw
                    .session
                    .bridge_url
                    .unwrap_or_else(|| DEFAULT_BRIDGE_URL.to_string()),
                send_timeout: raw.session.send_timeout.unwrap_or(DEFAULT_SEND_TIMEOUT),
            },
            connection: ConnectionConfig {
                connect_timeout: raw
                    .connection
                    .connect_timeout
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
                reconnect: raw
                    .connection
                    .reconnect
                    .unwrap_or(connection_defaults.reconnect),
                protocol_version: raw.connection.protocol_version,
            },
        })
    }
}

/// Split a comma-separated phone list, dropping blanks
fn parse_phone_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|phone| !phone.is_empty())
        .map(str::to_string)
        .collect()
}
