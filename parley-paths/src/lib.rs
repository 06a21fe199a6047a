//! XDG Base Directory paths for parley.
//!
//! The relay stores its configuration under the XDG config home and its
//! session credentials under the XDG data home, on every platform.

use std::path::PathBuf;

/// Get the parley config directory.
///
/// Returns `$XDG_CONFIG_HOME/parley` if set, otherwise `~/.config/parley`.
///
/// # Examples
///
/// ```
/// use parley_paths::config_dir;
///
/// let config_file = config_dir().join("config.toml");
/// ```
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join("parley")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config/parley")
    } else {
        PathBuf::from(".config/parley")
    }
}

/// Get the parley data directory.
///
/// Returns `$XDG_DATA_HOME/parley` if set, otherwise `~/.local/share/parley`.
pub fn data_dir() -> PathBuf {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg_data).join("parley")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".local/share/parley")
    } else {
        PathBuf::from(".local/share/parley")
    }
}

/// Default directory for persisted session credentials.
pub fn auth_dir() -> PathBuf {
    data_dir().join("auth")
}
