mod loader;
mod types;

use thiserror::Error;

pub use loader::ConfigLoader;
pub use types::ParleyConfig;

/// Validation failures found while finalizing configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}
