//! Session credential persistence
//!
//! Credentials are opaque to parley: whatever the transport hands back in a
//! [`TransportEvent::CredentialsChanged`](crate::transport::TransportEvent) is
//! stored verbatim and passed to the next `open()`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;

/// Credentials file name inside the auth directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// Opaque session identity and key material.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(serde_json::Value);

impl Credentials {
    /// Wrap a JSON document.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// True when nothing has been persisted yet (a fresh pairing is needed).
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// The underlying document.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("Credentials(empty)")
        } else {
            f.write_str("Credentials(<redacted>)")
        }
    }
}

/// Loads and persists session credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the stored credentials, or empty credentials if none exist.
    async fn load(&self) -> Result<Credentials, StoreError>;

    /// Replace the stored credentials.
    async fn save(&self, credentials: &Credentials) -> Result<(), StoreError>;

    /// Forget the stored credentials so the next session pairs from scratch.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// File-backed credential store under a configured directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    /// Store credentials under `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the credentials file.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the credentials file.
    pub fn file_path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Credentials, StoreError> {
        let path = self.file_path();
        if !fs::try_exists(&path).await? {
            debug!(path = %path.display(), "No stored credentials");
            return Ok(Credentials::default());
        }

        let content = fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;

        let content = serde_json::to_string_pretty(credentials)?;
        let path = self.file_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), "Persisted credentials");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(self.file_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<Credentials>,
    saves: RwLock<usize>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with `credentials`.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: RwLock::new(credentials),
            saves: RwLock::new(0),
        }
    }

    /// Current contents.
    pub async fn current(&self) -> Credentials {
        self.credentials.read().await.clone()
    }

    /// Number of successful saves.
    pub async fn save_count(&self) -> usize {
        *self.saves.read().await
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Credentials, StoreError> {
        Ok(self.current().await)
    }

    async fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        *self.credentials.write().await = credentials.clone();
        *self.saves.write().await += 1;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.credentials.write().await = Credentials::default();
        Ok(())
    }
}
