//! Forget the stored session so the next `serve` pairs from scratch

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use parley_core::{CredentialStore, FileCredentialStore};
use tracing::info;

use crate::config::ConfigLoader;

#[derive(Debug, Args)]
pub struct LogoutArgs {
    /// Credentials directory (defaults to the configured auth_dir)
    #[arg(long)]
    pub auth_dir: Option<PathBuf>,
}

pub async fn run(args: LogoutArgs) -> Result<()> {
    let dir = match args.auth_dir {
        Some(dir) => dir,
        None => ConfigLoader::auth_dir()?,
    };
    clear(&dir).await?;
    println!("Removed stored credentials from {}", dir.display());
    Ok(())
}

async fn clear(dir: &std::path::Path) -> Result<()> {
    let store = FileCredentialStore::new(dir);
    store
        .clear()
        .await
        .with_context(|| format!("Failed to clear credentials in {}", dir.display()))?;
    info!(path = %store.file_path().display(), "Cleared stored credentials");
    Ok(())
}
