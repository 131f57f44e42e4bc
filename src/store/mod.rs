use anyhow::Result;
use std::path::Path;
use tokio::fs;
use tracing::info;

pub mod archives;
pub mod hashes;
pub mod paths;

/// Creates the sandbox and its working directories.
pub async fn check(sandbox: &Path) -> Result<(), anyhow::Error> {
    if !sandbox.exists() {
        fs::create_dir_all(sandbox).await?;
    }

    info!("sandbox directory: {:?}", sandbox);

    for dir in paths::get_sandbox_dir_paths(sandbox) {
        if !dir.exists() {
            info!("creating: {:?}", dir);
            fs::create_dir_all(&dir).await?;
        }
    }

    Ok(())
}
