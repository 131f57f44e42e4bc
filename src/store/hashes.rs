use crate::store::paths::get_archive_hash_path;
use sha256::try_digest;
use std::path::{Path, PathBuf};
use tokio::fs::{read_to_string, write};

pub async fn get_file_hash(path: &Path) -> std::io::Result<String> {
    if !path.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("not a file: {}", path.display()),
        ));
    }

    let path: PathBuf = path.to_path_buf();

    tokio::task::spawn_blocking(move || try_digest(path.as_path()))
        .await
        .map_err(std::io::Error::other)?
}

/// Returns the digest recorded next to `archive`, if any.
pub async fn get_recorded_hash(archive: &Path) -> Option<String> {
    let path = get_archive_hash_path(archive);

    if !path.is_file() {
        return None;
    }

    read_to_string(&path)
        .await
        .ok()
        .map(|data| data.trim().to_string())
}

pub async fn set_recorded_hash(archive: &Path, hash: &str) -> std::io::Result<()> {
    write(get_archive_hash_path(archive), hash).await
}
