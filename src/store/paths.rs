use std::path::{Path, PathBuf};
use tokio::fs::create_dir_all;
use uuid::Uuid;

// Sandbox paths

pub fn get_download_dir_path(sandbox: &Path) -> PathBuf {
    sandbox.join("dl")
}

pub fn get_package_dir_path(sandbox: &Path) -> PathBuf {
    sandbox.join("pkgs")
}

pub fn get_source_dir_path(sandbox: &Path) -> PathBuf {
    sandbox.join("source")
}

pub fn get_build_dir_path(sandbox: &Path) -> PathBuf {
    sandbox.join("build")
}

pub fn get_prefix_dir_path(sandbox: &Path, arch: &str) -> PathBuf {
    sandbox.join(format!("mingw-w64-{}", arch))
}

pub fn get_sandbox_dir_paths(sandbox: &Path) -> Vec<PathBuf> {
    vec![
        get_download_dir_path(sandbox),
        get_package_dir_path(sandbox),
        get_prefix_dir_path(sandbox, "i686"),
        get_prefix_dir_path(sandbox, "x86_64"),
        get_source_dir_path(sandbox),
        get_build_dir_path(sandbox),
    ]
}

// Archive paths - "{archive}.sha256"

pub fn get_archive_hash_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(".sha256");
    PathBuf::from(name)
}

pub fn get_partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}.part", Uuid::now_v7()));
    PathBuf::from(name)
}

/// Where a downloaded archive is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveTarget {
    /// Keep the remote file name inside this directory.
    Directory(PathBuf),
    /// Write to exactly this path.
    File(PathBuf),
}

impl SaveTarget {
    /// A trailing separator marks a directory.
    pub fn parse(value: &str) -> Self {
        if value.ends_with('/') {
            SaveTarget::Directory(PathBuf::from(value))
        } else {
            SaveTarget::File(PathBuf::from(value))
        }
    }

    pub fn resolve(&self, sandbox: &Path, remote_name: &str) -> PathBuf {
        let path = match self {
            SaveTarget::Directory(dir) => dir.join(remote_name),
            SaveTarget::File(file) => file.clone(),
        };

        if path.is_absolute() {
            return path;
        }

        sandbox.join(path)
    }
}

/// Resolves the save path and creates its parent directories.
pub async fn prepare_save_path(
    target: &SaveTarget,
    sandbox: &Path,
    remote_name: &str,
) -> std::io::Result<PathBuf> {
    let path = target.resolve(sandbox, remote_name);

    if let Some(parent) = path.parent() {
        create_dir_all(parent).await?;
    }

    Ok(path)
}
