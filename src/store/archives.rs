use crate::error::ExtractError;
use crate::store::hashes::{get_file_hash, get_recorded_hash, set_recorded_hash};
use async_compression::tokio::bufread::{BzDecoder, GzipDecoder, XzDecoder, ZstdDecoder};
use async_zip::tokio::read::seek::ZipFileReader;
use std::path::{Path, PathBuf};
use tokio::{
    fs::{create_dir_all, File, OpenOptions},
    io::{AsyncBufRead, AsyncRead, BufReader},
};
use tokio_tar::Archive;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGzip,
    TarBzip2,
    TarXz,
    TarZstd,
    Tar,
    Zip,
}

impl ArchiveKind {
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        match mime_type {
            "application/gzip" => Some(ArchiveKind::TarGzip),
            "application/x-bzip2" => Some(ArchiveKind::TarBzip2),
            "application/x-xz" => Some(ArchiveKind::TarXz),
            "application/zstd" => Some(ArchiveKind::TarZstd),
            "application/x-tar" => Some(ArchiveKind::Tar),
            "application/zip" => Some(ArchiveKind::Zip),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractStatus {
    Extracted,
    Skipped,
}

pub fn get_archive_kind(path: &Path) -> Result<ArchiveKind, ExtractError> {
    let kind = infer::get_from_path(path)?.ok_or_else(|| ExtractError::Unsupported(path.into()))?;

    ArchiveKind::from_mime_type(kind.mime_type())
        .ok_or_else(|| ExtractError::Unsupported(path.into()))
}

async fn unpack_tar<R: AsyncRead + Unpin>(reader: R, target_dir: &Path) -> std::io::Result<()> {
    let mut archive = Archive::new(reader);

    archive.unpack(target_dir).await
}

fn decoder<R: AsyncBufRead + Unpin + Send + 'static>(
    kind: ArchiveKind,
    reader: R,
) -> Box<dyn AsyncRead + Unpin + Send> {
    match kind {
        ArchiveKind::TarGzip => Box::new(GzipDecoder::new(reader)),
        ArchiveKind::TarBzip2 => Box::new(BzDecoder::new(reader)),
        ArchiveKind::TarXz => Box::new(XzDecoder::new(reader)),
        ArchiveKind::TarZstd => Box::new(ZstdDecoder::new(reader)),
        ArchiveKind::Tar | ArchiveKind::Zip => Box::new(reader),
    }
}

/// Returns a relative path without reserved names, redundant separators, ".", or "..".
fn sanitize_file_path(path: &str) -> PathBuf {
    path.replace('\\', "/")
        .split('/')
        .map(sanitize_filename::sanitize)
        .collect()
}

fn zip_error(path: &Path, err: async_zip::error::ZipError) -> ExtractError {
    ExtractError::Unpack {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

pub async fn unpack_zip(source_path: &Path, out_dir: &Path) -> Result<(), ExtractError> {
    let archive_file = File::open(source_path).await?;

    let archive = BufReader::new(archive_file).compat();

    let mut reader = ZipFileReader::new(archive)
        .await
        .map_err(|err| zip_error(source_path, err))?;

    for index in 0..reader.file().entries().len() {
        let Some(entry) = reader.file().entries().get(index) else {
            continue;
        };

        let file_name = entry
            .filename()
            .as_str()
            .map_err(|err| zip_error(source_path, err))?;

        let path = out_dir.join(sanitize_file_path(file_name));

        let entry_is_dir = entry.dir().map_err(|err| zip_error(source_path, err))?;

        let mut entry_reader = reader
            .reader_without_entry(index)
            .await
            .map_err(|err| zip_error(source_path, err))?;

        if entry_is_dir {
            // may already exist when entries are out of order
            if !path.exists() {
                create_dir_all(&path).await?;
            }

            continue;
        }

        if let Some(parent) = path.parent() {
            if !parent.is_dir() {
                create_dir_all(parent).await?;
            }
        }

        let writer = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;

        futures_lite::io::copy(&mut entry_reader, &mut writer.compat_write()).await?;
    }

    Ok(())
}

pub async fn unpack(source: &Path, target_dir: &Path) -> Result<(), ExtractError> {
    let kind = get_archive_kind(source)?;

    if kind == ArchiveKind::Zip {
        return unpack_zip(source, target_dir).await;
    }

    let file = File::open(source).await?;

    unpack_tar(decoder(kind, BufReader::new(file)), target_dir)
        .await
        .map_err(|err| ExtractError::Unpack {
            path: source.to_path_buf(),
            message: err.to_string(),
        })
}

/// Extracts `source` into `target_dir` unless the recorded digest shows the
/// same archive was already extracted. The digest is only recorded after a
/// successful extraction.
pub async fn extract(source: &Path, target_dir: &Path) -> Result<ExtractStatus, ExtractError> {
    if !source.is_file() {
        return Err(ExtractError::Missing(source.to_path_buf()));
    }

    create_dir_all(target_dir).await?;

    let hash = get_file_hash(source).await?;

    if get_recorded_hash(source).await.as_deref() == Some(hash.as_str()) {
        info!("same archive already extracted: {}", source.display());

        return Ok(ExtractStatus::Skipped);
    }

    info!(
        "extracting {} to {}",
        source.display(),
        target_dir.display()
    );

    if let Err(err) = unpack(source, target_dir).await {
        warn!("extraction failed: {}", err);

        return Err(err);
    }

    set_recorded_hash(source, &hash).await?;

    Ok(ExtractStatus::Extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::paths::get_archive_hash_path;
    use async_compression::tokio::write::GzipEncoder;
    use tokio::io::AsyncWriteExt;
    use tokio_tar::{Builder, Header};

    async fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).await.unwrap();
        let mut builder = Builder::new(GzipEncoder::new(file));

        for (name, data) in entries {
            let mut header = Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).await.unwrap();
        }

        let mut encoder = builder.into_inner().await.unwrap();
        encoder.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn extracts_once_for_same_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("pkg.tar.gz");
        let pkgs = dir.path().join("pkgs");

        write_tar_gz(&archive, &[("pkg-1.0/README", b"one")]).await;

        assert_eq!(
            extract(&archive, &pkgs).await.unwrap(),
            ExtractStatus::Extracted
        );
        assert!(pkgs.join("pkg-1.0/README").is_file());
        assert!(get_archive_hash_path(&archive).is_file());

        // a removed tree is not restored: the sidecar alone decides
        tokio::fs::remove_dir_all(pkgs.join("pkg-1.0")).await.unwrap();

        assert_eq!(
            extract(&archive, &pkgs).await.unwrap(),
            ExtractStatus::Skipped
        );
        assert!(!pkgs.join("pkg-1.0").exists());
    }

    #[tokio::test]
    async fn changed_archive_is_extracted_again() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("pkg.tar.gz");
        let pkgs = dir.path().join("pkgs");

        write_tar_gz(&archive, &[("pkg-1.0/README", b"one")]).await;
        extract(&archive, &pkgs).await.unwrap();

        write_tar_gz(&archive, &[("pkg-2.0/README", b"two")]).await;

        assert_eq!(
            extract(&archive, &pkgs).await.unwrap(),
            ExtractStatus::Extracted
        );
        assert!(pkgs.join("pkg-2.0/README").is_file());
    }

    #[tokio::test]
    async fn corrupt_archive_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("pkg.tar.gz");
        let pkgs = dir.path().join("pkgs");

        // gzip magic followed by garbage
        tokio::fs::write(&archive, [0x1f, 0x8b, 0x08, 0x00, 0xde, 0xad, 0xbe, 0xef])
            .await
            .unwrap();

        assert!(extract(&archive, &pkgs).await.is_err());
        assert!(!get_archive_hash_path(&archive).exists());
    }

    #[tokio::test]
    async fn unknown_format_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("notes.txt");

        tokio::fs::write(&archive, b"plain text").await.unwrap();

        assert!(matches!(
            extract(&archive, dir.path()).await,
            Err(ExtractError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn missing_archive() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            extract(&dir.path().join("gone.tar.gz"), dir.path()).await,
            Err(ExtractError::Missing(_))
        ));
    }
}
