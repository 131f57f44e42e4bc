use crate::config::{ComponentSource, Location, Servers};
use crate::error::FetchError;
use crate::mirror::Protocol;
use crate::source::version::{VersionOrder, VersionPattern};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

pub mod acquire;
pub mod ftp;
pub mod html;
pub mod version;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Ftp,
    Http,
}

#[derive(Clone, Debug)]
pub struct SourceContext {
    pub sandbox: PathBuf,
    pub ftp_timeout: Duration,
    pub http_timeout: Duration,
    pub order: VersionOrder,
}

/// Where an archive came from and where it was written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub remote: String,
    pub path: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchStatus {
    Downloaded,
    AlreadyPresent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fetched {
    pub resolved: Resolved,
    pub version: String,
    pub status: FetchStatus,
}

/// A trait that must be implemented by all supported archive sources.
#[async_trait]
pub trait Source: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Locates the archive and downloads it unless it is already saved.
    async fn fetch(&self, ctx: &SourceContext) -> Result<Fetched, FetchError>;
}

/// Resolves a component's configured location to a concrete source.
///
/// FTP components get the probed host of their group followed by its
/// default host.
pub fn resolve_source(
    component: &ComponentSource,
    servers: &Servers,
) -> Result<Box<dyn Source>, FetchError> {
    let file_pattern = VersionPattern::new(&component.file_pattern, component.file_group)?;

    let resolved: Box<dyn Source> = match &component.location {
        Location::Ftp {
            group,
            folder,
            folder_pattern,
        } => {
            let folder_pattern = folder_pattern
                .as_deref()
                .map(|pattern| VersionPattern::new(pattern, 1))
                .transpose()?;

            Box::new(ftp::FtpSource {
                hosts: servers.hosts(*group),
                port: Protocol::Ftp.port(),
                request: ftp::FtpRequest {
                    folder: folder.clone(),
                    folder_pattern,
                    preferred_folder_version: component.preferred_version.clone(),
                    file_pattern,
                    preferred_version: component.preferred_version.clone(),
                    save: component.save.clone(),
                },
            })
        }
        Location::Html { url } => Box::new(html::HttpSource {
            page: url.clone(),
            pattern: file_pattern,
            preferred_version: component.preferred_version.clone(),
            save: component.save.clone(),
        }),
    };

    Ok(resolved)
}
