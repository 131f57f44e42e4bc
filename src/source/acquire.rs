use crate::config::{Component, Config, Servers};
use crate::error::{AcquireError, FetchError};
use crate::source::{resolve_source, Fetched, Source, SourceContext};
use crate::store::archives::{extract, ExtractStatus};
use crate::store::paths::get_package_dir_path;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{error, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Acquired {
    pub fetched: Fetched,
    pub extract: ExtractStatus,
}

pub type Acquisition = Vec<(Component, Result<Acquired, AcquireError>)>;

async fn fetch_and_extract(
    source: &dyn Source,
    ctx: &SourceContext,
    pkg_dir: &Path,
) -> Result<Acquired, AcquireError> {
    let fetched = source.fetch(ctx).await?;
    let extract = extract(&fetched.resolved.path, pkg_dir).await?;

    Ok(Acquired { fetched, extract })
}

/// Runs every source through fetch and extract with at most `width` in flight.
///
/// Results keep the order of `sources`. A failed component does not stop
/// the others.
pub async fn acquire_sources(
    sources: Vec<(Component, Box<dyn Source>)>,
    ctx: &SourceContext,
    pkg_dir: &Path,
    width: usize,
) -> Acquisition {
    let semaphore = Arc::new(Semaphore::new(width.max(1)));
    let mut tasks = JoinSet::new();

    for (index, (component, source)) in sources.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let ctx = ctx.clone();
        let pkg_dir = pkg_dir.to_path_buf();

        tasks.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => fetch_and_extract(source.as_ref(), &ctx, &pkg_dir).await,
                Err(err) => Err(FetchError::Transfer(err.to_string()).into()),
            };

            (index, component, result)
        });
    }

    let mut results = vec![];

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(err) => error!("acquisition task failed: {}", err),
        }
    }

    results.sort_by_key(|(index, _, _)| *index);

    results
        .into_iter()
        .map(|(_, component, result)| {
            match &result {
                Ok(acquired) => info!(
                    "{} {} ready ({:?}, {:?})",
                    component, acquired.fetched.version, acquired.fetched.status, acquired.extract
                ),
                Err(err) => warn!("{}: {}", component, err),
            }

            (component, result)
        })
        .collect()
}

/// Fetches and extracts every configured component into `<sandbox>/pkgs`.
pub async fn acquire(config: &Config, servers: &Servers) -> Acquisition {
    let mut sources = vec![];
    let mut failed = vec![];

    for source in &config.sources {
        match resolve_source(source, servers) {
            Ok(resolved) => sources.push((source.component, resolved)),
            Err(err) => {
                warn!("{}: {}", source.component, err);
                failed.push((source.component, Err(err.into())));
            }
        }
    }

    let pkg_dir = get_package_dir_path(&config.sandbox);

    let mut results = acquire_sources(
        sources,
        &config.source_context(),
        &pkg_dir,
        config.download_workers,
    )
    .await;

    results.extend(failed);

    results
}

/// Maps each component to its extracted tree under `pkg_dir`.
///
/// A directory belongs to a component when its name starts with the
/// component's token. When several match, the lexically last name wins.
pub fn find_source_dirs(pkg_dir: &Path) -> std::io::Result<BTreeMap<Component, PathBuf>> {
    let mut names = vec![];

    for entry in std::fs::read_dir(pkg_dir)? {
        let entry = entry?;

        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }

    names.sort();

    let mut found = BTreeMap::new();

    for name in names {
        for component in Component::ALL {
            if name.starts_with(component.dir_token()) {
                found.insert(component, pkg_dir.join(&name));
            }
        }
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::version::VersionOrder;
    use crate::source::{FetchStatus, Resolved, SourceKind};
    use async_compression::tokio::write::GzipEncoder;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio_tar::{Builder, Header};

    /// Writes a one-entry tarball and tracks how many fetches overlap.
    struct LocalSource {
        name: &'static str,
        fail: bool,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Source for LocalSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Http
        }

        async fn fetch(&self, ctx: &SourceContext) -> Result<Fetched, FetchError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(FetchError::NotFound {
                    pattern: self.name.to_string(),
                    location: "/".to_string(),
                });
            }

            let path = ctx.sandbox.join(format!("{}.tar.gz", self.name));
            let file = tokio::fs::File::create(&path).await?;
            let mut builder = Builder::new(GzipEncoder::new(file));
            let data = b"source";
            let mut header = Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{}-1.0/README", self.name), &data[..])
                .await?;
            builder.into_inner().await?.shutdown().await?;

            Ok(Fetched {
                resolved: Resolved {
                    remote: format!("http://localhost/{}", self.name),
                    path,
                },
                version: "1.0".to_string(),
                status: FetchStatus::Downloaded,
            })
        }
    }

    fn context(sandbox: &Path) -> SourceContext {
        SourceContext {
            sandbox: sandbox.to_path_buf(),
            ftp_timeout: Duration::from_secs(1),
            http_timeout: Duration::from_secs(1),
            order: VersionOrder::Lexical,
        }
    }

    #[tokio::test]
    async fn pool_is_bounded_and_keeps_order() {
        let sandbox = tempfile::tempdir().unwrap();
        let pkg_dir = sandbox.path().join("pkgs");
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let names = [
            (Component::Binutils, "binutils"),
            (Component::Gcc, "gcc"),
            (Component::Gmp, "gmp"),
            (Component::Mpfr, "mpfr"),
            (Component::Mpc, "mpc"),
        ];

        let sources: Vec<(Component, Box<dyn Source>)> = names
            .iter()
            .map(|(component, name)| {
                let source: Box<dyn Source> = Box::new(LocalSource {
                    name: *name,
                    fail: *component == Component::Gmp,
                    active: active.clone(),
                    peak: peak.clone(),
                });
                (*component, source)
            })
            .collect();

        let results = acquire_sources(sources, &context(sandbox.path()), &pkg_dir, 2).await;

        let order: Vec<Component> = results.iter().map(|(c, _)| *c).collect();
        assert_eq!(order, names.iter().map(|(c, _)| *c).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 2);

        for (component, result) in &results {
            if *component == Component::Gmp {
                assert!(matches!(result, Err(AcquireError::Fetch(_))));
            } else {
                assert_eq!(result.as_ref().unwrap().extract, ExtractStatus::Extracted);
            }
        }

        let dirs = find_source_dirs(&pkg_dir).unwrap();
        assert_eq!(dirs.len(), 4);
        assert_eq!(dirs[&Component::Gcc], pkg_dir.join("gcc-1.0"));
        assert!(!dirs.contains_key(&Component::Gmp));
    }

    #[test]
    fn last_matching_directory_wins() {
        let pkg_dir = tempfile::tempdir().unwrap();

        for name in [
            "gcc-8.3.0",
            "gcc-9.2.0",
            "libgcc-1.0",
            "mingw-w64-v6.0.0",
            "mpc-1.1.0",
            "mpfr-4.0.2",
        ] {
            std::fs::create_dir(pkg_dir.path().join(name)).unwrap();
        }

        std::fs::write(pkg_dir.path().join("isl-0.21"), b"not a dir").unwrap();

        let dirs = find_source_dirs(pkg_dir.path()).unwrap();

        assert_eq!(dirs[&Component::Gcc], pkg_dir.path().join("gcc-9.2.0"));
        assert_eq!(
            dirs[&Component::Mingw64],
            pkg_dir.path().join("mingw-w64-v6.0.0")
        );
        assert_eq!(dirs[&Component::Mpc], pkg_dir.path().join("mpc-1.1.0"));
        assert_eq!(dirs[&Component::Mpfr], pkg_dir.path().join("mpfr-4.0.2"));
        assert!(!dirs.contains_key(&Component::Isl));
    }
}
