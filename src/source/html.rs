use crate::error::FetchError;
use crate::source::version::{select, ListingEntry, VersionPattern};
use crate::source::{FetchStatus, Fetched, Resolved, Source, SourceContext, SourceKind};
use crate::store::paths::{get_partial_path, prepare_save_path, SaveTarget};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, info};
use url::Url;

static LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Returns every `<a href>` target in document order.
pub fn find_links(document: &str) -> Vec<String> {
    Html::parse_document(document)
        .select(&LINK)
        .filter_map(|element| element.value().attr("href"))
        .map(str::to_string)
        .collect()
}

/// The last path segment of a link, ignoring query and fragment.
fn remote_file_name(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

pub struct HttpSource {
    pub page: String,
    pub pattern: VersionPattern,
    pub preferred_version: String,
    pub save: SaveTarget,
}

fn host_of(url: &Url) -> String {
    url.host_str().unwrap_or_default().to_string()
}

async fn get(
    client: &reqwest::Client,
    url: &Url,
) -> Result<reqwest::Response, FetchError> {
    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|err| FetchError::from_http(&host_of(url), err))?;

    if !response.status().is_success() {
        return Err(FetchError::Transfer(format!(
            "{} returned {}",
            url,
            response.status()
        )));
    }

    Ok(response)
}

#[async_trait]
impl Source for HttpSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Http
    }

    async fn fetch(&self, ctx: &SourceContext) -> Result<Fetched, FetchError> {
        let page = Url::parse(&self.page)?;

        let client = reqwest::Client::builder()
            .timeout(ctx.http_timeout)
            .build()
            .map_err(|err| FetchError::Transfer(err.to_string()))?;

        let document = get(&client, &page)
            .await?
            .text()
            .await
            .map_err(|err| FetchError::from_http(&host_of(&page), err))?;

        let links: Vec<ListingEntry> = find_links(&document)
            .iter()
            .map(|href| ListingEntry::name_only(href))
            .collect();

        debug!("{}: {} links", page, links.len());

        let found = select(
            &links,
            &self.pattern,
            &self.preferred_version,
            ctx.order,
            page.as_str(),
        )?;

        let url = page.join(&found.name)?;

        let name = remote_file_name(&url)
            .ok_or_else(|| FetchError::Transfer(format!("no file name in {}", url)))?;

        let path = prepare_save_path(&self.save, &ctx.sandbox, &name).await?;

        let resolved = Resolved {
            remote: url.to_string(),
            path,
        };

        if resolved.path.exists() {
            info!("already downloaded: {}", resolved.path.display());

            return Ok(Fetched {
                resolved,
                version: found.version,
                status: FetchStatus::AlreadyPresent,
            });
        }

        info!("downloading {}", url);

        let partial = get_partial_path(&resolved.path);

        if let Err(err) = download(&client, &url, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }

        tokio::fs::rename(&partial, &resolved.path).await?;

        Ok(Fetched {
            resolved,
            version: found.version,
            status: FetchStatus::Downloaded,
        })
    }
}

async fn download(
    client: &reqwest::Client,
    url: &Url,
    path: &std::path::Path,
) -> Result<(), FetchError> {
    let mut response = get(client, url).await?;
    let mut file = File::create(path).await?;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|err| FetchError::from_http(&host_of(url), err))?
    {
        file.write_all(&chunk).await?;
    }

    file.flush().await?;

    Ok(())
}
