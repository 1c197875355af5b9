pub mod fetcher;
pub mod frontier;
pub mod parser;
pub mod robots;
pub mod scope;
pub mod sitemap;

pub use fetcher::{FetchError, PageFetcher};
pub use frontier::Frontier;

use thiserror::Error;
use url::Url;

use crate::models::CrawlOptions;
use crate::storage::StorageError;
use parser::PageLinks;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Unsupported scheme '{0}': only http and https can be crawled")]
    UnsupportedScheme(String),
    #[error("URL has no host: {0}")]
    MissingHost(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Crawl aborted: {0}")]
    Fatal(String),
}

/// Validate a start URL and derive the crawl's base domain.
pub fn validate_start_url(raw: &str) -> Result<(Url, String), CrawlError> {
    let url = Url::parse(raw.trim()).map_err(|_| CrawlError::InvalidUrl(raw.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(CrawlError::UnsupportedScheme(other.to_string())),
    }

    let base_domain = scope::base_domain_of(&url)
        .ok_or_else(|| CrawlError::MissingHost(raw.to_string()))?;

    Ok((url, base_domain))
}

/// What one worker iteration learned about a page.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub final_url: String,
    pub was_html: bool,
    pub links: PageLinks,
}

/// Fetch-and-extract engine shared by every worker of one crawl.
pub struct CrawlEngine {
    fetcher: PageFetcher,
    base_domain: String,
    options: CrawlOptions,
}

impl CrawlEngine {
    pub fn new(fetcher: PageFetcher, base_domain: String, options: CrawlOptions) -> Self {
        CrawlEngine {
            fetcher,
            base_domain,
            options,
        }
    }

    pub fn fetcher(&self) -> &PageFetcher {
        &self.fetcher
    }

    /// Fetch one page and extract its links. Non-HTML responses produce an
    /// empty link set but still report the final URL so it is marked
    /// crawled and never re-attempted.
    pub async fn crawl_page(&self, url: &str) -> Result<PageOutcome, FetchError> {
        let fetched = self.fetcher.fetch(url).await?;

        let links = if fetched.body.is_empty() {
            PageLinks::default()
        } else {
            parser::extract_links(
                &fetched.body,
                &fetched.final_url,
                &self.base_domain,
                &self.options,
            )
        };

        Ok(PageOutcome {
            final_url: fetched.final_url,
            was_html: !fetched.body.is_empty(),
            links,
        })
    }
}
