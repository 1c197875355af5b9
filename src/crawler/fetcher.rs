use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

const ACCEPT_HEADER: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const FETCH_TIMEOUT_SECS: u64 = 30;
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_INITIAL_DELAY_MS: u64 = 500;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
}

/// Result of a page fetch. `body` is empty for non-HTML responses; the URL
/// still counts as crawled so it is not re-attempted.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub content_type: String,
    pub body: String,
}

/// HTTP fetcher shared by every worker of a crawl.
///
/// Redirects are followed transparently (`final_url` is the landing URL);
/// each request carries the crawl's user agent and a hard 30 s timeout.
#[derive(Clone)]
pub struct PageFetcher {
    client: Client,
}

impl PageFetcher {
    pub fn new(user_agent: &str) -> Self {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true)
            .pool_max_idle_per_host(20)
            .build()
            .expect("Failed to build HTTP client");

        PageFetcher { client }
    }

    /// Fetch one page. 4xx/5xx terminal statuses are errors; anything a
    /// redirect chain lands on otherwise counts as success.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, ACCEPT_HEADER)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body = if content_type.contains("text/html") {
            response.text().await?
        } else {
            String::new()
        };

        Ok(FetchedPage {
            final_url,
            content_type,
            body,
        })
    }

    /// Fetch a text document (sitemap, robots.txt) with exponential backoff:
    /// up to 3 attempts starting at 500 ms. A 4xx is a permanent miss and is
    /// not retried. Returns None once exhausted -- these fetches are
    /// best-effort and never fatal.
    pub async fn fetch_text_with_retry(&self, url: &str) -> Option<String> {
        let mut delay = Duration::from_millis(RETRY_INITIAL_DELAY_MS);

        for attempt in 1..=RETRY_ATTEMPTS {
            match self.try_fetch_text(url).await {
                Ok(text) => return Some(text),
                Err(FetchError::Status(code)) if (400..500).contains(&code) => {
                    tracing::debug!(url = %url, code, "Text fetch got client error");
                    return None;
                }
                Err(e) => {
                    tracing::debug!(url = %url, attempt, error = %e, "Text fetch attempt failed");
                    if attempt < RETRY_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        None
    }

    async fn try_fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}
