use url::Url;

use super::fetcher::PageFetcher;

/// Fetch `/robots.txt` for the crawl origin and return the sitemap URLs it
/// declares. Best-effort: any failure yields an empty list.
///
/// Disallow rules are intentionally not consumed; robots.txt is used only
/// for sitemap discovery.
pub async fn discover_sitemaps(fetcher: &PageFetcher, start_url: &Url) -> Vec<String> {
    let Ok(robots_url) = start_url.join("/robots.txt") else {
        return Vec::new();
    };

    match fetcher.fetch_text_with_retry(robots_url.as_str()).await {
        Some(body) => parse_sitemap_directives(&body),
        None => {
            tracing::debug!(url = %robots_url, "No robots.txt available");
            Vec::new()
        }
    }
}

/// Extract `Sitemap:` directive values from robots.txt content.
pub fn parse_sitemap_directives(content: &str) -> Vec<String> {
    let mut sitemaps = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        let line = if let Some(idx) = line.find('#') {
            line[..idx].trim()
        } else {
            line
        };
        if line.is_empty() {
            continue;
        }

        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("sitemap") {
                let value = value.trim();
                if !value.is_empty() {
                    sitemaps.push(value.to_string());
                }
            }
        }
    }

    sitemaps
}
