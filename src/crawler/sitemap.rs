use async_recursion::async_recursion;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

use super::fetcher::PageFetcher;

/// Well-known sitemap locations probed before (and in addition to) any
/// robots-declared sitemaps.
const CANDIDATE_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemaps.xml",
    "/sitemap/sitemap.xml",
];

static LOC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<loc>\s*([^<]*?)\s*</loc>").expect("valid regex"));

pub fn candidate_sitemap_urls(start_url: &Url) -> Vec<String> {
    CANDIDATE_PATHS
        .iter()
        .filter_map(|path| start_url.join(path).ok())
        .map(|u| u.to_string())
        .collect()
}

/// Walk the given sitemap roots and collect page URLs, recursing into
/// nested sitemap indexes. `<loc>` values ending in `.xml` are treated as
/// child sitemaps; everything else is a page leaf.
///
/// `cache` memoizes every sitemap URL already walked (it is carried in the
/// crawl checkpoint so a resume does not refetch), and `limit` bounds the
/// number of collected leaves to what the frontier can still admit.
pub async fn collect_sitemap_urls(
    fetcher: &PageFetcher,
    roots: &[String],
    cache: &mut HashSet<String>,
    limit: usize,
) -> Vec<String> {
    let mut leaves = Vec::new();
    for root in roots {
        walk(fetcher, root, cache, &mut leaves, limit).await;
    }
    leaves
}

#[async_recursion]
async fn walk(
    fetcher: &PageFetcher,
    sitemap_url: &str,
    cache: &mut HashSet<String>,
    leaves: &mut Vec<String>,
    limit: usize,
) {
    if leaves.len() >= limit {
        return;
    }
    if !cache.insert(sitemap_url.to_string()) {
        return;
    }

    let Some(xml) = fetcher.fetch_text_with_retry(sitemap_url).await else {
        return;
    };

    // Tolerant fragment scan; malformed XML around the <loc> pairs is fine.
    let locs: Vec<String> = LOC_RE
        .captures_iter(&xml)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|loc| !loc.is_empty())
        .collect();

    tracing::debug!(url = %sitemap_url, locs = locs.len(), "Parsed sitemap");

    for loc in locs {
        if leaves.len() >= limit {
            return;
        }
        if loc.to_lowercase().ends_with(".xml") {
            walk(fetcher, &loc, cache, leaves, limit).await;
        } else {
            leaves.push(loc);
        }
    }
}
