use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::models::{CrawlOptions, UrlKind};

pub const PRIORITY_START: i32 = 10;
pub const PRIORITY_SITEMAP: i32 = 8;
pub const PRIORITY_HIGH_VALUE: i32 = 7;
pub const PRIORITY_VARIANT: i32 = 6;
pub const PRIORITY_FEED: i32 = 6;
pub const PRIORITY_INTERNAL: i32 = 5;

/// Path substrings that mark a URL as likely to enumerate further content.
const HIGH_VALUE_PATTERNS: &[&str] = &[
    "/blog/",
    "/article/",
    "/post/",
    "/news/",
    "/wiki/",
    "/page/",
    "/category/",
    "/tag/",
    "/archive/",
    "/search/",
    "/index",
    "/sitemap",
    "/directory/",
    "/list/",
    "/browse/",
];

static LANGUAGE_VARIANT_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"/[a-z]{2}/", r"/[a-z]{2}-[a-z]{2}/", r"\.[a-z]{2}\."]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
});

const LANGUAGE_VARIANT_PATTERNS: &[&str] = &["lang=", "language=", "locale="];

static PAGINATION_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"page=\d+",
        r"p=\d+",
        r"offset=\d+",
        r"start=\d+",
        r"/page/\d+",
        r"/p\d+",
        r"/\d+/$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

const PAGINATION_PATTERNS: &[&str] = &["next", "more", "continue"];

const FEED_PATTERNS: &[&str] = &["rss", "atom", "feed"];

/// Resolve an href against its page URL and canonicalize the result.
///
/// Returns None for anything that is not a fetchable HTTP(S) reference:
/// bare fragments, `javascript:`/`mailto:`/`tel:` pseudo-links, and other
/// schemes. The fragment is stripped; path and query are preserved as-is so
/// the canonical string doubles as the dedup key.
pub fn canonicalize(href: &str, base: &Url) -> Option<Url> {
    let trimmed = href.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let lower = trimmed.to_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") || lower.starts_with("tel:")
    {
        return None;
    }

    let mut resolved = base.join(trimmed).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    resolved.host_str()?;
    resolved.set_fragment(None);
    Some(resolved)
}

/// Lowercased hostname of a URL; the scope anchor for a crawl.
pub fn base_domain_of(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Same-site test. With subdomains enabled, `docs.example.com` is in scope
/// for base `example.com`; without, only an exact host match passes.
pub fn in_scope(host: &str, base_domain: &str, include_subdomains: bool) -> bool {
    let host = host.to_lowercase();
    if host == base_domain {
        return true;
    }
    include_subdomains && host.ends_with(&format!(".{base_domain}"))
}

pub fn is_high_value(url: &str) -> bool {
    HIGH_VALUE_PATTERNS.iter().any(|p| url.contains(p))
}

pub fn is_language_variant(url: &str) -> bool {
    LANGUAGE_VARIANT_RES.iter().any(|re| re.is_match(url))
        || LANGUAGE_VARIANT_PATTERNS.iter().any(|p| url.contains(p))
}

pub fn is_pagination(url: &str) -> bool {
    PAGINATION_RES.iter().any(|re| re.is_match(url))
        || PAGINATION_PATTERNS.iter().any(|p| url.contains(p))
}

pub fn is_feed(url: &str) -> bool {
    FEED_PATTERNS.iter().any(|p| url.contains(p))
}

/// Assign priority and frontier kind to an in-scope URL.
///
/// Feed references outrank generic pages; high-value paths outrank both
/// pagination and language variants. The pagination kind survives even when
/// a stronger pattern sets the priority.
pub fn classify(url: &str, options: &CrawlOptions) -> (i32, UrlKind) {
    let lower = url.to_lowercase();

    if is_feed(&lower) {
        return (PRIORITY_FEED, UrlKind::Page);
    }

    let paginated = options.follow_pagination && is_pagination(&lower);
    let kind = if paginated {
        UrlKind::Pagination
    } else {
        UrlKind::Internal
    };

    let priority = if is_high_value(&lower) {
        PRIORITY_HIGH_VALUE
    } else if paginated || (options.include_language_variants && is_language_variant(&lower)) {
        PRIORITY_VARIANT
    } else {
        PRIORITY_INTERNAL
    };

    (priority, kind)
}
