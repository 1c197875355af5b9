use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

use super::scope;
use crate::models::{CrawlOptions, UrlKind};

const MAX_ANCHOR_TEXT_CHARS: usize = 500;

/// An anchor pointing off-site, ready to become an external-link row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCandidate {
    pub target_url: String,
    pub target_domain: String,
    pub anchor_text: String,
    pub rel: String,
    pub is_nofollow: bool,
}

/// An in-scope URL ready for frontier admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalCandidate {
    pub url: String,
    pub priority: i32,
    pub kind: UrlKind,
}

#[derive(Debug, Clone, Default)]
pub struct PageLinks {
    pub external: Vec<ExternalCandidate>,
    pub internal: Vec<InternalCandidate>,
}

/// Extract every link of interest from a fetched HTML page.
///
/// External candidates are deduplicated by target URL within the page and
/// emitted in source order; internal candidates carry the priority the
/// classifier assigns. JSON-LD blocks are walked for in-scope URL strings.
pub fn extract_links(
    html: &str,
    page_url: &str,
    base_domain: &str,
    options: &CrawlOptions,
) -> PageLinks {
    let base = match Url::parse(page_url) {
        Ok(u) => u,
        Err(_) => return PageLinks::default(),
    };

    let document = Html::parse_document(html);
    let mut links = PageLinks::default();
    let mut seen_external: HashSet<String> = HashSet::new();
    let mut seen_internal: HashSet<String> = HashSet::new();

    let anchor_sel = Selector::parse("a[href]").expect("valid selector");
    for el in document.select(&anchor_sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let Some(resolved) = scope::canonicalize(href, &base) else {
            continue;
        };
        let Some(host) = scope::base_domain_of(&resolved) else {
            continue;
        };

        let url_str = resolved.to_string();
        if scope::in_scope(&host, base_domain, options.include_subdomains) {
            if seen_internal.insert(url_str.clone()) {
                let (priority, kind) = scope::classify(&url_str, options);
                links.internal.push(InternalCandidate {
                    url: url_str,
                    priority,
                    kind,
                });
            }
        } else if seen_external.insert(url_str.clone()) {
            let rel = el.value().attr("rel").unwrap_or_default().to_string();
            let anchor_text = normalize_anchor_text(&el.text().collect::<String>());
            links.external.push(ExternalCandidate {
                target_url: url_str,
                target_domain: host,
                anchor_text,
                is_nofollow: rel_is_nofollow(&rel),
                rel,
            });
        }
    }

    let jsonld_sel =
        Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid selector");
    for el in document.select(&jsonld_sel) {
        let raw = el.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
            continue;
        };
        let mut found = Vec::new();
        collect_url_strings(&value, &mut found);
        for candidate in found {
            let Ok(mut parsed) = Url::parse(&candidate) else {
                continue;
            };
            parsed.set_fragment(None);
            let Some(host) = scope::base_domain_of(&parsed) else {
                continue;
            };
            if !scope::in_scope(&host, base_domain, options.include_subdomains) {
                continue;
            }
            let url_str = parsed.to_string();
            if seen_internal.insert(url_str.clone()) {
                links.internal.push(InternalCandidate {
                    url: url_str,
                    priority: scope::PRIORITY_INTERNAL,
                    kind: UrlKind::Page,
                });
            }
        }
    }

    links
}

/// Strip tags (the selector traversal already yields text nodes only),
/// collapse whitespace runs, trim, and truncate to 500 characters.
pub fn normalize_anchor_text(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_ANCHOR_TEXT_CHARS).collect()
}

/// True iff the whitespace-tokenized rel attribute contains `nofollow`.
pub fn rel_is_nofollow(rel: &str) -> bool {
    rel.to_lowercase()
        .split_whitespace()
        .any(|token| token == "nofollow")
}

/// Walk a JSON value collecting string leaves that look like URLs.
fn collect_url_strings(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => {
            if s.starts_with("http://") || s.starts_with("https://") {
                out.push(s.clone());
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_url_strings(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_url_strings(item, out);
            }
        }
        _ => {}
    }
}
