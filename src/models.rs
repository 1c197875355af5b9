use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// --- Crawl record ---

/// Lifecycle of a crawl record. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Queued => "queued",
            CrawlStatus::Processing => "processing",
            CrawlStatus::Completed => "completed",
            CrawlStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => CrawlStatus::Queued,
            "completed" => CrawlStatus::Completed,
            "failed" => CrawlStatus::Failed,
            _ => CrawlStatus::Processing,
        }
    }
}

/// One crawl execution, as surfaced through the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRecord {
    pub crawl_id: i64,
    pub base_domain: String,
    pub status: CrawlStatus,
    pub max_depth: u32,
    pub pages_crawled: u32,
    pub external_links_total: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

// --- Frontier ---

/// How a URL entered the frontier; affects nothing after admission but is
/// kept for checkpoint inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlKind {
    Start,
    Page,
    Sitemap,
    Robots,
    Pagination,
    Internal,
}

/// A URL awaiting fetch. Priority is fixed at admission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub url: String,
    pub depth: u32,
    pub source_url: String,
    pub kind: UrlKind,
    pub priority: i32,
}

// --- Checkpoint state ---

/// Serialized snapshot of a crawl, keyed by base domain in the store.
/// Frontier entries are kept in pop order so a restore replays FIFO ties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlState {
    pub discovered: Vec<String>,
    pub crawled: Vec<String>,
    pub frontier: Vec<FrontierEntry>,
    /// robots.txt origin -> sitemap URLs it declared.
    #[serde(default)]
    pub robots_cache: HashMap<String, Vec<String>>,
    /// Sitemap URLs already walked, so a resume does not refetch them.
    #[serde(default)]
    pub sitemap_cache: HashSet<String>,
    pub saved_at_ms: i64,
}

// --- External link row ---

/// A single outbound link to a foreign registrable domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalLink {
    pub crawl_id: i64,
    pub source_url: String,
    pub target_url: String,
    pub target_domain: String,
    pub anchor_text: String,
    pub rel: String,
    pub is_nofollow: bool,
    pub observed_at: i64,
}

/// Aggregated view of one target domain within a crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSummary {
    pub target_domain: String,
    pub link_count: i64,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
}

// --- Crawl options ---

/// Start-time options for a crawl, with the documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlOptions {
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_true")]
    pub include_subdomains: bool,
    #[serde(default = "default_true")]
    pub follow_sitemaps: bool,
    #[serde(default = "default_true")]
    pub respect_robots: bool,
    #[serde(default = "default_true")]
    pub include_language_variants: bool,
    #[serde(default = "default_true")]
    pub follow_pagination: bool,
    #[serde(default = "default_crawl_delay_ms")]
    pub crawl_delay_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub resume: bool,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,
}

/// Hard ceiling on `max_pages`, regardless of what the caller asks for.
pub const MAX_PAGES_CAP: u32 = 10_000;

fn default_max_pages() -> u32 {
    5000
}

fn default_max_depth() -> u32 {
    10
}

fn default_concurrency() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_crawl_delay_ms() -> u64 {
    300
}

fn default_user_agent() -> String {
    "linkharvest/1.0 (+https://linkharvest.dev/bot)".to_string()
}

fn default_checkpoint_interval() -> u32 {
    20
}

impl Default for CrawlOptions {
    fn default() -> Self {
        CrawlOptions {
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            concurrency: default_concurrency(),
            include_subdomains: true,
            follow_sitemaps: true,
            respect_robots: true,
            include_language_variants: true,
            follow_pagination: true,
            crawl_delay_ms: default_crawl_delay_ms(),
            user_agent: default_user_agent(),
            resume: false,
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

// --- Control API payloads ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub url: String,
    #[serde(default)]
    pub options: CrawlOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub crawl_id: i64,
    pub base_domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub crawl: CrawlRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outgoing_domains: Option<Vec<DomainSummary>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelFilter {
    #[default]
    All,
    Nofollow,
    Dofollow,
}

/// Query parameters for the paginated links endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub rel: RelFilter,
    #[serde(default)]
    pub domain: Option<String>,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    50
}

impl Default for LinkQuery {
    fn default() -> Self {
        LinkQuery {
            page: 1,
            limit: 50,
            text: None,
            rel: RelFilter::All,
            domain: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkPage {
    pub links: Vec<ExternalLink>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
}
