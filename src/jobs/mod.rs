use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::crawler::frontier::Frontier;
use crate::crawler::{robots, scope, sitemap, CrawlEngine, CrawlError, PageFetcher};
use crate::models::*;
use crate::storage::{Database, StorageError};

/// Worker-local link batch size before a flush.
const LINK_BATCH_SIZE: usize = 20;
/// Crawl-record counters are refreshed every this many pages.
const COUNTER_UPDATE_INTERVAL: u32 = 10;
/// How long a worker waits on an empty frontier before exiting.
const EMPTY_FRONTIER_WAIT: Duration = Duration::from_millis(1000);

/// Manages crawl lifecycle: submission, status queries, cancellation.
///
/// `start` inserts the crawl record synchronously and spawns the crawl as a
/// background task; everything an external observer needs afterwards comes
/// from the database.
pub struct CrawlManager {
    db: Arc<Database>,
    active: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl CrawlManager {
    pub fn new(db: Arc<Database>) -> Self {
        CrawlManager {
            db,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validate the start URL, create the crawl record and schedule the
    /// crawl. Returns immediately; validation failures create no record.
    pub async fn start(
        &self,
        raw_url: &str,
        mut options: CrawlOptions,
    ) -> Result<StartResponse, CrawlError> {
        let (start_url, base_domain) = crate::crawler::validate_start_url(raw_url)?;

        options.max_pages = options.max_pages.clamp(1, MAX_PAGES_CAP);
        options.concurrency = options.concurrency.max(1);

        let crawl_id = self.db.create_crawl(&base_domain, options.max_depth).await?;

        let cancel = CancellationToken::new();
        self.active
            .write()
            .await
            .insert(base_domain.clone(), cancel.clone());

        tracing::info!(
            crawl_id,
            base_domain = %base_domain,
            max_pages = options.max_pages,
            max_depth = options.max_depth,
            "Crawl scheduled"
        );

        let db = self.db.clone();
        let active = self.active.clone();
        let spawned_domain = base_domain.clone();
        tokio::spawn(async move {
            run_crawl(db, active, crawl_id, start_url, spawned_domain, options, cancel).await;
        });

        Ok(StartResponse {
            crawl_id,
            base_domain,
        })
    }

    /// Request cancellation of the active crawl for a base domain. Workers
    /// exit at their next pop boundary; a final checkpoint and terminal
    /// status are still written.
    pub async fn cancel(&self, base_domain: &str) -> bool {
        let active = self.active.read().await;
        match active.get(base_domain) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Latest crawl record for a domain, with the outgoing-domain summary
    /// once the crawl has completed.
    pub async fn status(&self, base_domain: &str) -> Result<Option<StatusResponse>, StorageError> {
        let Some(record) = self.db.latest_crawl(base_domain).await? else {
            return Ok(None);
        };

        let outgoing_domains = if record.status == CrawlStatus::Completed {
            Some(self.db.domain_summary(record.crawl_id).await?)
        } else {
            None
        };

        Ok(Some(StatusResponse {
            crawl: record,
            outgoing_domains,
        }))
    }

    /// Paginated external-link rows from the latest crawl of a domain.
    pub async fn links(
        &self,
        base_domain: &str,
        query: &LinkQuery,
    ) -> Result<Option<LinkPage>, StorageError> {
        let Some(record) = self.db.latest_crawl(base_domain).await? else {
            return Ok(None);
        };

        let (links, total) = self.db.query_links(record.crawl_id, query).await?;
        Ok(Some(LinkPage {
            links,
            page: query.page.max(1),
            limit: query.limit.clamp(1, 500),
            total,
        }))
    }
}

/// Drive one crawl to a terminal status. Runs as a detached task; every
/// failure mode ends in a `failed` record rather than a propagated error.
async fn run_crawl(
    db: Arc<Database>,
    active: Arc<RwLock<HashMap<String, CancellationToken>>>,
    crawl_id: i64,
    start_url: Url,
    base_domain: String,
    options: CrawlOptions,
    cancel: CancellationToken,
) {
    let job = Arc::new(CrawlJob {
        engine: CrawlEngine::new(
            PageFetcher::new(&options.user_agent),
            base_domain.clone(),
            options.clone(),
        ),
        db: db.clone(),
        shared: CrawlShared::new(options.max_pages as usize),
        crawl_id,
        base_domain: base_domain.clone(),
        options,
        cancel: cancel.clone(),
    });

    let outcome = Arc::clone(&job).run(start_url).await;

    let pages = job.shared.pages_crawled.load(Ordering::Relaxed);
    let links = job.shared.external_links_total.load(Ordering::Relaxed);
    let errors = job.shared.error_count.load(Ordering::Relaxed);

    let status = match &outcome {
        Ok(()) if !cancel.is_cancelled() => CrawlStatus::Completed,
        Ok(()) => {
            tracing::info!(crawl_id, "Crawl cancelled");
            CrawlStatus::Failed
        }
        Err(e) => {
            tracing::error!(crawl_id, error = %e, "Crawl failed");
            CrawlStatus::Failed
        }
    };

    if let Err(e) = db.finish_crawl(crawl_id, status, pages, links).await {
        tracing::error!(crawl_id, error = %e, "Failed to write terminal status");
    }

    active.write().await.remove(&base_domain);

    tracing::info!(
        crawl_id,
        pages_crawled = pages,
        external_links = links,
        errors,
        status = status.as_str(),
        "Crawl finished"
    );
}

/// Mutable state shared by every worker of one crawl.
///
/// The frontier (queue + discovered + crawled) sits behind a non-async
/// mutex so pop/admit never suspend; counters are atomics; the checkpoint
/// gate serializes saves against the same base domain.
struct CrawlShared {
    frontier: Mutex<Frontier>,
    pages_crawled: AtomicU32,
    error_count: AtomicU32,
    external_links_total: AtomicU32,
    checkpoint_gate: tokio::sync::Mutex<()>,
    robots_cache: Mutex<HashMap<String, Vec<String>>>,
    sitemap_cache: Mutex<HashSet<String>>,
}

impl CrawlShared {
    fn new(max_pages: usize) -> Self {
        CrawlShared {
            frontier: Mutex::new(Frontier::new(max_pages)),
            pages_crawled: AtomicU32::new(0),
            error_count: AtomicU32::new(0),
            external_links_total: AtomicU32::new(0),
            checkpoint_gate: tokio::sync::Mutex::new(()),
            robots_cache: Mutex::new(HashMap::new()),
            sitemap_cache: Mutex::new(HashSet::new()),
        }
    }
}

/// One crawl in flight: engine, shared state and storage handles.
struct CrawlJob {
    engine: CrawlEngine,
    db: Arc<Database>,
    shared: CrawlShared,
    crawl_id: i64,
    base_domain: String,
    options: CrawlOptions,
    cancel: CancellationToken,
}

impl CrawlJob {
    fn frontier(&self) -> MutexGuard<'_, Frontier> {
        self.shared.frontier.lock().expect("frontier mutex poisoned")
    }

    /// Seed-or-resume, drive the worker pool to drain, then write the final
    /// checkpoint. Terminal counters and status are the caller's job.
    async fn run(self: Arc<Self>, start_url: Url) -> Result<(), CrawlError> {
        let resumed = if self.options.resume {
            self.try_resume().await
        } else {
            false
        };

        if !resumed {
            self.seed(&start_url).await;
        }

        let mut workers: JoinSet<()> = JoinSet::new();
        for worker_id in 0..self.options.concurrency {
            let job = Arc::clone(&self);
            workers.spawn(async move { job.worker_loop(worker_id).await });
        }

        let mut worker_failure = None;
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(crawl_id = self.crawl_id, error = %e, "Worker task panicked");
                worker_failure = Some(e.to_string());
            }
        }

        self.save_checkpoint().await;

        match worker_failure {
            Some(e) => Err(CrawlError::Fatal(e)),
            None => Ok(()),
        }
    }

    /// Load the checkpoint for this domain. Returns true when its frontier
    /// still has work, in which case seeding is skipped entirely.
    async fn try_resume(&self) -> bool {
        let state = match self.db.load_state(&self.base_domain).await {
            Ok(Some(state)) => state,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(error = %e, "Checkpoint load failed; starting fresh");
                return false;
            }
        };

        let frontier = Frontier::restore(&state, self.options.max_pages as usize);
        let pending = frontier.pending_count();

        self.shared
            .pages_crawled
            .store(state.crawled.len() as u32, Ordering::Relaxed);
        *self.frontier() = frontier;
        *self
            .shared
            .robots_cache
            .lock()
            .expect("robots cache mutex poisoned") = state.robots_cache;
        *self
            .shared
            .sitemap_cache
            .lock()
            .expect("sitemap cache mutex poisoned") = state.sitemap_cache;

        tracing::info!(
            crawl_id = self.crawl_id,
            pending,
            crawled = state.crawled.len(),
            "Resumed from checkpoint"
        );

        pending > 0
    }

    /// Admit the start URL and run sitemap/robots discovery. Admissions are
    /// idempotent, so re-seeding on top of a restored (drained) checkpoint
    /// is a no-op.
    async fn seed(&self, start_url: &Url) {
        let mut canonical = start_url.clone();
        canonical.set_fragment(None);

        self.frontier().admit(FrontierEntry {
            url: canonical.to_string(),
            depth: 0,
            source_url: "start".to_string(),
            kind: UrlKind::Start,
            priority: scope::PRIORITY_START,
        });

        if !self.options.follow_sitemaps {
            return;
        }

        let mut roots: Vec<(String, UrlKind)> = sitemap::candidate_sitemap_urls(&canonical)
            .into_iter()
            .map(|u| (u, UrlKind::Sitemap))
            .collect();

        if self.options.respect_robots {
            for declared in self.robots_sitemaps(&canonical).await {
                roots.push((declared, UrlKind::Robots));
            }
        }

        for (root, kind) in roots {
            let remaining = {
                let frontier = self.frontier();
                (self.options.max_pages as usize).saturating_sub(frontier.discovered_count())
            };
            if remaining == 0 {
                break;
            }

            // The walk cannot hold the cache lock across awaits; merge the
            // updated copy back when it returns. Seeding is single-task.
            let mut cache = self
                .shared
                .sitemap_cache
                .lock()
                .expect("sitemap cache mutex poisoned")
                .clone();
            let leaves =
                sitemap::collect_sitemap_urls(self.engine.fetcher(), &[root], &mut cache, remaining)
                    .await;
            *self
                .shared
                .sitemap_cache
                .lock()
                .expect("sitemap cache mutex poisoned") = cache;

            let source = match kind {
                UrlKind::Robots => "robots",
                _ => "sitemap",
            };

            let mut frontier = self.frontier();
            for leaf in leaves {
                let Ok(mut url) = Url::parse(&leaf) else {
                    continue;
                };
                if url.scheme() != "http" && url.scheme() != "https" {
                    continue;
                }
                url.set_fragment(None);
                let Some(host) = scope::base_domain_of(&url) else {
                    continue;
                };
                if !scope::in_scope(&host, &self.base_domain, self.options.include_subdomains) {
                    continue;
                }
                frontier.admit(FrontierEntry {
                    url: url.to_string(),
                    depth: 1,
                    source_url: source.to_string(),
                    kind,
                    priority: scope::PRIORITY_SITEMAP,
                });
            }
        }
    }

    /// Sitemap URLs declared in robots.txt, memoized in the robots cache so
    /// a resumed crawl does not refetch.
    async fn robots_sitemaps(&self, start_url: &Url) -> Vec<String> {
        let key = match start_url.join("/robots.txt") {
            Ok(u) => u.to_string(),
            Err(_) => return Vec::new(),
        };

        if let Some(cached) = self
            .shared
            .robots_cache
            .lock()
            .expect("robots cache mutex poisoned")
            .get(&key)
        {
            return cached.clone();
        }

        let declared = robots::discover_sitemaps(self.engine.fetcher(), start_url).await;
        self.shared
            .robots_cache
            .lock()
            .expect("robots cache mutex poisoned")
            .insert(key, declared.clone());
        declared
    }

    async fn worker_loop(&self, worker_id: usize) {
        let mut batch: Vec<ExternalLink> = Vec::new();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let Some(entry) = self.frontier().pop() else {
                // Other workers may still be producing; wait once, re-check.
                tokio::time::sleep(EMPTY_FRONTIER_WAIT).await;
                if self.frontier().pending_count() == 0 {
                    break;
                }
                continue;
            };

            if entry.depth > self.options.max_depth {
                tracing::debug!(url = %entry.url, depth = entry.depth, "Skipping: beyond max depth");
                continue;
            }
            if self.frontier().is_crawled(&entry.url) {
                continue;
            }

            let outcome = match self.engine.crawl_page(&entry.url).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.shared.error_count.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(url = %entry.url, error = %e, "Fetch failed");
                    continue;
                }
            };

            self.frontier().mark_crawled(&outcome.final_url);
            let pages = self.shared.pages_crawled.fetch_add(1, Ordering::Relaxed) + 1;

            let observed_at = Utc::now().timestamp_millis();
            for ext in &outcome.links.external {
                batch.push(ExternalLink {
                    crawl_id: self.crawl_id,
                    source_url: outcome.final_url.clone(),
                    target_url: ext.target_url.clone(),
                    target_domain: ext.target_domain.clone(),
                    anchor_text: ext.anchor_text.clone(),
                    rel: ext.rel.clone(),
                    is_nofollow: ext.is_nofollow,
                    observed_at,
                });
            }

            {
                let mut frontier = self.frontier();
                for candidate in &outcome.links.internal {
                    frontier.admit(FrontierEntry {
                        url: candidate.url.clone(),
                        depth: entry.depth + 1,
                        source_url: outcome.final_url.clone(),
                        kind: candidate.kind,
                        priority: candidate.priority,
                    });
                }
            }

            if batch.len() >= LINK_BATCH_SIZE {
                self.flush_batch(&mut batch).await;
            }
            if pages % COUNTER_UPDATE_INTERVAL == 0 {
                self.update_counters(pages).await;
            }
            if self.options.checkpoint_interval > 0 && pages % self.options.checkpoint_interval == 0
            {
                self.save_checkpoint().await;
            }

            tokio::time::sleep(Duration::from_millis(self.options.crawl_delay_ms)).await;
        }

        if !batch.is_empty() {
            self.flush_batch(&mut batch).await;
        }
        tracing::debug!(worker_id, crawl_id = self.crawl_id, "Worker drained");
    }

    /// Append the worker-local batch. Flush failures drop the batch and the
    /// crawl continues.
    async fn flush_batch(&self, batch: &mut Vec<ExternalLink>) {
        match self.db.insert_link_batch(batch).await {
            Ok(()) => {
                self.shared
                    .external_links_total
                    .fetch_add(batch.len() as u32, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(crawl_id = self.crawl_id, error = %e, "Link batch flush failed");
            }
        }
        batch.clear();
    }

    async fn update_counters(&self, pages: u32) {
        let links = self.shared.external_links_total.load(Ordering::Relaxed);
        if let Err(e) = self.db.update_crawl_counters(self.crawl_id, pages, links).await {
            tracing::warn!(crawl_id = self.crawl_id, error = %e, "Counter update failed");
        }
    }

    /// Serialize crawl state and upsert it. The gate keeps saves for this
    /// domain from running concurrently; failures are logged and skipped.
    async fn save_checkpoint(&self) {
        let _gate = self.shared.checkpoint_gate.lock().await;

        let mut state = self.frontier().snapshot();
        state.robots_cache = self
            .shared
            .robots_cache
            .lock()
            .expect("robots cache mutex poisoned")
            .clone();
        state.sitemap_cache = self
            .shared
            .sitemap_cache
            .lock()
            .expect("sitemap cache mutex poisoned")
            .clone();
        state.saved_at_ms = Utc::now().timestamp_millis();

        if let Err(e) = self.db.save_state(&self.base_domain, &state).await {
            tracing::warn!(crawl_id = self.crawl_id, error = %e, "Checkpoint save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (Arc<Database>, Arc<CrawlManager>) {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let manager = Arc::new(CrawlManager::new(db.clone()));
        (db, manager)
    }

    fn fast_options() -> CrawlOptions {
        CrawlOptions {
            follow_sitemaps: false,
            respect_robots: false,
            crawl_delay_ms: 1,
            concurrency: 2,
            ..CrawlOptions::default()
        }
    }

    async fn wait_terminal(manager: &CrawlManager, base_domain: &str) -> CrawlRecord {
        for _ in 0..300 {
            if let Some(status) = manager.status(base_domain).await.unwrap() {
                match status.crawl.status {
                    CrawlStatus::Completed | CrawlStatus::Failed => return status.crawl,
                    _ => {}
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("crawl for {base_domain} never reached a terminal status");
    }

    #[tokio::test]
    async fn test_basic_crawl_records_external_link() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(r#"<a href="/about">About</a><a href="https://other.test/x" rel="nofollow">X</a>"#)
            .create_async()
            .await;
        server
            .mock("GET", "/about")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<p>about us</p>")
            .create_async()
            .await;

        let (_db, manager) = setup().await;
        let resp = manager.start(&server.url(), fast_options()).await.unwrap();
        assert_eq!(resp.base_domain, "127.0.0.1");

        let record = wait_terminal(&manager, "127.0.0.1").await;
        assert_eq!(record.status, CrawlStatus::Completed);
        assert_eq!(record.pages_crawled, 2);
        assert_eq!(record.external_links_total, 1);

        let page = manager
            .links("127.0.0.1", &LinkQuery::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.total, 1);
        let row = &page.links[0];
        assert_eq!(row.source_url, format!("{}/", server.url()));
        assert_eq!(row.target_url, "https://other.test/x");
        assert_eq!(row.target_domain, "other.test");
        assert_eq!(row.anchor_text, "X");
        assert_eq!(row.rel, "nofollow");
        assert!(row.is_nofollow);

        let status = manager.status("127.0.0.1").await.unwrap().unwrap();
        let domains = status.outgoing_domains.unwrap();
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].target_domain, "other.test");
        assert_eq!(domains[0].link_count, 1);
    }

    #[tokio::test]
    async fn test_redirect_attributes_source_to_final_url() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(301)
            .with_header("location", "/home")
            .create_async()
            .await;
        server
            .mock("GET", "/home")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(r#"<a href="https://ext.test/p">P</a>"#)
            .create_async()
            .await;

        let (db, manager) = setup().await;
        manager.start(&server.url(), fast_options()).await.unwrap();
        let record = wait_terminal(&manager, "127.0.0.1").await;
        assert_eq!(record.pages_crawled, 1);

        let page = manager
            .links("127.0.0.1", &LinkQuery::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.links[0].source_url, format!("{}/home", server.url()));

        // The crawled set tracks the post-redirect URL.
        let state = db.load_state("127.0.0.1").await.unwrap().unwrap();
        assert!(state.crawled.iter().any(|u| u.ends_with("/home")));
    }

    #[tokio::test]
    async fn test_sitemap_seeding_reaches_listed_pages() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        server
            .mock("GET", "/sitemap.xml")
            .with_status(200)
            .with_body(format!(
                "<urlset><url><loc>{base}/a</loc></url><url><loc>{base}/b</loc></url></urlset>"
            ))
            .create_async()
            .await;
        for miss in ["/sitemap_index.xml", "/sitemaps.xml", "/sitemap/sitemap.xml", "/robots.txt"] {
            server.mock("GET", miss).with_status(404).create_async().await;
        }
        server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<p>home</p>")
            .create_async()
            .await;
        server
            .mock("GET", "/a")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(r#"<a href="https://ext.test/p">ext</a>"#)
            .create_async()
            .await;
        server
            .mock("GET", "/b")
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_body("not html")
            .create_async()
            .await;

        let (_db, manager) = setup().await;
        let options = CrawlOptions {
            follow_sitemaps: true,
            respect_robots: true,
            max_pages: 10,
            crawl_delay_ms: 1,
            concurrency: 2,
            ..CrawlOptions::default()
        };
        manager.start(&base, options).await.unwrap();

        let record = wait_terminal(&manager, "127.0.0.1").await;
        assert_eq!(record.status, CrawlStatus::Completed);
        assert_eq!(record.pages_crawled, 3);
        assert_eq!(record.external_links_total, 1);
    }

    #[tokio::test]
    async fn test_max_pages_one_fetches_only_start() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(r#"<a href="/one">1</a><a href="/two">2</a>"#)
            .create_async()
            .await;
        let inner = server
            .mock("GET", "/one")
            .expect(0)
            .create_async()
            .await;

        let (_db, manager) = setup().await;
        let options = CrawlOptions {
            max_pages: 1,
            ..fast_options()
        };
        manager.start(&server.url(), options).await.unwrap();

        let record = wait_terminal(&manager, "127.0.0.1").await;
        assert_eq!(record.pages_crawled, 1);
        inner.assert_async().await;
    }

    #[tokio::test]
    async fn test_max_depth_zero_skips_admitted_outlinks() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(r#"<a href="/about">About</a>"#)
            .create_async()
            .await;
        let about = server
            .mock("GET", "/about")
            .expect(0)
            .create_async()
            .await;

        let (db, manager) = setup().await;
        let options = CrawlOptions {
            max_depth: 0,
            ..fast_options()
        };
        manager.start(&server.url(), options).await.unwrap();

        let record = wait_terminal(&manager, "127.0.0.1").await;
        assert_eq!(record.pages_crawled, 1);
        about.assert_async().await;

        // The outlink was admitted, then skipped at pop.
        let state = db.load_state("127.0.0.1").await.unwrap().unwrap();
        assert!(state.discovered.iter().any(|u| u.ends_with("/about")));
    }

    #[tokio::test]
    async fn test_resume_after_completion_is_noop() {
        let mut server = mockito::Server::new_async().await;
        let root = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(r#"<a href="/about">About</a>"#)
            .expect(1)
            .create_async()
            .await;
        let about = server
            .mock("GET", "/about")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<p>about</p>")
            .expect(1)
            .create_async()
            .await;

        let (_db, manager) = setup().await;
        let first = manager.start(&server.url(), fast_options()).await.unwrap();
        let record = wait_terminal(&manager, "127.0.0.1").await;
        assert_eq!(record.status, CrawlStatus::Completed);
        assert_eq!(record.pages_crawled, 2);

        let options = CrawlOptions {
            resume: true,
            ..fast_options()
        };
        let second = manager.start(&server.url(), options).await.unwrap();
        assert!(second.crawl_id > first.crawl_id);

        let record = wait_terminal(&manager, "127.0.0.1").await;
        assert_eq!(record.crawl_id, second.crawl_id);
        assert_eq!(record.status, CrawlStatus::Completed);
        // Counters continue from the checkpointed crawled set; nothing is
        // refetched (the mocks above allow exactly one hit each).
        assert_eq!(record.pages_crawled, 2);
        root.assert_async().await;
        about.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancellation_finalizes_with_checkpoint() {
        let mut server = mockito::Server::new_async().await;
        let body: String = (0..30)
            .map(|i| format!(r#"<a href="/p/{i}">{i}</a>"#))
            .collect();
        server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(body)
            .create_async()
            .await;
        server
            .mock("GET", mockito::Matcher::Regex(r"^/p/\d+$".to_string()))
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<p>page</p>")
            .create_async()
            .await;

        let (db, manager) = setup().await;
        let options = CrawlOptions {
            crawl_delay_ms: 200,
            concurrency: 1,
            ..fast_options()
        };
        manager.start(&server.url(), options).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(manager.cancel("127.0.0.1").await);
        assert!(!manager.cancel("unknown.test").await);

        let record = wait_terminal(&manager, "127.0.0.1").await;
        assert_eq!(record.status, CrawlStatus::Failed);
        assert!(record.pages_crawled < 31);

        // A final checkpoint was written, so the crawl is resumable.
        let state = db.load_state("127.0.0.1").await.unwrap().unwrap();
        assert!(!state.discovered.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_errors_do_not_fail_the_crawl() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(r#"<a href="/missing">Gone</a><a href="https://ext.test/x">X</a>"#)
            .create_async()
            .await;
        server
            .mock("GET", "/missing")
            .with_status(500)
            .create_async()
            .await;

        let (_db, manager) = setup().await;
        manager.start(&server.url(), fast_options()).await.unwrap();

        let record = wait_terminal(&manager, "127.0.0.1").await;
        assert_eq!(record.status, CrawlStatus::Completed);
        assert_eq!(record.pages_crawled, 1);
        assert_eq!(record.external_links_total, 1);
    }

    #[tokio::test]
    async fn test_start_rejects_bad_urls_without_records() {
        let (db, manager) = setup().await;

        assert!(matches!(
            manager.start("ftp://example.test/", fast_options()).await,
            Err(CrawlError::UnsupportedScheme(_))
        ));
        assert!(manager.start("not a url", fast_options()).await.is_err());

        assert!(db.latest_crawl("example.test").await.unwrap().is_none());
        assert!(manager.status("example.test").await.unwrap().is_none());
    }
}
