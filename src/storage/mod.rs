use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

use crate::models::{
    CrawlRecord, CrawlState, CrawlStatus, DomainSummary, ExternalLink, LinkQuery, RelFilter,
};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Checkpoint encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("Checkpoint compression error: {0}")]
    Compression(#[from] std::io::Error),
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS domains (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    base_domain TEXT NOT NULL,
    status TEXT NOT NULL,
    max_depth INTEGER NOT NULL,
    pages_crawled INTEGER NOT NULL DEFAULT 0,
    external_links_total INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_domains_base ON domains(base_domain, id DESC);

CREATE TABLE IF NOT EXISTS outgoing_links (
    crawl_id INTEGER NOT NULL REFERENCES domains(id),
    source_url TEXT NOT NULL,
    target_url TEXT NOT NULL,
    target_domain TEXT NOT NULL,
    anchor_text TEXT NOT NULL,
    rel TEXT NOT NULL DEFAULT '',
    is_nofollow INTEGER NOT NULL DEFAULT 0,
    observed_at INTEGER NOT NULL,
    UNIQUE(crawl_id, source_url, target_url)
);

CREATE INDEX IF NOT EXISTS idx_outgoing_links_domain
    ON outgoing_links(crawl_id, target_domain);

CREATE TABLE IF NOT EXISTS outgoing_domains (
    crawl_id INTEGER NOT NULL REFERENCES domains(id),
    target_domain TEXT NOT NULL,
    link_count INTEGER NOT NULL,
    first_seen_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL,
    UNIQUE(crawl_id, target_domain)
);

CREATE TABLE IF NOT EXISTS crawl_states (
    base_domain TEXT PRIMARY KEY,
    state_blob BLOB NOT NULL,
    saved_at INTEGER NOT NULL
);
"#;

/// Process-level database handle. Checkpoints, external-link rows and crawl
/// records all live in one SQLite file; WAL mode keeps readers (the status
/// and links endpoints) unblocked while workers write.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::init(pool).await
    }

    /// In-memory database for tests. A single connection keeps every query
    /// on the same memory instance.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        Ok(Database { pool })
    }

    // --- Crawl records ---

    /// Insert a new crawl record in `processing` state; returns the crawl id.
    pub async fn create_crawl(
        &self,
        base_domain: &str,
        max_depth: u32,
    ) -> Result<i64, StorageError> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"INSERT INTO domains
               (base_domain, status, max_depth, pages_crawled, external_links_total, created_at, updated_at)
               VALUES (?, ?, ?, 0, 0, ?, ?)"#,
        )
        .bind(base_domain)
        .bind(CrawlStatus::Processing.as_str())
        .bind(max_depth as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Refresh the live counters on a crawl record.
    pub async fn update_crawl_counters(
        &self,
        crawl_id: i64,
        pages_crawled: u32,
        external_links_total: u32,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE domains SET pages_crawled = ?, external_links_total = ?, updated_at = ? WHERE id = ?",
        )
        .bind(pages_crawled as i64)
        .bind(external_links_total as i64)
        .bind(Utc::now().timestamp_millis())
        .bind(crawl_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write terminal status and final counters in one update. Terminal
    /// states are never overwritten.
    pub async fn finish_crawl(
        &self,
        crawl_id: i64,
        status: CrawlStatus,
        pages_crawled: u32,
        external_links_total: u32,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"UPDATE domains
               SET status = ?, pages_crawled = ?, external_links_total = ?, updated_at = ?
               WHERE id = ? AND status NOT IN ('completed', 'failed')"#,
        )
        .bind(status.as_str())
        .bind(pages_crawled as i64)
        .bind(external_links_total as i64)
        .bind(Utc::now().timestamp_millis())
        .bind(crawl_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent crawl for a base domain, if any.
    pub async fn latest_crawl(&self, base_domain: &str) -> Result<Option<CrawlRecord>, StorageError> {
        let row: Option<(i64, String, String, i64, i64, i64, i64, i64)> = sqlx::query_as(
            r#"SELECT id, base_domain, status, max_depth, pages_crawled, external_links_total,
                      created_at, updated_at
               FROM domains WHERE base_domain = ? ORDER BY id DESC LIMIT 1"#,
        )
        .bind(base_domain)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(id, base_domain, status, max_depth, pages, links, created_at, updated_at)| {
                CrawlRecord {
                    crawl_id: id,
                    base_domain,
                    status: CrawlStatus::parse(&status),
                    max_depth: max_depth as u32,
                    pages_crawled: pages as u32,
                    external_links_total: links as u32,
                    created_at,
                    updated_at,
                }
            },
        ))
    }

    // --- Link sink ---

    /// Append a batch of external-link rows and fold the per-domain counts
    /// into `outgoing_domains`, all in one transaction. Duplicate rows
    /// (same crawl, source and target) are discarded by the storage layer.
    pub async fn insert_link_batch(&self, links: &[ExternalLink]) -> Result<(), StorageError> {
        if links.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for link in links {
            sqlx::query(
                r#"INSERT OR IGNORE INTO outgoing_links
                   (crawl_id, source_url, target_url, target_domain, anchor_text, rel, is_nofollow, observed_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(link.crawl_id)
            .bind(&link.source_url)
            .bind(&link.target_url)
            .bind(&link.target_domain)
            .bind(&link.anchor_text)
            .bind(&link.rel)
            .bind(link.is_nofollow)
            .bind(link.observed_at)
            .execute(&mut *tx)
            .await?;
        }

        // Group the batch by (crawl, domain) before the summary upserts.
        let mut groups: HashMap<(i64, &str), (i64, i64, i64)> = HashMap::new();
        for link in links {
            let entry = groups
                .entry((link.crawl_id, link.target_domain.as_str()))
                .or_insert((0, link.observed_at, link.observed_at));
            entry.0 += 1;
            entry.1 = entry.1.min(link.observed_at);
            entry.2 = entry.2.max(link.observed_at);
        }

        for ((crawl_id, domain), (count, first_seen, last_seen)) in groups {
            sqlx::query(
                r#"INSERT INTO outgoing_domains
                   (crawl_id, target_domain, link_count, first_seen_at, last_seen_at)
                   VALUES (?, ?, ?, ?, ?)
                   ON CONFLICT(crawl_id, target_domain) DO UPDATE SET
                       link_count = link_count + excluded.link_count,
                       first_seen_at = MIN(first_seen_at, excluded.first_seen_at),
                       last_seen_at = MAX(last_seen_at, excluded.last_seen_at)"#,
            )
            .bind(crawl_id)
            .bind(domain)
            .bind(count)
            .bind(first_seen)
            .bind(last_seen)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Outgoing-domain summary for a crawl, largest first.
    pub async fn domain_summary(&self, crawl_id: i64) -> Result<Vec<DomainSummary>, StorageError> {
        let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
            r#"SELECT target_domain, link_count, first_seen_at, last_seen_at
               FROM outgoing_domains WHERE crawl_id = ?
               ORDER BY link_count DESC, target_domain"#,
        )
        .bind(crawl_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(target_domain, link_count, first_seen_at, last_seen_at)| DomainSummary {
                    target_domain,
                    link_count,
                    first_seen_at,
                    last_seen_at,
                },
            )
            .collect())
    }

    /// Paginated external-link rows for a crawl, with optional anchor-text,
    /// rel and target-domain filters. Returns the page plus the total count
    /// under the same filters.
    pub async fn query_links(
        &self,
        crawl_id: i64,
        query: &LinkQuery,
    ) -> Result<(Vec<ExternalLink>, i64), StorageError> {
        let mut where_sql = String::from("crawl_id = ?");
        let mut binds: Vec<String> = Vec::new();

        if let Some(text) = query.text.as_deref().filter(|t| !t.is_empty()) {
            where_sql.push_str(" AND anchor_text LIKE ?");
            binds.push(format!("%{text}%"));
        }
        match query.rel {
            RelFilter::All => {}
            RelFilter::Nofollow => where_sql.push_str(" AND is_nofollow = 1"),
            RelFilter::Dofollow => where_sql.push_str(" AND is_nofollow = 0"),
        }
        if let Some(domain) = query.domain.as_deref().filter(|d| !d.is_empty()) {
            where_sql.push_str(" AND target_domain = ?");
            binds.push(domain.to_string());
        }

        let count_sql = format!("SELECT COUNT(*) FROM outgoing_links WHERE {where_sql}");
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql).bind(crawl_id);
        for b in &binds {
            count_query = count_query.bind(b);
        }
        let (total,) = count_query.fetch_one(&self.pool).await?;

        let limit = query.limit.clamp(1, 500) as i64;
        let offset = (query.page.max(1) as i64 - 1) * limit;
        let rows_sql = format!(
            r#"SELECT crawl_id, source_url, target_url, target_domain, anchor_text, rel,
                      is_nofollow, observed_at
               FROM outgoing_links WHERE {where_sql}
               ORDER BY observed_at, rowid LIMIT ? OFFSET ?"#
        );
        let mut rows_query =
            sqlx::query_as::<_, (i64, String, String, String, String, String, bool, i64)>(
                &rows_sql,
            )
            .bind(crawl_id);
        for b in &binds {
            rows_query = rows_query.bind(b);
        }
        let rows = rows_query
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let links = rows
            .into_iter()
            .map(
                |(
                    crawl_id,
                    source_url,
                    target_url,
                    target_domain,
                    anchor_text,
                    rel,
                    is_nofollow,
                    observed_at,
                )| ExternalLink {
                    crawl_id,
                    source_url,
                    target_url,
                    target_domain,
                    anchor_text,
                    rel,
                    is_nofollow,
                    observed_at,
                },
            )
            .collect();

        Ok((links, total))
    }

    // --- Checkpoints ---

    /// Upsert the serialized crawl state for a base domain. The blob is
    /// gzipped JSON; the single-row upsert is the serialization point for
    /// concurrent saves.
    pub async fn save_state(
        &self,
        base_domain: &str,
        state: &CrawlState,
    ) -> Result<(), StorageError> {
        let json = serde_json::to_vec(state)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        let blob = encoder.finish()?;

        sqlx::query(
            r#"INSERT INTO crawl_states (base_domain, state_blob, saved_at)
               VALUES (?, ?, ?)
               ON CONFLICT(base_domain) DO UPDATE SET
                   state_blob = excluded.state_blob,
                   saved_at = excluded.saved_at"#,
        )
        .bind(base_domain)
        .bind(blob)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load the checkpoint for a base domain, if one was ever saved.
    pub async fn load_state(&self, base_domain: &str) -> Result<Option<CrawlState>, StorageError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT state_blob FROM crawl_states WHERE base_domain = ?")
                .bind(base_domain)
                .fetch_optional(&self.pool)
                .await?;

        let Some((blob,)) = row else {
            return Ok(None);
        };

        let mut decoder = GzDecoder::new(&blob[..]);
        let mut json = Vec::new();
        decoder.read_to_end(&mut json)?;
        Ok(Some(serde_json::from_slice(&json)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FrontierEntry, UrlKind};

    fn link(crawl_id: i64, source: &str, target: &str, domain: &str, at: i64) -> ExternalLink {
        ExternalLink {
            crawl_id,
            source_url: source.to_string(),
            target_url: target.to_string(),
            target_domain: domain.to_string(),
            anchor_text: "anchor".to_string(),
            rel: String::new(),
            is_nofollow: false,
            observed_at: at,
        }
    }

    #[tokio::test]
    async fn test_crawl_record_lifecycle() {
        let db = Database::open_in_memory().await.unwrap();

        let id = db.create_crawl("example.test", 10).await.unwrap();
        let record = db.latest_crawl("example.test").await.unwrap().unwrap();
        assert_eq!(record.crawl_id, id);
        assert_eq!(record.status, CrawlStatus::Processing);
        assert_eq!(record.pages_crawled, 0);

        db.update_crawl_counters(id, 30, 12).await.unwrap();
        let record = db.latest_crawl("example.test").await.unwrap().unwrap();
        assert_eq!(record.pages_crawled, 30);
        assert_eq!(record.external_links_total, 12);

        db.finish_crawl(id, CrawlStatus::Completed, 42, 17)
            .await
            .unwrap();
        let record = db.latest_crawl("example.test").await.unwrap().unwrap();
        assert_eq!(record.status, CrawlStatus::Completed);
        assert_eq!(record.pages_crawled, 42);

        // Terminal status is never overwritten.
        db.finish_crawl(id, CrawlStatus::Failed, 0, 0).await.unwrap();
        let record = db.latest_crawl("example.test").await.unwrap().unwrap();
        assert_eq!(record.status, CrawlStatus::Completed);
    }

    #[tokio::test]
    async fn test_latest_crawl_picks_newest() {
        let db = Database::open_in_memory().await.unwrap();
        let first = db.create_crawl("example.test", 5).await.unwrap();
        let second = db.create_crawl("example.test", 7).await.unwrap();
        assert!(second > first);

        let record = db.latest_crawl("example.test").await.unwrap().unwrap();
        assert_eq!(record.crawl_id, second);
        assert_eq!(record.max_depth, 7);

        assert!(db.latest_crawl("missing.test").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_link_batch_dedup_and_summary() {
        let db = Database::open_in_memory().await.unwrap();
        let id = db.create_crawl("example.test", 10).await.unwrap();

        let batch = vec![
            link(id, "https://example.test/", "https://a.test/1", "a.test", 100),
            link(id, "https://example.test/", "https://a.test/2", "a.test", 200),
            link(id, "https://example.test/", "https://b.test/1", "b.test", 150),
        ];
        db.insert_link_batch(&batch).await.unwrap();

        // Re-inserting the same rows is discarded at insert.
        db.insert_link_batch(&batch).await.unwrap();

        let (links, total) = db
            .query_links(id, &LinkQuery::default())
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(links.len(), 3);

        let summary = db.domain_summary(id).await.unwrap();
        assert_eq!(summary.len(), 2);
        let a = summary.iter().find(|s| s.target_domain == "a.test").unwrap();
        assert_eq!(a.first_seen_at, 100);
        assert_eq!(a.last_seen_at, 200);
        assert!(a.link_count >= 2);
        assert!(summary.iter().all(|s| s.link_count >= 1));
        assert!(summary.iter().all(|s| s.first_seen_at <= s.last_seen_at));
    }

    #[tokio::test]
    async fn test_query_links_filters() {
        let db = Database::open_in_memory().await.unwrap();
        let id = db.create_crawl("example.test", 10).await.unwrap();

        let mut nofollow = link(id, "https://example.test/", "https://a.test/1", "a.test", 1);
        nofollow.is_nofollow = true;
        nofollow.rel = "nofollow".to_string();
        nofollow.anchor_text = "sponsored widget".to_string();
        let dofollow = link(id, "https://example.test/", "https://b.test/1", "b.test", 2);
        db.insert_link_batch(&[nofollow, dofollow]).await.unwrap();

        let q = LinkQuery {
            rel: RelFilter::Nofollow,
            ..LinkQuery::default()
        };
        let (links, total) = db.query_links(id, &q).await.unwrap();
        assert_eq!(total, 1);
        assert!(links[0].is_nofollow);

        let q = LinkQuery {
            rel: RelFilter::Dofollow,
            ..LinkQuery::default()
        };
        let (_, total) = db.query_links(id, &q).await.unwrap();
        assert_eq!(total, 1);

        let q = LinkQuery {
            text: Some("widget".to_string()),
            ..LinkQuery::default()
        };
        let (links, total) = db.query_links(id, &q).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(links[0].anchor_text, "sponsored widget");

        let q = LinkQuery {
            domain: Some("b.test".to_string()),
            ..LinkQuery::default()
        };
        let (links, total) = db.query_links(id, &q).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(links[0].target_domain, "b.test");
    }

    #[tokio::test]
    async fn test_query_links_pagination() {
        let db = Database::open_in_memory().await.unwrap();
        let id = db.create_crawl("example.test", 10).await.unwrap();

        let batch: Vec<ExternalLink> = (0..7)
            .map(|i| {
                link(
                    id,
                    "https://example.test/",
                    &format!("https://a.test/{i}"),
                    "a.test",
                    i,
                )
            })
            .collect();
        db.insert_link_batch(&batch).await.unwrap();

        let q = LinkQuery {
            page: 2,
            limit: 3,
            ..LinkQuery::default()
        };
        let (links, total) = db.query_links(id, &q).await.unwrap();
        assert_eq!(total, 7);
        assert_eq!(links.len(), 3);
        assert_eq!(links[0].target_url, "https://a.test/3");
    }

    #[tokio::test]
    async fn test_state_blob_roundtrip() {
        let db = Database::open_in_memory().await.unwrap();

        assert!(db.load_state("example.test").await.unwrap().is_none());

        let state = CrawlState {
            discovered: vec!["https://example.test/".to_string()],
            crawled: vec![],
            frontier: vec![FrontierEntry {
                url: "https://example.test/".to_string(),
                depth: 0,
                source_url: "start".to_string(),
                kind: UrlKind::Start,
                priority: 10,
            }],
            saved_at_ms: 42,
            ..CrawlState::default()
        };
        db.save_state("example.test", &state).await.unwrap();

        let loaded = db.load_state("example.test").await.unwrap().unwrap();
        assert_eq!(loaded.frontier, state.frontier);
        assert_eq!(loaded.discovered, state.discovered);
        assert_eq!(loaded.saved_at_ms, 42);

        // Upsert replaces the previous blob.
        let newer = CrawlState {
            saved_at_ms: 43,
            ..CrawlState::default()
        };
        db.save_state("example.test", &newer).await.unwrap();
        let loaded = db.load_state("example.test").await.unwrap().unwrap();
        assert_eq!(loaded.saved_at_ms, 43);
        assert!(loaded.frontier.is_empty());
    }
}
