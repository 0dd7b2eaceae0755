//! SQLite backend for both repositories.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings so range
//! queries can compare them as text.

use crate::error::{CrawlError, Result};
use crate::models::{CollectedItem, SourceStatus, TrackedSource};
use crate::storage::{ItemRepository, SourceRepository};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::FromRow;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, instrument};

pub struct SqliteStore {
    pool: SqlitePool,
}

fn to_db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn from_db_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| CrawlError::Storage(format!("invalid timestamp {raw:?}: {e}")))
}

impl SqliteStore {
    /// Open (creating if needed) the database at `database_url`.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - ephemeral, see [`SqliteStore::in_memory`]
    /// - `sqlite://article_watch.db` - file next to the working directory
    #[instrument(level = "info", skip_all, fields(url = %database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let url = if database_url.starts_with("sqlite:") && !database_url.contains(":memory:") {
            if database_url.contains('?') {
                database_url.to_string()
            } else {
                format!("{database_url}?mode=rwc")
            }
        } else {
            database_url.to_string()
        };

        // A single long-lived connection keeps an in-memory database alive
        // and sidesteps SQLite writer contention.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Database ready");
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                alias TEXT NOT NULL DEFAULT '',
                remote_id TEXT NOT NULL,
                url TEXT NOT NULL DEFAULT '',
                watermark TEXT NOT NULL DEFAULT '',
                status INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sources_status ON sources(status);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                source_name TEXT NOT NULL,
                title TEXT NOT NULL,
                author TEXT NOT NULL DEFAULT '',
                summary TEXT NOT NULL DEFAULT '',
                content TEXT,
                content_url TEXT NOT NULL UNIQUE,
                cover_url TEXT NOT NULL DEFAULT '',
                source_link TEXT NOT NULL DEFAULT '',
                published_at INTEGER NOT NULL DEFAULT 0,
                collected_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_items_source ON items(source_id, published_at);
            CREATE INDEX IF NOT EXISTS idx_items_collected_at ON items(collected_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct SourceRow {
    id: String,
    name: String,
    alias: String,
    remote_id: String,
    url: String,
    watermark: String,
    status: i64,
    created_at: String,
    updated_at: String,
}

impl SourceRow {
    fn into_source(self) -> Result<TrackedSource> {
        Ok(TrackedSource {
            id: self.id,
            name: self.name,
            alias: self.alias,
            remote_id: self.remote_id,
            url: self.url,
            watermark: self.watermark,
            status: SourceStatus::from_i64(self.status),
            created_at: from_db_time(&self.created_at)?,
            updated_at: from_db_time(&self.updated_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct ItemRow {
    id: String,
    source_id: String,
    source_name: String,
    title: String,
    author: String,
    summary: String,
    content: Option<String>,
    content_url: String,
    cover_url: String,
    source_link: String,
    published_at: i64,
    collected_at: String,
}

impl ItemRow {
    fn into_item(self) -> Result<CollectedItem> {
        Ok(CollectedItem {
            id: self.id,
            source_id: self.source_id,
            source_name: self.source_name,
            title: self.title,
            author: self.author,
            summary: self.summary,
            content: self.content,
            content_url: self.content_url,
            cover_url: self.cover_url,
            source_link: self.source_link,
            published_at: self.published_at,
            collected_at: from_db_time(&self.collected_at)?,
        })
    }
}

const SOURCE_COLUMNS: &str =
    "id, name, alias, remote_id, url, watermark, status, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, source_id, source_name, title, author, summary, content, \
     content_url, cover_url, source_link, published_at, collected_at";

#[async_trait]
impl SourceRepository for SqliteStore {
    #[instrument(level = "info", skip_all, fields(name = %source.name))]
    async fn create(&self, source: &TrackedSource) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, name, alias, remote_id, url, watermark, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&source.id)
        .bind(&source.name)
        .bind(&source.alias)
        .bind(&source.remote_id)
        .bind(&source.url)
        .bind(&source.watermark)
        .bind(source.status.as_i64())
        .bind(to_db_time(source.created_at))
        .bind(to_db_time(source.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TrackedSource>> {
        let row: Option<SourceRow> =
            sqlx::query_as(&format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(SourceRow::into_source).transpose()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<TrackedSource>> {
        let row: Option<SourceRow> =
            sqlx::query_as(&format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE name = ?"))
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        row.map(SourceRow::into_source).transpose()
    }

    async fn list_active(&self) -> Result<Vec<TrackedSource>> {
        let rows: Vec<SourceRow> = sqlx::query_as(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE status = ? ORDER BY created_at, name"
        ))
        .bind(SourceStatus::Active.as_i64())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SourceRow::into_source).collect()
    }

    async fn update_watermark(&self, id: &str, watermark: &str) -> Result<()> {
        let result = sqlx::query("UPDATE sources SET watermark = ?, updated_at = ? WHERE id = ?")
            .bind(watermark)
            .bind(to_db_time(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CrawlError::Storage(format!("no source with id {id}")));
        }
        debug!(source_id = %id, %watermark, "Watermark updated");
        Ok(())
    }

    async fn disable(&self, id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE sources SET status = ?, updated_at = ? WHERE id = ?")
            .bind(SourceStatus::Disabled.as_i64())
            .bind(to_db_time(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CrawlError::SourceNotFound(id.to_string()));
        }
        info!(source_id = %id, "Source disabled");
        Ok(())
    }
}

#[async_trait]
impl ItemRepository for SqliteStore {
    async fn exists_by_content_url(&self, content_url: &str) -> Result<bool> {
        let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM items WHERE content_url = ? LIMIT 1")
            .bind(content_url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    #[instrument(level = "info", skip_all, fields(count = items.len()))]
    async fn insert_batch(&self, items: &[CollectedItem]) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;
        for item in items {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO items
                    (id, source_id, source_name, title, author, summary, content,
                     content_url, cover_url, source_link, published_at, collected_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&item.id)
            .bind(&item.source_id)
            .bind(&item.source_name)
            .bind(&item.title)
            .bind(&item.author)
            .bind(&item.summary)
            .bind(&item.content)
            .bind(&item.content_url)
            .bind(&item.cover_url)
            .bind(&item.source_link)
            .bind(item.published_at)
            .bind(to_db_time(item.collected_at))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;

        if inserted < items.len() {
            debug!(
                skipped = items.len() - inserted,
                "Duplicate content URLs ignored"
            );
        }
        Ok(inserted)
    }

    async fn list_since(&self, since: DateTime<Utc>) -> Result<Vec<CollectedItem>> {
        let rows: Vec<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE collected_at >= ? ORDER BY collected_at DESC"
        ))
        .bind(to_db_time(since))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ItemRow::into_item).collect()
    }

    async fn list_by_source(
        &self,
        source_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CollectedItem>> {
        let rows: Vec<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE source_id = ? \
             ORDER BY published_at DESC, collected_at DESC LIMIT ? OFFSET ?"
        ))
        .bind(source_id)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ItemRow::into_item).collect()
    }

    async fn count_by_source(&self, source_id: &str) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemoteItemSummary;
    use chrono::Duration;

    fn item(source: &TrackedSource, url: &str, published_at: i64) -> CollectedItem {
        let summary = RemoteItemSummary {
            title: format!("title {url}"),
            content_url: url.to_string(),
            create_time: published_at,
            ..Default::default()
        };
        CollectedItem::from_summary(source, &summary, Some("<p>x</p>".to_string()))
    }

    #[tokio::test]
    async fn test_source_lifecycle() {
        let store = SqliteStore::in_memory().await.unwrap();
        let source = TrackedSource::new("Daily", "daily-alias", "MzA5");
        store.create(&source).await.unwrap();

        let found = store.find_by_name("Daily").await.unwrap().unwrap();
        assert_eq!(found.id, source.id);
        assert_eq!(found.alias, "daily-alias");
        assert!(found.watermark.is_empty());

        store.update_watermark(&source.id, "https://mp.example.com/s/a").await.unwrap();
        let found = store.find_by_id(&source.id).await.unwrap().unwrap();
        assert_eq!(found.watermark, "https://mp.example.com/s/a");

        assert_eq!(store.list_active().await.unwrap().len(), 1);
        store.disable(&source.id).await.unwrap();
        assert!(store.list_active().await.unwrap().is_empty());
        let kept = store.find_by_id(&source.id).await.unwrap().unwrap();
        assert_eq!(kept.status, SourceStatus::Disabled);
    }

    #[tokio::test]
    async fn test_duplicate_source_name_rejected() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create(&TrackedSource::new("Daily", "", "a")).await.unwrap();
        let err = store.create(&TrackedSource::new("Daily", "", "b")).await.unwrap_err();
        assert!(matches!(err, CrawlError::Storage(_)));
    }

    #[tokio::test]
    async fn test_disable_unknown_source() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(matches!(
            store.disable("nope").await,
            Err(CrawlError::SourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_content_url_unique_across_sources() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = TrackedSource::new("A", "", "ra");
        let b = TrackedSource::new("B", "", "rb");

        let first = store.insert_batch(&[item(&a, "u1", 1), item(&a, "u2", 2)]).await.unwrap();
        let second = store.insert_batch(&[item(&b, "u1", 1), item(&b, "u3", 3)]).await.unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 1);
        assert!(store.exists_by_content_url("u1").await.unwrap());
        assert_eq!(store.count_by_source(&a.id).await.unwrap(), 2);
        assert_eq!(store.count_by_source(&b.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_item_with_missing_content_round_trips() {
        let store = SqliteStore::in_memory().await.unwrap();
        let source = TrackedSource::new("A", "", "ra");
        let mut bare = item(&source, "u1", 1);
        bare.content = None;
        store.insert_batch(std::slice::from_ref(&bare)).await.unwrap();

        let listed = store.list_by_source(&source.id, 10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content, None);
        assert_eq!(listed[0].content_url, "u1");
    }

    #[tokio::test]
    async fn test_list_by_source_pages_newest_first() {
        let store = SqliteStore::in_memory().await.unwrap();
        let source = TrackedSource::new("A", "", "ra");
        let items: Vec<_> = (1..=5).map(|i| item(&source, &format!("u{i}"), i)).collect();
        store.insert_batch(&items).await.unwrap();

        let page = store.list_by_source(&source.id, 2, 1).await.unwrap();
        let urls: Vec<_> = page.iter().map(|i| i.content_url.as_str()).collect();
        assert_eq!(urls, vec!["u4", "u3"]);
    }

    #[tokio::test]
    async fn test_list_since_and_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        let source = TrackedSource::new("A", "", "ra");
        let mut old = item(&source, "old", 1);
        old.collected_at = Utc::now() - Duration::days(3);
        let fresh = item(&source, "fresh", 2);
        store.insert_batch(&[old, fresh.clone()]).await.unwrap();

        let recent = store.list_since(Utc::now() - Duration::hours(1)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content_url, "fresh");

        assert!(store.delete(&fresh.id).await.unwrap());
        assert!(!store.delete(&fresh.id).await.unwrap());
        assert!(store.list_since(Utc::now() - Duration::hours(1)).await.unwrap().is_empty());
    }
}
