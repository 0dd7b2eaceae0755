//! Repositories for tracked sources and collected items.
//!
//! The crawl orchestrator only sees the two traits below; [`SqliteStore`]
//! implements both over one connection pool. Implementations must enforce
//! content-URL uniqueness themselves: the orchestrator relies on it to turn
//! cross-source collisions into silent duplicates.

pub mod sqlite;

use crate::error::Result;
use crate::models::{CollectedItem, TrackedSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use sqlite::SqliteStore;

#[async_trait]
pub trait SourceRepository: Send + Sync {
    async fn create(&self, source: &TrackedSource) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<TrackedSource>>;

    async fn find_by_name(&self, name: &str) -> Result<Option<TrackedSource>>;

    /// Sources taking part in crawl passes, oldest first.
    async fn list_active(&self) -> Result<Vec<TrackedSource>>;

    async fn update_watermark(&self, id: &str, watermark: &str) -> Result<()>;

    /// Soft-disable; the row is kept.
    async fn disable(&self, id: &str) -> Result<()>;
}

#[async_trait]
pub trait ItemRepository: Send + Sync {
    async fn exists_by_content_url(&self, content_url: &str) -> Result<bool>;

    /// Insert all items in one unit, ignoring content-URL duplicates.
    ///
    /// # Returns
    ///
    /// The number of rows actually inserted.
    async fn insert_batch(&self, items: &[CollectedItem]) -> Result<usize>;

    /// Items collected at or after `since`, newest first.
    async fn list_since(&self, since: DateTime<Utc>) -> Result<Vec<CollectedItem>>;

    /// One page of a source's items, newest published first.
    async fn list_by_source(
        &self,
        source_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CollectedItem>>;

    async fn count_by_source(&self, source_id: &str) -> Result<u64>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: &str) -> Result<bool>;
}
