//! Crawl passes across tracked sources.
//!
//! A pass lists every active source and crawls them with a bounded fan-out.
//! Each source's crawl is isolated: its failure is logged and counted but
//! never aborts siblings, and it never moves that source's watermark.
//!
//! # New-item detection
//!
//! The remote list is newest-first. Walking it in order, an item whose
//! content URL equals the watermark ends the walk; an item already in the
//! item store is skipped but does not end it, so edited or reordered older
//! items cannot hide newer ones behind them.

use crate::error::{CrawlError, Result};
use crate::models::{CollectedItem, PassReport, RemoteItemSummary, TrackedSource};
use crate::storage::{ItemRepository, SourceRepository};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Remote operations the orchestrator needs; implemented by the session
/// manager.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Remote identifier of the source matching `name`.
    async fn search_source(&self, name: &str) -> Result<String>;

    /// Newest `count` item summaries of a source, newest first.
    async fn fetch_item_list(&self, remote_id: &str, count: u32) -> Result<Vec<RemoteItemSummary>>;

    /// Full content of one item.
    async fn fetch_item_detail(&self, url: &str) -> Result<String>;

    /// Restore a usable session if an earlier call dropped it.
    async fn ensure_session(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlSettings {
    /// Maximum number of source crawls admitted at once.
    pub concurrency: usize,
    /// Item summaries requested per source and pass.
    pub page_size: u32,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            concurrency: 3,
            page_size: 10,
        }
    }
}

/// Result of crawling one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceOutcome {
    /// Items returned by the remote list after dedup.
    pub listed: usize,
    /// Items actually written to the item store.
    pub inserted: usize,
    /// Items whose detail fetch failed and were stored without content.
    pub without_content: usize,
    pub watermark_advanced: bool,
}

/// Runs crawl passes and subscription changes.
///
/// Cheap to clone; clones share the catalog and repositories.
#[derive(Clone)]
pub struct CrawlOrchestrator {
    catalog: Arc<dyn RemoteCatalog>,
    sources: Arc<dyn SourceRepository>,
    items: Arc<dyn ItemRepository>,
    settings: CrawlSettings,
}

impl CrawlOrchestrator {
    pub fn new(
        catalog: Arc<dyn RemoteCatalog>,
        sources: Arc<dyn SourceRepository>,
        items: Arc<dyn ItemRepository>,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            catalog,
            sources,
            items,
            settings: CrawlSettings {
                concurrency: settings.concurrency.max(1),
                ..settings
            },
        }
    }

    pub fn settings(&self) -> CrawlSettings {
        self.settings
    }

    /// Crawl every active source once.
    ///
    /// Safe to call repeatedly or concurrently: remote access is serialized
    /// by the catalog and duplicates are absorbed by the item store.
    ///
    /// # Returns
    ///
    /// A [`PassReport`]. Per-source failures are counted there, not returned.
    ///
    /// # Errors
    ///
    /// When the active sources cannot be listed, or when a dropped session
    /// cannot be re-established before the pass starts.
    #[instrument(level = "info", skip_all, fields(concurrency = self.settings.concurrency))]
    pub async fn fetch_all(&self) -> Result<PassReport> {
        let sources = self.sources.list_active().await?;
        if sources.is_empty() {
            info!("No active sources; nothing to crawl");
            return Ok(PassReport::default());
        }

        if let Err(e) = self.catalog.ensure_session().await {
            error!(error = %e, "No usable session; crawl pass aborted");
            return Err(e);
        }

        let total = sources.len();
        info!(sources = total, "Starting crawl pass");

        let outcomes: Vec<Result<SourceOutcome>> = stream::iter(sources)
            .map(|source| async move {
                let result = self.fetch_one(&source).await;
                if let Err(e) = &result {
                    if e.is_session_failure() {
                        error!(source = %source.name, source_id = %source.id, error = %e, "Session unusable; source skipped");
                    } else {
                        warn!(source = %source.name, source_id = %source.id, error = %e, "Source crawl failed");
                    }
                }
                result
            })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        let mut report = PassReport {
            sources: total,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                Ok(outcome) => {
                    report.succeeded += 1;
                    report.new_items += outcome.inserted;
                }
                Err(_) => report.failed += 1,
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            new_items = report.new_items,
            "Crawl pass finished"
        );
        Ok(report)
    }

    /// Crawl one source: list, detect new items, persist them, advance the
    /// watermark.
    #[instrument(level = "info", skip_all, fields(source = %source.name, remote_id = %source.remote_id))]
    pub async fn fetch_one(&self, source: &TrackedSource) -> Result<SourceOutcome> {
        let listing: Vec<RemoteItemSummary> = self
            .catalog
            .fetch_item_list(&source.remote_id, self.settings.page_size)
            .await?
            .into_iter()
            .filter(|item| !item.content_url.is_empty())
            .unique_by(|item| item.content_url.clone())
            .collect();

        let mut outcome = SourceOutcome {
            listed: listing.len(),
            ..Default::default()
        };
        let Some(newest_url) = listing.first().map(|item| item.content_url.clone()) else {
            info!("Remote list is empty");
            return Ok(outcome);
        };

        let mut fresh: Vec<CollectedItem> = Vec::new();
        for summary in &listing {
            if !source.watermark.is_empty() && summary.content_url == source.watermark {
                debug!(url = %summary.content_url, "Reached watermark");
                break;
            }
            if self.items.exists_by_content_url(&summary.content_url).await? {
                debug!(url = %summary.content_url, "Already collected; skipping");
                continue;
            }

            // Items are immutable once stored, so only a page-level failure
            // may leave one without content.
            let content = match self.catalog.fetch_item_detail(&summary.content_url).await {
                Ok(html) => Some(html),
                Err(e @ (CrawlError::ContentFetchFailed { .. } | CrawlError::Driver(_))) => {
                    warn!(url = %summary.content_url, title = %summary.title, error = %e, "Content unavailable; keeping metadata only");
                    outcome.without_content += 1;
                    None
                }
                Err(e) => {
                    warn!(url = %summary.content_url, error = %e, pending = fresh.len(), "Detail fetch aborted; nothing stored for this source");
                    return Err(e);
                }
            };
            fresh.push(CollectedItem::from_summary(source, summary, content));
        }

        if fresh.is_empty() {
            info!("No new items");
            return Ok(outcome);
        }

        outcome.inserted = self.items.insert_batch(&fresh).await?;
        info!(
            new_items = outcome.inserted,
            without_content = outcome.without_content,
            "Stored new items"
        );

        if outcome.inserted > 0 && newest_url != source.watermark {
            match self.sources.update_watermark(&source.id, &newest_url).await {
                Ok(()) => outcome.watermark_advanced = true,
                Err(e) => warn!(error = %e, watermark = %newest_url, "Failed to advance watermark"),
            }
        }
        Ok(outcome)
    }

    /// Start tracking a source found by remote search.
    ///
    /// The remote search uses `alias` when given, `name` otherwise.
    #[instrument(level = "info", skip(self))]
    pub async fn subscribe(&self, name: &str, alias: Option<&str>) -> Result<TrackedSource> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CrawlError::Config("source name must not be empty".to_string()));
        }
        if self.sources.find_by_name(name).await?.is_some() {
            return Err(CrawlError::AlreadyTracked(name.to_string()));
        }

        let mut source = TrackedSource::new(name, alias.unwrap_or_default().trim(), "");
        source.remote_id = self.catalog.search_source(source.search_term()).await?;
        self.sources.create(&source).await?;

        info!(source_id = %source.id, remote_id = %source.remote_id, "Subscribed");
        Ok(source)
    }

    pub async fn disable(&self, id: &str) -> Result<()> {
        self.sources.disable(id).await
    }

    pub async fn list_sources(&self) -> Result<Vec<TrackedSource>> {
        self.sources.list_active().await
    }
}
