//! Periodic crawl passes and digests on `tokio-cron-scheduler`.
//!
//! ```text
//! Scheduler
//!     ├─► crawl job  (interval_to_schedule) ─► CrawlOrchestrator::fetch_all
//!     └─► digest job (notify_schedule)      ─► ItemRepository::list_since ─► Notifier
//! ```

use crate::crawler::CrawlOrchestrator;
use crate::error::Result;
use crate::models::{NotifierConfig, NotifyPeriod, PassReport};
use crate::notify::Notifier;
use crate::schedule::{interval_to_schedule, notify_schedule};
use crate::storage::ItemRepository;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, instrument, warn};

/// Runs one crawl pass at a time; a trigger that arrives while a pass is
/// still running is dropped.
#[derive(Clone)]
pub struct PassRunner {
    orchestrator: CrawlOrchestrator,
    running: Arc<Mutex<()>>,
}

impl PassRunner {
    pub fn new(orchestrator: CrawlOrchestrator) -> Self {
        Self {
            orchestrator,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Run a pass unless one is in progress.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the trigger was skipped.
    pub async fn trigger(&self) -> Result<Option<PassReport>> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("Previous crawl pass still running; skipping this trigger");
            return Ok(None);
        };
        self.orchestrator.fetch_all().await.map(Some)
    }
}

/// Digest window for the configured cadence.
pub fn digest_window(period: NotifyPeriod) -> Duration {
    match period {
        NotifyPeriod::Hourly => Duration::hours(1),
        NotifyPeriod::Daily => Duration::hours(24),
    }
}

/// Send a digest of everything collected inside the cadence's window.
///
/// # Returns
///
/// The number of items sent; `0` when the window was empty and nothing was
/// sent.
#[instrument(level = "info", skip_all, fields(period = ?config.period))]
pub async fn send_digest(
    items: &dyn ItemRepository,
    notifier: &dyn Notifier,
    config: &NotifierConfig,
) -> Result<usize> {
    let since = Utc::now() - digest_window(config.period);
    let recent = items.list_since(since).await?;
    if recent.is_empty() {
        info!("No new items in the digest window");
        return Ok(0);
    }
    notifier.notify(&config.title, &recent).await?;
    Ok(recent.len())
}

/// Owns the cron scheduler and the jobs registered on it.
pub struct CrawlScheduler {
    scheduler: JobScheduler,
    runner: PassRunner,
}

impl CrawlScheduler {
    /// Register the crawl job (and the digest job when a notifier is given)
    /// and start ticking.
    #[instrument(level = "info", skip_all, fields(interval_minutes = interval_minutes))]
    pub async fn start(
        orchestrator: CrawlOrchestrator,
        interval_minutes: u32,
        items: Arc<dyn ItemRepository>,
        notifier: Option<(Arc<dyn Notifier>, NotifierConfig)>,
    ) -> Result<Self> {
        let crawl_schedule = interval_to_schedule(interval_minutes)?;
        let scheduler = JobScheduler::new().await?;
        let runner = PassRunner::new(orchestrator);

        let crawl_runner = runner.clone();
        let crawl_job = Job::new_async(crawl_schedule.cron_expression().as_str(), move |_uuid, _lock| {
            let runner = crawl_runner.clone();
            Box::pin(async move {
                match runner.trigger().await {
                    Ok(Some(report)) => info!(new_items = report.new_items, failed = report.failed, "Scheduled crawl pass done"),
                    Ok(None) => {}
                    Err(e) => error!(error = %e, "Scheduled crawl pass failed"),
                }
            })
        })?;
        scheduler.add(crawl_job).await?;
        info!(cron = %crawl_schedule, "Crawl job registered");

        if let Some((notifier, config)) = notifier {
            let cron = notify_schedule(&config)?;
            let digest_job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
                let items = Arc::clone(&items);
                let notifier = Arc::clone(&notifier);
                let config = config.clone();
                Box::pin(async move {
                    match send_digest(items.as_ref(), notifier.as_ref(), &config).await {
                        Ok(sent) => info!(sent, "Digest job done"),
                        Err(e) => error!(error = %e, "Digest job failed"),
                    }
                })
            })?;
            scheduler.add(digest_job).await?;
            info!(%cron, "Digest job registered");
        }

        scheduler.start().await?;
        info!("Scheduler started");
        Ok(Self { scheduler, runner })
    }

    /// Run a pass now, outside the schedule.
    pub async fn run_once(&self) -> Result<Option<PassReport>> {
        self.runner.trigger().await
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        info!("Scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::{CrawlSettings, RemoteCatalog};
    use crate::error::CrawlError;
    use crate::models::{CollectedItem, RemoteItemSummary, TrackedSource};
    use crate::storage::{SourceRepository, SqliteStore};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: StdMutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, title: &str, items: &[CollectedItem]) -> Result<()> {
            self.sent.lock().unwrap().push((title.to_string(), items.len()));
            Ok(())
        }
    }

    struct SlowCatalog;

    #[async_trait]
    impl RemoteCatalog for SlowCatalog {
        async fn search_source(&self, name: &str) -> Result<String> {
            Err(CrawlError::SourceNotFound(name.to_string()))
        }

        async fn fetch_item_list(&self, _remote_id: &str, _count: u32) -> Result<Vec<RemoteItemSummary>> {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            Ok(Vec::new())
        }

        async fn fetch_item_detail(&self, url: &str) -> Result<String> {
            Ok(url.to_string())
        }
    }

    fn item(source: &TrackedSource, url: &str, hours_ago: i64) -> CollectedItem {
        let summary = RemoteItemSummary {
            content_url: url.to_string(),
            ..Default::default()
        };
        let mut item = CollectedItem::from_summary(source, &summary, None);
        item.collected_at = Utc::now() - Duration::hours(hours_ago);
        item
    }

    #[tokio::test]
    async fn test_digest_window_per_period() {
        let store = SqliteStore::in_memory().await.unwrap();
        let source = TrackedSource::new("A", "", "r");
        store
            .insert_batch(&[item(&source, "recent", 0), item(&source, "today", 5), item(&source, "old", 30)])
            .await
            .unwrap();
        let notifier = RecordingNotifier::default();

        let hourly = NotifierConfig {
            period: NotifyPeriod::Hourly,
            ..Default::default()
        };
        assert_eq!(send_digest(&store, &notifier, &hourly).await.unwrap(), 1);

        let daily = NotifierConfig::default();
        assert_eq!(send_digest(&store, &notifier, &daily).await.unwrap(), 2);

        let sent = notifier.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("New articles".to_string(), 1), ("New articles".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_empty_window_sends_nothing() {
        let store = SqliteStore::in_memory().await.unwrap();
        let notifier = RecordingNotifier::default();

        let sent = send_digest(&store, &notifier, &NotifierConfig::default()).await.unwrap();

        assert_eq!(sent, 0);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_skipped() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        store.create(&TrackedSource::new("A", "", "r")).await.unwrap();
        let orchestrator = CrawlOrchestrator::new(
            Arc::new(SlowCatalog),
            store.clone(),
            store.clone(),
            CrawlSettings::default(),
        );
        let runner = PassRunner::new(orchestrator);

        let (first, second) = tokio::join!(runner.trigger(), async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            runner.trigger().await
        });

        assert_eq!(first.unwrap().unwrap().succeeded, 1);
        assert!(second.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_interval() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let orchestrator = CrawlOrchestrator::new(
            Arc::new(SlowCatalog),
            store.clone(),
            store.clone(),
            CrawlSettings::default(),
        );

        let result = CrawlScheduler::start(orchestrator, 3, store, None).await;

        assert!(matches!(result, Err(CrawlError::InvalidInterval(3))));
    }
}
