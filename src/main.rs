//! # article-watch
//!
//! Command-line entry point: loads configuration, initializes tracing and
//! dispatches the selected subcommand.
//!
//! ## Usage
//!
//! ```sh
//! article-watch subscribe "Daily Notes"
//! article-watch run
//! ```

use article_watch::config::AppConfig;
use article_watch::crawler::CrawlOrchestrator;
use article_watch::driver::ChromeDriver;
use article_watch::notify::{Notifier, WebhookNotifier};
use article_watch::schedule::interval_to_schedule;
use article_watch::scheduler::CrawlScheduler;
use article_watch::session::{SessionManager, SessionStore};
use article_watch::storage::{ItemRepository, SourceRepository, SqliteStore};
use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;

use cli::{Cli, Command};

type Manager = SessionManager<ChromeDriver>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    let (mut config, config_path) = AppConfig::load(args.config.as_deref())?;
    if args.interactive {
        config.crawler.interactive_mode = true;
    }

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.as_str()));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config_path,
        interactive = config.crawler.interactive_mode,
        "article-watch starting up"
    );

    let command = args.command();
    debug!(?command, "Parsed CLI arguments");

    match command {
        Command::Schedule { minutes } => {
            let schedule = interval_to_schedule(minutes)?;
            println!("{schedule}");
        }
        Command::Sources => {
            let store = SqliteStore::connect(&config.database.url).await?;
            for source in store.list_active().await? {
                let collected = store.count_by_source(&source.id).await?;
                println!(
                    "{}\t{}\t{}\t{} items\twatermark={}",
                    source.id, source.name, source.remote_id, collected, source.watermark
                );
            }
        }
        Command::Disable { id } => {
            let store = SqliteStore::connect(&config.database.url).await?;
            store.disable(&id).await?;
            println!("disabled {id}");
        }
        Command::Login => {
            let manager = open_session(&config).await?;
            let result = manager.login().await;
            close_session(manager).await;
            result?;
            println!("session saved to {}", config.crawler.session_file.display());
        }
        Command::Subscribe { name, alias } => {
            let store = Arc::new(SqliteStore::connect(&config.database.url).await?);
            let manager = open_session(&config).await?;
            let result = async {
                manager.login().await?;
                orchestrator(&config, &manager, &store)
                    .subscribe(&name, alias.as_deref())
                    .await
            }
            .await;
            close_session(manager).await;
            let source = result?;
            println!("{}\t{}\t{}", source.id, source.name, source.remote_id);
        }
        Command::Crawl => {
            let store = Arc::new(SqliteStore::connect(&config.database.url).await?);
            let manager = open_session(&config).await?;
            let result = async {
                manager.login().await?;
                orchestrator(&config, &manager, &store).fetch_all().await
            }
            .await;
            close_session(manager).await;
            let report = result?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Run => {
            let store = Arc::new(SqliteStore::connect(&config.database.url).await?);
            let manager = open_session(&config).await?;
            let result = run_service(&config, &manager, &store).await;
            close_session(manager).await;
            result?;
        }
    }

    let elapsed = start_time.elapsed();
    info!(elapsed_secs = elapsed.as_secs_f64(), "article-watch finished");
    Ok(())
}

/// Launch the browser and wrap it in a session manager whose cancellation
/// token fires on Ctrl-C.
async fn open_session(config: &AppConfig) -> Result<Arc<Manager>, Box<dyn Error>> {
    let driver = ChromeDriver::launch(&config.launch_options()).await?;
    let store = SessionStore::new(&config.crawler.session_file);
    let manager = Arc::new(SessionManager::new(driver, store, config.session_config()));
    watch_interrupt(manager.cancellation_token());
    Ok(manager)
}

fn watch_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Could not listen for Ctrl-C");
                    return;
                }
                info!("Interrupt received; cancelling pending waits");
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    });
}

async fn close_session(manager: Arc<Manager>) {
    manager.cancellation_token().cancel();
    match Arc::try_unwrap(manager) {
        Ok(manager) => {
            if let Err(e) = manager.into_driver().close().await {
                warn!(error = %e, "Browser did not close cleanly");
            }
        }
        Err(_) => debug!("Session still shared; browser closes on drop"),
    }
}

fn orchestrator(
    config: &AppConfig,
    manager: &Arc<Manager>,
    store: &Arc<SqliteStore>,
) -> CrawlOrchestrator {
    CrawlOrchestrator::new(
        manager.clone(),
        store.clone(),
        store.clone(),
        config.crawl_settings(),
    )
}

/// Log in, crawl once, then keep crawling on schedule until Ctrl-C.
async fn run_service(
    config: &AppConfig,
    manager: &Arc<Manager>,
    store: &Arc<SqliteStore>,
) -> Result<(), Box<dyn Error>> {
    manager.login().await?;

    let notifier = if config.notifier.enabled {
        let notifier: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new(&config.notifier.webhook_url)?);
        Some((notifier, config.notifier.clone()))
    } else {
        info!("Digest notifications disabled");
        None
    };
    let items: Arc<dyn ItemRepository> = store.clone();

    let scheduler = CrawlScheduler::start(
        orchestrator(config, manager, store),
        config.crawler.interval_minutes,
        items,
        notifier,
    )
    .await?;

    match scheduler.run_once().await {
        Ok(Some(report)) => info!(new_items = report.new_items, failed = report.failed, "Initial crawl pass done"),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Initial crawl pass failed"),
    }

    info!("Running; press Ctrl-C to stop");
    manager.cancellation_token().cancelled().await;

    scheduler.shutdown().await?;
    Ok(())
}
