//! # article_watch
//!
//! Follows publisher accounts on a platform that only exposes their content
//! through an authenticated, browser-driven back-office, and collects newly
//! published items into a local store.
//!
//! ## Architecture
//!
//! 1. **Session**: [`session::SessionManager`] owns the browser
//!    ([`driver::Driver`]), reuses persisted cookies or falls back to an
//!    interactive QR login, and serializes all remote calls
//! 2. **Crawl**: [`crawler::CrawlOrchestrator`] fans out over active sources,
//!    detects new items by watermark and content URL, and persists them
//! 3. **Storage**: [`storage::SqliteStore`] implements the source and item
//!    repositories
//! 4. **Schedule**: [`schedule`] turns intervals into cron expressions and
//!    [`scheduler::CrawlScheduler`] runs passes and digests on them

pub mod config;
pub mod crawler;
pub mod driver;
pub mod error;
pub mod models;
pub mod notify;
pub mod platform;
pub mod schedule;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod utils;

pub use error::{CrawlError, Result};
