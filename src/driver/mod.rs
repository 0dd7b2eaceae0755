//! Page-automation capability consumed by the session manager.
//!
//! The crawler never talks to a browser directly. Everything it needs is
//! expressed by the [`Driver`] trait: navigation, cookie access, URL/title
//! inspection, script evaluation and selector-based extraction. Every call
//! takes a [`Deadline`] so bounded and unbounded modes share one code path.
//!
//! # Implementations
//!
//! | Type | Module | Notes |
//! |------|--------|-------|
//! | [`ChromeDriver`] | [`chrome`] | Chromium over CDP via `chromiumoxide` |

pub mod chrome;

#[cfg(test)]
pub(crate) mod fake;

use crate::error::{CrawlError, Result};
use crate::session::Cookie;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

pub use chrome::ChromeDriver;

/// Upper bound for a single driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Fail with [`CrawlError::DriverTimeout`] once this instant passes.
    At(Instant),
    /// No bound; only an external cancellation ends the wait.
    Never,
}

impl Deadline {
    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Deadline::At(Instant::now() + timeout)
    }

    /// Run `fut` under this deadline.
    pub async fn run<T, F>(self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self {
            Deadline::At(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| CrawlError::DriverTimeout)?,
            Deadline::Never => fut.await,
        }
    }
}

/// Browser capabilities the crawler relies on.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Navigate and wait until the navigation settles.
    async fn navigate(&self, url: &str, deadline: Deadline) -> Result<()>;

    /// All cookies visible to the current page.
    async fn cookies(&self, deadline: Deadline) -> Result<Vec<Cookie>>;

    /// Install a single cookie.
    async fn set_cookie(&self, cookie: &Cookie, deadline: Deadline) -> Result<()>;

    async fn current_url(&self, deadline: Deadline) -> Result<String>;

    async fn page_title(&self, deadline: Deadline) -> Result<String>;

    /// Evaluate a script and return its result as a string.
    async fn evaluate(&self, script: &str, deadline: Deadline) -> Result<String>;

    /// Visible text of the first element matching `selector`.
    async fn extract_text(&self, selector: &str, deadline: Deadline) -> Result<String>;

    /// Outer HTML of the first element matching `selector`.
    async fn extract_html(&self, selector: &str, deadline: Deadline) -> Result<String>;

    async fn element_exists(&self, selector: &str, deadline: Deadline) -> Result<bool>;
}
