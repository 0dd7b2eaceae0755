//! Utility functions for logging, URL inspection, HTML checks and polling.
//!
//! This module provides helpers used throughout the crate:
//! - String truncation and token masking for logging
//! - Query-parameter extraction from landing URLs
//! - Visible-content detection for extracted HTML fragments
//! - A poll-with-timeout loop with explicit cancellation
//! - Jittered settle delays between browser navigations

use rand::{Rng, rng};
use scraper::{Html, Selector};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to at most `max` bytes (on a character
/// boundary) with an ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log("a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Mask a session token so only its first characters reach the logs.
pub fn mask_token(token: &str) -> String {
    if token.is_empty() {
        return "<empty>".to_string();
    }
    let visible: String = token.chars().take(4).collect();
    format!("{visible}***")
}

/// Read a single query parameter from a URL.
///
/// Returns `None` when the URL does not parse or the parameter is absent or
/// empty.
pub fn query_param(raw_url: &str, key: &str) -> Option<String> {
    let parsed = Url::parse(raw_url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// Check whether an HTML fragment carries anything a reader would see.
///
/// A fragment counts as content when it has non-whitespace text or embeds
/// media (`img`, `video`, `iframe`). Items whose content node is an empty
/// shell are treated as unavailable.
pub fn html_has_content(html: &str) -> bool {
    if html.trim().is_empty() {
        return false;
    }
    let fragment = Html::parse_fragment(html);
    let has_text = fragment
        .root_element()
        .text()
        .any(|chunk| !chunk.trim().is_empty());
    if has_text {
        return true;
    }
    match Selector::parse("img, video, iframe") {
        Ok(media) => fragment.select(&media).next().is_some(),
        Err(_) => false,
    }
}

/// Parameters of a [`poll_until`] loop.
#[derive(Debug, Clone, Copy)]
pub struct PollSpec {
    /// Delay between checks.
    pub interval: Duration,
    /// Overall bound; `None` polls until success or cancellation.
    pub timeout: Option<Duration>,
}

/// How a [`poll_until`] loop ended.
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut,
    Cancelled,
}

/// Repeatedly run `check` until it yields a value, the bound elapses, or
/// `cancel` fires.
///
/// The cancellation token is checked before every attempt and raced against
/// every sleep, so an unbounded poll still ends promptly once cancelled.
pub async fn poll_until<T, F, Fut>(
    spec: PollSpec,
    cancel: &CancellationToken,
    mut check: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = spec.timeout.map(|t| Instant::now() + t);
    let mut attempts = 0u64;

    loop {
        if cancel.is_cancelled() {
            debug!(attempts, "poll cancelled");
            return PollOutcome::Cancelled;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                debug!(attempts, "poll timed out");
                return PollOutcome::TimedOut;
            }
        }

        attempts += 1;
        if let Some(value) = check().await {
            trace!(attempts, "poll succeeded");
            return PollOutcome::Ready(value);
        }

        tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = sleep(spec.interval) => {}
        }
    }
}

/// Sleep for `base` plus up to `jitter` extra, so consecutive navigations do
/// not arrive at a fixed cadence.
pub async fn settle(base: Duration, jitter: Duration) {
    let jitter_ms = jitter.as_millis() as u64;
    let extra = if jitter_ms == 0 {
        0
    } else {
        rng().random_range(0..=jitter_ms)
    };
    sleep(base + Duration::from_millis(extra)).await;
}
