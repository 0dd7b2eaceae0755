//! Error taxonomy shared by the session, crawl, storage and scheduling layers.
//!
//! Every fallible operation in the crate returns [`Result`], so callers can
//! match on the variant to decide whether a failure is fatal for a whole pass,
//! fatal for a single source, or merely degrades a single item.

use std::time::Duration;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Errors produced by the crawler.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// No session token is held; `login` must succeed first.
    #[error("not authenticated: no session token held, log in first")]
    NotAuthenticated,

    /// Interactive re-authentication did not finish within its bound.
    #[error("interactive login timed out after {0:?}")]
    LoginTimeout(Duration),

    /// An unbounded wait was aborted through the cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// The browser reached the authenticated area but no token was recoverable.
    #[error("authenticated but no token found in {url}")]
    TokenExtractionFailed { url: String },

    /// Persisted cookies did not lead to the authenticated area.
    #[error("stored cookies rejected, landed on {0}")]
    CookieRejected(String),

    /// The remote system answered with a non-zero status.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    /// Item detail could not be captured.
    #[error("content unavailable for {url}: {reason}")]
    ContentFetchFailed { url: String, reason: String },

    /// Schedule interval outside the accepted range.
    #[error("interval must be between 5 and 1440 minutes, got {0}")]
    InvalidInterval(u32),

    /// Durable storage (database or session file) failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The page-automation driver reported a failure.
    #[error("driver error: {0}")]
    Driver(String),

    /// A bounded driver call ran past its deadline.
    #[error("driver operation exceeded its deadline")]
    DriverTimeout,

    /// Remote search returned no match for the given name.
    #[error("no remote source matches {0:?}")]
    SourceNotFound(String),

    /// A source with the same name is already being tracked.
    #[error("source {0:?} is already tracked")]
    AlreadyTracked(String),

    /// A remote payload or stored record could not be decoded.
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// The cron scheduler rejected a job or failed to start.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// A downstream notification could not be delivered.
    #[error("notification failed: {0}")]
    Notify(String),
}

impl From<sqlx::Error> for CrawlError {
    fn from(error: sqlx::Error) -> Self {
        CrawlError::Storage(error.to_string())
    }
}

impl From<std::io::Error> for CrawlError {
    fn from(error: std::io::Error) -> Self {
        CrawlError::Storage(error.to_string())
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for CrawlError {
    fn from(error: tokio_cron_scheduler::JobSchedulerError) -> Self {
        CrawlError::Scheduler(error.to_string())
    }
}

impl From<reqwest::Error> for CrawlError {
    fn from(error: reqwest::Error) -> Self {
        CrawlError::Notify(error.to_string())
    }
}

impl CrawlError {
    /// Whether this failure means the held session is no longer usable.
    #[must_use]
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            CrawlError::NotAuthenticated
                | CrawlError::LoginTimeout(_)
                | CrawlError::CookieRejected(_)
                | CrawlError::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = CrawlError::Remote {
            code: 200013,
            message: "freq control".to_string(),
        };
        assert_eq!(err.to_string(), "remote error 200013: freq control");
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CrawlError = io.into();
        assert!(matches!(err, CrawlError::Storage(_)));
    }

    #[test]
    fn test_session_failure_classification() {
        assert!(CrawlError::NotAuthenticated.is_session_failure());
        assert!(CrawlError::LoginTimeout(Duration::from_secs(1)).is_session_failure());
        assert!(!CrawlError::InvalidInterval(3).is_session_failure());
    }
}
