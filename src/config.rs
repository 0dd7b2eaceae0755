//! YAML configuration.
//!
//! Every section and field has a default, so an empty or partial file is
//! valid and no file at all yields [`AppConfig::default`].
//!
//! ```yaml
//! crawler:
//!   interval_minutes: 30
//!   concurrency: 3
//!   session_file: ./cookie.json
//! database:
//!   url: sqlite://article_watch.db
//! notifier:
//!   enabled: true
//!   period: daily
//!   notify_time: "09:00"
//!   webhook_url: https://open.example.com/hook/abc
//! ```

use crate::crawler::CrawlSettings;
use crate::driver::chrome::LaunchOptions;
use crate::error::{CrawlError, Result};
use crate::models::NotifierConfig;
use crate::session::SessionConfig;
use crate::session::manager::default_unavailable_markers;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Files tried, in order, when no path is given.
pub const DEFAULT_LOCATIONS: [&str; 3] = [
    "./config/config.yaml",
    "../config/config.yaml",
    "./config.yaml",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub crawler: CrawlerSection,
    pub platform: PlatformSection,
    pub database: DatabaseSection,
    pub notifier: NotifierConfig,
    pub log: LogSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerSection {
    /// Minutes between scheduled passes, `5..=1440`.
    pub interval_minutes: u32,
    pub concurrency: usize,
    /// Item summaries requested per source and pass.
    pub page_size: u32,
    pub timeout_secs: u64,
    pub login_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub settle_delay_ms: u64,
    pub settle_jitter_ms: u64,
    pub session_file: PathBuf,
    /// Suspend timeouts so an operator can work in the browser window.
    pub interactive_mode: bool,
    pub headless: bool,
}

impl Default for CrawlerSection {
    fn default() -> Self {
        Self {
            interval_minutes: 10,
            concurrency: 3,
            page_size: 10,
            timeout_secs: 60,
            login_timeout_secs: 120,
            poll_interval_ms: 1000,
            settle_delay_ms: 2000,
            settle_jitter_ms: 500,
            session_file: PathBuf::from("./cookie.json"),
            interactive_mode: false,
            headless: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSection {
    pub home_url: String,
    pub authenticated_markers: Vec<String>,
    pub token_param: String,
    pub content_selector: String,
    pub unavailable_title_markers: Vec<String>,
}

impl Default for PlatformSection {
    fn default() -> Self {
        Self {
            home_url: "https://mp.weixin.qq.com".to_string(),
            authenticated_markers: vec!["home".to_string(), "cgi-bin".to_string()],
            token_param: "token".to_string(),
            content_selector: "#js_content".to_string(),
            unavailable_title_markers: default_unavailable_markers(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite://article_watch.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from the first of [`DEFAULT_LOCATIONS`] that exists.
    ///
    /// # Returns
    ///
    /// The parsed configuration and the file it came from; `None` when no
    /// file was found and defaults are in use.
    ///
    /// # Errors
    ///
    /// [`CrawlError::Config`] when an explicit path is missing, a file cannot
    /// be parsed, or the values are inconsistent.
    pub fn load(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let found = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(CrawlError::Config(format!("{} does not exist", path.display())));
                }
                Some(path.to_path_buf())
            }
            None => DEFAULT_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.is_file()),
        };

        let Some(found) = found else {
            info!("No configuration file found; using defaults");
            return Ok((Self::default(), None));
        };

        let raw = std::fs::read_to_string(&found)
            .map_err(|e| CrawlError::Config(format!("reading {}: {e}", found.display())))?;
        let config = Self::from_yaml(&raw)
            .map_err(|e| CrawlError::Config(format!("{}: {e}", found.display())))?;
        info!(path = %found.display(), "Loaded configuration");
        Ok((config, Some(found)))
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        // An empty document deserializes to null; treat it as all defaults.
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw).map_err(|e| CrawlError::Config(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.crawler.concurrency == 0 {
            return Err(CrawlError::Config("crawler.concurrency must be at least 1".to_string()));
        }
        if self.crawler.page_size == 0 {
            return Err(CrawlError::Config("crawler.page_size must be at least 1".to_string()));
        }
        if self.platform.authenticated_markers.iter().all(|m| m.trim().is_empty()) {
            return Err(CrawlError::Config(
                "platform.authenticated_markers needs at least one marker".to_string(),
            ));
        }
        if self.notifier.enabled && self.notifier.webhook_url.trim().is_empty() {
            return Err(CrawlError::Config(
                "notifier.enabled requires notifier.webhook_url".to_string(),
            ));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        let crawler = &self.crawler;
        let platform = &self.platform;
        SessionConfig {
            home_url: platform.home_url.clone(),
            op_timeout: Duration::from_secs(crawler.timeout_secs),
            login_timeout: Duration::from_secs(crawler.login_timeout_secs),
            poll_interval: Duration::from_millis(crawler.poll_interval_ms),
            settle_delay: Duration::from_millis(crawler.settle_delay_ms),
            settle_jitter: Duration::from_millis(crawler.settle_jitter_ms),
            interactive_mode: crawler.interactive_mode,
            authenticated_markers: platform.authenticated_markers.clone(),
            token_param: platform.token_param.clone(),
            content_selector: platform.content_selector.clone(),
            unavailable_title_markers: platform.unavailable_title_markers.clone(),
            ..SessionConfig::default()
        }
    }

    pub fn crawl_settings(&self) -> CrawlSettings {
        CrawlSettings {
            concurrency: self.crawler.concurrency,
            page_size: self.crawler.page_size,
        }
    }

    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            headless: self.crawler.headless,
            request_timeout: Duration::from_secs(self.crawler.timeout_secs),
            ..LaunchOptions::default()
        }
    }
}
