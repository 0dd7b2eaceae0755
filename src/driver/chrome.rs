//! Chromium driver backed by `chromiumoxide`.
//!
//! Launches a single browser with one working page. The CDP event handler
//! runs on its own task, which is aborted when the driver is dropped so no
//! Chrome process outlives the crawler.

use super::{Deadline, Driver};
use crate::error::{CrawlError, Result};
use crate::session::Cookie;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, CookieSameSite, TimeSinceEpoch};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Desktop user agent presented to the remote platform.
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Launch settings for [`ChromeDriver`].
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Run without a window. The first login needs a visible window to scan
    /// the QR code, so this defaults to `false`.
    pub headless: bool,
    pub request_timeout: Duration,
    /// Persistent profile directory; `None` lets Chrome use a throwaway one.
    pub user_data_dir: Option<PathBuf>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: false,
            request_timeout: Duration::from_secs(60),
            user_data_dir: None,
        }
    }
}

fn cdp_err(error: impl Display) -> CrawlError {
    CrawlError::Driver(error.to_string())
}

fn same_site_from_str(value: &str) -> Option<CookieSameSite> {
    match value.to_ascii_lowercase().as_str() {
        "strict" => Some(CookieSameSite::Strict),
        "lax" => Some(CookieSameSite::Lax),
        "none" => Some(CookieSameSite::None),
        _ => None,
    }
}

/// Chromium instance with a single working tab.
pub struct ChromeDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromeDriver {
    /// Launch Chrome and open a blank working page.
    #[instrument(level = "info", skip_all, fields(headless = options.headless))]
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(1440, 900)
            .request_timeout(options.request_timeout)
            .arg(format!("--user-agent={CHROME_USER_AGENT}"))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(dir) = &options.user_data_dir {
            builder = builder.user_data_dir(dir.clone());
        }
        let config = builder.build().map_err(CrawlError::Driver)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(cdp_err)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler event error");
                }
            }
            debug!("browser handler finished");
        });

        let page = browser.new_page("about:blank").await.map_err(cdp_err)?;
        info!("Browser launched");
        Ok(Self {
            browser,
            page,
            handler,
        })
    }

    /// Close the browser gracefully.
    pub async fn close(mut self) -> Result<()> {
        info!("Closing browser");
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "browser close failed");
        }
        Ok(())
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl Driver for ChromeDriver {
    async fn navigate(&self, url: &str, deadline: Deadline) -> Result<()> {
        deadline
            .run(async { self.page.goto(url).await.map(|_| ()).map_err(cdp_err) })
            .await
    }

    async fn cookies(&self, deadline: Deadline) -> Result<Vec<Cookie>> {
        let raw = deadline
            .run(async { self.page.get_cookies().await.map_err(cdp_err) })
            .await?;
        Ok(raw
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: c.expires,
                http_only: c.http_only,
                secure: c.secure,
                same_site: c.same_site.map(|s| format!("{s:?}")).unwrap_or_default(),
            })
            .collect())
    }

    async fn set_cookie(&self, cookie: &Cookie, deadline: Deadline) -> Result<()> {
        let mut builder = CookieParam::builder()
            .name(cookie.name.clone())
            .value(cookie.value.clone())
            .domain(cookie.domain.clone())
            .path(cookie.path.clone())
            .http_only(cookie.http_only)
            .secure(cookie.secure);
        if cookie.expires > 0.0 {
            builder = builder.expires(TimeSinceEpoch::new(cookie.expires));
        }
        if let Some(same_site) = same_site_from_str(&cookie.same_site) {
            builder = builder.same_site(same_site);
        }
        let param = builder.build().map_err(CrawlError::Driver)?;

        deadline
            .run(async { self.page.set_cookie(param).await.map(|_| ()).map_err(cdp_err) })
            .await
    }

    async fn current_url(&self, deadline: Deadline) -> Result<String> {
        deadline
            .run(async { self.page.url().await.map_err(cdp_err) })
            .await
            .map(Option::unwrap_or_default)
    }

    async fn page_title(&self, deadline: Deadline) -> Result<String> {
        deadline
            .run(async { self.page.get_title().await.map_err(cdp_err) })
            .await
            .map(Option::unwrap_or_default)
    }

    async fn evaluate(&self, script: &str, deadline: Deadline) -> Result<String> {
        let result = deadline
            .run(async { self.page.evaluate(script).await.map_err(cdp_err) })
            .await?;
        let value: serde_json::Value = result.into_value()?;
        Ok(match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    async fn extract_text(&self, selector: &str, deadline: Deadline) -> Result<String> {
        deadline
            .run(async {
                let element = self.page.find_element(selector).await.map_err(cdp_err)?;
                let text = element.inner_text().await.map_err(cdp_err)?;
                Ok(text.unwrap_or_default())
            })
            .await
    }

    async fn extract_html(&self, selector: &str, deadline: Deadline) -> Result<String> {
        deadline
            .run(async {
                let element = self.page.find_element(selector).await.map_err(cdp_err)?;
                let html = element.outer_html().await.map_err(cdp_err)?;
                Ok(html.unwrap_or_default())
            })
            .await
    }

    async fn element_exists(&self, selector: &str, deadline: Deadline) -> Result<bool> {
        deadline
            .run(async {
                let found = self.page.find_elements(selector).await.map_err(cdp_err)?;
                Ok(!found.is_empty())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_site_parsing() {
        assert!(matches!(same_site_from_str("Lax"), Some(CookieSameSite::Lax)));
        assert!(matches!(same_site_from_str("strict"), Some(CookieSameSite::Strict)));
        assert!(matches!(same_site_from_str("None"), Some(CookieSameSite::None)));
        assert!(same_site_from_str("").is_none());
    }

    #[test]
    fn test_default_launch_is_headful() {
        let options = LaunchOptions::default();
        assert!(!options.headless);
        assert!(options.user_data_dir.is_none());
    }
}
