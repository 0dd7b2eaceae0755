//! Session manager: login state machine and driver-gated remote operations.
//!
//! The manager owns the live token and the driver's authenticated state.
//! Every public operation takes the same exclusive lock for its whole
//! duration, so all browser traffic is strictly sequential no matter how many
//! crawl workers are waiting. This lock, not the orchestrator's worker cap,
//! bounds throughput.
//!
//! # Wait modes
//!
//! With `interactive_mode` off, every driver call gets a deadline and the QR
//! login is bounded by `login_timeout`. With it on, deadlines are dropped so
//! an operator can work in the browser window; the only way out of a long
//! wait is then the manager's [`CancellationToken`].

use crate::crawler::RemoteCatalog;
use crate::driver::{Deadline, Driver};
use crate::error::{CrawlError, Result};
use crate::models::RemoteItemSummary;
use crate::platform;
use crate::session::store::{SessionBundle, SessionStore};
use crate::utils::{
    PollOutcome, PollSpec, html_has_content, mask_token, poll_until, query_param, settle,
    truncate_for_log,
};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Script returning the page's session token, or an empty string.
const TOKEN_SCRIPT: &str = "(window.wx && window.wx.data && window.wx.data.t) || ''";

/// Script returning the raw body text of a JSON endpoint.
const BODY_TEXT_SCRIPT: &str = "document.body.textContent || document.body.innerText";

/// Tunables for [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Back-office home; also the login page.
    pub home_url: String,
    /// Bound for a single driver call in bounded mode.
    pub op_timeout: Duration,
    /// Bound for the interactive QR login in bounded mode.
    pub login_timeout: Duration,
    /// Bound for reading the token from the page.
    pub token_timeout: Duration,
    pub poll_interval: Duration,
    /// Pause after each navigation before reading the page.
    pub settle_delay: Duration,
    /// Random extra pause added to `settle_delay`.
    pub settle_jitter: Duration,
    /// Suspend all deadlines; only cancellation ends waits.
    pub interactive_mode: bool,
    /// Substrings identifying a URL inside the authenticated area.
    pub authenticated_markers: Vec<String>,
    /// Query parameter carrying the token on authenticated URLs.
    pub token_param: String,
    /// Selector of the item body on a detail page.
    pub content_selector: String,
    /// Page titles containing any of these mean the item is gone.
    pub unavailable_title_markers: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            home_url: "https://mp.weixin.qq.com".to_string(),
            op_timeout: Duration::from_secs(60),
            login_timeout: Duration::from_secs(120),
            token_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            settle_delay: Duration::from_secs(2),
            settle_jitter: Duration::from_millis(500),
            interactive_mode: false,
            authenticated_markers: vec!["home".to_string(), "cgi-bin".to_string()],
            token_param: "token".to_string(),
            content_selector: "#js_content".to_string(),
            unavailable_title_markers: default_unavailable_markers(),
        }
    }
}

/// Titles the platform shows for deleted, blocked or missing items.
pub fn default_unavailable_markers() -> Vec<String> {
    [
        "404",
        "页面不存在",
        "已删除",
        "此内容发送失败无法查看",
        "微信公众平台",
        "该内容暂时无法查看",
        "已被删除",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Where the login state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Unauthenticated,
    Authenticated,
}

#[derive(Debug, Default)]
struct SessionState {
    phase: SessionPhase,
    token: String,
}

impl SessionState {
    fn require_token(&self) -> Result<String> {
        if self.token.is_empty() {
            Err(CrawlError::NotAuthenticated)
        } else {
            Ok(self.token.clone())
        }
    }

    fn invalidate(&mut self, reason: &str) {
        warn!(reason, "Session invalidated");
        self.phase = SessionPhase::Unauthenticated;
        self.token.clear();
    }
}

/// Owns the authenticated session and serializes every driver interaction.
pub struct SessionManager<D> {
    driver: D,
    store: SessionStore,
    config: SessionConfig,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
}

impl<D: Driver> SessionManager<D> {
    pub fn new(driver: D, store: SessionStore, config: SessionConfig) -> Self {
        Self {
            driver,
            store,
            config,
            state: Mutex::new(SessionState::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts any wait in progress, bounded or not.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub async fn phase(&self) -> SessionPhase {
        self.state.lock().await.phase
    }

    pub async fn has_token(&self) -> bool {
        !self.state.lock().await.token.is_empty()
    }

    /// Give the driver back, e.g. to close the browser on shutdown.
    pub fn into_driver(self) -> D {
        self.driver
    }

    fn deadline(&self, timeout: Duration) -> Deadline {
        if self.config.interactive_mode {
            Deadline::Never
        } else {
            Deadline::after(timeout)
        }
    }

    async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CrawlError::Cancelled),
            result = fut => result,
        }
    }

    fn is_authenticated_url(&self, url: &str) -> bool {
        self.config
            .authenticated_markers
            .iter()
            .any(|marker| url.contains(marker.as_str()))
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.guard(self.driver.navigate(url, self.deadline(self.config.op_timeout)))
            .await?;
        settle(self.config.settle_delay, self.config.settle_jitter).await;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        self.guard(self.driver.current_url(self.deadline(self.config.op_timeout)))
            .await
    }

    /// Establish an authenticated session.
    ///
    /// Tries the persisted cookies first; when there are none or they are
    /// rejected, falls back to interactive QR login.
    ///
    /// # Errors
    ///
    /// [`CrawlError::LoginTimeout`] when the QR login is not completed in
    /// time, [`CrawlError::Cancelled`] when the cancellation token fires,
    /// driver errors from navigation.
    #[instrument(level = "info", skip_all)]
    pub async fn login(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.login_locked(&mut state).await
    }

    /// Log in again unless the session is already authenticated.
    ///
    /// Stored cookies are tried first, so a session dropped by the remote
    /// side usually recovers without an operator.
    #[instrument(level = "info", skip_all)]
    pub async fn ensure_session(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.phase == SessionPhase::Authenticated {
            return Ok(());
        }
        info!("Session not authenticated; logging in again");
        self.login_locked(&mut state).await
    }

    async fn login_locked(&self, state: &mut MutexGuard<'_, SessionState>) -> Result<()> {
        info!(home = %self.config.home_url, "Starting login");

        match self.store.load().await {
            Ok(Some(bundle)) if bundle.has_cookies() => {
                info!(cookie_count = bundle.cookies.len(), "Trying stored cookies");
                match self.login_with_cookies(state, bundle).await {
                    Ok(()) => return Ok(()),
                    Err(CrawlError::Cancelled) => return Err(CrawlError::Cancelled),
                    Err(e) => warn!(error = %e, "Cookie login failed; interactive login needed"),
                }
            }
            Ok(_) => info!("No stored cookies; interactive login needed"),
            Err(e) => warn!(error = %e, "Stored session unreadable; interactive login needed"),
        }

        self.login_with_qr_code(state).await
    }

    async fn login_with_cookies(
        &self,
        state: &mut MutexGuard<'_, SessionState>,
        mut bundle: SessionBundle,
    ) -> Result<()> {
        // The cookie domain only exists once a page of it is loaded.
        self.guard(self.driver.navigate(&self.config.home_url, self.deadline(self.config.op_timeout)))
            .await?;

        for cookie in &bundle.cookies {
            let deadline = self.deadline(self.config.op_timeout);
            match self.guard(self.driver.set_cookie(cookie, deadline)).await {
                Ok(()) => {}
                Err(CrawlError::Cancelled) => return Err(CrawlError::Cancelled),
                Err(e) => warn!(name = %cookie.name, error = %e, "Failed to set cookie"),
            }
        }

        self.navigate(&self.config.home_url).await?;
        let landing = self.current_url().await?;
        if !self.is_authenticated_url(&landing) {
            state.phase = SessionPhase::Unauthenticated;
            return Err(CrawlError::CookieRejected(landing));
        }
        info!(url = %landing, "Cookie login succeeded");

        if !bundle.token.is_empty() {
            state.token = bundle.token.clone();
            info!(token = %mask_token(&state.token), "Using stored token");
        } else if let Some(token) = query_param(&landing, &self.config.token_param) {
            info!(token = %mask_token(&token), "Token recovered from landing URL");
            state.token = token.clone();
            bundle.token = token;
            if let Err(e) = self.store.save(&bundle).await {
                warn!(error = %e, "Failed to persist recovered token");
            }
        } else {
            state.token.clear();
            let missing = CrawlError::TokenExtractionFailed { url: landing };
            warn!(error = %missing, "Logged in without a token; remote calls will fail");
        }

        state.phase = SessionPhase::Authenticated;
        Ok(())
    }

    async fn login_with_qr_code(&self, state: &mut MutexGuard<'_, SessionState>) -> Result<()> {
        info!(
            interactive = self.config.interactive_mode,
            "Scan the QR code in the browser window to log in"
        );
        self.navigate(&self.config.home_url).await?;

        let spec = PollSpec {
            interval: self.config.poll_interval,
            timeout: (!self.config.interactive_mode).then_some(self.config.login_timeout),
        };
        let url_timeout = self.config.op_timeout;
        let outcome = poll_until(spec, &self.cancel, || async move {
            match self.guard(self.driver.current_url(self.deadline(url_timeout))).await {
                Ok(url) if self.is_authenticated_url(&url) => Some(url),
                Ok(_) => None,
                Err(CrawlError::Cancelled) => None,
                Err(e) => {
                    debug!(error = %e, "Reading current URL failed while polling");
                    None
                }
            }
        })
        .await;

        let landing = match outcome {
            PollOutcome::Ready(url) => url,
            PollOutcome::TimedOut => {
                state.phase = SessionPhase::Unauthenticated;
                return Err(CrawlError::LoginTimeout(self.config.login_timeout));
            }
            PollOutcome::Cancelled => return Err(CrawlError::Cancelled),
        };
        info!(url = %landing, "Interactive login detected");

        // Give the back-office a moment to finish setting its cookies.
        tokio::time::sleep(self.config.poll_interval).await;
        let cookies = self
            .guard(self.driver.cookies(self.deadline(self.config.op_timeout)))
            .await?;

        match query_param(&landing, &self.config.token_param) {
            Some(token) => {
                info!(token = %mask_token(&token), "Token extracted");
                state.token = token;
            }
            None => {
                state.token.clear();
                let missing = CrawlError::TokenExtractionFailed {
                    url: landing.clone(),
                };
                warn!(error = %missing, "Logged in without a token; remote calls will fail");
            }
        }
        state.phase = SessionPhase::Authenticated;

        let bundle = SessionBundle::new(cookies, state.token.clone());
        if let Err(e) = self.store.save(&bundle).await {
            warn!(error = %e, "Failed to persist session");
        }
        info!(cookie_count = bundle.cookies.len(), "Interactive login succeeded");
        Ok(())
    }

    /// Navigate to a JSON endpoint and read its body, detecting a bounce out
    /// of the authenticated area.
    async fn read_endpoint(&self, state: &mut SessionState, url: &str) -> Result<String> {
        self.navigate(url).await?;
        let landing = self.current_url().await?;
        if !self.is_authenticated_url(&landing) {
            state.invalidate("redirected out of the authenticated area");
            return Err(CrawlError::NotAuthenticated);
        }
        let body = self
            .guard(
                self.driver
                    .evaluate(BODY_TEXT_SCRIPT, self.deadline(self.config.op_timeout)),
            )
            .await?;
        if !body.trim().is_empty() {
            return Ok(body);
        }
        self.guard(
            self.driver
                .extract_text("body", self.deadline(self.config.op_timeout)),
        )
        .await
    }

    /// Convert an invalid-session remote status into a state transition.
    fn check_remote<T>(state: &mut SessionState, result: Result<T>) -> Result<T> {
        match result {
            Err(CrawlError::Remote { code, message }) if code == platform::INVALID_SESSION_CODE => {
                state.invalidate(&message);
                Err(CrawlError::NotAuthenticated)
            }
            other => other,
        }
    }

    /// Look up a source on the remote system and return its remote id.
    #[instrument(level = "info", skip(self))]
    pub async fn search_source(&self, name: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        let token = state.require_token()?;

        let url = platform::search_url(&self.config.home_url, name, &token);
        let body = self.read_endpoint(&mut state, &url).await?;
        debug!(response = %truncate_for_log(&body, 300), "Search response");

        let hit = Self::check_remote(&mut state, platform::parse_search(&body, name))?;
        info!(remote_id = %hit.fakeid, nickname = %hit.nickname, "Remote source found");
        Ok(hit.fakeid)
    }

    /// Fetch the newest `count` item summaries of a source, newest first.
    #[instrument(level = "info", skip(self))]
    pub async fn fetch_item_list(
        &self,
        remote_id: &str,
        count: u32,
    ) -> Result<Vec<RemoteItemSummary>> {
        let mut state = self.state.lock().await;
        let token = state.require_token()?;

        let url = platform::list_url(&self.config.home_url, remote_id, count, &token);
        let body = self.read_endpoint(&mut state, &url).await?;
        debug!(response = %truncate_for_log(&body, 300), "Item list response");

        let items = Self::check_remote(&mut state, platform::parse_list(&body))?;
        info!(count = items.len(), "Fetched item list");
        Ok(items)
    }

    /// Fetch the full content HTML of one item.
    ///
    /// # Errors
    ///
    /// [`CrawlError::ContentFetchFailed`] when the page reports the item as
    /// missing, the content node is absent, or it holds nothing visible.
    #[instrument(level = "info", skip(self))]
    pub async fn fetch_item_detail(&self, url: &str) -> Result<String> {
        let _state = self.state.lock().await;
        let unavailable = |reason: String| CrawlError::ContentFetchFailed {
            url: url.to_string(),
            reason,
        };

        self.navigate(url).await?;

        match self
            .guard(self.driver.page_title(self.deadline(self.config.op_timeout)))
            .await
        {
            Ok(title) => {
                if let Some(marker) = self
                    .config
                    .unavailable_title_markers
                    .iter()
                    .find(|m| title.contains(m.as_str()))
                {
                    warn!(%title, %marker, "Item deleted or unavailable");
                    return Err(unavailable(format!("page reports unavailable: {title}")));
                }
            }
            Err(CrawlError::Cancelled) => return Err(CrawlError::Cancelled),
            Err(e) => warn!(error = %e, "Could not read page title"),
        }

        let selector = self.config.content_selector.as_str();
        let exists = self
            .guard(
                self.driver
                    .element_exists(selector, self.deadline(self.config.op_timeout)),
            )
            .await?;
        if !exists {
            return Err(unavailable(format!("{selector} not found")));
        }

        let html = self
            .guard(
                self.driver
                    .extract_html(selector, self.deadline(self.config.op_timeout)),
            )
            .await?;
        if !html_has_content(&html) {
            return Err(unavailable("content is empty".to_string()));
        }

        info!(bytes = html.len(), "Fetched item content");
        Ok(html)
    }

    /// Read the token from the current page, refreshing the held one.
    ///
    /// Falls back to the held token when the page does not expose one.
    #[instrument(level = "info", skip(self))]
    pub async fn get_token(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        let deadline = self.deadline(self.config.token_timeout);

        match self.guard(self.driver.evaluate(TOKEN_SCRIPT, deadline)).await {
            Ok(token) if !token.is_empty() => {
                if token != state.token {
                    info!(token = %mask_token(&token), "Token refreshed from page");
                    state.token = token.clone();
                }
                Ok(token)
            }
            Err(CrawlError::Cancelled) => Err(CrawlError::Cancelled),
            outcome => {
                if let Err(e) = outcome {
                    debug!(error = %e, "Token script failed");
                }
                if state.token.is_empty() {
                    let url = match self.current_url().await {
                        Ok(url) => url,
                        Err(CrawlError::Cancelled) => return Err(CrawlError::Cancelled),
                        Err(_) => String::new(),
                    };
                    Err(CrawlError::TokenExtractionFailed { url })
                } else {
                    Ok(state.token.clone())
                }
            }
        }
    }
}

#[async_trait]
impl<D: Driver> RemoteCatalog for SessionManager<D> {
    async fn search_source(&self, name: &str) -> Result<String> {
        SessionManager::search_source(self, name).await
    }

    async fn fetch_item_list(&self, remote_id: &str, count: u32) -> Result<Vec<RemoteItemSummary>> {
        SessionManager::fetch_item_list(self, remote_id, count).await
    }

    async fn fetch_item_detail(&self, url: &str) -> Result<String> {
        SessionManager::fetch_item_detail(self, url).await
    }

    async fn ensure_session(&self) -> Result<()> {
        SessionManager::ensure_session(self).await
    }
}
