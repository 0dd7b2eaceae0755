//! Scripted in-process driver for tests.

use super::{Deadline, Driver};
use crate::error::{CrawlError, Result};
use crate::session::Cookie;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// What a navigation to a matching URL produces.
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    /// URL the browser ends up on; `None` keeps the requested URL.
    pub landing_url: Option<String>,
    pub title: String,
    pub body: String,
    /// Outer HTML of the content selector, `None` when absent.
    pub content_html: Option<String>,
}

#[derive(Default)]
struct State {
    routes: Vec<(String, FakePage)>,
    current_url: String,
    current: FakePage,
    scripted_urls: VecDeque<String>,
    jar: Vec<Cookie>,
    rejected_cookies: HashSet<String>,
    navigations: Vec<String>,
    evaluate_result: Option<String>,
    current_url_stalls: bool,
}

#[derive(Default)]
pub struct FakeDriver {
    state: Mutex<State>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `page` for every URL starting with `prefix`; the longest prefix wins.
    pub fn route(&self, prefix: &str, page: FakePage) {
        self.state.lock().unwrap().routes.push((prefix.to_string(), page));
    }

    /// URLs returned by successive `current_url` calls before falling back to
    /// the navigated URL; models a user completing a login in the window.
    pub fn script_urls(&self, urls: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.scripted_urls = urls.iter().map(|u| u.to_string()).collect();
    }

    pub fn add_cookie(&self, cookie: Cookie) {
        self.state.lock().unwrap().jar.push(cookie);
    }

    pub fn reject_cookie(&self, name: &str) {
        self.state.lock().unwrap().rejected_cookies.insert(name.to_string());
    }

    pub fn set_evaluate_result(&self, value: &str) {
        self.state.lock().unwrap().evaluate_result = Some(value.to_string());
    }

    /// Make every later `current_url` call hang until it is dropped.
    pub fn stall_current_url(&self) {
        self.state.lock().unwrap().current_url_stalls = true;
    }

    pub fn jar(&self) -> Vec<Cookie> {
        self.state.lock().unwrap().jar.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn navigate(&self, url: &str, _deadline: Deadline) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.navigations.push(url.to_string());
        let page = state
            .routes
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, page)| page.clone())
            .unwrap_or_default();
        state.current_url = page.landing_url.clone().unwrap_or_else(|| url.to_string());
        state.current = page;
        Ok(())
    }

    async fn cookies(&self, _deadline: Deadline) -> Result<Vec<Cookie>> {
        Ok(self.jar())
    }

    async fn set_cookie(&self, cookie: &Cookie, _deadline: Deadline) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.rejected_cookies.contains(&cookie.name) {
            return Err(CrawlError::Driver(format!("cookie {} rejected", cookie.name)));
        }
        state.jar.push(cookie.clone());
        Ok(())
    }

    async fn current_url(&self, _deadline: Deadline) -> Result<String> {
        if self.state.lock().unwrap().current_url_stalls {
            return std::future::pending().await;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(next) = state.scripted_urls.pop_front() {
            state.current_url = next;
        }
        Ok(state.current_url.clone())
    }

    async fn page_title(&self, _deadline: Deadline) -> Result<String> {
        Ok(self.state.lock().unwrap().current.title.clone())
    }

    async fn evaluate(&self, _script: &str, _deadline: Deadline) -> Result<String> {
        let state = self.state.lock().unwrap();
        Ok(state
            .evaluate_result
            .clone()
            .unwrap_or_else(|| state.current.body.clone()))
    }

    async fn extract_text(&self, _selector: &str, _deadline: Deadline) -> Result<String> {
        Ok(self.state.lock().unwrap().current.body.clone())
    }

    async fn extract_html(&self, selector: &str, _deadline: Deadline) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .current
            .content_html
            .clone()
            .ok_or_else(|| CrawlError::Driver(format!("no element matches {selector}")))
    }

    async fn element_exists(&self, _selector: &str, _deadline: Deadline) -> Result<bool> {
        Ok(self.state.lock().unwrap().current.content_html.is_some())
    }
}
