//! Durable storage for the authenticated session bundle.
//!
//! The bundle is written as pretty JSON:
//!
//! ```text
//! {
//!   "cookies": [{ "name": "...", "value": "...", "domain": "...", "path": "/",
//!                 "expires": 1767225600, "httpOnly": true, "secure": true,
//!                 "sameSite": "Lax" }],
//!   "token": "1823459"
//! }
//! ```
//!
//! Files written by older releases hold only the cookie array at the top
//! level. Those still load, with an empty token.

use crate::error::{CrawlError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument, warn};

use crate::utils::mask_token;

/// A browser cookie as persisted in the session file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    /// Expiry as unix seconds; `0` or negative for session cookies.
    #[serde(default)]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: String,
}

/// Cookies plus the auth token derived from them; persisted as one unit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionBundle {
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub token: String,
}

impl SessionBundle {
    pub fn new(cookies: Vec<Cookie>, token: impl Into<String>) -> Self {
        Self {
            cookies,
            token: token.into(),
        }
    }

    pub fn has_cookies(&self) -> bool {
        !self.cookies.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredSession {
    Bundle(SessionBundle),
    Legacy(Vec<Cookie>),
}

/// Reads and writes the [`SessionBundle`] file.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted bundle.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when no file exists (first run), the parsed bundle
    /// otherwise. A legacy cookie-array file yields a bundle with an empty
    /// token.
    ///
    /// # Errors
    ///
    /// [`CrawlError::Storage`] when the file cannot be read,
    /// [`CrawlError::Decode`] when it matches neither format.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<Option<SessionBundle>> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No session file yet; a fresh login is required");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let bundle = match serde_json::from_slice::<StoredSession>(&data)? {
            StoredSession::Bundle(bundle) => bundle,
            StoredSession::Legacy(cookies) => {
                info!(count = cookies.len(), "Loaded legacy cookie file without token");
                SessionBundle::new(cookies, "")
            }
        };

        info!(
            cookie_count = bundle.cookies.len(),
            token = %mask_token(&bundle.token),
            "Session loaded"
        );
        Ok(Some(bundle))
    }

    /// Persist the whole bundle, replacing any previous file.
    ///
    /// Writes to a sibling temp file and renames it over the target so a
    /// crash mid-write never leaves a truncated session behind.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub async fn save(&self, bundle: &SessionBundle) -> Result<()> {
        if !bundle.token.is_empty() && bundle.cookies.is_empty() {
            warn!("Saving a token without cookies");
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let data = serde_json::to_vec_pretty(bundle)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &self.path).await.map_err(|e| {
            CrawlError::Storage(format!("replacing {}: {e}", self.path.display()))
        })?;

        info!(
            cookie_count = bundle.cookies.len(),
            token = %mask_token(&bundle.token),
            "Session saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cookie(name: &str) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: "v".to_string(),
            domain: ".mp.example.com".to_string(),
            path: "/".to_string(),
            expires: 1767225600.0,
            http_only: true,
            secure: true,
            same_site: "Lax".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("cookie.json"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_then_load_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested/cookie.json"));
        let bundle = SessionBundle::new(vec![sample_cookie("slave_sid")], "1823459");

        store.save(&bundle).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, bundle);
    }

    #[tokio::test]
    async fn test_legacy_cookie_array_loads_with_empty_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookie.json");
        let legacy = r#"[
            {"name": "slave_sid", "value": "abc", "domain": ".mp.example.com",
             "path": "/", "expires": 1767225600, "httpOnly": true,
             "secure": true, "sameSite": "Lax"}
        ]"#;
        tokio::fs::write(&path, legacy).await.unwrap();

        let loaded = SessionStore::new(&path).load().await.unwrap().unwrap();
        assert_eq!(loaded.token, "");
        assert_eq!(loaded.cookies.len(), 1);
        assert_eq!(loaded.cookies[0].name, "slave_sid");
        assert!(loaded.cookies[0].http_only);
    }

    #[tokio::test]
    async fn test_bundle_with_empty_token_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookie.json");
        tokio::fs::write(&path, r#"{"cookies": [{"name": "a", "value": "b"}], "token": ""}"#)
            .await
            .unwrap();

        let loaded = SessionStore::new(&path).load().await.unwrap().unwrap();
        assert_eq!(loaded.cookies.len(), 1);
        assert!(loaded.token.is_empty());
    }

    #[tokio::test]
    async fn test_garbage_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookie.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let err = SessionStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, CrawlError::Decode(_)));
    }
}
