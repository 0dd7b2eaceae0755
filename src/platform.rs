//! Request URLs and response shapes of the remote publishing platform.
//!
//! The platform exposes two JSON endpoints behind the authenticated
//! back-office: account search and per-account item listing. Both are
//! reached by navigating the authenticated browser to the URL and reading the
//! page body, so the session cookies travel with every request.
//!
//! Every response carries a `base_resp` block; a non-zero `ret` is a remote
//! failure.

use crate::error::{CrawlError, Result};
use crate::models::RemoteItemSummary;
use serde::Deserialize;
use urlencoding::encode;

/// `base_resp.ret` value meaning the session is no longer valid.
pub const INVALID_SESSION_CODE: i64 = 200003;

/// Number of search hits requested; only the first one is used.
const SEARCH_PAGE_SIZE: u32 = 5;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseResp {
    #[serde(default)]
    pub ret: i64,
    #[serde(default)]
    pub err_msg: String,
}

impl BaseResp {
    fn check(&self) -> Result<()> {
        if self.ret == 0 {
            Ok(())
        } else {
            Err(CrawlError::Remote {
                code: self.ret,
                message: self.err_msg.clone(),
            })
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub fakeid: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub alias: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    base_resp: BaseResp,
    #[serde(default)]
    list: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    base_resp: BaseResp,
    #[serde(default)]
    app_msg_list: Vec<RemoteItemSummary>,
}

/// URL of the account search endpoint.
pub fn search_url(home_url: &str, query: &str, token: &str) -> String {
    format!(
        "{}/cgi-bin/searchbiz?action=search_biz&begin=0&count={}&query={}&token={}&lang=zh_CN&f=json&ajax=1",
        home_url.trim_end_matches('/'),
        SEARCH_PAGE_SIZE,
        encode(query),
        encode(token)
    )
}

/// URL of the item list endpoint for one account.
pub fn list_url(home_url: &str, remote_id: &str, count: u32, token: &str) -> String {
    format!(
        "{}/cgi-bin/appmsg?action=list_ex&begin=0&count={}&fakeid={}&type=9&token={}&lang=zh_CN&f=json&ajax=1",
        home_url.trim_end_matches('/'),
        count,
        encode(remote_id),
        encode(token)
    )
}

/// Parse a search response and return the remote id of the first hit.
///
/// # Errors
///
/// [`CrawlError::Remote`] on a non-zero `ret`, [`CrawlError::SourceNotFound`]
/// when the hit list is empty or the first hit has no id.
pub fn parse_search(body: &str, query: &str) -> Result<SearchHit> {
    let response: SearchResponse = serde_json::from_str(body.trim())?;
    response.base_resp.check()?;
    response
        .list
        .into_iter()
        .next()
        .filter(|hit| !hit.fakeid.is_empty())
        .ok_or_else(|| CrawlError::SourceNotFound(query.to_string()))
}

/// Parse an item list response, preserving the remote (newest-first) order.
pub fn parse_list(body: &str) -> Result<Vec<RemoteItemSummary>> {
    let response: ListResponse = serde_json::from_str(body.trim())?;
    response.base_resp.check()?;
    Ok(response.app_msg_list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url_encodes_query() {
        let url = search_url("https://mp.example.com/", "科技 日报", "42");
        assert!(url.starts_with("https://mp.example.com/cgi-bin/searchbiz?"));
        assert!(url.contains("query=%E7%A7%91%E6%8A%80%20%E6%97%A5%E6%8A%A5"));
        assert!(url.contains("token=42"));
    }

    #[test]
    fn test_list_url() {
        let url = list_url("https://mp.example.com", "MzA5==", 10, "42");
        assert!(url.contains("/cgi-bin/appmsg?action=list_ex"));
        assert!(url.contains("count=10"));
        assert!(url.contains("fakeid=MzA5%3D%3D"));
    }

    #[test]
    fn test_parse_search_first_hit() {
        let body = r#"{"base_resp": {"ret": 0, "err_msg": "ok"},
            "list": [{"fakeid": "MzA5", "nickname": "Daily"}, {"fakeid": "other"}]}"#;
        let hit = parse_search(body, "Daily").unwrap();
        assert_eq!(hit.fakeid, "MzA5");
        assert_eq!(hit.nickname, "Daily");
    }

    #[test]
    fn test_parse_search_no_hits() {
        let body = r#"{"base_resp": {"ret": 0}, "list": []}"#;
        let err = parse_search(body, "Nobody").unwrap_err();
        assert!(matches!(err, CrawlError::SourceNotFound(q) if q == "Nobody"));
    }

    #[test]
    fn test_parse_list_remote_error() {
        let body = r#"{"base_resp": {"ret": 200013, "err_msg": "freq control"}}"#;
        let err = parse_list(body).unwrap_err();
        assert!(matches!(err, CrawlError::Remote { code: 200013, .. }));
    }

    #[test]
    fn test_parse_list_keeps_order() {
        let body = r#"{"base_resp": {"ret": 0}, "app_msg_list": [
            {"title": "newest", "link": "u3", "create_time": 3},
            {"title": "older", "link": "u2", "create_time": 2}
        ]}"#;
        let items = parse_list(body).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content_url, "u3");
        assert_eq!(items[1].content_url, "u2");
    }

    #[test]
    fn test_parse_list_malformed_body() {
        assert!(matches!(parse_list("<html>"), Err(CrawlError::Decode(_))));
    }
}
