//! Data models for tracked sources and the items collected from them.
//!
//! This module defines the core data structures used throughout the crate:
//! - [`TrackedSource`]: A remote account the crawler follows
//! - [`RemoteItemSummary`]: Listing-stage representation returned by the remote system
//! - [`CollectedItem`]: A persisted item, unique by content URL
//! - [`NotifierConfig`]: Read-only digest settings consumed by the scheduler
//!
//! The remote listing uses the platform's own field names, hence the serde
//! renames on [`RemoteItemSummary`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a tracked source takes part in crawl passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Disabled,
}

impl SourceStatus {
    /// Integer representation used by the storage layer.
    pub fn as_i64(self) -> i64 {
        match self {
            SourceStatus::Active => 1,
            SourceStatus::Disabled => 0,
        }
    }

    /// Inverse of [`SourceStatus::as_i64`]; anything but `1` is disabled.
    pub fn from_i64(value: i64) -> Self {
        if value == 1 {
            SourceStatus::Active
        } else {
            SourceStatus::Disabled
        }
    }
}

/// A remote account whose new items are collected on every pass.
///
/// # Watermark
///
/// `watermark` holds the content URL of the most recent item observed in the
/// last pass that persisted something. It only moves forward; a failed or
/// partial crawl leaves it untouched. An empty string means nothing has been
/// collected yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedSource {
    /// Opaque identity (UUID v4).
    pub id: String,
    /// Display name, unique among tracked sources.
    pub name: String,
    /// Name used when searching the remote system.
    pub alias: String,
    /// Remote identifier obtained through search.
    pub remote_id: String,
    /// Home URL of the account, if known.
    pub url: String,
    /// Content URL of the most recently observed item.
    pub watermark: String,
    pub status: SourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackedSource {
    /// Build a fresh, active source with no watermark.
    pub fn new(name: &str, alias: &str, remote_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            alias: alias.to_string(),
            remote_id: remote_id.to_string(),
            url: String::new(),
            watermark: String::new(),
            status: SourceStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Name to send to the remote search: the alias when present.
    pub fn search_term(&self) -> &str {
        if self.alias.trim().is_empty() {
            &self.name
        } else {
            &self.alias
        }
    }
}

/// Listing-stage item as returned by the remote item list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemoteItemSummary {
    #[serde(default)]
    pub aid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub cover: String,
    /// Canonical content URL, the dedup key.
    #[serde(rename = "link", default)]
    pub content_url: String,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub update_time: i64,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub source_url: String,
}

/// A collected item.
///
/// `content` is `None` when the detail fetch failed; such a record is still
/// valid and permanently retained so the metadata is not lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedItem {
    pub id: String,
    pub source_id: String,
    /// Denormalized source name for display.
    pub source_name: String,
    pub title: String,
    pub author: String,
    pub summary: String,
    pub content: Option<String>,
    /// Unique across the whole item store.
    pub content_url: String,
    pub cover_url: String,
    pub source_link: String,
    /// Publish time as unix seconds, as reported by the remote list.
    pub published_at: i64,
    pub collected_at: DateTime<Utc>,
}

impl CollectedItem {
    /// Create an item from its listing summary and the (possibly missing) detail.
    pub fn from_summary(
        source: &TrackedSource,
        summary: &RemoteItemSummary,
        content: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source.id.clone(),
            source_name: source.name.clone(),
            title: summary.title.clone(),
            author: summary.author.clone(),
            summary: summary.digest.clone(),
            content,
            content_url: summary.content_url.clone(),
            cover_url: summary.cover.clone(),
            source_link: summary.source_url.clone(),
            published_at: summary.create_time,
            collected_at: Utc::now(),
        }
    }
}

/// Digest cadence for the downstream notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifyPeriod {
    Hourly,
    #[default]
    Daily,
}

/// Settings owned by the notification collaborator; never mutated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub enabled: bool,
    pub period: NotifyPeriod,
    /// Time of day for the daily digest, `HH:MM`.
    pub notify_time: String,
    pub title: String,
    pub webhook_url: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period: NotifyPeriod::Daily,
            notify_time: "09:00".to_string(),
            title: "New articles".to_string(),
            webhook_url: String::new(),
        }
    }
}

/// Outcome of one crawl pass across all active sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub sources: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub new_items: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_summary_deserialization() {
        let json = r#"{
            "aid": "2650001_1",
            "title": "Release notes",
            "digest": "What changed",
            "cover": "https://img.example/c.jpg",
            "link": "https://mp.example/s?__biz=1&mid=2",
            "create_time": 1700000000,
            "update_time": 1700000100,
            "author": "Ops",
            "source_url": ""
        }"#;

        let summary: RemoteItemSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.content_url, "https://mp.example/s?__biz=1&mid=2");
        assert_eq!(summary.create_time, 1700000000);
        assert_eq!(summary.author, "Ops");
    }

    #[test]
    fn test_remote_summary_missing_fields_default() {
        let summary: RemoteItemSummary = serde_json::from_str(r#"{"link": "u"}"#).unwrap();
        assert_eq!(summary.content_url, "u");
        assert!(summary.title.is_empty());
        assert_eq!(summary.create_time, 0);
    }

    #[test]
    fn test_collected_item_from_summary_without_content() {
        let source = TrackedSource::new("Daily Notes", "", "fake-1");
        let summary = RemoteItemSummary {
            title: "Hello".to_string(),
            content_url: "https://mp.example/a".to_string(),
            create_time: 42,
            ..Default::default()
        };

        let item = CollectedItem::from_summary(&source, &summary, None);
        assert_eq!(item.source_id, source.id);
        assert_eq!(item.source_name, "Daily Notes");
        assert_eq!(item.content, None);
        assert_eq!(item.published_at, 42);
    }

    #[test]
    fn test_search_term_prefers_alias() {
        let plain = TrackedSource::new("Name", "  ", "x");
        assert_eq!(plain.search_term(), "Name");

        let aliased = TrackedSource::new("Name", "alias", "x");
        assert_eq!(aliased.search_term(), "alias");
    }

    #[test]
    fn test_status_round_trip_through_integer() {
        assert_eq!(SourceStatus::from_i64(SourceStatus::Active.as_i64()), SourceStatus::Active);
        assert_eq!(SourceStatus::from_i64(0), SourceStatus::Disabled);
        assert_eq!(SourceStatus::from_i64(7), SourceStatus::Disabled);
    }

    #[test]
    fn test_notifier_config_defaults() {
        let config: NotifierConfig = serde_yaml::from_str("enabled: true").unwrap();
        assert!(config.enabled);
        assert_eq!(config.period, NotifyPeriod::Daily);
        assert_eq!(config.notify_time, "09:00");
    }
}
