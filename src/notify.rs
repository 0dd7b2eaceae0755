//! Digest delivery for newly collected items.

use crate::error::{CrawlError, Result};
use crate::models::CollectedItem;
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Items listed in one digest; the rest are only counted.
const MAX_LISTED: usize = 10;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a digest of `items` under `title`. Does nothing for an empty slice.
    async fn notify(&self, title: &str, items: &[CollectedItem]) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct TextMessage<'a> {
    msg_type: &'static str,
    content: TextContent<'a>,
}

#[derive(Debug, Serialize)]
struct TextContent<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookReply {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

/// Render the plain-text digest body.
pub fn digest_text(title: &str, items: &[CollectedItem], now: DateTime<Local>) -> String {
    let mut text = format!(
        "{title}\n\n{}\n{} new articles\n\n",
        now.format("%Y-%m-%d %H:%M:%S"),
        items.len()
    );

    for item in items.iter().take(MAX_LISTED) {
        let published = DateTime::<Utc>::from_timestamp(item.published_at, 0)
            .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        text.push_str(&format!("{}\n  {} | {}\n", item.title, item.source_name, published));
        if !item.summary.is_empty() {
            text.push_str(&format!("  {}\n", item.summary));
        }
        text.push_str(&format!("  {}\n\n", item.content_url));
    }

    if items.len() > MAX_LISTED {
        text.push_str(&format!("... and {} more", items.len() - MAX_LISTED));
    }
    text
}

/// Posts text digests to a chat webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        let webhook_url = webhook_url.into();
        if webhook_url.trim().is_empty() {
            return Err(CrawlError::Config("notifier webhook_url is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            webhook_url,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(level = "info", skip_all, fields(count = items.len()))]
    async fn notify(&self, title: &str, items: &[CollectedItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let text = digest_text(title, items, Local::now());
        let message = TextMessage {
            msg_type: "text",
            content: TextContent { text: &text },
        };
        debug!(bytes = text.len(), "Posting digest");

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await?
            .error_for_status()?;

        // The webhook reports failures in the body with a 200 status.
        let reply: WebhookReply = response.json().await.unwrap_or_default();
        if reply.code != 0 {
            return Err(CrawlError::Notify(format!("webhook code {}: {}", reply.code, reply.msg)));
        }

        info!("Digest delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RemoteItemSummary, TrackedSource};
    use chrono::TimeZone;

    fn items(n: usize) -> Vec<CollectedItem> {
        let source = TrackedSource::new("Daily", "", "r");
        (0..n)
            .map(|i| {
                let summary = RemoteItemSummary {
                    title: format!("Title {i}"),
                    digest: if i == 0 { "First one".to_string() } else { String::new() },
                    content_url: format!("https://mp.example.com/s/{i}"),
                    create_time: 1_700_000_000,
                    ..Default::default()
                };
                CollectedItem::from_summary(&source, &summary, None)
            })
            .collect()
    }

    #[test]
    fn test_digest_text_lists_items() {
        let now = Local.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).unwrap();
        let text = digest_text("New articles", &items(2), now);
        assert!(text.starts_with("New articles\n\n2026-01-02 09:00:00\n2 new articles"));
        assert!(text.contains("Title 0\n  Daily | "));
        assert!(text.contains("  First one\n"));
        assert!(text.contains("https://mp.example.com/s/1"));
        assert!(!text.contains("more"));
    }

    #[test]
    fn test_digest_text_caps_listing() {
        let now = Local.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).unwrap();
        let text = digest_text("t", &items(13), now);
        assert!(text.contains("Title 9"));
        assert!(!text.contains("Title 10"));
        assert!(text.ends_with("... and 3 more"));
    }

    #[test]
    fn test_message_payload_shape() {
        let message = TextMessage {
            msg_type: "text",
            content: TextContent { text: "hi" },
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value, serde_json::json!({"msg_type": "text", "content": {"text": "hi"}}));
    }

    #[test]
    fn test_empty_webhook_rejected() {
        assert!(matches!(WebhookNotifier::new("  "), Err(CrawlError::Config(_))));
    }
}
