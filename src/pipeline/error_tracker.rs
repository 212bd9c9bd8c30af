use std::sync::Arc;

use crate::db::Repository;
use crate::error::{FetchError, Result};
use crate::models::Feed;
use crate::services::format::format_error_notice;
use crate::services::{DeliveryChannel, SendOptions};

/// Consecutive fetch failures after which the user is notified.
pub const ERROR_THRESHOLD: u32 = 3;

/// Per-feed consecutive failure counter, persisted on the feed row.
pub struct ErrorTracker {
    repo: Arc<Repository>,
    channel: Arc<dyn DeliveryChannel>,
    threshold: u32,
}

impl ErrorTracker {
    pub fn new(repo: Arc<Repository>, channel: Arc<dyn DeliveryChannel>) -> Self {
        Self {
            repo,
            channel,
            threshold: ERROR_THRESHOLD,
        }
    }

    /// Count one more failure and return the new count.
    ///
    /// The notice goes out on every failure while the count is at or above
    /// the threshold, not only when it is first reached.
    pub async fn on_failure(&self, feed_id: i64, error: &FetchError) -> Result<u32> {
        let Some(feed) = self.repo.get_feed(feed_id).await? else {
            return Ok(0);
        };

        tracing::warn!("Fetch failed for feed {} ({}): {}", feed.id, feed.url, error);

        let count = feed.error_count.saturating_add(1);
        self.repo.set_error_count(feed.id, count).await?;

        if count >= self.threshold {
            self.notify(&feed, error, count).await;
        }

        Ok(count)
    }

    pub async fn on_success(&self, feed: &Feed) -> Result<()> {
        if feed.error_count > 0 {
            self.repo.set_error_count(feed.id, 0).await?;
            tracing::info!(
                "Feed {} recovered after {} failures",
                feed.display_title(),
                feed.error_count
            );
        }
        Ok(())
    }

    async fn notify(&self, feed: &Feed, error: &FetchError, count: u32) {
        let notice = format_error_notice(feed, &error.to_string(), count);
        if let Err(e) = self
            .channel
            .send(&notice, SendOptions::MARKDOWN_NO_PREVIEW)
            .await
        {
            tracing::warn!("Failed to send error notification for feed {}: {}", feed.id, e);
        }
    }
}
