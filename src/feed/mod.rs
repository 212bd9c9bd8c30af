mod fetcher;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::FetchError;

pub use fetcher::FeedFetcher;

/// A fetched and parsed feed document.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    /// In document order, which for most feeds is newest first.
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Default)]
pub struct FeedItem {
    pub guid: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub content: Option<String>,
    /// Plain-text rendering of the content or summary.
    pub snippet: Option<String>,
}

impl FeedItem {
    /// Dedup key: provider GUID, else link, else title. `None` when the
    /// entry carries none of them.
    pub fn identity(&self) -> Option<&str> {
        [&self.guid, &self.link, &self.title]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .map(str::trim)
            .find(|value| !value.is_empty())
    }

    /// Snippet if present, else raw content.
    pub fn summary_text(&self) -> Option<&str> {
        self.snippet
            .as_deref()
            .or(self.content.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Where feed documents come from. A failed fetch is not retried within the
/// same cycle.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed, FetchError>;
}
