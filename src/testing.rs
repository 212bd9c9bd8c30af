//! Fakes for the network collaborators, shared by the unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::ai::{Completion, Pricing, Summarizer};
use crate::db::Repository;
use crate::error::{AppError, FetchError, Result};
use crate::feed::{FeedItem, FeedSource, ParsedFeed};
use crate::services::{DeliveryChannel, SendOptions};

pub fn item(guid: &str, title: &str) -> FeedItem {
    FeedItem {
        guid: Some(guid.to_string()),
        link: Some(format!("https://example.com/{}", guid)),
        title: Some(title.to_string()),
        published_at: None,
        content: None,
        snippet: Some(format!("snippet of {}", title)),
    }
}

pub fn document(title: &str, items: Vec<FeedItem>) -> ParsedFeed {
    ParsedFeed {
        title: Some(title.to_string()),
        items,
    }
}

/// Records every message; calls whose index is in `failing` return an error.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(String, SendOptions)>>,
    /// Time of every call, failed ones included.
    attempts: Mutex<Vec<Instant>>,
    calls: AtomicUsize,
    failing: Mutex<HashSet<usize>>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_call(&self, index: usize) {
        self.failing.lock().unwrap().insert(index);
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn options(&self) -> Vec<SendOptions> {
        self.sent.lock().unwrap().iter().map(|(_, o)| *o).collect()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    async fn send(&self, text: &str, options: SendOptions) -> Result<()> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.attempts.lock().unwrap().push(Instant::now());
        if self.failing.lock().unwrap().contains(&index) {
            return Err(AppError::Delivery("rate limited".to_string()));
        }
        self.sent.lock().unwrap().push((text.to_string(), options));
        Ok(())
    }
}

/// Serves whatever document or failure was last configured.
pub struct StubSource {
    response: Mutex<std::result::Result<ParsedFeed, String>>,
    /// Applied to the repository while the fetch is "in flight".
    rename_during_fetch: Mutex<Option<(Arc<Repository>, i64, String)>>,
    unreachable: Mutex<HashSet<String>>,
    fetches: AtomicUsize,
}

impl StubSource {
    pub fn serving(feed: ParsedFeed) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Ok(feed)),
            rename_during_fetch: Mutex::new(None),
            unreachable: Mutex::new(HashSet::new()),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn serve(&self, feed: ParsedFeed) {
        *self.response.lock().unwrap() = Ok(feed);
    }

    pub fn fail(&self, reason: &str) {
        *self.response.lock().unwrap() = Err(reason.to_string());
    }

    /// Fail only fetches of `url`, whatever else is configured.
    pub fn fail_url(&self, url: &str) {
        self.unreachable.lock().unwrap().insert(url.to_string());
    }

    pub fn rename_during_fetch(&self, repo: Arc<Repository>, feed_id: i64, title: &str) {
        *self.rename_during_fetch.lock().unwrap() = Some((repo, feed_id, title.to_string()));
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for StubSource {
    async fn fetch(&self, url: &str) -> std::result::Result<ParsedFeed, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.lock().unwrap().contains(url) {
            return Err(FetchError::Timeout);
        }
        let rename = self.rename_during_fetch.lock().unwrap().take();
        if let Some((repo, feed_id, title)) = rename {
            repo.set_title(feed_id, &title)
                .await
                .map_err(|e| FetchError::Unreachable(e.to_string()))?;
        }
        self.response
            .lock()
            .unwrap()
            .clone()
            .map_err(FetchError::Unreachable)
    }
}

pub struct StubSummarizer {
    calls: AtomicUsize,
    fail: bool,
}

impl StubSummarizer {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for StubSummarizer {
    async fn summarize(&self, items: &[FeedItem], feed_title: &str) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::Summarizer("provider unavailable".to_string()));
        }
        Ok(Completion {
            text: format!("{} items from {}", items.len(), feed_title),
            input_tokens: 1_000,
            output_tokens: 500,
            total_tokens: 1_500,
        })
    }

    fn provider(&self) -> &str {
        "stub"
    }

    fn model(&self) -> &str {
        "stub-1"
    }

    fn pricing(&self) -> Pricing {
        Pricing {
            input: 1.0,
            output: 2.0,
            currency: "CNY",
        }
    }
}
