use std::sync::Arc;

use chrono::Utc;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::{FeedItem, FeedSource, ParsedFeed};
use crate::models::{Feed, NewArticle};

use super::{filter, Dispatcher, ErrorTracker, PassContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Checked { new_items: usize },
    FetchFailed { error_count: u32 },
    /// The feed does not exist (anymore).
    Missing,
}

/// One check cycle for one feed. Never run concurrently for the same feed.
pub struct Poller {
    repo: Arc<Repository>,
    source: Arc<dyn FeedSource>,
    errors: ErrorTracker,
    dispatcher: Dispatcher,
}

impl Poller {
    pub fn new(
        repo: Arc<Repository>,
        source: Arc<dyn FeedSource>,
        errors: ErrorTracker,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            repo,
            source,
            errors,
            dispatcher,
        }
    }

    /// Fetch, reconcile the title, store unseen items that pass the feed's
    /// filters and hand them to the dispatcher.
    ///
    /// Fetch failures are counted and reported as an outcome, not an error.
    /// Persistence errors are returned and abort this feed's cycle only.
    pub async fn check(&self, feed_id: i64, ctx: &PassContext<'_>) -> Result<CheckOutcome> {
        let Some(feed) = self.repo.get_feed(feed_id).await? else {
            return Ok(CheckOutcome::Missing);
        };

        let document = match self.source.fetch(&feed.url).await {
            Ok(document) => document,
            Err(e) => {
                let error_count = self.errors.on_failure(feed.id, &e).await?;
                return Ok(CheckOutcome::FetchFailed { error_count });
            }
        };

        let Some((feed, display_title)) = self.reconcile_title(feed, &document).await? else {
            return Ok(CheckOutcome::Missing);
        };

        let rules = self.repo.list_filters(feed.id).await?;
        let mut accepted: Vec<FeedItem> = Vec::new();
        let mut duplicates = 0usize;

        for item in document.items {
            let Some(guid) = item.identity().map(str::to_string) else {
                tracing::debug!("Skipping item without guid, link or title in {}", feed.url);
                continue;
            };

            if self.repo.item_exists(feed.id, &guid).await? {
                duplicates += 1;
                continue;
            }

            if !filter::matches(&rules, &item) {
                tracing::debug!(
                    "Filtered out {:?} from {}",
                    item.title.as_deref().unwrap_or(&guid),
                    display_title
                );
                continue;
            }

            // A document may repeat an identity; only the first copy is new
            if self.repo.add_item(new_article(feed.id, guid, &item)).await? {
                accepted.push(item);
            }
        }

        self.repo.set_last_check(feed.id, Utc::now()).await?;
        tracing::debug!("{}: {} already seen", display_title, duplicates);

        if !accepted.is_empty() {
            tracing::info!("{}: {} new items", display_title, accepted.len());
            let report = self
                .dispatcher
                .dispatch(&accepted, &display_title, &feed, ctx)
                .await;
            if report.failed > 0 {
                tracing::warn!(
                    "{}: {} of {} messages failed",
                    display_title,
                    report.failed,
                    report.failed + report.delivered
                );
            }
        }

        self.errors.on_success(&feed).await?;

        Ok(CheckOutcome::Checked {
            new_items: accepted.len(),
        })
    }

    /// First fetch of a newly added feed: reconcile the title and record up
    /// to `limit` items as seen without delivering anything.
    pub async fn prime(&self, feed_id: i64, limit: usize) -> Result<usize> {
        let feed = self
            .repo
            .get_feed(feed_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("feed {}", feed_id)))?;

        let document = self.source.fetch(&feed.url).await?;

        let Some((feed, _)) = self.reconcile_title(feed, &document).await? else {
            return Err(AppError::NotFound(format!("feed {}", feed_id)));
        };

        let mut recorded = 0;
        for item in document.items.iter().take(limit) {
            let Some(guid) = item.identity() else {
                continue;
            };
            if self
                .repo
                .add_item(new_article(feed.id, guid.to_string(), item))
                .await?
            {
                recorded += 1;
            }
        }

        self.repo.set_last_check(feed.id, Utc::now()).await?;
        Ok(recorded)
    }

    /// Sets the fetched title only if the stored one is still unset, then
    /// re-reads the row so a rename made during the fetch wins. Returns the
    /// fresh row and the title to display this cycle, or `None` if the feed
    /// was removed in the meantime.
    async fn reconcile_title(
        &self,
        feed: Feed,
        document: &ParsedFeed,
    ) -> Result<Option<(Feed, String)>> {
        let fetched_title = document
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        if let Some(title) = fetched_title {
            if self.repo.set_title_if_unset(feed.id, title).await? {
                tracing::info!("Named feed {} as {:?}", feed.url, title);
            }
        }

        let Some(current) = self.repo.get_feed(feed.id).await? else {
            return Ok(None);
        };

        let display_title = current
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| fetched_title.map(str::to_string))
            .unwrap_or_else(|| current.url.clone());

        Ok(Some((current, display_title)))
    }
}

fn new_article(feed_id: i64, guid: String, item: &FeedItem) -> NewArticle {
    NewArticle {
        feed_id,
        guid,
        title: item.title.clone(),
        link: item.link.clone(),
        published_at: item.published_at.unwrap_or_else(Utc::now),
    }
}
