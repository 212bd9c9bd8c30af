use std::sync::Arc;
use std::time::Duration;

use crate::ai::Summarizer;
use crate::db::Repository;
use crate::feed::FeedItem;
use crate::models::{Feed, UsageRecord};
use crate::services::format::{format_digest, format_item};
use crate::services::{DeliveryChannel, SendOptions};
use crate::settings::Settings;

use super::PassContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Digest,
    Individual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub mode: DeliveryMode,
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers a batch of new items, either as one generated digest or one
/// message per item.
pub struct Dispatcher {
    repo: Arc<Repository>,
    channel: Arc<dyn DeliveryChannel>,
    message_delay: Duration,
}

impl Dispatcher {
    pub fn new(
        repo: Arc<Repository>,
        channel: Arc<dyn DeliveryChannel>,
        message_delay: Duration,
    ) -> Self {
        Self {
            repo,
            channel,
            message_delay,
        }
    }

    /// Delivery failures are logged and never returned: by the time a batch
    /// reaches here its items are already stored.
    pub async fn dispatch(
        &self,
        items: &[FeedItem],
        feed_title: &str,
        feed: &Feed,
        ctx: &PassContext<'_>,
    ) -> DispatchReport {
        if digest_gate_open(feed, items.len(), ctx.settings) {
            match ctx.summarizer {
                Some(summarizer) => {
                    if let Some(report) = self.try_digest(summarizer, items, feed_title).await {
                        return report;
                    }
                }
                None => tracing::warn!(
                    "Digest requested for {} but no summarizer is configured, sending items individually",
                    feed_title
                ),
            }
        }

        self.send_individually(items, feed_title).await
    }

    /// `None` when the summarizer failed and the caller should fall back.
    async fn try_digest(
        &self,
        summarizer: &dyn Summarizer,
        items: &[FeedItem],
        feed_title: &str,
    ) -> Option<DispatchReport> {
        let completion = match summarizer.summarize(items, feed_title).await {
            Ok(completion) => completion,
            Err(e) => {
                tracing::warn!(
                    "Digest generation failed for {}, sending items individually: {}",
                    feed_title,
                    e
                );
                return None;
            }
        };

        let pricing = summarizer.pricing();
        let cost = pricing.cost(completion.input_tokens, completion.output_tokens);
        tracing::info!(
            "Digest generated for {}: tokens in={} out={} total={}, estimated cost {} {}",
            feed_title,
            completion.input_tokens,
            completion.output_tokens,
            completion.total_tokens,
            cost,
            pricing.currency
        );

        let usage = UsageRecord {
            provider: summarizer.provider().to_string(),
            model: summarizer.model().to_string(),
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
            total_tokens: completion.total_tokens,
            estimated_cost: cost,
            currency: pricing.currency.to_string(),
            article_count: items.len() as u32,
        };
        if let Err(e) = self.repo.record_usage(usage).await {
            tracing::warn!("Failed to record summarizer usage: {}", e);
        }

        let message = format_digest(feed_title, &completion.text, items);
        let delivered = match self.channel.send(&message, SendOptions::MARKDOWN_NO_PREVIEW).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to deliver digest for {}: {}", feed_title, e);
                false
            }
        };

        Some(DispatchReport {
            mode: DeliveryMode::Digest,
            delivered: usize::from(delivered),
            failed: usize::from(!delivered),
        })
    }

    async fn send_individually(&self, items: &[FeedItem], feed_title: &str) -> DispatchReport {
        let mut report = DispatchReport {
            mode: DeliveryMode::Individual,
            delivered: 0,
            failed: 0,
        };

        for (i, item) in items.iter().enumerate() {
            if i > 0 && !self.message_delay.is_zero() {
                tokio::time::sleep(self.message_delay).await;
            }

            let message = format_item(item, feed_title);
            match self.channel.send(&message, SendOptions::MARKDOWN).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        "Failed to deliver {:?} from {}: {}",
                        item.title.as_deref().unwrap_or("Untitled"),
                        feed_title,
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }
}

/// Digest mode needs the feed's flag and a large enough batch.
pub fn digest_gate_open(feed: &Feed, batch_len: usize, settings: &Settings) -> bool {
    feed.digest_enabled && batch_len >= settings.min_digest_items as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{item, RecordingChannel, StubSummarizer};
    use chrono::{Duration as ChronoDuration, Utc};

    fn feed(digest_enabled: bool) -> Feed {
        Feed {
            id: 1,
            url: "https://example.com/feed".to_string(),
            title: Some("Example".to_string()),
            last_check: None,
            error_count: 0,
            digest_enabled,
            created_at: Utc::now(),
        }
    }

    fn batch(n: usize) -> Vec<FeedItem> {
        (0..n).map(|i| item(&format!("g{}", i), &format!("Item {}", i))).collect()
    }

    async fn dispatcher() -> (Arc<Repository>, Arc<RecordingChannel>, Dispatcher) {
        let repo = Arc::new(Repository::in_memory().await.unwrap());
        let channel = RecordingChannel::new();
        let dispatcher = Dispatcher::new(repo.clone(), channel.clone(), Duration::ZERO);
        (repo, channel, dispatcher)
    }

    #[tokio::test]
    async fn below_threshold_skips_summarizer() {
        let (_repo, channel, dispatcher) = dispatcher().await;
        let summarizer = StubSummarizer::ok();
        let settings = Settings::default();
        let ctx = PassContext {
            settings: &settings,
            summarizer: Some(summarizer.as_ref()),
        };

        let report = dispatcher.dispatch(&batch(2), "Example", &feed(true), &ctx).await;

        assert_eq!(summarizer.calls(), 0);
        assert_eq!(report.mode, DeliveryMode::Individual);
        assert_eq!(channel.calls(), 2);
    }

    #[tokio::test]
    async fn at_threshold_sends_one_digest() {
        let (repo, channel, dispatcher) = dispatcher().await;
        let summarizer = StubSummarizer::ok();
        let settings = Settings::default();
        let ctx = PassContext {
            settings: &settings,
            summarizer: Some(summarizer.as_ref()),
        };

        let report = dispatcher.dispatch(&batch(3), "Example", &feed(true), &ctx).await;

        assert_eq!(summarizer.calls(), 1);
        assert_eq!(
            report,
            DispatchReport {
                mode: DeliveryMode::Digest,
                delivered: 1,
                failed: 0
            }
        );
        let messages = channel.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(channel.options(), vec![SendOptions::MARKDOWN_NO_PREVIEW]);
        assert!(messages[0].contains("3 items from Example"));
        assert!(messages[0].contains("3\\. [Item 2](https://example.com/g2)"));

        let usage = repo
            .usage_summary(Utc::now() - ChronoDuration::days(1))
            .await
            .unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].provider, "stub");
        assert_eq!(usage[0].article_count, 3);
        assert!((usage[0].estimated_cost - 0.002).abs() < 1e-9);
    }

    #[tokio::test]
    async fn digest_flag_off_never_summarizes() {
        let (_repo, channel, dispatcher) = dispatcher().await;
        let summarizer = StubSummarizer::ok();
        let settings = Settings::default();
        let ctx = PassContext {
            settings: &settings,
            summarizer: Some(summarizer.as_ref()),
        };

        dispatcher.dispatch(&batch(10), "Example", &feed(false), &ctx).await;

        assert_eq!(summarizer.calls(), 0);
        assert_eq!(channel.calls(), 10);
    }

    #[tokio::test]
    async fn summarizer_failure_falls_back_to_individual() {
        let (_repo, _channel, dispatcher) = dispatcher().await;
        let summarizer = StubSummarizer::broken();
        let settings = Settings::default();
        let ctx = PassContext {
            settings: &settings,
            summarizer: Some(summarizer.as_ref()),
        };

        let report = dispatcher.dispatch(&batch(4), "Example", &feed(true), &ctx).await;

        assert_eq!(summarizer.calls(), 1);
        assert_eq!(report.mode, DeliveryMode::Individual);
        assert_eq!(report.delivered, 4);
    }

    #[tokio::test]
    async fn missing_summarizer_falls_back_to_individual() {
        let (_repo, channel, dispatcher) = dispatcher().await;
        let settings = Settings::default();
        let ctx = PassContext {
            settings: &settings,
            summarizer: None,
        };

        let report = dispatcher.dispatch(&batch(5), "Example", &feed(true), &ctx).await;

        assert_eq!(report.mode, DeliveryMode::Individual);
        assert_eq!(channel.calls(), 5);
    }

    #[tokio::test]
    async fn one_failed_message_does_not_stop_the_batch() {
        let (_repo, channel, dispatcher) = dispatcher().await;
        channel.fail_call(1);
        let settings = Settings::default();
        let ctx = PassContext {
            settings: &settings,
            summarizer: None,
        };

        let report = dispatcher.dispatch(&batch(3), "Example", &feed(false), &ctx).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(channel.calls(), 3);
        let messages = channel.messages();
        assert!(messages[0].contains("Item 0"));
        assert!(messages[1].contains("Item 2"));
    }

    #[tokio::test]
    async fn items_keep_document_order() {
        let (_repo, channel, dispatcher) = dispatcher().await;
        let settings = Settings::default();
        let ctx = PassContext {
            settings: &settings,
            summarizer: None,
        };
        let items = vec![item("new", "Newest"), item("mid", "Middle"), item("old", "Oldest")];

        dispatcher.dispatch(&items, "Example", &feed(false), &ctx).await;

        let order: Vec<_> = channel
            .messages()
            .iter()
            .map(|m| m.lines().next().unwrap_or_default().to_string())
            .collect();
        assert_eq!(order, vec!["📰 *Newest*", "📰 *Middle*", "📰 *Oldest*"]);
    }

    #[tokio::test(start_paused = true)]
    async fn individual_sends_are_paced_between_messages_only() {
        let repo = Arc::new(Repository::in_memory().await.unwrap());
        let channel = RecordingChannel::new();
        let dispatcher = Dispatcher::new(repo, channel.clone(), Duration::from_secs(2));
        channel.fail_call(1);
        let settings = Settings::default();
        let ctx = PassContext {
            settings: &settings,
            summarizer: None,
        };

        let start = tokio::time::Instant::now();
        dispatcher.dispatch(&batch(3), "Example", &feed(false), &ctx).await;

        let offsets: Vec<_> = channel.attempts().iter().map(|t| *t - start).collect();
        assert_eq!(
            offsets,
            vec![Duration::ZERO, Duration::from_secs(2), Duration::from_secs(4)]
        );
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn digest_is_not_delayed() {
        let repo = Arc::new(Repository::in_memory().await.unwrap());
        let channel = RecordingChannel::new();
        let dispatcher = Dispatcher::new(repo, channel.clone(), Duration::from_secs(2));
        let summarizer = StubSummarizer::ok();
        let settings = Settings::default();
        let ctx = PassContext {
            settings: &settings,
            summarizer: Some(summarizer.as_ref()),
        };

        let start = tokio::time::Instant::now();
        dispatcher.dispatch(&batch(5), "Example", &feed(true), &ctx).await;

        assert_eq!(channel.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
