use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime, Utc};
use tokio::time::Instant;
use url::Url;

use crate::ai::{Provider, ProviderSummarizer, Summarizer};
use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::{FeedFetcher, FeedSource};
use crate::models::{Article, Feed, FilterKind, FilterRule, ProviderUsage};
use crate::pipeline::{
    CheckOutcome, Dispatcher, ErrorTracker, PassContext, Poller, RetentionManager,
    RetentionReport,
};
use crate::services::{DeliveryChannel, TelegramClient};
use crate::settings::{self, Settings, MAX_MIN_DIGEST_ITEMS, MAX_RETENTION_DAYS};

/// Items recorded as already seen when a feed is added.
const INITIAL_ITEMS: usize = 10;

/// Window of the usage summary shown in stats.
const USAGE_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub checked: usize,
    pub failed: usize,
    pub new_items: usize,
}

/// Owns the pipeline and everything around it: full passes, the schedule,
/// and the administrative operations.
pub struct Relay {
    repo: Arc<Repository>,
    poller: Poller,
    retention: RetentionManager,
    feed_delay: Duration,
    summarizer_timeout: Duration,
    cleanup_hour: u32,
    /// Used instead of the provider selected in the settings when set.
    summarizer_override: Option<Arc<dyn Summarizer>>,
}

impl Relay {
    pub async fn new(config: &Config) -> Result<Self> {
        let (bot_token, chat_id) = config.telegram_credentials()?;

        let repo = Arc::new(Repository::new(&config.db_path).await?);
        Settings::seed(&repo, config).await?;

        let source = Arc::new(FeedFetcher::new(config.fetch_timeout())?);
        let channel = Arc::new(TelegramClient::new(bot_token, chat_id)?);

        Ok(Self::from_parts(repo, source, channel, config))
    }

    pub fn from_parts(
        repo: Arc<Repository>,
        source: Arc<dyn FeedSource>,
        channel: Arc<dyn DeliveryChannel>,
        config: &Config,
    ) -> Self {
        let errors = ErrorTracker::new(repo.clone(), channel.clone());
        let dispatcher = Dispatcher::new(repo.clone(), channel, config.message_delay());
        let poller = Poller::new(repo.clone(), source, errors, dispatcher);

        Self {
            retention: RetentionManager::new(repo.clone()),
            repo,
            poller,
            feed_delay: config.feed_delay(),
            summarizer_timeout: config.summarizer_timeout(),
            cleanup_hour: config.cleanup_hour.min(23),
            summarizer_override: None,
        }
    }

    #[cfg(test)]
    fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer_override = Some(summarizer);
        self
    }

    fn summarizer_for(&self, settings: &Settings) -> Option<Arc<dyn Summarizer>> {
        if let Some(summarizer) = &self.summarizer_override {
            return Some(summarizer.clone());
        }

        match ProviderSummarizer::from_settings(&settings.ai, self.summarizer_timeout) {
            Ok(Some(summarizer)) => Some(Arc::new(summarizer)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Digests unavailable: {}", e);
                None
            }
        }
    }

    /// Check every feed once, one at a time. A failing feed never stops the
    /// pass.
    pub async fn check_all(&self) -> Result<PassReport> {
        let settings = Settings::load(&self.repo).await?;
        let summarizer = self.summarizer_for(&settings);
        let ctx = PassContext {
            settings: &settings,
            summarizer: summarizer.as_deref(),
        };

        let feeds = self.repo.list_feeds().await?;
        tracing::info!("Checking {} feeds", feeds.len());

        let mut report = PassReport::default();
        for (i, feed) in feeds.iter().enumerate() {
            if i > 0 && !self.feed_delay.is_zero() {
                tokio::time::sleep(self.feed_delay).await;
            }

            match self.poller.check(feed.id, &ctx).await {
                Ok(CheckOutcome::Checked { new_items }) => {
                    report.checked += 1;
                    report.new_items += new_items;
                }
                Ok(CheckOutcome::FetchFailed { .. }) => report.failed += 1,
                Ok(CheckOutcome::Missing) => {}
                Err(e) => {
                    tracing::error!("Check of {} aborted: {}", feed.url, e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Pass finished: {} checked, {} failed, {} new items",
            report.checked,
            report.failed,
            report.new_items
        );
        Ok(report)
    }

    pub async fn run_retention(&self) -> Result<RetentionReport> {
        let settings = Settings::load(&self.repo).await?;
        self.retention.run(&settings, Utc::now()).await
    }

    /// Runs passes and the daily retention until Ctrl-C. The first pass runs
    /// immediately; the next one is scheduled after the previous finished.
    pub async fn run(&self) -> Result<()> {
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        let mut next_check = Instant::now();
        let mut next_cleanup = Instant::now() + self.until_cleanup();
        tracing::info!("Relay running, retention at {:02}:00", self.cleanup_hour);

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_check) => {
                    if let Err(e) = self.check_all().await {
                        tracing::error!("Pass failed: {}", e);
                    }
                    let minutes = match Settings::load(&self.repo).await {
                        Ok(settings) => settings.check_interval_minutes,
                        Err(e) => {
                            tracing::error!("Failed to read settings: {}", e);
                            Settings::default().check_interval_minutes
                        }
                    };
                    next_check = Instant::now() + Duration::from_secs(u64::from(minutes) * 60);
                    tracing::info!("Next check in {} minutes", minutes);
                }
                _ = tokio::time::sleep_until(next_cleanup) => {
                    if let Err(e) = self.run_retention().await {
                        tracing::error!("Retention failed: {}", e);
                    }
                    next_cleanup = Instant::now() + self.until_cleanup();
                }
                result = &mut shutdown => {
                    result?;
                    tracing::info!("Shutting down");
                    return Ok(());
                }
            }
        }
    }

    fn until_cleanup(&self) -> Duration {
        duration_until_hour(Local::now().naive_local(), self.cleanup_hour)
    }

    /// Subscribe to a feed. The newest items already in it are recorded as
    /// seen and not delivered. If the first fetch fails nothing is kept.
    pub async fn add_source(&self, url: &str) -> Result<Feed> {
        let url = url.trim();
        let parsed =
            Url::parse(url).map_err(|e| AppError::InvalidInput(format!("{}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::InvalidInput(format!(
                "{}: only http and https feeds are supported",
                url
            )));
        }

        if let Some(existing) = self.repo.get_feed_by_url(url).await? {
            return Err(AppError::InvalidInput(format!(
                "already subscribed to {} as #{}",
                url, existing.id
            )));
        }

        let feed_id = self.repo.add_feed(url, None).await?;
        match self.poller.prime(feed_id, INITIAL_ITEMS).await {
            Ok(recorded) => {
                tracing::info!("Added {} with {} existing items", url, recorded);
            }
            Err(e) => {
                self.repo.remove_feed(feed_id).await?;
                return Err(e);
            }
        }

        self.repo
            .get_feed(feed_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("feed {}", feed_id)))
    }

    /// Removes the feed together with its items and filters.
    pub async fn remove_source(&self, feed_id: i64) -> Result<Feed> {
        let feed = self.require_feed(feed_id).await?;
        self.repo.remove_feed(feed_id).await?;
        tracing::info!("Removed {}", feed.url);
        Ok(feed)
    }

    pub async fn rename_source(&self, feed_id: i64, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::InvalidInput("title must not be empty".to_string()));
        }
        if !self.repo.set_title(feed_id, title).await? {
            return Err(AppError::NotFound(format!("feed {}", feed_id)));
        }
        Ok(())
    }

    pub async fn set_digest(&self, feed_id: i64, enabled: bool) -> Result<()> {
        if !self.repo.set_digest_enabled(feed_id, enabled).await? {
            return Err(AppError::NotFound(format!("feed {}", feed_id)));
        }
        Ok(())
    }

    /// Every feed with the number of items stored for it.
    pub async fn list_sources(&self) -> Result<Vec<(Feed, u64)>> {
        let mut sources = Vec::new();
        for feed in self.repo.list_feeds().await? {
            let items = self.repo.count_items_for_feed(feed.id).await?;
            sources.push((feed, items));
        }
        Ok(sources)
    }

    /// Most recently published stored items of one feed.
    pub async fn recent_items(&self, feed_id: i64, limit: u32) -> Result<Vec<Article>> {
        self.require_feed(feed_id).await?;
        self.repo.list_items(feed_id, limit).await
    }

    pub async fn add_filter(&self, feed_id: i64, kind: FilterKind, keyword: &str) -> Result<i64> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(AppError::InvalidInput("keyword must not be empty".to_string()));
        }
        self.require_feed(feed_id).await?;
        self.repo.add_filter(feed_id, kind, keyword).await
    }

    pub async fn remove_filter(&self, filter_id: i64) -> Result<FilterRule> {
        let rule = self
            .repo
            .get_filter(filter_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("filter {}", filter_id)))?;
        self.repo.remove_filter(filter_id).await?;
        Ok(rule)
    }

    pub async fn list_filters(&self) -> Result<Vec<FilterRule>> {
        self.repo.list_all_filters().await
    }

    /// Validates and stores one runtime setting. Takes effect on the next
    /// pass.
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let key = key.trim();
        let value = value.trim();

        let stored = match key {
            settings::CHECK_INTERVAL => parse_bounded(key, value, 1, u32::MAX)?.to_string(),
            settings::RETENTION_DAYS => parse_bounded(key, value, 0, MAX_RETENTION_DAYS)?.to_string(),
            settings::RETENTION_COUNT => parse_bounded(key, value, 0, u32::MAX)?.to_string(),
            settings::MIN_DIGEST_ITEMS => {
                parse_bounded(key, value, 1, MAX_MIN_DIGEST_ITEMS)?.to_string()
            }
            settings::AI_PROVIDER => known_provider(value)?.id.to_string(),
            _ => {
                let provider = key
                    .strip_prefix("ai_api_key_")
                    .or_else(|| key.strip_prefix("ai_model_"))
                    .ok_or_else(|| AppError::InvalidInput(format!("unknown setting {:?}", key)))?;
                known_provider(provider)?;
                value.to_string()
            }
        };

        self.repo.set_setting(key, &stored).await
    }

    pub async fn stats(&self) -> Result<Stats> {
        let feeds = self.repo.list_feeds().await?;
        let since = Utc::now() - chrono::Duration::days(USAGE_WINDOW_DAYS);

        Ok(Stats {
            sources: feeds.len(),
            errored: feeds.iter().filter(|f| f.error_count > 0).count(),
            digest_enabled: feeds.iter().filter(|f| f.digest_enabled).count(),
            items: self.repo.count_items().await?,
            settings: Settings::load(&self.repo).await?,
            usage: self.repo.usage_summary(since).await?,
        })
    }

    async fn require_feed(&self, feed_id: i64) -> Result<Feed> {
        self.repo
            .get_feed(feed_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("feed {}", feed_id)))
    }
}

fn parse_bounded(key: &str, value: &str, min: u32, max: u32) -> Result<u32> {
    match value.parse::<u32>() {
        Ok(n) if (min..=max).contains(&n) => Ok(n),
        _ => Err(AppError::InvalidInput(format!(
            "{} must be a whole number between {} and {}",
            key, min, max
        ))),
    }
}

fn known_provider(id: &str) -> Result<&'static Provider> {
    Provider::by_id(id).ok_or_else(|| {
        let known: Vec<_> = Provider::all().iter().map(|p| p.id).collect();
        AppError::InvalidInput(format!(
            "unknown AI provider {:?} (known: {})",
            id,
            known.join(", ")
        ))
    })
}

/// Time from `now` until the next occurrence of `hour`:00, in local wall
/// clock time. Exactly at the hour means a full day.
pub fn duration_until_hour(now: NaiveDateTime, hour: u32) -> Duration {
    let Some(at) = NaiveTime::from_hms_opt(hour.min(23), 0, 0) else {
        return Duration::from_secs(24 * 60 * 60);
    };

    let mut target = now.date().and_time(at);
    if target <= now {
        target += chrono::Duration::days(1);
    }
    (target - now).to_std().unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct Stats {
    pub sources: usize,
    pub errored: usize,
    pub digest_enabled: usize,
    pub items: u64,
    pub settings: Settings,
    pub usage: Vec<ProviderUsage>,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.settings;
        writeln!(f, "Sources:         {}", self.sources)?;
        writeln!(f, "  with errors:   {}", self.errored)?;
        writeln!(f, "  digest on:     {}", self.digest_enabled)?;
        writeln!(f, "Stored items:    {}", self.items)?;
        writeln!(f, "Check interval:  {} min", s.check_interval_minutes)?;
        writeln!(
            f,
            "Retention:       {} days, {} per source",
            s.retention_days, s.retention_count
        )?;
        writeln!(f, "Digest minimum:  {} items", s.min_digest_items)?;
        writeln!(
            f,
            "AI provider:     {} ({}), key {}",
            s.ai.provider,
            s.ai.model.as_deref().unwrap_or("default model"),
            if s.ai.api_key.is_some() { "set" } else { "not set" }
        )?;

        if self.usage.is_empty() {
            write!(f, "AI usage ({}d):   none", USAGE_WINDOW_DAYS)?;
        } else {
            write!(f, "AI usage ({}d):", USAGE_WINDOW_DAYS)?;
            for u in &self.usage {
                write!(
                    f,
                    "\n  {}: {} calls, {} articles, {} tokens, cost {:.4}",
                    u.provider, u.call_count, u.article_count, u.total_tokens, u.estimated_cost
                )?;
            }
        }
        Ok(())
    }
}
