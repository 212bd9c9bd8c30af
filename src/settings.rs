//! Runtime settings kept in the key/value store.
//!
//! Settings are read into a plain [`Settings`] value at the start of every
//! pass and handed to the poller, dispatcher and retention manager, so a
//! change made between passes takes effect on the next one.

use std::str::FromStr;

use crate::config::Config;
use crate::db::Repository;
use crate::error::Result;

pub const CHECK_INTERVAL: &str = "check_interval";
pub const RETENTION_DAYS: &str = "retention_days";
pub const RETENTION_COUNT: &str = "retention_count";
pub const MIN_DIGEST_ITEMS: &str = "ai_min_articles";
pub const AI_PROVIDER: &str = "ai_provider";

pub const DEFAULT_PROVIDER: &str = "gemini";

/// Upper bound accepted for the digest threshold.
pub const MAX_MIN_DIGEST_ITEMS: u32 = 20;

/// Upper bound accepted for age retention, about a century.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

pub fn api_key_key(provider: &str) -> String {
    format!("ai_api_key_{}", provider)
}

pub fn model_key(provider: &str) -> String {
    format!("ai_model_{}", provider)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiSettings {
    pub provider: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub check_interval_minutes: u32,
    pub retention_days: u32,
    pub retention_count: u32,
    pub min_digest_items: u32,
    pub ai: AiSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_interval_minutes: 10,
            retention_days: 30,
            retention_count: 100,
            min_digest_items: 3,
            ai: AiSettings {
                provider: DEFAULT_PROVIDER.to_string(),
                api_key: None,
                model: None,
            },
        }
    }
}

impl Settings {
    /// Write the config's values for every key that is not stored yet.
    pub async fn seed(repo: &Repository, config: &Config) -> Result<()> {
        repo.seed_setting(CHECK_INTERVAL, &config.check_interval_minutes.to_string())
            .await?;
        repo.seed_setting(RETENTION_DAYS, &config.retention_days.to_string())
            .await?;
        repo.seed_setting(RETENTION_COUNT, &config.retention_count.to_string())
            .await?;
        repo.seed_setting(MIN_DIGEST_ITEMS, &config.min_digest_items.to_string())
            .await?;
        repo.seed_setting(AI_PROVIDER, DEFAULT_PROVIDER).await?;
        Ok(())
    }

    pub async fn load(repo: &Repository) -> Result<Self> {
        let defaults = Settings::default();

        let provider = non_empty(repo.get_setting(AI_PROVIDER).await?)
            .unwrap_or(defaults.ai.provider);
        let api_key = non_empty(repo.get_setting(&api_key_key(&provider)).await?);
        let model = non_empty(repo.get_setting(&model_key(&provider)).await?);

        Ok(Self {
            check_interval_minutes: parse_or(
                repo.get_setting(CHECK_INTERVAL).await?,
                defaults.check_interval_minutes,
            )
            .max(1),
            retention_days: parse_or(repo.get_setting(RETENTION_DAYS).await?, defaults.retention_days)
                .min(MAX_RETENTION_DAYS),
            retention_count: parse_or(
                repo.get_setting(RETENTION_COUNT).await?,
                defaults.retention_count,
            ),
            min_digest_items: parse_or(
                repo.get_setting(MIN_DIGEST_ITEMS).await?,
                defaults.min_digest_items,
            )
            .clamp(1, MAX_MIN_DIGEST_ITEMS),
            ai: AiSettings {
                provider,
                api_key,
                model,
            },
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    match value {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparsable setting value {:?}", raw);
            default
        }),
        None => default,
    }
}
