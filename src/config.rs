use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    /// Pause between two sources within one pass.
    #[serde(default = "default_feed_delay")]
    pub feed_delay_secs: u64,

    /// Pause between two individually delivered messages.
    #[serde(default = "default_message_delay")]
    pub message_delay_secs: u64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_summarizer_timeout")]
    pub summarizer_timeout_secs: u64,

    /// Local hour of day at which the daily retention run happens.
    #[serde(default = "default_cleanup_hour")]
    pub cleanup_hour: u32,

    // Seed values for the settings store, only written when a key is absent
    #[serde(default = "default_check_interval")]
    pub check_interval_minutes: u32,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default = "default_retention_count")]
    pub retention_count: u32,

    #[serde(default = "default_min_digest_items")]
    pub min_digest_items: u32,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rss-relay");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("relay.db").to_string_lossy().to_string()
}

fn default_feed_delay() -> u64 {
    2
}

fn default_message_delay() -> u64 {
    1
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_summarizer_timeout() -> u64 {
    30
}

fn default_cleanup_hour() -> u32 {
    2
}

fn default_check_interval() -> u32 {
    10
}

fn default_retention_days() -> u32 {
    30
}

fn default_retention_count() -> u32 {
    100
}

fn default_min_digest_items() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            telegram_bot_token: None,
            telegram_chat_id: None,
            feed_delay_secs: default_feed_delay(),
            message_delay_secs: default_message_delay(),
            fetch_timeout_secs: default_fetch_timeout(),
            summarizer_timeout_secs: default_summarizer_timeout(),
            cleanup_hour: default_cleanup_hour(),
            check_interval_minutes: default_check_interval(),
            retention_days: default_retention_days(),
            retention_count: default_retention_count(),
            min_digest_items: default_min_digest_items(),
        }
    }
}

impl Config {
    /// Load the config file (writing defaults on first run), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rss-relay")
            .join("config.toml")
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("BOT_TOKEN") {
            self.telegram_bot_token = Some(token);
        }
        if let Some(chat_id) = lookup("CHAT_ID") {
            self.telegram_chat_id = Some(chat_id);
        }
        if let Some(interval) = lookup("CHECK_INTERVAL") {
            self.check_interval_minutes = interval
                .parse()
                .map_err(|_| AppError::Config(format!("CHECK_INTERVAL is not a number: {}", interval)))?;
        }
        if let Some(days) = lookup("RETENTION_DAYS") {
            self.retention_days = days
                .parse()
                .map_err(|_| AppError::Config(format!("RETENTION_DAYS is not a number: {}", days)))?;
        }
        Ok(())
    }

    /// Bot token and chat id, both required to deliver anything.
    pub fn telegram_credentials(&self) -> Result<(String, String)> {
        match (&self.telegram_bot_token, &self.telegram_chat_id) {
            (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
                Ok((token.clone(), chat_id.clone()))
            }
            _ => Err(AppError::Config(format!(
                "telegram_bot_token and telegram_chat_id must be set in {} or via BOT_TOKEN / CHAT_ID",
                Self::config_path().display()
            ))),
        }
    }

    pub fn feed_delay(&self) -> Duration {
        Duration::from_secs(self.feed_delay_secs)
    }

    pub fn message_delay(&self) -> Duration {
        Duration::from_secs(self.message_delay_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn summarizer_timeout(&self) -> Duration {
        Duration::from_secs(self.summarizer_timeout_secs)
    }
}
