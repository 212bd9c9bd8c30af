use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A polled source. `title` stays `None` until the first successful fetch
/// or an explicit rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub last_check: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub digest_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Feed {
    /// Title for display, falling back to the URL.
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.url)
    }
}
