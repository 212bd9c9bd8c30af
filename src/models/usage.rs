use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One summarizer call, as recorded after a digest was generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
    pub currency: String,
    pub article_count: u32,
}

/// Usage aggregated per provider over a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub provider: String,
    pub call_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
    pub article_count: u64,
    pub since: DateTime<Utc>,
}
