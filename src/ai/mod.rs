mod provider;
mod summarizer;

use async_trait::async_trait;

use crate::error::Result;
use crate::feed::FeedItem;

pub use provider::{Pricing, Provider};
pub use summarizer::ProviderSummarizer;

/// Generated digest text plus token accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Condenses a batch of new items into a single text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, items: &[FeedItem], feed_title: &str) -> Result<Completion>;

    /// Provider id used for usage accounting.
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    fn pricing(&self) -> Pricing {
        Pricing::FREE
    }
}
