mod article;
mod feed;
mod filter;
mod usage;

pub use article::{Article, NewArticle};
pub use feed::Feed;
pub use filter::{FilterKind, FilterRule};
pub use usage::{ProviderUsage, UsageRecord};
