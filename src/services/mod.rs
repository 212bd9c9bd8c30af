pub mod format;
mod telegram;

use async_trait::async_trait;

use crate::error::Result;

pub use telegram::TelegramClient;

/// Per-message options. Text is always MarkdownV2, see [`format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub disable_preview: bool,
}

impl SendOptions {
    pub const MARKDOWN: SendOptions = SendOptions {
        disable_preview: false,
    };

    pub const MARKDOWN_NO_PREVIEW: SendOptions = SendOptions {
        disable_preview: true,
    };
}

/// The single destination messages are delivered to. Each call sends one
/// message; pacing between calls is the caller's job.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, text: &str, options: SendOptions) -> Result<()>;
}
