use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

use super::{DeliveryChannel, SendOptions};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
}

pub struct TelegramClient {
    client: Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramClient {
    pub fn new(bot_token: String, chat_id: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            bot_token,
            chat_id,
        })
    }
}

#[async_trait]
impl DeliveryChannel for TelegramClient {
    async fn send(&self, text: &str, options: SendOptions) -> Result<()> {
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
            parse_mode: "MarkdownV2",
            disable_web_page_preview: options.disable_preview,
        };

        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", TELEGRAM_API_URL, self.bot_token))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Http(e.without_url()))?;

        let status = response.status();
        let body: TelegramResponse = response.json().await.map_err(|e| {
            AppError::Delivery(format!("unreadable Telegram response (HTTP {}): {}", status, e.without_url()))
        })?;

        if !status.is_success() || !body.ok {
            return Err(AppError::Delivery(format!(
                "Telegram API error (HTTP {}): {}",
                status,
                body.description.unwrap_or_default()
            )));
        }

        Ok(())
    }
}
