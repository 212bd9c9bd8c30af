use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::feed::FeedItem;
use crate::services::format::truncate;
use crate::settings::AiSettings;

use super::provider::{Auth, Pricing, Provider};
use super::{Completion, Summarizer};

const MAX_SNIPPET_CHARS: usize = 500;

/// Summarizer backed by one of the HTTP generation providers.
pub struct ProviderSummarizer {
    client: Client,
    provider: &'static Provider,
    api_key: String,
    model: String,
}

impl ProviderSummarizer {
    pub fn new(
        provider: &'static Provider,
        api_key: String,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            provider,
            api_key,
            model: model.unwrap_or_else(|| provider.default_model.to_string()),
        })
    }

    /// Builds the summarizer selected by the settings, or `None` when no API
    /// key is configured for that provider.
    pub fn from_settings(ai: &AiSettings, timeout: Duration) -> Result<Option<Self>> {
        let provider = Provider::by_id(&ai.provider).ok_or_else(|| {
            let known: Vec<_> = Provider::all().iter().map(|p| p.id).collect();
            AppError::Config(format!(
                "unknown AI provider {:?} (known: {})",
                ai.provider,
                known.join(", ")
            ))
        })?;

        match &ai.api_key {
            Some(key) => Ok(Some(Self::new(provider, key.clone(), ai.model.clone(), timeout)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Summarizer for ProviderSummarizer {
    async fn summarize(&self, items: &[FeedItem], feed_title: &str) -> Result<Completion> {
        if items.is_empty() {
            return Err(AppError::Summarizer("nothing to summarize".to_string()));
        }

        let prompt = build_prompt(items);
        let body = (self.provider.format_request)(&prompt, &self.model);
        let endpoint = self.provider.endpoint_for(&self.model, &self.api_key);

        tracing::info!(
            "Generating digest for {} with {} ({})",
            feed_title,
            self.provider.name,
            self.model
        );

        let mut request = self.client.post(&endpoint).json(&body);
        if self.provider.auth == Auth::Bearer {
            request = request.bearer_auth(&self.api_key);
        }

        // The endpoint may embed the API key, keep it out of error messages
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Http(e.without_url()))?;

        if !response.status().is_success() {
            let status = response.status();
            // Only the error message is surfaced, never the full body
            let detail = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| error_message(&v))
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(AppError::Summarizer(format!(
                "{} returned HTTP {}: {}",
                self.provider.name, status, detail
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| AppError::Http(e.without_url()))?;
        let completion = (self.provider.parse_response)(&data);

        if completion.text.trim().is_empty() {
            return Err(AppError::Summarizer(format!(
                "{} returned no text",
                self.provider.name
            )));
        }

        Ok(completion)
    }

    fn provider(&self) -> &str {
        self.provider.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn pricing(&self) -> Pricing {
        self.provider.pricing
    }
}

fn error_message(body: &Value) -> Option<String> {
    body.pointer("/error/message")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Prompt listing every item's title and snippet.
pub fn build_prompt(items: &[FeedItem]) -> String {
    let list = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let snippet = item
                .summary_text()
                .map(|s| truncate(s, MAX_SNIPPET_CHARS))
                .unwrap_or_else(|| "No summary".to_string());
            format!(
                "{}. Title: {}\n   Summary: {}",
                i + 1,
                item.title.as_deref().unwrap_or("Untitled"),
                snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"Summarize the following {} articles concisely:
1. Extract the key point of each article
2. Group related articles by topic
3. Keep the whole summary under 500 words
4. Use short paragraphs, no code blocks
5. Bullet points (•) or numbered lists are fine

Articles:
{}

Summary:"#,
        items.len(),
        list
    )
}
