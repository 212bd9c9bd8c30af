//! Generation providers as plain capability records.
//!
//! Each provider is a static [`Provider`] value holding its endpoint, how to
//! authenticate, how to build a request body, how to read the response, and
//! what it costs. Selecting a provider is a lookup by id.

use serde_json::{json, Value};

use super::Completion;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    /// Price per million input tokens.
    pub input: f64,
    /// Price per million output tokens.
    pub output: f64,
    pub currency: &'static str,
}

impl Pricing {
    pub const FREE: Pricing = Pricing {
        input: 0.0,
        output: 0.0,
        currency: "USD",
    };

    /// Estimated cost, rounded to six decimals.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let raw = (input_tokens as f64 * self.input + output_tokens as f64 * self.output) / 1_000_000.0;
        (raw * 1_000_000.0).round() / 1_000_000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    /// Key goes into the endpoint URL (`{api_key}` placeholder).
    QueryKey,
    Bearer,
}

pub struct Provider {
    pub id: &'static str,
    pub name: &'static str,
    pub default_model: &'static str,
    /// May contain `{model}` and `{api_key}` placeholders.
    pub endpoint: &'static str,
    pub auth: Auth,
    pub format_request: fn(prompt: &str, model: &str) -> Value,
    pub parse_response: fn(body: &Value) -> Completion,
    pub pricing: Pricing,
}

impl Provider {
    pub fn all() -> &'static [&'static Provider] {
        &PROVIDERS
    }

    pub fn by_id(id: &str) -> Option<&'static Provider> {
        PROVIDERS.iter().copied().find(|p| p.id.eq_ignore_ascii_case(id))
    }

    pub fn endpoint_for(&self, model: &str, api_key: &str) -> String {
        self.endpoint
            .replace("{model}", model)
            .replace("{api_key}", api_key)
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("default_model", &self.default_model)
            .finish()
    }
}

fn str_at<'a>(body: &'a Value, pointer: &str) -> &'a str {
    body.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

fn u64_at(body: &Value, pointer: &str) -> u64 {
    body.pointer(pointer).and_then(Value::as_u64).unwrap_or_default()
}

static PROVIDERS: [&Provider; 3] = [&GEMINI, &DEEPSEEK, &QWEN];

pub static GEMINI: Provider = Provider {
    id: "gemini",
    name: "Google Gemini",
    default_model: "gemini-2.0-flash-exp",
    endpoint: "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent?key={api_key}",
    auth: Auth::QueryKey,
    format_request: gemini_request,
    parse_response: gemini_response,
    pricing: Pricing::FREE,
};

pub static DEEPSEEK: Provider = Provider {
    id: "deepseek",
    name: "DeepSeek",
    default_model: "deepseek-chat",
    endpoint: "https://api.deepseek.com/v1/chat/completions",
    auth: Auth::Bearer,
    format_request: deepseek_request,
    parse_response: deepseek_response,
    pricing: Pricing {
        input: 1.0,
        output: 2.0,
        currency: "CNY",
    },
};

pub static QWEN: Provider = Provider {
    id: "qwen",
    name: "Qwen",
    default_model: "qwen-turbo",
    endpoint: "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation",
    auth: Auth::Bearer,
    format_request: qwen_request,
    parse_response: qwen_response,
    pricing: Pricing {
        input: 0.5,
        output: 2.0,
        currency: "CNY",
    },
};

fn gemini_request(prompt: &str, _model: &str) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": prompt }] }]
    })
}

fn gemini_response(body: &Value) -> Completion {
    Completion {
        text: str_at(body, "/candidates/0/content/parts/0/text").to_string(),
        input_tokens: u64_at(body, "/usageMetadata/promptTokenCount"),
        output_tokens: u64_at(body, "/usageMetadata/candidatesTokenCount"),
        total_tokens: u64_at(body, "/usageMetadata/totalTokenCount"),
    }
}

fn deepseek_request(prompt: &str, model: &str) -> Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }],
        "temperature": 0.7
    })
}

fn deepseek_response(body: &Value) -> Completion {
    Completion {
        text: str_at(body, "/choices/0/message/content").to_string(),
        input_tokens: u64_at(body, "/usage/prompt_tokens"),
        output_tokens: u64_at(body, "/usage/completion_tokens"),
        total_tokens: u64_at(body, "/usage/total_tokens"),
    }
}

fn qwen_request(prompt: &str, model: &str) -> Value {
    json!({
        "model": model,
        "input": { "messages": [{ "role": "user", "content": prompt }] },
        "parameters": { "result_format": "message" }
    })
}

fn qwen_response(body: &Value) -> Completion {
    Completion {
        text: str_at(body, "/output/choices/0/message/content").to_string(),
        input_tokens: u64_at(body, "/usage/input_tokens"),
        output_tokens: u64_at(body, "/usage/output_tokens"),
        total_tokens: u64_at(body, "/usage/total_tokens"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(Provider::by_id("DeepSeek").map(|p| p.id), Some("deepseek"));
        assert!(Provider::by_id("openai").is_none());
    }

    #[test]
    fn gemini_puts_model_and_key_in_url() {
        let url = GEMINI.endpoint_for("gemini-pro", "k123");
        assert!(url.contains("/models/gemini-pro:generateContent"));
        assert!(url.ends_with("key=k123"));
    }

    #[test]
    fn parses_each_provider_shape() {
        let gemini = json!({
            "candidates": [{ "content": { "parts": [{ "text": "g" }] } }],
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15 }
        });
        let deepseek = json!({
            "choices": [{ "message": { "content": "d" } }],
            "usage": { "prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150 }
        });
        let qwen = json!({
            "output": { "choices": [{ "message": { "content": "q" } }] },
            "usage": { "input_tokens": 7, "output_tokens": 3, "total_tokens": 10 }
        });

        assert_eq!((GEMINI.parse_response)(&gemini).total_tokens, 15);
        let d = (DEEPSEEK.parse_response)(&deepseek);
        assert_eq!((d.text.as_str(), d.input_tokens, d.output_tokens), ("d", 100, 50));
        assert_eq!((QWEN.parse_response)(&qwen).text, "q");
    }

    #[test]
    fn missing_fields_read_as_empty() {
        let c = (DEEPSEEK.parse_response)(&json!({ "error": "quota" }));
        assert_eq!(c, Completion::default());
    }

    #[test]
    fn request_bodies_carry_prompt_and_model() {
        let body = (QWEN.format_request)("summarize", "qwen-max");
        assert_eq!(body["model"], "qwen-max");
        assert_eq!(body["input"]["messages"][0]["content"], "summarize");

        let body = (GEMINI.format_request)("summarize", "ignored");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "summarize");
    }

    #[test]
    fn cost_is_per_million_and_rounded() {
        assert!((DEEPSEEK.pricing.cost(1_000_000, 500_000) - 2.0).abs() < 1e-9);
        assert!((QWEN.pricing.cost(1, 1) - 0.000003).abs() < 1e-12);
        assert_eq!(GEMINI.pricing.cost(123_456, 654_321), 0.0);
    }
}
