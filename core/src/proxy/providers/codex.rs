//! OpenAI-Responses-style strategy: bearer auth, usage in the
//! `response.completed` event, Chat Completions field names as fallback.

use axum::http::{header, HeaderMap, HeaderValue};
use serde_json::{json, Value};

use super::{ExtractedUsage, ProviderStrategy, UsageExtractor};
use crate::channel::{Channel, Source};
use crate::pricing::TokenUsage;

pub struct CodexStrategy;

impl ProviderStrategy for CodexStrategy {
    fn source(&self) -> Source {
        Source::Codex
    }

    fn request_id_prefix(&self) -> &'static str {
        "codex-"
    }

    fn rewrite_auth(&self, headers: &mut HeaderMap, channel: &Channel) {
        headers.remove(header::AUTHORIZATION);
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", channel.api_key)) {
            headers.insert(header::AUTHORIZATION, value);
        }
        headers.insert(
            "openai-beta",
            HeaderValue::from_static("responses=experimental"),
        );
    }

    fn error_body(&self, error_type: &str, message: &str) -> Value {
        json!({
            "error": {
                "message": message,
                "type": error_type
            }
        })
    }

    fn usage_extractor(&self, _request_path: &str, _channel: &Channel) -> Box<dyn UsageExtractor> {
        Box::new(CodexUsageExtractor::default())
    }
}

#[derive(Default)]
struct CodexUsageExtractor {
    usage: TokenUsage,
    model: String,
}

impl CodexUsageExtractor {
    fn merge_fallback(&mut self, data: &Value) {
        if self.model.is_empty() {
            if let Some(model) = data.get("model").and_then(|v| v.as_str()) {
                self.model = model.to_string();
            }
        }
        if self.usage.is_empty() {
            if let Some(usage) = data.get("usage") {
                // Responses API and Chat Completions name these differently.
                self.usage.input = usage
                    .get("input_tokens")
                    .or_else(|| usage.get("prompt_tokens"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                self.usage.output = usage
                    .get("output_tokens")
                    .or_else(|| usage.get("completion_tokens"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
            }
        }
    }
}

impl UsageExtractor for CodexUsageExtractor {
    fn on_frame(&mut self, _event: Option<&str>, data: &Value) {
        if data.get("type").and_then(|v| v.as_str()) == Some("response.completed") {
            if let Some(response) = data.get("response") {
                if let Some(model) = response.get("model").and_then(|v| v.as_str()) {
                    self.model = model.to_string();
                }
                if let Some(usage) = response.get("usage") {
                    self.usage.input = usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                    self.usage.output = usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                    self.usage.cached = usage
                        .pointer("/input_tokens_details/cached_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                    self.usage.reasoning = usage
                        .pointer("/output_tokens_details/reasoning_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                }
                return;
            }
        }
        self.merge_fallback(data);
    }

    fn on_body(&mut self, data: &Value) {
        self.merge_fallback(data);
    }

    fn finish(&mut self) -> ExtractedUsage {
        ExtractedUsage {
            usage: self.usage,
            model: self.model.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_completed_wins_over_fallback() {
        let mut extractor = CodexUsageExtractor::default();
        extractor.on_frame(
            None,
            &json!({
                "type": "response.completed",
                "response": {
                    "model": "gpt-4o",
                    "usage": {
                        "input_tokens": 200,
                        "output_tokens": 80,
                        "input_tokens_details": {"cached_tokens": 50},
                        "output_tokens_details": {"reasoning_tokens": 10}
                    }
                }
            }),
        );

        let extracted = extractor.finish();
        assert_eq!(extracted.model, "gpt-4o");
        assert_eq!(extracted.usage.input, 200);
        assert_eq!(extracted.usage.output, 80);
        assert_eq!(extracted.usage.cached, 50);
        assert_eq!(extracted.usage.reasoning, 10);
    }

    #[test]
    fn chat_completions_field_names_accepted() {
        let mut extractor = CodexUsageExtractor::default();
        extractor.on_body(&json!({
            "model": "gpt-4o-mini",
            "usage": {"prompt_tokens": 12, "completion_tokens": 7}
        }));

        let extracted = extractor.finish();
        assert_eq!(extracted.model, "gpt-4o-mini");
        assert_eq!(extracted.usage.input, 12);
        assert_eq!(extracted.usage.output, 7);
    }

    #[test]
    fn rewrite_sets_bearer_and_beta_header() {
        let strategy = CodexStrategy;
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer inbound"));

        let channel = Channel {
            id: "ch".into(),
            name: "test".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key: "sk-up".into(),
            enabled: true,
            weight: 1,
            max_concurrency: None,
            provider_key: Some("openai".into()),
            wire_api: Some("responses".into()),
            model: None,
            proxy_url: None,
            website_url: None,
            created_at: 0,
        };
        strategy.rewrite_auth(&mut headers, &channel);
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer sk-up");
        assert_eq!(headers.get("openai-beta").unwrap(), "responses=experimental");
    }
}
