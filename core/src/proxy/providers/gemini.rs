//! Gemini-style strategy: bearer auth, `usageMetadata` counts, model name
//! recovered from the request URL when the payload omits it.

use axum::http::{header, HeaderMap, HeaderValue};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use super::{ExtractedUsage, ProviderStrategy, UsageExtractor};
use crate::channel::{Channel, Source};
use crate::pricing::TokenUsage;

static MODEL_FROM_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/models/([\w.-]+):").expect("valid regex"));

pub struct GeminiStrategy;

impl ProviderStrategy for GeminiStrategy {
    fn source(&self) -> Source {
        Source::Gemini
    }

    fn request_id_prefix(&self) -> &'static str {
        "gemini-"
    }

    fn rewrite_auth(&self, headers: &mut HeaderMap, channel: &Channel) {
        headers.remove(header::AUTHORIZATION);
        headers.remove("x-goog-api-key");
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", channel.api_key)) {
            headers.insert(header::AUTHORIZATION, value);
        }
    }

    fn error_body(&self, error_type: &str, message: &str) -> Value {
        json!({
            "error": {
                "message": message,
                "type": error_type
            }
        })
    }

    fn usage_extractor(&self, request_path: &str, channel: &Channel) -> Box<dyn UsageExtractor> {
        let model_from_url = MODEL_FROM_PATH
            .captures(request_path)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().to_string());
        Box::new(GeminiUsageExtractor {
            usage: TokenUsage::default(),
            model: String::new(),
            fallback_model: model_from_url.or_else(|| channel.model.clone()),
        })
    }
}

struct GeminiUsageExtractor {
    usage: TokenUsage,
    model: String,
    fallback_model: Option<String>,
}

impl GeminiUsageExtractor {
    fn merge(&mut self, data: &Value) {
        // Buffered stream responses arrive as a JSON array of chunks.
        if let Some(items) = data.as_array() {
            for item in items {
                self.merge(item);
            }
            return;
        }

        if let Some(model) = data.get("model").and_then(|v| v.as_str()) {
            self.model = model.to_string();
        }
        if let Some(meta) = data.get("usageMetadata") {
            if let Some(n) = meta.get("promptTokenCount").and_then(|v| v.as_u64()) {
                self.usage.input = n;
            }
            if let Some(n) = meta.get("candidatesTokenCount").and_then(|v| v.as_u64()) {
                self.usage.output = n;
            }
            if let Some(n) = meta.get("cachedContentTokenCount").and_then(|v| v.as_u64()) {
                self.usage.cached = n;
            }
        }
    }
}

impl UsageExtractor for GeminiUsageExtractor {
    fn on_frame(&mut self, _event: Option<&str>, data: &Value) {
        self.merge(data);
    }

    fn on_body(&mut self, data: &Value) {
        self.merge(data);
    }

    fn finish(&mut self) -> ExtractedUsage {
        let model = if self.model.is_empty() {
            self.fallback_model.clone().unwrap_or_default()
        } else {
            self.model.clone()
        };
        ExtractedUsage {
            usage: self.usage,
            model,
        }
    }
}
