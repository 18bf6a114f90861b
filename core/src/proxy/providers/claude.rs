//! Anthropic-style strategy: x-api-key auth, usage objects on message
//! events, sticky sessions keyed by conversation identity.

use axum::http::{header, HeaderMap, HeaderValue};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{ExtractedUsage, ProviderStrategy, UsageExtractor};
use crate::channel::{Channel, Source};
use crate::pricing::TokenUsage;

const SESSION_HEADERS: [&str; 3] = ["x-session-id", "x-claude-session", "x-cc-session"];

pub struct ClaudeStrategy;

impl ProviderStrategy for ClaudeStrategy {
    fn source(&self) -> Source {
        Source::Claude
    }

    fn supports_session_binding(&self) -> bool {
        true
    }

    fn session_key(&self, headers: &HeaderMap, body: &[u8]) -> Option<String> {
        for name in SESSION_HEADERS {
            if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
                return Some(value.to_string());
            }
        }

        let parsed: Value = serde_json::from_slice(body).ok()?;
        if let Some(key) = session_key_from_body(&parsed) {
            return Some(key);
        }
        Some(fingerprint(&parsed))
    }

    fn rewrite_auth(&self, headers: &mut HeaderMap, channel: &Channel) {
        headers.remove("x-api-key");
        headers.remove(header::AUTHORIZATION);
        if let Ok(value) = HeaderValue::from_str(&channel.api_key) {
            headers.insert("x-api-key", value);
        }
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", channel.api_key)) {
            headers.insert(header::AUTHORIZATION, value);
        }
        if !headers.contains_key("anthropic-version") {
            headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        }
    }

    fn error_body(&self, error_type: &str, message: &str) -> Value {
        json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": message
            }
        })
    }

    fn usage_extractor(&self, _request_path: &str, _channel: &Channel) -> Box<dyn UsageExtractor> {
        Box::new(ClaudeUsageExtractor::default())
    }
}

fn session_key_from_body(body: &Value) -> Option<String> {
    let candidates = [
        body.get("session_id"),
        body.get("sessionId"),
        body.get("conversation_id"),
        body.get("conversationId"),
        body.pointer("/metadata/session_id"),
        body.pointer("/metadata/sessionId"),
        body.pointer("/metadata/conversation_id"),
        body.pointer("/metadata/user_id"),
        body.pointer("/workspace/workspace_id"),
        body.get("project_id"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str())
        .map(str::to_string)
}

/// Stable fingerprint for requests that carry no explicit session id: the
/// model plus the first message's text identifies a conversation well
/// enough for cache affinity.
fn fingerprint(body: &Value) -> String {
    let mut hasher = Sha256::new();
    if let Some(model) = body.get("model").and_then(|v| v.as_str()) {
        hasher.update(model.as_bytes());
    }
    if let Some(first) = body.pointer("/messages/0/content") {
        match first {
            Value::String(s) => hasher.update(s.as_bytes()),
            Value::Array(blocks) => {
                for block in blocks {
                    if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
                        hasher.update(text.as_bytes());
                    }
                }
            }
            _ => {}
        }
    }
    format!("{:x}", hasher.finalize())[..16].to_string()
}

#[derive(Default)]
struct ClaudeUsageExtractor {
    usage: TokenUsage,
    model: String,
}

impl ClaudeUsageExtractor {
    fn merge_usage(&mut self, usage: &Value) {
        if let Some(n) = usage.get("input_tokens").and_then(|v| v.as_u64()) {
            self.usage.input = n;
        }
        if let Some(n) = usage.get("output_tokens").and_then(|v| v.as_u64()) {
            self.usage.output = n;
        }
        if let Some(n) = usage.get("cache_creation_input_tokens").and_then(|v| v.as_u64()) {
            self.usage.cache_creation = n;
        }
        if let Some(n) = usage.get("cache_read_input_tokens").and_then(|v| v.as_u64()) {
            self.usage.cache_read = n;
        }
    }
}

impl UsageExtractor for ClaudeUsageExtractor {
    fn on_frame(&mut self, event: Option<&str>, data: &Value) {
        if event == Some("message_start") {
            if let Some(model) = data.pointer("/message/model").and_then(|v| v.as_str()) {
                self.model = model.to_string();
            }
            if let Some(usage) = data.pointer("/message/usage") {
                self.merge_usage(usage);
            }
        }
        if let Some(usage) = data.get("usage") {
            self.merge_usage(usage);
        }
    }

    fn on_body(&mut self, data: &Value) {
        if let Some(model) = data.get("model").and_then(|v| v.as_str()) {
            self.model = model.to_string();
        }
        if let Some(usage) = data.get("usage") {
            self.merge_usage(usage);
        }
    }

    fn finish(&mut self) -> ExtractedUsage {
        ExtractedUsage {
            usage: self.usage,
            model: self.model.clone(),
        }
    }
}
