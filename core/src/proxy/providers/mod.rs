//! Provider strategies - the per-source pieces of the shared pipeline
//!
//! The three proxies differ only in auth-header shape, session-key
//! extraction, error-body schema, and where usage lives in the response;
//! everything else is the generic pipeline.

pub mod claude;
pub mod codex;
pub mod gemini;

use axum::http::HeaderMap;
use serde_json::Value;

use crate::channel::{Channel, Source};
use crate::pricing::TokenUsage;

pub use claude::ClaudeStrategy;
pub use codex::CodexStrategy;
pub use gemini::GeminiStrategy;

/// Usage and model identity pulled out of one response.
#[derive(Debug, Clone, Default)]
pub struct ExtractedUsage {
    pub usage: TokenUsage,
    pub model: String,
}

/// Per-request stateful observer fed decoded SSE frames (or the buffered
/// body, for non-streaming responses).
pub trait UsageExtractor: Send {
    fn on_frame(&mut self, event: Option<&str>, data: &Value);
    fn on_body(&mut self, data: &Value);
    fn finish(&mut self) -> ExtractedUsage;
}

pub trait ProviderStrategy: Send + Sync {
    fn source(&self) -> Source;

    /// Prefix for generated request ids ("" for claude, "codex-", "gemini-").
    fn request_id_prefix(&self) -> &'static str {
        ""
    }

    /// Whether this source participates in sticky session routing.
    fn supports_session_binding(&self) -> bool {
        false
    }

    /// Extract the conversation/session identifier, if any.
    fn session_key(&self, _headers: &HeaderMap, _body: &[u8]) -> Option<String> {
        None
    }

    /// Strip inbound credentials and substitute the channel's API key in
    /// the provider's expected scheme.
    fn rewrite_auth(&self, headers: &mut HeaderMap, channel: &Channel);

    /// Structured error body in the provider's native error schema.
    fn error_body(&self, error_type: &str, message: &str) -> Value;

    fn usage_extractor(&self, request_path: &str, channel: &Channel) -> Box<dyn UsageExtractor>;
}

pub fn strategy_for(source: Source) -> std::sync::Arc<dyn ProviderStrategy> {
    match source {
        Source::Claude => std::sync::Arc::new(ClaudeStrategy),
        Source::Codex => std::sync::Arc::new(CodexStrategy),
        Source::Gemini => std::sync::Arc::new(GeminiStrategy),
    }
}
