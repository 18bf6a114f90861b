//! Shared proxy pipeline - allocate, forward, observe, account, release
//!
//! One generic request path parameterized by a `ProviderStrategy`. The
//! response body is streamed back to the caller byte-for-byte; usage
//! extraction runs on a side channel of the same stream. The channel slot
//! is released exactly once no matter how the request terminates: clean
//! end, upstream error, or client disconnect (the release guard is owned
//! by the response stream, so dropping the stream releases too).

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

use crate::channel::{Channel, Source};
use crate::error::Error;
use crate::events::{EventSink, LogEvent, RequestRecord, StatsSink, TokenCounts};
use crate::health::HealthTracker;
use crate::pricing;
use crate::proxy::providers::ProviderStrategy;
use crate::proxy::sse::SseScanner;
use crate::proxy::upstream::{resolve_target, UpstreamClient};
use crate::scheduler::{AllocateRequest, ReleaseGuard, Scheduler};

pub const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;
/// Cap on the buffered copy kept for non-streaming usage parsing. The
/// passthrough to the caller is never truncated.
const MAX_PARSE_BYTES: usize = 16 * 1024 * 1024;

/// Everything one source's proxy needs, shared across requests.
pub struct SourceRuntime {
    pub source: Source,
    pub scheduler: Arc<Scheduler>,
    pub health: Arc<HealthTracker>,
    pub strategy: Arc<dyn ProviderStrategy>,
    pub upstream: Arc<UpstreamClient>,
    pub stats: Arc<dyn StatsSink>,
    pub events: Arc<dyn EventSink>,
    pub enable_session_binding: bool,
}

impl SourceRuntime {
    fn broadcast_state(&self) {
        self.events
            .scheduler_state(self.source, self.scheduler.snapshot(self.source));
    }
}

/// Release guard plus the state rebroadcast that must follow every release.
/// Owned by the response stream, so a client disconnect releases the slot
/// AND notifies observers; the sink send is synchronous and non-blocking,
/// which makes it safe to run from Drop.
struct SlotGuard {
    guard: ReleaseGuard,
    rt: Arc<SourceRuntime>,
}

impl SlotGuard {
    fn release(&self) {
        if self.guard.release() {
            self.rt.broadcast_state();
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Catch-all handler: any method, any path.
pub async fn handle_proxy(State(rt): State<Arc<SourceRuntime>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();

    let body_bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return error_response(
                &rt,
                StatusCode::PAYLOAD_TOO_LARGE,
                "invalid_request_error",
                &format!("Failed to read request body: {e}"),
            );
        }
    };

    let session_key = if rt.enable_session_binding && rt.strategy.supports_session_binding() {
        rt.strategy.session_key(&parts.headers, &body_bytes)
    } else {
        None
    };

    let allocate = AllocateRequest {
        enable_session_binding: session_key.is_some(),
        session_key,
    };
    let (channel, guard) = match rt.scheduler.allocate_guarded(rt.source, &allocate) {
        Ok((channel, guard)) => (
            channel,
            SlotGuard {
                guard,
                rt: Arc::clone(&rt),
            },
        ),
        Err(e) => {
            tracing::warn!(source = %rt.source, "channel allocation failed: {e}");
            return error_response(
                &rt,
                StatusCode::SERVICE_UNAVAILABLE,
                "channel_pool_exhausted",
                &e.to_string(),
            );
        }
    };
    rt.broadcast_state();

    let request_id = new_request_id(rt.strategy.request_id_prefix());
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    tracing::info!(
        source = %rt.source,
        request_id,
        channel = %channel.name,
        path = path_and_query,
        "forwarding request"
    );

    forward(rt, parts.method, path_and_query.to_string(), parts.headers, body_bytes, channel, guard, request_id)
        .await
}

#[allow(clippy::too_many_arguments)]
async fn forward(
    rt: Arc<SourceRuntime>,
    method: axum::http::Method,
    path_and_query: String,
    inbound_headers: HeaderMap,
    body: Bytes,
    channel: Channel,
    guard: SlotGuard,
    request_id: String,
) -> Response {
    let started = Instant::now();
    let target = resolve_target(&channel.base_url, &path_and_query);

    let mut headers = inbound_headers;
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    rt.strategy.rewrite_auth(&mut headers, &channel);

    let upstream_response = rt
        .upstream
        .client_for(&channel)
        .request(method, &target)
        .headers(headers)
        .body(body)
        .send()
        .await;

    let upstream_response = match upstream_response {
        Ok(response) => response,
        Err(e) => {
            let error = classify(&e, rt.upstream.timeout_secs());
            rt.health
                .record_failure(&channel.id, rt.source, &error.to_string());
            guard.release();
            tracing::error!(source = %rt.source, request_id, channel = %channel.name, "upstream error: {error}");
            return error_response(&rt, StatusCode::BAD_GATEWAY, "proxy_error", &error.to_string());
        }
    };

    let status = upstream_response.status();
    let mut response_headers = upstream_response.headers().clone();
    // De-chunked by the client; framing is ours now.
    response_headers.remove(header::TRANSFER_ENCODING);
    response_headers.remove(header::CONNECTION);

    let is_event_stream = response_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false);

    let mut extractor = rt.strategy.usage_extractor(&path_and_query, &channel);
    let channel_name = channel.name.clone();
    let channel_id = channel.id.clone();

    let mut upstream_stream = upstream_response.bytes_stream();
    let body_stream = async_stream::stream! {
        // The guard lives inside the stream: if the caller disconnects and
        // the body is dropped mid-flight, Drop still releases the slot.
        let guard = guard;
        let mut scanner = SseScanner::new();
        let mut buffered: Vec<u8> = Vec::new();
        let mut failed = false;

        while let Some(chunk) = upstream_stream.next().await {
            match chunk {
                Ok(bytes) => {
                    if is_event_stream {
                        scanner.feed(&bytes, |frame| {
                            // Malformed frames are ignored; the caller gets
                            // the original bytes either way.
                            if let Ok(value) = serde_json::from_str(frame.data) {
                                extractor.on_frame(frame.event, &value);
                            }
                        });
                    } else if buffered.len() < MAX_PARSE_BYTES {
                        buffered.extend_from_slice(&bytes);
                    }
                    yield Ok::<Bytes, std::io::Error>(bytes);
                }
                Err(e) => {
                    failed = true;
                    let error = classify(&e, rt.upstream.timeout_secs());
                    rt.health.record_failure(&channel_id, rt.source, &error.to_string());
                    tracing::error!(
                        source = %rt.source,
                        request_id,
                        channel = %channel_name,
                        "upstream stream error: {error}"
                    );
                    guard.release();
                    yield Err(std::io::Error::other(error.to_string()));
                    break;
                }
            }
        }

        if !failed {
            if !is_event_stream {
                if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&buffered) {
                    extractor.on_body(&value);
                }
            }
            let extracted = extractor.finish();
            let duration_ms = started.elapsed().as_millis() as u64;

            if !extracted.usage.is_empty() {
                let cost = pricing::cost(rt.source, &extracted.model, &extracted.usage);
                let tokens = TokenCounts::from(&extracted.usage);
                rt.events.log(LogEvent {
                    id: request_id.clone(),
                    time: chrono::Local::now().format("%H:%M:%S").to_string(),
                    channel: channel_name.clone(),
                    model: extracted.model.clone(),
                    input_tokens: tokens.input,
                    output_tokens: tokens.output,
                    cached_tokens: tokens.cached,
                    reasoning_tokens: tokens.reasoning,
                    cost,
                    source: rt.source,
                });
                rt.stats.record_request(RequestRecord {
                    id: request_id.clone(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    channel: channel_name.clone(),
                    channel_id: channel_id.clone(),
                    model: extracted.model,
                    tokens,
                    duration_ms,
                    success: true,
                    cost,
                    source: rt.source,
                });
            }

            // The upstream call itself completed; provider-side HTTP error
            // codes are the caller's concern, not a transport failure.
            rt.health.record_success(&channel_id, rt.source);
            guard.release();
        }
    };

    let mut response = Response::builder().status(status);
    if let Some(headers) = response.headers_mut() {
        *headers = response_headers;
    }
    response
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to build response: {e}"),
            )
                .into_response()
        })
}

fn classify(e: &reqwest::Error, timeout_secs: u64) -> Error {
    if e.is_timeout() {
        Error::UpstreamTimeout {
            seconds: timeout_secs,
        }
    } else {
        Error::UpstreamConnection(e.to_string())
    }
}

fn error_response(
    rt: &SourceRuntime,
    status: StatusCode,
    error_type: &str,
    message: &str,
) -> Response {
    (status, Json(rt.strategy.error_body(error_type, message))).into_response()
}

fn new_request_id(prefix: &str) -> String {
    format!(
        "{}{}-{}",
        prefix,
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}
