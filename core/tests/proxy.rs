//! End-to-end pipeline tests against a synthetic upstream.
//!
//! Each test boots a real relay (axum on an ephemeral port) and a fake
//! provider endpoint, then drives traffic through both with reqwest.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::routing::{any, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;

use ccrelay_core::channel::NewChannel;
use ccrelay_core::events::{BroadcastSink, RelayEvent, RequestRecord};
use ccrelay_core::health::UNHEALTHY_AFTER;
use ccrelay_core::proxy::{strategy_for, ProxyServer, SourceRuntime, UpstreamClient};
use ccrelay_core::{ChannelRegistry, HealthTracker, Scheduler, Source};

const SSE_PAYLOAD: &str = concat!(
    "event: message_start\n",
    "data: {\"type\":\"message_start\",\"message\":{\"model\":\"claude-sonnet-4-5-20250929\",\"usage\":{\"input_tokens\":25,\"output_tokens\":1}}}\n",
    "\n",
    "event: content_block_delta\n",
    "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"hello\"}}\n",
    "\n",
    "event: message_delta\n",
    "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":42}}\n",
    "\n",
);

struct Relay {
    addr: SocketAddr,
    registry: Arc<ChannelRegistry>,
    scheduler: Arc<Scheduler>,
    health: Arc<HealthTracker>,
    sink: Arc<BroadcastSink>,
    _dir: tempfile::TempDir,
}

async fn spawn_router(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn spawn_relay(source: Source, enable_session_binding: bool) -> Relay {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(ChannelRegistry::load(dir.path()).unwrap());
    let health = Arc::new(HealthTracker::new());
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&registry), Arc::clone(&health)));
    let sink = Arc::new(BroadcastSink::new(64));

    let runtime = Arc::new(SourceRuntime {
        source,
        scheduler: Arc::clone(&scheduler),
        health: Arc::clone(&health),
        strategy: strategy_for(source),
        upstream: Arc::new(UpstreamClient::new(5)),
        stats: Arc::clone(&sink) as _,
        events: Arc::clone(&sink) as _,
        enable_session_binding,
    });

    let addr = spawn_router(ProxyServer::new("127.0.0.1".into(), 0, runtime).router()).await;
    Relay {
        addr,
        registry,
        scheduler,
        health,
        sink,
        _dir: dir,
    }
}

fn add_channel(relay: &Relay, source: Source, name: &str, base_url: String, max: Option<u32>) -> String {
    relay
        .registry
        .create(
            source,
            NewChannel {
                name: name.into(),
                base_url,
                api_key: "sk-upstream".into(),
                max_concurrency: max,
                ..Default::default()
            },
        )
        .unwrap()
        .id
}

async fn next_request_record(
    rx: &mut tokio::sync::broadcast::Receiver<RelayEvent>,
) -> RequestRecord {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("timed out waiting for request record")
            .unwrap();
        if let RelayEvent::Request(record) = event {
            return record;
        }
    }
}

/// An SSE endpoint that dribbles the payload out in tiny chunks so frame
/// boundaries land mid-chunk.
fn sse_upstream(chunk_size: usize) -> Router {
    Router::new().route(
        "/v1/messages",
        post(move || async move {
            let chunks: Vec<Result<Bytes, std::convert::Infallible>> = SSE_PAYLOAD
                .as_bytes()
                .chunks(chunk_size)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from_stream(futures::stream::iter(chunks)))
                .unwrap()
        }),
    )
}

#[tokio::test]
async fn sse_passthrough_is_byte_exact_and_usage_is_extracted() {
    // Chunk sizes chosen to split frames at awkward places.
    for chunk_size in [7, 64, SSE_PAYLOAD.len()] {
        let upstream = spawn_router(sse_upstream(chunk_size)).await;
        let relay = spawn_relay(Source::Claude, true).await;
        add_channel(&relay, Source::Claude, "a", format!("http://{upstream}"), None);
        let mut rx = relay.sink.subscribe();

        let response = reqwest::Client::new()
            .post(format!("http://{}/v1/messages", relay.addr))
            .json(&serde_json::json!({
                "model": "claude-sonnet-4-5-20250929",
                "stream": true,
                "messages": [{"role": "user", "content": "hi"}]
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body = response.bytes().await.unwrap();
        assert_eq!(
            body.as_ref(),
            SSE_PAYLOAD.as_bytes(),
            "passthrough altered bytes at chunk size {chunk_size}"
        );

        let record = next_request_record(&mut rx).await;
        assert_eq!(record.model, "claude-sonnet-4-5-20250929");
        assert_eq!(record.tokens.input, 25);
        assert_eq!(record.tokens.output, 42);
        assert!(record.success);
        assert!(record.cost > 0.0, "known model must be priced");

        // Slot released at stream end.
        assert_eq!(relay.scheduler.snapshot(Source::Claude).pending, 0);
    }
}

#[tokio::test]
async fn non_streaming_json_body_is_accounted() {
    let upstream_router = Router::new().route(
        "/v1/messages",
        post(|| async {
            Json(serde_json::json!({
                "model": "claude-sonnet-4-5-20250929",
                "content": [{"type": "text", "text": "hi"}],
                "usage": {"input_tokens": 11, "output_tokens": 7}
            }))
        }),
    );
    let upstream = spawn_router(upstream_router).await;
    let relay = spawn_relay(Source::Claude, false).await;
    add_channel(&relay, Source::Claude, "a", format!("http://{upstream}"), None);
    let mut rx = relay.sink.subscribe();

    let response = reqwest::Client::new()
        .post(format!("http://{}/v1/messages", relay.addr))
        .json(&serde_json::json!({"model": "claude-sonnet-4-5-20250929", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["usage"]["input_tokens"], 11);

    let record = next_request_record(&mut rx).await;
    assert_eq!(record.tokens.input, 11);
    assert_eq!(record.tokens.output, 7);
}

#[tokio::test]
async fn saturated_channel_spills_to_unlimited_peer() {
    let upstream_router = Router::new().fallback(any(|| async {
        tokio::time::sleep(Duration::from_millis(800)).await;
        Json(serde_json::json!({"ok": true}))
    }));
    let upstream = spawn_router(upstream_router).await;

    let relay = spawn_relay(Source::Claude, false).await;
    let capped = add_channel(
        &relay,
        Source::Claude,
        "capped",
        format!("http://{upstream}"),
        Some(1),
    );
    add_channel(&relay, Source::Claude, "open", format!("http://{upstream}"), None);

    let client = reqwest::Client::new();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let client = client.clone();
        let url = format!("http://{}/v1/messages", relay.addr);
        handles.push(tokio::spawn(async move {
            client
                .post(url)
                .json(&serde_json::json!({"model": "m", "messages": []}))
                .send()
                .await
                .unwrap()
                .status()
        }));
    }

    // Mid-flight the capped channel must never exceed its ceiling.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let snapshot = relay.scheduler.snapshot(Source::Claude);
    assert_eq!(snapshot.pending, 4);
    let capped_state = snapshot.channels.iter().find(|c| c.id == capped).unwrap();
    assert!(capped_state.inflight <= 1, "ceiling breached: {}", capped_state.inflight);

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 200);
    }
    assert_eq!(relay.scheduler.snapshot(Source::Claude).pending, 0);
}

#[tokio::test]
async fn client_disconnect_mid_stream_releases_and_rebroadcasts() {
    // Upstream sends one frame and then stalls forever; only the caller
    // hanging up can end this request.
    let upstream_router = Router::new().route(
        "/v1/messages",
        post(|| async {
            let first = futures::stream::iter(vec![Ok::<Bytes, std::convert::Infallible>(
                Bytes::from_static(b"event: message_start\ndata: {}\n\n"),
            )]);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from_stream(first.chain(futures::stream::pending())))
                .unwrap()
        }),
    );
    let upstream = spawn_router(upstream_router).await;

    let relay = spawn_relay(Source::Claude, false).await;
    add_channel(&relay, Source::Claude, "a", format!("http://{upstream}"), None);
    let mut rx = relay.sink.subscribe();

    let response = reqwest::Client::new()
        .post(format!("http://{}/v1/messages", relay.addr))
        .json(&serde_json::json!({"model": "m", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let mut body = response.bytes_stream();
    let first = body.next().await.unwrap().unwrap();
    assert!(!first.is_empty());
    assert_eq!(relay.scheduler.snapshot(Source::Claude).pending, 1);

    // Hang up with the upstream still streaming.
    drop(body);

    // The release must be observable through the broadcast channel, not
    // just the internal counter.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let event = tokio::time::timeout(remaining, rx.recv())
            .await
            .expect("no scheduler-state broadcast after client disconnect")
            .unwrap();
        if let RelayEvent::SchedulerState { snapshot, .. } = event {
            if snapshot.pending == 0 {
                break;
            }
        }
    }
    assert_eq!(relay.scheduler.snapshot(Source::Claude).pending, 0);
}

#[tokio::test]
async fn transport_failures_trip_the_breaker_and_success_restores() {
    // Grab a port that nothing listens on.
    let dead_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let relay = spawn_relay(Source::Claude, false).await;
    let channel_id = add_channel(
        &relay,
        Source::Claude,
        "dead",
        format!("http://127.0.0.1:{dead_port}"),
        None,
    );

    let client = reqwest::Client::new();
    let url = format!("http://{}/v1/messages", relay.addr);
    for _ in 0..UNHEALTHY_AFTER {
        let response = client
            .post(&url)
            .json(&serde_json::json!({"model": "m", "messages": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 502);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "proxy_error");
    }

    // Breaker open: allocation now fails before any upstream call.
    let response = client
        .post(&url)
        .json(&serde_json::json!({"model": "m", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "channel_pool_exhausted");

    // A single recorded success puts the channel back in rotation.
    relay.health.record_success(&channel_id, Source::Claude);
    let response = client
        .post(&url)
        .json(&serde_json::json!({"model": "m", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);

    // Slots were released on every failed attempt.
    assert_eq!(relay.scheduler.snapshot(Source::Claude).pending, 0);
}
