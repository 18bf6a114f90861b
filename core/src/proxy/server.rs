//! Proxy Server - one axum instance per source

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{any, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::proxy::pipeline::{handle_proxy, SourceRuntime, MAX_BODY_BYTES};

pub struct ProxyServer {
    host: String,
    port: u16,
    runtime: Arc<SourceRuntime>,
}

impl ProxyServer {
    pub fn new(host: String, port: u16, runtime: Arc<SourceRuntime>) -> Self {
        Self {
            host,
            port,
            runtime,
        }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/healthz", get(health_check_handler))
            .route("/-/status", get(status_handler))
            .route("/-/health/reset/:id", post(health_reset_handler))
            // Everything else is provider-shaped traffic to forward.
            .fallback(any(handle_proxy))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.runtime))
    }

    /// Run the proxy server (blocking)
    pub async fn run(self) -> anyhow::Result<()> {
        let source = self.runtime.source;
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        tracing::info!("{} proxy listening on {}", source, addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("{} proxy stopped", source);
        Ok(())
    }
}

/// Health check handler
async fn health_check_handler() -> Response {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
}

/// Live scheduler snapshot plus health records, for the CLI.
async fn status_handler(State(rt): State<Arc<SourceRuntime>>) -> Response {
    let snapshot = rt.scheduler.snapshot(rt.source);
    let health: serde_json::Map<String, serde_json::Value> = rt
        .health
        .all(rt.source)
        .into_iter()
        .filter_map(|(id, record)| {
            serde_json::to_value(record).ok().map(|v| (id, v))
        })
        .collect();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "source": rt.source,
            "scheduler": snapshot,
            "health": health,
        })),
    )
        .into_response()
}

async fn health_reset_handler(
    State(rt): State<Arc<SourceRuntime>>,
    Path(id): Path<String>,
) -> Response {
    rt.health.reset(&id, rt.source);
    (StatusCode::OK, Json(serde_json::json!({"ok": true}))).into_response()
}

/// Shutdown signal handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
