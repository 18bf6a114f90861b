//! Upstream HTTP client shared by all proxy pipelines

use dashmap::DashMap;
use reqwest::{Client, ClientBuilder};
use tokio::time::Duration;

use crate::channel::Channel;

pub struct UpstreamClient {
    http_client: Client,
    /// One client per distinct outbound proxy URL, built lazily.
    proxied: DashMap<String, Client>,
    timeout_secs: u64,
}

impl UpstreamClient {
    /// One pooled client per process; the same fixed timeout bounds both
    /// the connect phase and the total request duration.
    pub fn new(timeout_secs: u64) -> Self {
        let http_client = builder(timeout_secs)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            http_client,
            proxied: DashMap::new(),
            timeout_secs,
        }
    }

    /// Client used to reach `channel`: the shared pool, or a dedicated
    /// client when the channel routes through an outbound proxy.
    pub fn client_for(&self, channel: &Channel) -> Client {
        let Some(proxy_url) = &channel.proxy_url else {
            return self.http_client.clone();
        };

        if let Some(client) = self.proxied.get(proxy_url) {
            return client.clone();
        }

        let client = match reqwest::Proxy::all(proxy_url) {
            Ok(proxy) => builder(self.timeout_secs)
                .proxy(proxy)
                .build()
                .unwrap_or_else(|e| {
                    tracing::warn!(channel = %channel.name, "proxied client build failed, going direct: {e}");
                    self.http_client.clone()
                }),
            Err(e) => {
                tracing::warn!(
                    channel = %channel.name,
                    proxy_url,
                    "invalid proxy URL, going direct: {e}"
                );
                self.http_client.clone()
            }
        };
        self.proxied.insert(proxy_url.clone(), client.clone());
        client
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}

fn builder(timeout_secs: u64) -> ClientBuilder {
    Client::builder()
        .connect_timeout(Duration::from_secs(timeout_secs))
        .timeout(Duration::from_secs(timeout_secs))
        .pool_max_idle_per_host(16)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .user_agent(concat!("ccrelay/", env!("CARGO_PKG_VERSION")))
}

/// Join a channel base URL with the inbound request path without duplicating
/// a version segment. A base that already ends in `/v1` (or `/v1beta`) loses
/// it when the inbound path starts with the same segment, since the path is
/// appended verbatim.
pub fn resolve_target(base_url: &str, request_path: &str) -> String {
    let mut target = base_url.trim_end_matches('/').to_string();

    for segment in ["/v1beta", "/v1"] {
        if target.ends_with(segment) && request_path.starts_with(segment) {
            target.truncate(target.len() - segment.len());
            break;
        }
    }

    format!("{target}{request_path}")
}
