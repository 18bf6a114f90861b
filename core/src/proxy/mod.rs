//! Proxy module - health-aware streaming reverse proxy, one pipeline per source

pub mod pipeline;
pub mod providers;
pub mod server;
pub mod sse;
pub mod upstream;

pub use pipeline::SourceRuntime;
pub use providers::{strategy_for, ProviderStrategy};
pub use server::ProxyServer;
pub use upstream::UpstreamClient;
