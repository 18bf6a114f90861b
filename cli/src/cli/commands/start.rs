use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ccrelay_core::config::{expand_path, load_config};
use ccrelay_core::events::{BroadcastSink, EventSink, StatsSink};
use ccrelay_core::proxy::{strategy_for, ProxyServer, SourceRuntime, UpstreamClient};
use ccrelay_core::{ChannelRegistry, HealthTracker, Scheduler, Source};

pub async fn run(
    config: Option<PathBuf>,
    only: Option<Source>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let config = load_config(config)?;

    let channels_dir = expand_path(&config.channels.directory);
    tracing::info!("Channel data directory: {:?}", channels_dir);
    let registry = Arc::new(ChannelRegistry::load(channels_dir)?);

    let health = Arc::new(HealthTracker::new());
    let scheduler = Arc::new(Scheduler::with_session_limits(
        Arc::clone(&registry),
        Arc::clone(&health),
        config.scheduling.session_capacity,
        Duration::from_secs(config.scheduling.session_ttl_seconds),
    ));
    let upstream = Arc::new(UpstreamClient::new(config.timeouts.request_timeout));
    let sink = Arc::new(BroadcastSink::new(256));

    let sources: Vec<Source> = match only {
        Some(source) => vec![source],
        None => Source::ALL.to_vec(),
    };

    let mut handles = Vec::new();
    for source in &sources {
        let source = *source;
        let channels = registry.list(source);
        if channels.is_empty() {
            tracing::warn!(
                "No {} channels configured. The proxy will start but {} requests will fail.",
                source,
                source
            );
        } else {
            tracing::info!(
                "{} pool: {} channel(s), {} enabled",
                source,
                channels.len(),
                channels.iter().filter(|ch| ch.enabled).count()
            );
        }

        let runtime = Arc::new(SourceRuntime {
            source,
            scheduler: Arc::clone(&scheduler),
            health: Arc::clone(&health),
            strategy: strategy_for(source),
            upstream: Arc::clone(&upstream),
            stats: Arc::clone(&sink) as Arc<dyn StatsSink>,
            events: Arc::clone(&sink) as Arc<dyn EventSink>,
            enable_session_binding: config.scheduling.enable_session_binding,
        });

        let listen_port = port.unwrap_or_else(|| config.server.port_for(source));
        let server = ProxyServer::new(config.server.host.clone(), listen_port, runtime);
        handles.push(tokio::spawn(server.run()));
    }

    tracing::info!("Press Ctrl+C to stop");

    for handle in handles {
        handle.await??;
    }
    Ok(())
}
