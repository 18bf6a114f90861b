use std::path::PathBuf;
use std::time::Duration;

use ccrelay_core::config::{expand_path, load_config};
use ccrelay_core::{ChannelRegistry, Source};

/// Print every pool's state: live scheduler snapshot when the relay is
/// running, otherwise the on-disk channel configuration.
pub async fn run(config: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let registry = ChannelRegistry::load(expand_path(&config.channels.directory))?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    for source in Source::ALL {
        let port = config.server.port_for(source);
        println!("== {source} (port {port}) ==");

        let url = format!("http://{}:{}/-/status", config.server.host, port);
        let live = match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                response.json::<serde_json::Value>().await.ok()
            }
            _ => None,
        };

        match live {
            Some(status) => {
                let pending = status["scheduler"]["pending"].as_u64().unwrap_or(0);
                println!("running, {pending} request(s) in flight");
                for ch in status["scheduler"]["channels"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                {
                    println!(
                        "  {:<20} weight {:>3}  inflight {:>3}  {}",
                        ch["name"].as_str().unwrap_or("-"),
                        ch["weight"].as_u64().unwrap_or(1),
                        ch["inflight"].as_u64().unwrap_or(0),
                        ch["health"].as_str().unwrap_or("healthy"),
                    );
                }
            }
            None => {
                let channels = registry.list(source);
                println!("not running; {} channel(s) configured", channels.len());
                for ch in channels {
                    println!(
                        "  {:<20} weight {:>3}  {}",
                        ch.name,
                        ch.weight,
                        if ch.enabled { "enabled" } else { "disabled" },
                    );
                }
            }
        }
        println!();
    }
    Ok(())
}
