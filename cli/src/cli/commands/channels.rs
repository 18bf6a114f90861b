use std::path::PathBuf;

use ccrelay_core::channel::{ChannelUpdate, NewChannel};
use ccrelay_core::config::{expand_path, load_config};
use ccrelay_core::{Channel, ChannelRegistry, Source};

use crate::cli::ChannelCommands;

pub fn run(
    config: Option<PathBuf>,
    source: Source,
    command: ChannelCommands,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let registry = ChannelRegistry::load(expand_path(&config.channels.directory))?;

    match command {
        ChannelCommands::List => {
            let channels = registry.list(source);
            if channels.is_empty() {
                println!("No {source} channels configured");
                return Ok(());
            }
            print_table(&channels);
            if let Some(best) = registry.best_channel(source) {
                println!("\nBest channel (plain setup): {} ({})", best.name, best.id);
            }
        }
        ChannelCommands::Add {
            name,
            base_url,
            api_key,
            weight,
            max_concurrency,
            provider_key,
            wire_api,
            model,
            proxy_url,
        } => {
            let channel = registry.create(
                source,
                NewChannel {
                    name,
                    base_url,
                    api_key,
                    weight,
                    max_concurrency,
                    provider_key,
                    wire_api,
                    model,
                    proxy_url,
                    ..Default::default()
                },
            )?;
            println!("Added {source} channel {} ({})", channel.name, channel.id);
        }
        ChannelCommands::Update {
            id,
            name,
            base_url,
            api_key,
            weight,
            max_concurrency,
            provider_key,
            wire_api,
            model,
            proxy_url,
        } => {
            let channel = registry.update(
                source,
                &id,
                ChannelUpdate {
                    name,
                    base_url,
                    api_key,
                    weight,
                    // 0 clears the ceiling (unlimited)
                    max_concurrency: max_concurrency
                        .map(|n| if n == 0 { None } else { Some(n) }),
                    provider_key,
                    wire_api,
                    model,
                    proxy_url,
                    ..Default::default()
                },
            )?;
            println!("Updated channel {} ({})", channel.name, channel.id);
        }
        ChannelCommands::Remove { id } => {
            registry.delete(source, &id)?;
            println!("Removed channel {id}");
        }
        ChannelCommands::Enable { id } => {
            let channel = registry.set_enabled(source, &id, true)?;
            println!("Enabled channel {} ({})", channel.name, channel.id);
        }
        ChannelCommands::Disable { id } => {
            let channel = registry.set_enabled(source, &id, false)?;
            println!("Disabled channel {} ({})", channel.name, channel.id);
        }
    }
    Ok(())
}

fn print_table(channels: &[Channel]) {
    println!(
        "{:<38} {:<20} {:>6} {:>8} {:>8}",
        "ID", "NAME", "WEIGHT", "MAXCONC", "ENABLED"
    );
    for ch in channels {
        println!(
            "{:<38} {:<20} {:>6} {:>8} {:>8}",
            ch.id,
            ch.name,
            ch.weight,
            ch.max_concurrency
                .map_or_else(|| "-".to_string(), |n| n.to_string()),
            if ch.enabled { "yes" } else { "no" },
        );
    }
}
