use std::path::PathBuf;
use std::time::Duration;

use ccrelay_core::config::load_config;
use ccrelay_core::Source;

use crate::cli::HealthCommands;

pub async fn run(
    config: Option<PathBuf>,
    source: Source,
    command: HealthCommands,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let base = format!(
        "http://{}:{}",
        config.server.host,
        config.server.port_for(source)
    );
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    match command {
        HealthCommands::List => {
            let status = fetch_status(&client, &base, source).await?;
            let channels = status["scheduler"]["channels"]
                .as_array()
                .cloned()
                .unwrap_or_default();
            if channels.is_empty() {
                println!("No {source} channels registered");
                return Ok(());
            }
            println!(
                "{:<38} {:<20} {:>9} {:>9}  {}",
                "ID", "NAME", "HEALTH", "FAILURES", "LAST ERROR"
            );
            for ch in channels {
                let id = ch["id"].as_str().unwrap_or("-");
                let record = &status["health"][id];
                println!(
                    "{:<38} {:<20} {:>9} {:>9}  {}",
                    id,
                    ch["name"].as_str().unwrap_or("-"),
                    ch["health"].as_str().unwrap_or("healthy"),
                    record["consecutiveFailures"].as_u64().unwrap_or(0),
                    record["lastError"].as_str().unwrap_or("-"),
                );
            }
        }
        HealthCommands::Reset { id } => {
            let response = client
                .post(format!("{base}/-/health/reset/{id}"))
                .send()
                .await
                .map_err(|e| not_reachable(source, &base, e))?;
            anyhow::ensure!(
                response.status().is_success(),
                "reset failed: HTTP {}",
                response.status()
            );
            println!("Reset health for channel {id}");
        }
    }
    Ok(())
}

async fn fetch_status(
    client: &reqwest::Client,
    base: &str,
    source: Source,
) -> anyhow::Result<serde_json::Value> {
    let response = client
        .get(format!("{base}/-/status"))
        .send()
        .await
        .map_err(|e| not_reachable(source, base, e))?;
    Ok(response.json().await?)
}

fn not_reachable(source: Source, base: &str, e: reqwest::Error) -> anyhow::Error {
    anyhow::anyhow!("{source} relay is not reachable at {base} (is it running?): {e}")
}
