use clap::Parser;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ccrelay=info".parse()?)
                .add_directive("ccrelay_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { source, port } => {
            cli::commands::start::run(cli.config, source, port).await?;
        }
        Commands::Channels { source, command } => {
            cli::commands::channels::run(cli.config, source, command)?;
        }
        Commands::Health { source, command } => {
            cli::commands::health::run(cli.config, source, command).await?;
        }
        Commands::Status => {
            cli::commands::status::run(cli.config).await?;
        }
    }

    Ok(())
}
