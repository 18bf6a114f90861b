pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ccrelay_core::Source;

#[derive(Parser)]
#[command(name = "ccrelay")]
#[command(author, version, about = "Channel load balancer for claude/codex/gemini CLI traffic")]
pub struct Cli {
    /// Path to config file (checked in order: local config.toml, ~/.config/ccrelay/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the proxy servers (all sources, or one)
    Start {
        /// Only run the proxy for this source
        #[arg(short, long)]
        source: Option<Source>,

        /// Override the listen port (single source only)
        #[arg(short, long, requires = "source")]
        port: Option<u16>,
    },

    /// Manage channels for a source
    Channels {
        /// Provider source: claude, codex, or gemini
        source: Source,

        #[command(subcommand)]
        command: ChannelCommands,
    },

    /// Inspect or reset channel health for a source
    Health {
        /// Provider source: claude, codex, or gemini
        source: Source,

        #[command(subcommand)]
        command: HealthCommands,
    },

    /// Show configured pools and ports
    Status,
}

#[derive(Subcommand)]
pub enum ChannelCommands {
    /// List all channels
    List,

    /// Add a channel
    Add {
        name: String,

        #[arg(long)]
        base_url: String,

        #[arg(long)]
        api_key: String,

        #[arg(long)]
        weight: Option<u32>,

        #[arg(long)]
        max_concurrency: Option<u32>,

        /// Codex only: unique provider key
        #[arg(long)]
        provider_key: Option<String>,

        /// Codex only: wire protocol ("responses" or "chat")
        #[arg(long)]
        wire_api: Option<String>,

        /// Gemini only: default model
        #[arg(long)]
        model: Option<String>,

        /// Outbound proxy URL for reaching this channel
        #[arg(long)]
        proxy_url: Option<String>,
    },

    /// Update fields on an existing channel
    Update {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        base_url: Option<String>,

        #[arg(long)]
        api_key: Option<String>,

        #[arg(long)]
        weight: Option<u32>,

        /// New concurrency ceiling; 0 clears the limit
        #[arg(long)]
        max_concurrency: Option<u32>,

        #[arg(long)]
        provider_key: Option<String>,

        #[arg(long)]
        wire_api: Option<String>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        proxy_url: Option<String>,
    },

    /// Remove a channel by id
    Remove { id: String },

    /// Enable a channel by id
    Enable { id: String },

    /// Disable a channel by id
    Disable { id: String },
}

#[derive(Subcommand)]
pub enum HealthCommands {
    /// Show health records for all channels of the source
    List,

    /// Reset a channel back to healthy
    Reset { id: String },
}
