use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub channels: ChannelsConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub scheduling: SchedulingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_claude_port")]
    pub claude_port: u16,

    #[serde(default = "default_codex_port")]
    pub codex_port: u16,

    #[serde(default = "default_gemini_port")]
    pub gemini_port: u16,
}

impl ServerConfig {
    pub fn port_for(&self, source: crate::channel::Source) -> u16 {
        match source {
            crate::channel::Source::Claude => self.claude_port,
            crate::channel::Source::Codex => self.codex_port,
            crate::channel::Source::Gemini => self.gemini_port,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            claude_port: default_claude_port(),
            codex_port: default_codex_port(),
            gemini_port: default_gemini_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default = "default_channels_dir")]
    pub directory: PathBuf,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            directory: default_channels_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Sticky per-conversation routing for the claude source.
    #[serde(default = "default_true")]
    pub enable_session_binding: bool,

    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,

    #[serde(default = "default_session_capacity")]
    pub session_capacity: usize,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            enable_session_binding: true,
            session_ttl_seconds: default_session_ttl(),
            session_capacity: default_session_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            channels: ChannelsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            scheduling: SchedulingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// Default value functions
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_claude_port() -> u16 { 10088 }
fn default_codex_port() -> u16 { 10089 }
fn default_gemini_port() -> u16 { 10090 }
fn default_request_timeout() -> u64 { 120 }
fn default_true() -> bool { true }
fn default_session_ttl() -> u64 { 30 * 60 }
fn default_session_capacity() -> usize { 1024 }
fn default_log_level() -> String { "info".to_string() }

fn default_channels_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("ccrelay")
        .join("channels")
}

/// Get default config file path
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("ccrelay")
        .join("config.toml")
}

/// Load config from file, or return defaults if not found.
///
/// Loading order:
/// 1. Specified path (if provided)
/// 2. ./config.toml (if exists)
/// 3. default_config_path() (usually ~/.config/ccrelay/config.toml)
pub fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    if let Some(config_path) = path {
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            tracing::info!("Loaded config from specified path {:?}", config_path);
            return Ok(config);
        } else {
            anyhow::bail!("Specified config file not found: {:?}", config_path);
        }
    }

    // Try current directory config.toml
    let local_config = PathBuf::from("config.toml");
    if local_config.exists() {
        match std::fs::read_to_string(&local_config) {
            Ok(content) => match toml::from_str::<Config>(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from current directory {:?}", local_config);
                    return Ok(config);
                }
                Err(e) => {
                    tracing::error!("Failed to parse ./config.toml: {}. Falling back to default path.", e);
                }
            },
            Err(e) => {
                tracing::error!("Failed to read ./config.toml: {}. Falling back to default path.", e);
            }
        }
    }

    let default_path = default_config_path();
    if default_path.exists() {
        let content = std::fs::read_to_string(&default_path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::info!("Loaded config from default path {:?}", default_path);
        Ok(config)
    } else {
        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }
}

/// Expand ~ in path to home directory
pub fn expand_path(path: &PathBuf) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if path_str.starts_with("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(&path_str[2..]);
            }
        }
    }
    path.clone()
}
