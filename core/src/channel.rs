//! Channel model - one upstream credential/endpoint pair per entry

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_WEIGHT: u32 = 100;
pub const MAX_CONCURRENCY_CAP: u32 = 100;

/// Provider family. Each source owns an independent channel pool,
/// scheduler state, and health table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Claude,
    Codex,
    Gemini,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Claude, Source::Codex, Source::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Claude => "claude",
            Source::Codex => "codex",
            Source::Gemini => "gemini",
        }
    }

    /// Default proxy listen port for this source.
    pub fn default_port(&self) -> u16 {
        match self {
            Source::Claude => 10088,
            Source::Codex => 10089,
            Source::Gemini => 10090,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for Source {}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Ok(Source::Claude),
            "codex" => Ok(Source::Codex),
            "gemini" => Ok(Source::Gemini),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// A named upstream credential. Persisted as camelCase JSON to stay
/// compatible with snapshots written by earlier versions of the tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// None (or 0 on disk) means unlimited.
    #[serde(default)]
    pub max_concurrency: Option<u32>,
    /// Codex: unique key identifying the provider block in config.toml.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_key: Option<String>,
    /// Codex: upstream wire protocol ("responses" or "chat").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wire_api: Option<String>,
    /// Gemini: default model when the request does not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Outbound proxy for reaching this channel's endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default)]
    pub created_at: i64,
}

fn default_enabled() -> bool {
    true
}

fn default_weight() -> u32 {
    1
}

impl Channel {
    /// Clamp weight and maxConcurrency into their documented bounds.
    /// Applied on every write so no out-of-range value ever persists.
    pub fn normalize(&mut self) {
        self.weight = self.weight.clamp(1, MAX_WEIGHT);
        self.max_concurrency = match self.max_concurrency {
            None | Some(0) => None,
            Some(n) => Some(n.clamp(1, MAX_CONCURRENCY_CAP)),
        };
    }
}

/// Fields accepted when creating a channel.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChannel {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub weight: Option<u32>,
    #[serde(default)]
    pub max_concurrency: Option<u32>,
    #[serde(default)]
    pub provider_key: Option<String>,
    #[serde(default)]
    pub wire_api: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub website_url: Option<String>,
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelUpdate {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub enabled: Option<bool>,
    pub weight: Option<u32>,
    /// Some(None) clears the limit, Some(Some(n)) sets it.
    #[serde(default, with = "double_option")]
    pub max_concurrency: Option<Option<u32>>,
    pub provider_key: Option<String>,
    pub wire_api: Option<String>,
    pub model: Option<String>,
    pub proxy_url: Option<String>,
    pub website_url: Option<String>,
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(de: D) -> Result<Option<Option<u32>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u32>::deserialize(de).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(weight: u32, max_concurrency: Option<u32>) -> Channel {
        Channel {
            id: "ch-1".into(),
            name: "test".into(),
            base_url: "https://api.example.com".into(),
            api_key: "sk-test".into(),
            enabled: true,
            weight,
            max_concurrency,
            provider_key: None,
            wire_api: None,
            model: None,
            proxy_url: None,
            website_url: None,
            created_at: 0,
        }
    }

    #[test]
    fn normalize_clamps_weight() {
        let mut ch = channel(0, None);
        ch.normalize();
        assert_eq!(ch.weight, 1);

        let mut ch = channel(500, None);
        ch.normalize();
        assert_eq!(ch.weight, 100);
    }

    #[test]
    fn normalize_treats_zero_concurrency_as_unlimited() {
        let mut ch = channel(1, Some(0));
        ch.normalize();
        assert_eq!(ch.max_concurrency, None);

        let mut ch = channel(1, Some(250));
        ch.normalize();
        assert_eq!(ch.max_concurrency, Some(100));
    }

    #[test]
    fn channel_roundtrips_camel_case() {
        let mut ch = channel(3, Some(5));
        ch.proxy_url = Some("http://127.0.0.1:7890".into());
        let json = serde_json::to_value(&ch).unwrap();
        assert!(json.get("baseUrl").is_some());
        assert!(json.get("maxConcurrency").is_some());
        assert_eq!(json["proxyUrl"], "http://127.0.0.1:7890");
        let back: Channel = serde_json::from_value(json).unwrap();
        assert_eq!(back.weight, 3);
        assert_eq!(back.max_concurrency, Some(5));
        assert_eq!(back.proxy_url.as_deref(), Some("http://127.0.0.1:7890"));
    }

    #[test]
    fn source_parses_case_insensitive() {
        assert_eq!("Claude".parse::<Source>().unwrap(), Source::Claude);
        assert!("unknown".parse::<Source>().is_err());
    }
}
