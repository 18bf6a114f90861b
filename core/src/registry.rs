//! Channel Registry - mutation-through-persistence store of channels per source
//!
//! The in-memory pools are the scheduler's read path; every mutation is
//! written back to the per-source JSON snapshot before it returns, so a
//! create/update/delete is visible to the very next allocation. Hot reload
//! is an explicit `reload()` call driven by whatever change-detection the
//! embedding service uses; the read path itself never touches the filesystem.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::channel::{Channel, ChannelUpdate, NewChannel, Source};
use crate::error::{Error, Result};

/// On-disk snapshot document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ChannelFile {
    #[serde(default)]
    channels: Vec<Channel>,
}

pub struct ChannelRegistry {
    data_dir: PathBuf,
    pools: RwLock<HashMap<Source, Vec<Channel>>>,
}

impl ChannelRegistry {
    /// Load all three source pools from `data_dir`, creating it if missing.
    pub fn load(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        if !data_dir.exists() {
            fs::create_dir_all(&data_dir)?;
        }

        let mut pools = HashMap::new();
        for source in Source::ALL {
            pools.insert(source, read_channel_file(&file_path(&data_dir, source))?);
        }

        Ok(Self {
            data_dir,
            pools: RwLock::new(pools),
        })
    }

    fn file_path(&self, source: Source) -> PathBuf {
        file_path(&self.data_dir, source)
    }

    /// Re-read every pool from disk, replacing the in-memory state.
    pub fn reload(&self) -> Result<()> {
        for source in Source::ALL {
            self.reload_source(source)?;
        }
        Ok(())
    }

    pub fn reload_source(&self, source: Source) -> Result<()> {
        let channels = read_channel_file(&self.file_path(source))?;
        self.pools
            .write()
            .expect("registry lock poisoned")
            .insert(source, channels);
        Ok(())
    }

    pub fn list(&self, source: Source) -> Vec<Channel> {
        self.pools
            .read()
            .expect("registry lock poisoned")
            .get(&source)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get(&self, source: Source, id: &str) -> Result<Channel> {
        self.list(source)
            .into_iter()
            .find(|ch| ch.id == id)
            .ok_or_else(|| Error::ChannelNotFound { id: id.to_string() })
    }

    /// Highest-weight enabled channel, used when a caller wants a single
    /// channel to pin (e.g. restoring plain settings after stopping the
    /// balancer). Falls back to the first channel when none are enabled.
    pub fn best_channel(&self, source: Source) -> Option<Channel> {
        let channels = self.list(source);
        channels
            .iter()
            .filter(|ch| ch.enabled)
            .max_by_key(|ch| ch.weight)
            .or_else(|| channels.first())
            .cloned()
    }

    pub fn create(&self, source: Source, new: NewChannel) -> Result<Channel> {
        let mut pools = self.pools.write().expect("registry lock poisoned");
        let channels = pools.entry(source).or_default();

        if let Some(key) = &new.provider_key {
            if channels.iter().any(|ch| ch.provider_key.as_deref() == Some(key)) {
                return Err(Error::ChannelConflict {
                    provider_key: key.clone(),
                });
            }
        }

        let mut channel = Channel {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            base_url: new.base_url,
            api_key: new.api_key,
            enabled: new.enabled.unwrap_or(true),
            weight: new.weight.unwrap_or(1),
            max_concurrency: new.max_concurrency,
            provider_key: new.provider_key,
            wire_api: new.wire_api,
            model: new.model,
            proxy_url: new.proxy_url,
            website_url: new.website_url,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        channel.normalize();

        channels.push(channel.clone());
        write_channel_file(&self.file_path(source), channels)?;
        Ok(channel)
    }

    pub fn update(&self, source: Source, id: &str, updates: ChannelUpdate) -> Result<Channel> {
        let mut pools = self.pools.write().expect("registry lock poisoned");
        let channels = pools.entry(source).or_default();

        if let Some(key) = &updates.provider_key {
            if channels
                .iter()
                .any(|ch| ch.id != id && ch.provider_key.as_deref() == Some(key))
            {
                return Err(Error::ChannelConflict {
                    provider_key: key.clone(),
                });
            }
        }

        let channel = channels
            .iter_mut()
            .find(|ch| ch.id == id)
            .ok_or_else(|| Error::ChannelNotFound { id: id.to_string() })?;

        if let Some(name) = updates.name {
            channel.name = name;
        }
        if let Some(base_url) = updates.base_url {
            channel.base_url = base_url;
        }
        if let Some(api_key) = updates.api_key {
            channel.api_key = api_key;
        }
        if let Some(enabled) = updates.enabled {
            channel.enabled = enabled;
        }
        if let Some(weight) = updates.weight {
            channel.weight = weight;
        }
        if let Some(max_concurrency) = updates.max_concurrency {
            channel.max_concurrency = max_concurrency;
        }
        if let Some(provider_key) = updates.provider_key {
            channel.provider_key = Some(provider_key);
        }
        if let Some(wire_api) = updates.wire_api {
            channel.wire_api = Some(wire_api);
        }
        if let Some(model) = updates.model {
            channel.model = Some(model);
        }
        if let Some(proxy_url) = updates.proxy_url {
            channel.proxy_url = Some(proxy_url);
        }
        if let Some(website_url) = updates.website_url {
            channel.website_url = Some(website_url);
        }
        channel.normalize();

        let updated = channel.clone();
        write_channel_file(&self.file_path(source), channels)?;
        Ok(updated)
    }

    pub fn set_enabled(&self, source: Source, id: &str, enabled: bool) -> Result<Channel> {
        self.update(
            source,
            id,
            ChannelUpdate {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
    }

    pub fn delete(&self, source: Source, id: &str) -> Result<()> {
        let mut pools = self.pools.write().expect("registry lock poisoned");
        let channels = pools.entry(source).or_default();

        let before = channels.len();
        channels.retain(|ch| ch.id != id);
        if channels.len() == before {
            return Err(Error::ChannelNotFound { id: id.to_string() });
        }

        write_channel_file(&self.file_path(source), channels)?;
        Ok(())
    }
}

fn file_path(data_dir: &Path, source: Source) -> PathBuf {
    data_dir.join(format!("{}-channels.json", source))
}

fn read_channel_file(path: &Path) -> Result<Vec<Channel>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    let mut file: ChannelFile = serde_json::from_str(&content)?;
    for channel in &mut file.channels {
        channel.normalize();
    }
    Ok(file.channels)
}

fn write_channel_file(path: &Path, channels: &[Channel]) -> Result<()> {
    let file = ChannelFile {
        channels: channels.to_vec(),
    };
    fs::write(path, serde_json::to_string_pretty(&file)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_channel(name: &str) -> NewChannel {
        NewChannel {
            name: name.into(),
            base_url: "https://api.example.com/v1".into(),
            api_key: "sk-test".into(),
            ..Default::default()
        }
    }

    #[test]
    fn create_persists_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ChannelRegistry::load(dir.path()).unwrap();

        let ch = registry.create(Source::Claude, new_channel("a")).unwrap();
        assert!(ch.enabled);
        assert_eq!(ch.weight, 1);

        // A fresh registry over the same directory sees the channel.
        let reopened = ChannelRegistry::load(dir.path()).unwrap();
        let listed = reopened.list(Source::Claude);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, ch.id);
    }

    #[test]
    fn sources_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ChannelRegistry::load(dir.path()).unwrap();

        registry.create(Source::Claude, new_channel("a")).unwrap();
        assert!(registry.list(Source::Codex).is_empty());
        assert!(registry.list(Source::Gemini).is_empty());
    }

    #[test]
    fn update_renormalizes_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ChannelRegistry::load(dir.path()).unwrap();
        let ch = registry.create(Source::Claude, new_channel("a")).unwrap();

        let updated = registry
            .update(
                Source::Claude,
                &ch.id,
                ChannelUpdate {
                    weight: Some(9999),
                    max_concurrency: Some(Some(0)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.weight, 100);
        assert_eq!(updated.max_concurrency, None);
    }

    #[test]
    fn proxy_url_persists_in_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ChannelRegistry::load(dir.path()).unwrap();

        let mut new = new_channel("a");
        new.proxy_url = Some("http://127.0.0.1:7890".into());
        let ch = registry.create(Source::Claude, new).unwrap();

        let raw = fs::read_to_string(dir.path().join("claude-channels.json")).unwrap();
        assert!(raw.contains("\"proxyUrl\": \"http://127.0.0.1:7890\""));

        let reopened = ChannelRegistry::load(dir.path()).unwrap();
        assert_eq!(
            reopened
                .get(Source::Claude, &ch.id)
                .unwrap()
                .proxy_url
                .as_deref(),
            Some("http://127.0.0.1:7890")
        );
    }

    #[test]
    fn provider_key_conflict_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ChannelRegistry::load(dir.path()).unwrap();

        let mut first = new_channel("a");
        first.provider_key = Some("openai".into());
        registry.create(Source::Codex, first).unwrap();

        let mut second = new_channel("b");
        second.provider_key = Some("openai".into());
        let err = registry.create(Source::Codex, second).unwrap_err();
        assert!(matches!(err, Error::ChannelConflict { .. }));
    }

    #[test]
    fn delete_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ChannelRegistry::load(dir.path()).unwrap();
        let err = registry.delete(Source::Claude, "missing").unwrap_err();
        assert!(matches!(err, Error::ChannelNotFound { .. }));
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ChannelRegistry::load(dir.path()).unwrap();
        registry.create(Source::Claude, new_channel("a")).unwrap();

        // Simulate another process rewriting the snapshot.
        let path = dir.path().join("claude-channels.json");
        fs::write(&path, r#"{"channels":[]}"#).unwrap();
        assert_eq!(registry.list(Source::Claude).len(), 1);

        registry.reload_source(Source::Claude).unwrap();
        assert!(registry.list(Source::Claude).is_empty());
    }

    #[test]
    fn best_channel_prefers_highest_weight_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ChannelRegistry::load(dir.path()).unwrap();

        let mut low = new_channel("low");
        low.weight = Some(1);
        registry.create(Source::Claude, low).unwrap();

        let mut high = new_channel("high");
        high.weight = Some(50);
        let high = registry.create(Source::Claude, high).unwrap();

        assert_eq!(registry.best_channel(Source::Claude).unwrap().id, high.id);
    }
}
