//! Channel Scheduler - health-aware weighted allocation with sticky sessions
//!
//! All transient state (inflight counters, session bindings) lives behind one
//! mutex per source: eligibility depends on the whole pool, so the draw, the
//! binding write, and the inflight increment happen in a single critical
//! section. Channel definitions are always read fresh from the registry, so
//! a disable/delete is honored on the very next allocation.

use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::channel::{Channel, Source};
use crate::error::{Error, Result};
use crate::health::{HealthState, HealthTracker};
use crate::registry::ChannelRegistry;

const DEFAULT_SESSION_CAPACITY: usize = 1024;
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Default)]
pub struct AllocateRequest {
    pub session_key: Option<String>,
    pub enable_session_binding: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerChannelState {
    pub id: String,
    pub name: String,
    pub weight: u32,
    pub max_concurrency: Option<u32>,
    pub inflight: u32,
    pub health: HealthState,
}

/// Read-only snapshot for observability and UI display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSnapshot {
    pub pending: u32,
    pub channels: Vec<SchedulerChannelState>,
}

struct SessionBinding {
    channel_id: String,
    last_used: Instant,
}

#[derive(Default)]
struct SourceState {
    inflight: HashMap<String, u32>,
    sessions: HashMap<String, SessionBinding>,
}

pub struct Scheduler {
    registry: Arc<ChannelRegistry>,
    health: Arc<HealthTracker>,
    claude: Mutex<SourceState>,
    codex: Mutex<SourceState>,
    gemini: Mutex<SourceState>,
    session_capacity: usize,
    session_ttl: Duration,
}

impl Scheduler {
    pub fn new(registry: Arc<ChannelRegistry>, health: Arc<HealthTracker>) -> Self {
        Self::with_session_limits(registry, health, DEFAULT_SESSION_CAPACITY, DEFAULT_SESSION_TTL)
    }

    pub fn with_session_limits(
        registry: Arc<ChannelRegistry>,
        health: Arc<HealthTracker>,
        session_capacity: usize,
        session_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            health,
            claude: Mutex::new(SourceState::default()),
            codex: Mutex::new(SourceState::default()),
            gemini: Mutex::new(SourceState::default()),
            session_capacity: session_capacity.max(1),
            session_ttl,
        }
    }

    fn state(&self, source: Source) -> MutexGuard<'_, SourceState> {
        let lock = match source {
            Source::Claude => &self.claude,
            Source::Codex => &self.codex,
            Source::Gemini => &self.gemini,
        };
        lock.lock().expect("scheduler lock poisoned")
    }

    /// Pick a channel for a request, or fail with `NoChannelAvailable` when
    /// every enabled channel is unhealthy or at its concurrency ceiling.
    pub fn allocate(&self, source: Source, request: &AllocateRequest) -> Result<Channel> {
        let channels: Vec<Channel> = self
            .registry
            .list(source)
            .into_iter()
            .filter(|ch| ch.enabled)
            .collect();

        if channels.is_empty() {
            return Err(Error::NoChannelAvailable {
                source,
                reason: "no enabled channels".into(),
            });
        }

        let mut state = self.state(source);

        // Sticky reuse: switching a conversation mid-stream throws away the
        // provider-side prompt cache, so honor a live binding whenever the
        // bound channel is still usable.
        if request.enable_session_binding {
            if let Some(key) = &request.session_key {
                if let Some(channel) = self.bound_channel(&mut state, key, &channels, source) {
                    touch_session(&mut state, key, &channel.id);
                    increment(&mut state, &channel.id);
                    return Ok(channel);
                }
            }
        }

        let eligible: Vec<&Channel> = channels
            .iter()
            .filter(|ch| self.selectable(&state, ch, source))
            .collect();

        if eligible.is_empty() {
            return Err(Error::NoChannelAvailable {
                source,
                reason: "all channels unhealthy or at max concurrency".into(),
            });
        }

        let channel = self.weighted_draw(&eligible, source).clone();

        if request.enable_session_binding {
            if let Some(key) = &request.session_key {
                self.bind_session(&mut state, key, &channel.id);
            }
        }
        increment(&mut state, &channel.id);

        tracing::debug!(
            source = %source,
            channel = %channel.name,
            inflight = state.inflight.get(&channel.id).copied().unwrap_or(0),
            "allocated channel"
        );
        Ok(channel)
    }

    /// Convenience wrapper returning a one-shot release handle alongside the
    /// channel. However the request terminates, dropping the guard releases
    /// the slot at most once.
    pub fn allocate_guarded(
        self: &Arc<Self>,
        source: Source,
        request: &AllocateRequest,
    ) -> Result<(Channel, ReleaseGuard)> {
        let channel = self.allocate(source, request)?;
        let guard = ReleaseGuard {
            scheduler: Arc::clone(self),
            channel_id: channel.id.clone(),
            source,
            released: AtomicBool::new(false),
        };
        Ok((channel, guard))
    }

    /// Decrement the inflight counter. Saturating: a stray double release
    /// can never drive the counter negative.
    pub fn release(&self, channel_id: &str, source: Source) {
        let mut state = self.state(source);
        match state.inflight.get_mut(channel_id) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                state.inflight.remove(channel_id);
            }
            None => {}
        }
    }

    pub fn snapshot(&self, source: Source) -> SchedulerSnapshot {
        let channels = self.registry.list(source);
        let state = self.state(source);

        let channel_states: Vec<SchedulerChannelState> = channels
            .iter()
            .map(|ch| SchedulerChannelState {
                id: ch.id.clone(),
                name: ch.name.clone(),
                weight: ch.weight,
                max_concurrency: ch.max_concurrency,
                inflight: state.inflight.get(&ch.id).copied().unwrap_or(0),
                health: self.health.state(&ch.id, source),
            })
            .collect();

        SchedulerSnapshot {
            pending: channel_states.iter().map(|c| c.inflight).sum(),
            channels: channel_states,
        }
    }

    fn selectable(&self, state: &SourceState, channel: &Channel, source: Source) -> bool {
        if self.health.state(&channel.id, source) == HealthState::Unhealthy {
            return false;
        }
        match channel.max_concurrency {
            Some(max) => state.inflight.get(&channel.id).copied().unwrap_or(0) < max,
            None => true,
        }
    }

    /// Cumulative-interval weighted draw; degraded channels count at half
    /// weight so traffic drifts away without full exclusion.
    fn weighted_draw<'a>(&self, eligible: &[&'a Channel], source: Source) -> &'a Channel {
        let weights: Vec<u64> = eligible
            .iter()
            .map(|ch| {
                let weight = u64::from(ch.weight);
                if self.health.state(&ch.id, source) == HealthState::Degraded {
                    (weight / 2).max(1)
                } else {
                    weight
                }
            })
            .collect();

        let total: u64 = weights.iter().sum();
        let mut draw = rand::rng().random_range(0..total);
        for (channel, weight) in eligible.iter().zip(&weights) {
            if draw < *weight {
                return channel;
            }
            draw -= weight;
        }
        eligible[eligible.len() - 1]
    }

    fn bound_channel(
        &self,
        state: &mut SourceState,
        key: &str,
        channels: &[Channel],
        source: Source,
    ) -> Option<Channel> {
        let binding = state.sessions.get(key)?;
        if binding.last_used.elapsed() > self.session_ttl {
            state.sessions.remove(key);
            return None;
        }
        let channel_id = binding.channel_id.clone();
        let channel = channels.iter().find(|ch| ch.id == channel_id)?;

        // Re-validate: the bound channel may have gone unhealthy or
        // saturated since it was assigned.
        if !self.selectable(state, channel, source) {
            return None;
        }
        Some(channel.clone())
    }

    fn bind_session(&self, state: &mut SourceState, key: &str, channel_id: &str) {
        // Drop expired bindings first, then evict least-recently-used until
        // there is room. Keeps the table bounded across long-running usage.
        let ttl = self.session_ttl;
        state.sessions.retain(|_, b| b.last_used.elapsed() <= ttl);

        while state.sessions.len() >= self.session_capacity
            && !state.sessions.contains_key(key)
        {
            let oldest = state
                .sessions
                .iter()
                .min_by_key(|(_, b)| b.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    state.sessions.remove(&k);
                }
                None => break,
            }
        }

        touch_session(state, key, channel_id);
    }
}

fn touch_session(state: &mut SourceState, key: &str, channel_id: &str) {
    state.sessions.insert(
        key.to_string(),
        SessionBinding {
            channel_id: channel_id.to_string(),
            last_used: Instant::now(),
        },
    );
}

fn increment(state: &mut SourceState, channel_id: &str) {
    *state.inflight.entry(channel_id.to_string()).or_insert(0) += 1;
}

/// One-shot release handle owned by the request's lifecycle. Whichever of
/// {stream end, stream error, client disconnect, proxy error} fires first
/// wins; every later trigger is a no-op.
pub struct ReleaseGuard {
    scheduler: Arc<Scheduler>,
    channel_id: String,
    source: Source,
    released: AtomicBool,
}

impl ReleaseGuard {
    /// Returns true only for the call that actually released the slot,
    /// so callers can hang follow-up work (state broadcasts) off it.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.scheduler.release(&self.channel_id, self.source);
        true
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.release();
    }
}
