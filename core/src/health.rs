//! Health Tracker - per (channel, source) circuit breaker
//!
//! Only the proxy pipeline writes health records, and only for transport
//! failures (connect/timeout). Provider HTTP status codes pass through to
//! the caller without touching health state.

use dashmap::DashMap;
use serde::Serialize;

use crate::channel::Source;

/// Consecutive transport failures before a channel is down-weighted.
pub const DEGRADED_AFTER: u32 = 3;
/// Consecutive transport failures before a channel is excluded entirely.
pub const UNHEALTHY_AFTER: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub state: HealthState,
    pub last_error: Option<String>,
    pub last_checked_at: i64,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            consecutive_successes: 0,
            state: HealthState::Healthy,
            last_error: None,
            last_checked_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

pub struct HealthTracker {
    records: DashMap<(String, Source), HealthRecord>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// A single success restores eligibility immediately; the scheduler
    /// must not keep routing around a recovered channel.
    pub fn record_success(&self, channel_id: &str, source: Source) {
        let mut record = self
            .records
            .entry((channel_id.to_string(), source))
            .or_default();
        record.consecutive_failures = 0;
        record.consecutive_successes += 1;
        record.state = HealthState::Healthy;
        record.last_checked_at = chrono::Utc::now().timestamp_millis();
    }

    pub fn record_failure(&self, channel_id: &str, source: Source, error: &str) {
        let mut record = self
            .records
            .entry((channel_id.to_string(), source))
            .or_default();
        record.consecutive_successes = 0;
        record.consecutive_failures += 1;
        record.last_error = Some(error.to_string());
        record.last_checked_at = chrono::Utc::now().timestamp_millis();
        record.state = if record.consecutive_failures >= UNHEALTHY_AFTER {
            HealthState::Unhealthy
        } else if record.consecutive_failures >= DEGRADED_AFTER {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        if record.state != HealthState::Healthy {
            tracing::warn!(
                channel_id,
                source = %source,
                failures = record.consecutive_failures,
                state = ?record.state,
                "channel health degraded: {}",
                error
            );
        }
    }

    /// Operator reset after manually fixing a channel.
    pub fn reset(&self, channel_id: &str, source: Source) {
        self.records
            .insert((channel_id.to_string(), source), HealthRecord::default());
    }

    /// Current state; channels never observed yet report Healthy.
    pub fn state(&self, channel_id: &str, source: Source) -> HealthState {
        self.records
            .get(&(channel_id.to_string(), source))
            .map(|r| r.state)
            .unwrap_or(HealthState::Healthy)
    }

    pub fn status(&self, channel_id: &str, source: Source) -> HealthRecord {
        self.records
            .get(&(channel_id.to_string(), source))
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn all(&self, source: Source) -> Vec<(String, HealthRecord)> {
        self.records
            .iter()
            .filter(|entry| entry.key().1 == source)
            .map(|entry| (entry.key().0.clone(), entry.value().clone()))
            .collect()
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
