//! Statistics and broadcast sinks - the pipeline's outbound boundary
//!
//! Both sinks are fire-and-forget: a slow or absent consumer must never
//! block or fail the response path, so implementations only enqueue.

use serde::Serialize;

use crate::channel::Source;
use crate::pricing::TokenUsage;
use crate::scheduler::SchedulerSnapshot;

/// One completed request, as handed to the statistics collaborator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub id: String,
    pub timestamp: String,
    pub channel: String,
    pub channel_id: String,
    pub model: String,
    pub tokens: TokenCounts,
    /// Milliseconds; kept as plain "duration" on the wire for existing
    /// statistics consumers.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub success: bool,
    pub cost: f64,
    pub source: Source,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    pub cached: u64,
    pub reasoning: u64,
    pub total: u64,
}

impl From<&TokenUsage> for TokenCounts {
    fn from(usage: &TokenUsage) -> Self {
        Self {
            input: usage.input,
            output: usage.output,
            cached: usage.cached + usage.cache_read,
            reasoning: usage.reasoning,
            total: usage.total(),
        }
    }
}

/// UI log line emitted once per accounted request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub id: String,
    pub time: String,
    pub channel: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub reasoning_tokens: u64,
    pub cost: f64,
    pub source: Source,
}

pub trait StatsSink: Send + Sync {
    fn record_request(&self, record: RequestRecord);
}

pub trait EventSink: Send + Sync {
    fn scheduler_state(&self, source: Source, snapshot: SchedulerSnapshot);
    fn log(&self, event: LogEvent);
}

/// Discards everything; the default when no UI or stats store is attached.
pub struct NullSink;

impl StatsSink for NullSink {
    fn record_request(&self, _record: RequestRecord) {}
}

impl EventSink for NullSink {
    fn scheduler_state(&self, _source: Source, _snapshot: SchedulerSnapshot) {}
    fn log(&self, _event: LogEvent) {}
}

/// Everything the pipeline emits, on one broadcast channel. Send errors
/// (no receivers) are ignored by design.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    SchedulerState {
        source: Source,
        snapshot: SchedulerSnapshot,
    },
    Log(LogEvent),
    Request(RequestRecord),
}

/// Fan-out over `tokio::sync::broadcast` for dashboards and log tails.
pub struct BroadcastSink {
    tx: tokio::sync::broadcast::Sender<RelayEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }
}

impl StatsSink for BroadcastSink {
    fn record_request(&self, record: RequestRecord) {
        let _ = self.tx.send(RelayEvent::Request(record));
    }
}

impl EventSink for BroadcastSink {
    fn scheduler_state(&self, source: Source, snapshot: SchedulerSnapshot) {
        let _ = self.tx.send(RelayEvent::SchedulerState { source, snapshot });
    }

    fn log(&self, event: LogEvent) {
        let _ = self.tx.send(RelayEvent::Log(event));
    }
}
