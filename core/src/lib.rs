//! ccrelay Core Library
//! Channel registry, health tracking, weighted scheduling, and the
//! streaming proxy pipeline shared by the claude/codex/gemini relays.

pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod pricing;
pub mod proxy;
pub mod registry;
pub mod scheduler;

pub use channel::{Channel, Source};
pub use error::{Error, Result};
pub use health::{HealthState, HealthTracker};
pub use registry::ChannelRegistry;
pub use scheduler::{AllocateRequest, ReleaseGuard, Scheduler, SchedulerSnapshot};
