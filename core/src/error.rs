//! Core error taxonomy

use crate::channel::Source;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("channel not found: {id}")]
    ChannelNotFound { id: String },

    #[error("provider key \"{provider_key}\" already exists")]
    ChannelConflict { provider_key: String },

    #[error("no channel available for {source}: {reason}")]
    NoChannelAvailable { source: Source, reason: String },

    #[error("upstream request timed out after {seconds}s")]
    UpstreamTimeout { seconds: u64 },

    #[error("upstream connection failed: {0}")]
    UpstreamConnection(String),

    #[error("channel store error: {0}")]
    Store(#[from] std::io::Error),

    #[error("channel store parse error: {0}")]
    StoreFormat(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
