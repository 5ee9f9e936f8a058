use common::AggregateIdentity;
use thiserror::Error;

use crate::Version;

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// A batch was saved out of sequence for its aggregate identity.
    /// Stored versions must form a gapless increasing sequence from 1.
    #[error("version gap for {identity}: expected {expected}, got {actual}")]
    VersionGap {
        identity: AggregateIdentity,
        expected: Version,
        actual: Version,
    },

    /// A batch must carry at least one event.
    #[error("empty event batch for {identity}")]
    EmptyBatch { identity: AggregateIdentity },

    /// A serialization/deserialization error occurred (snapshots).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
