//! Domain error types.

use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur during aggregate and unit-of-work operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An event-sourced aggregate has no apply function for an event type.
    /// Fatal: such an aggregate has no other way to reach that state.
    #[error("no applier registered for event {event} on aggregate {aggregate}")]
    MissingApplier {
        aggregate: &'static str,
        event: &'static str,
    },

    /// Two apply functions were registered for the same
    /// (aggregate type, event type) pair. Detected at registry build.
    #[error("duplicate applier for event {event} on aggregate {aggregate}")]
    DuplicateApplier {
        aggregate: &'static str,
        event: &'static str,
    },

    /// The aggregate does not exist (no snapshot and no stored batches).
    #[error("aggregate not found: {aggregate_type} {identity}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        identity: String,
    },

    /// An aggregate with this identity is already tracked by the context.
    #[error("aggregate already tracked: {identity}")]
    DuplicateAggregate { identity: String },

    /// The identity is tracked, but under a different concrete type.
    #[error("aggregate {identity} is tracked as a different type than {expected}")]
    AggregateTypeMismatch {
        identity: String,
        expected: &'static str,
    },

    /// No repository is registered for a plain aggregate type.
    #[error("no repository registered for aggregate type {aggregate_type}")]
    NoRepository { aggregate_type: &'static str },

    /// Two repositories were registered for the same plain aggregate type.
    #[error("duplicate repository for aggregate type {aggregate_type}")]
    DuplicateRepository { aggregate_type: &'static str },

    /// An error occurred in the event store.
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Snapshot state failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
