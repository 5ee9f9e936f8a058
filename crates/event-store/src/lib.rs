//! Event batch storage for the CQRS messaging framework.
//!
//! This crate provides:
//! - The [`EventBatch`] record: the ordered events one command produced,
//!   tagged with an aggregate version and a correlation id
//! - The [`EventStore`] contract with idempotent, version-disciplined saves
//! - The [`PublishedVersionStore`] tracking the last version fully
//!   delivered to consumers, per aggregate identity
//! - Snapshot types bounding replay length
//!
//! The in-memory implementations shard their maps by identity hash so
//! concurrent aggregates never contend on a global lock.

pub mod batch;
pub mod error;
pub mod memory;
pub mod snapshot;
pub mod store;
pub mod tracker;

pub use batch::{EventBatch, Version};
pub use error::{EventStoreError, Result};
pub use memory::{InMemoryEventStore, SHARD_COUNT};
pub use snapshot::{
    InMemorySnapshotStore, NeverSnapshot, Snapshot, SnapshotPolicy, SnapshotStore,
    VersionIntervalPolicy,
};
pub use store::EventStore;
pub use tracker::{InMemoryPublishedVersionStore, PublishedVersionStore};
