use std::any::TypeId;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{AggregateIdentity, CommandId, DomainEvent};
use serde::{Deserialize, Serialize};

use crate::error::{EventStoreError, Result};

/// Version number of an aggregate, counted in committed event batches.
///
/// A fresh aggregate is at version 0; the batch produced by its first
/// command is stored at version 1, and every successfully stored batch
/// advances the version by exactly 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of a fresh aggregate.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version (1) of the first stored batch.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// The ordered, non-empty sequence of events produced by one command.
///
/// A batch is the unit of both storage and delivery: the events inside it
/// are committed atomically under one version and handed to consumers
/// together. The correlation id is the id of the command that produced the
/// batch, which makes duplicate command delivery detectable on re-save.
#[derive(Debug, Clone)]
pub struct EventBatch {
    /// Identity of the aggregate all events in this batch belong to.
    pub identity: AggregateIdentity,
    /// The aggregate's version after applying this batch.
    pub version: Version,
    /// Id of the command that produced this batch.
    pub correlation_id: CommandId,
    /// The events, in the order they were raised.
    pub events: Vec<Arc<dyn DomainEvent>>,
    /// When the batch was assembled.
    pub created_at: DateTime<Utc>,
}

impl EventBatch {
    /// Assembles a batch; rejects an empty event list.
    pub fn new(
        identity: AggregateIdentity,
        version: Version,
        correlation_id: CommandId,
        events: Vec<Arc<dyn DomainEvent>>,
    ) -> Result<Self> {
        if events.is_empty() {
            return Err(EventStoreError::EmptyBatch { identity });
        }
        Ok(Self {
            identity,
            version,
            correlation_id,
            events,
            created_at: Utc::now(),
        })
    }

    /// The set of distinct concrete event types in this batch.
    ///
    /// Used as the lookup key for composite event handlers, which match on
    /// exact set equality over event types.
    pub fn distinct_event_types(&self) -> BTreeSet<TypeId> {
        self.events
            .iter()
            .map(|event| event.as_any().type_id())
            .collect()
    }

    /// Names of the distinct event types, for logs and error messages.
    pub fn event_type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.events.iter().map(|event| event.event_name()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Batches compare by `(identity, version)` when the version is positive,
/// falling back to the correlation id otherwise. This is what lets a
/// re-saved batch from a replayed command be recognized as the same batch.
impl PartialEq for EventBatch {
    fn eq(&self, other: &Self) -> bool {
        if self.version.as_i64() > 0 && other.version.as_i64() > 0 {
            self.identity == other.identity && self.version == other.version
        } else {
            self.correlation_id == other.correlation_id
        }
    }
}

impl Eq for EventBatch {}
