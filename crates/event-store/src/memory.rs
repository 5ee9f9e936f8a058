use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateIdentity, CommandId};
use tokio::sync::RwLock;

use crate::{EventBatch, EventStore, EventStoreError, Result, Version};

/// Number of buckets the in-memory maps are sharded into.
///
/// Sharding by identity hash bounds lock scope under concurrent
/// aggregates; updates to a single identity are serialized externally by
/// the event dispatcher worker, so no per-identity lock is needed.
pub const SHARD_COUNT: usize = 10;

pub(crate) fn shard_index(identity: &AggregateIdentity) -> usize {
    let mut hasher = DefaultHasher::new();
    identity.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

type Shard = RwLock<HashMap<AggregateIdentity, Vec<EventBatch>>>;

/// In-memory event store sharded by aggregate identity hash.
///
/// The authoritative store for tests and single-process deployments, and
/// the reference for the version discipline durable implementations must
/// uphold.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    shards: Arc<[Shard; SHARD_COUNT]>,
}

impl InMemoryEventStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of stored batches.
    pub async fn batch_count(&self) -> usize {
        let mut total = 0;
        for shard in self.shards.iter() {
            total += shard.read().await.values().map(Vec::len).sum::<usize>();
        }
        total
    }

    fn shard(&self, identity: &AggregateIdentity) -> &Shard {
        &self.shards[shard_index(identity)]
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save(&self, batch: &EventBatch) -> Result<bool> {
        let mut shard = self.shard(&batch.identity).write().await;
        let stored = shard.entry(batch.identity.clone()).or_default();

        // Idempotent re-save: same correlation id or same version means a
        // replayed command re-committed an already-stored batch.
        let duplicate = stored.iter().any(|existing| {
            existing.correlation_id == batch.correlation_id || existing.version == batch.version
        });
        if duplicate {
            tracing::debug!(
                identity = %batch.identity,
                version = %batch.version,
                correlation_id = %batch.correlation_id,
                "duplicate batch ignored"
            );
            return Ok(false);
        }

        let expected = stored
            .last()
            .map(|existing| existing.version.next())
            .unwrap_or_else(Version::first);
        if batch.version != expected {
            return Err(EventStoreError::VersionGap {
                identity: batch.identity.clone(),
                expected,
                actual: batch.version,
            });
        }

        stored.push(batch.clone());
        Ok(true)
    }

    async fn find(
        &self,
        identity: &AggregateIdentity,
        correlation_id: CommandId,
    ) -> Result<Option<EventBatch>> {
        let shard = self.shard(identity).read().await;
        Ok(shard.get(identity).and_then(|stored| {
            stored
                .iter()
                .find(|batch| batch.correlation_id == correlation_id)
                .cloned()
        }))
    }

    async fn find_all(
        &self,
        identity: &AggregateIdentity,
        from_version: Version,
    ) -> Result<Vec<EventBatch>> {
        let shard = self.shard(identity).read().await;
        Ok(shard
            .get(identity)
            .map(|stored| {
                stored
                    .iter()
                    .filter(|batch| batch.version > from_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
