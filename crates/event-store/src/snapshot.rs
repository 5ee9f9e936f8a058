use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateIdentity;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{Result, Version};

/// A cached materialization of an aggregate's state at a given version,
/// used to shorten replay when loading event-sourced aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub identity: AggregateIdentity,
    pub version: Version,
    pub state: serde_json::Value,
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    /// Creates a snapshot from an already-serialized state value.
    pub fn new(identity: AggregateIdentity, version: Version, state: serde_json::Value) -> Self {
        Self {
            identity,
            version,
            state,
            taken_at: Utc::now(),
        }
    }

    /// Serializes an aggregate state into a snapshot.
    pub fn from_state<T: Serialize>(
        identity: AggregateIdentity,
        version: Version,
        state: &T,
    ) -> Result<Self> {
        Ok(Self::new(identity, version, serde_json::to_value(state)?))
    }
}

/// Storage for aggregate snapshots, keyed by identity.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns the latest snapshot for the identity, or None.
    async fn latest(&self, identity: &AggregateIdentity) -> Result<Option<Snapshot>>;

    /// Saves a snapshot, replacing any previous one for the identity.
    async fn save(&self, snapshot: Snapshot) -> Result<()>;

    /// Removes the snapshot for the identity, if any.
    async fn remove(&self, identity: &AggregateIdentity) -> Result<()>;
}

/// Decides when a snapshot of an aggregate should be taken.
pub trait SnapshotPolicy: Send + Sync {
    /// Returns whether a snapshot is due at the given post-commit version.
    fn should_snapshot(&self, version: Version) -> bool;
}

/// Snapshots every `interval` versions (default 100).
#[derive(Debug, Clone)]
pub struct VersionIntervalPolicy {
    interval: i64,
}

impl VersionIntervalPolicy {
    /// Creates a policy snapshotting every `interval` committed batches.
    pub fn new(interval: i64) -> Self {
        Self {
            interval: interval.max(1),
        }
    }
}

impl Default for VersionIntervalPolicy {
    fn default() -> Self {
        Self::new(100)
    }
}

impl SnapshotPolicy for VersionIntervalPolicy {
    fn should_snapshot(&self, version: Version) -> bool {
        version.as_i64() > 0 && version.as_i64() % self.interval == 0
    }
}

/// Never snapshots; every load replays the full event history.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSnapshot;

impl SnapshotPolicy for NeverSnapshot {
    fn should_snapshot(&self, _version: Version) -> bool {
        false
    }
}

/// In-memory snapshot store for tests and single-process deployments.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<AggregateIdentity, Snapshot>>>,
}

impl InMemorySnapshotStore {
    /// Creates a new empty snapshot store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn latest(&self, identity: &AggregateIdentity) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.read().await.get(identity).cloned())
    }

    async fn save(&self, snapshot: Snapshot) -> Result<()> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.identity.clone(), snapshot);
        Ok(())
    }

    async fn remove(&self, identity: &AggregateIdentity) -> Result<()> {
        self.snapshots.write().await.remove(identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_replace() {
        let store = InMemorySnapshotStore::new();
        let identity = AggregateIdentity::local("Order", "42");

        store
            .save(Snapshot::new(
                identity.clone(),
                Version::new(5),
                serde_json::json!({"lines": 2}),
            ))
            .await
            .unwrap();
        store
            .save(Snapshot::new(
                identity.clone(),
                Version::new(10),
                serde_json::json!({"lines": 4}),
            ))
            .await
            .unwrap();

        let latest = store.latest(&identity).await.unwrap().unwrap();
        assert_eq!(latest.version, Version::new(10));
    }

    #[tokio::test]
    async fn remove_clears_the_entry() {
        let store = InMemorySnapshotStore::new();
        let identity = AggregateIdentity::local("Order", "42");

        store
            .save(Snapshot::new(
                identity.clone(),
                Version::new(1),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        store.remove(&identity).await.unwrap();
        assert!(store.latest(&identity).await.unwrap().is_none());
    }

    #[test]
    fn interval_policy_fires_on_multiples() {
        let policy = VersionIntervalPolicy::new(3);
        assert!(!policy.should_snapshot(Version::initial()));
        assert!(!policy.should_snapshot(Version::new(2)));
        assert!(policy.should_snapshot(Version::new(3)));
        assert!(!policy.should_snapshot(Version::new(4)));
        assert!(policy.should_snapshot(Version::new(6)));
    }

    #[test]
    fn never_policy_never_fires() {
        assert!(!NeverSnapshot.should_snapshot(Version::new(100)));
    }
}
