use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateIdentity;
use tokio::sync::RwLock;

use crate::Version;
use crate::memory::{SHARD_COUNT, shard_index};

/// Tracks, per aggregate identity, the version of the last event batch
/// fully delivered to consumers.
///
/// The tracker is the event dispatcher's ordering ledger: a batch is only
/// processed when its version is exactly one past the tracked version.
#[async_trait]
pub trait PublishedVersionStore: Send + Sync {
    /// Returns the last fully-delivered version, 0 if none.
    async fn published_version(&self, identity: &AggregateIdentity) -> Version;

    /// Advances the tracked version, but only when `version` is exactly
    /// `current + 1`. Anything else is silently ignored — the dispatcher
    /// enforces ordering before calling this.
    async fn advance(&self, identity: &AggregateIdentity, version: Version);
}

type Shard = RwLock<HashMap<AggregateIdentity, Version>>;

/// In-memory publication tracker, sharded like [`crate::InMemoryEventStore`].
#[derive(Clone, Default)]
pub struct InMemoryPublishedVersionStore {
    shards: Arc<[Shard; SHARD_COUNT]>,
}

impl InMemoryPublishedVersionStore {
    /// Creates a new tracker with no delivered versions.
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, identity: &AggregateIdentity) -> &Shard {
        &self.shards[shard_index(identity)]
    }
}

#[async_trait]
impl PublishedVersionStore for InMemoryPublishedVersionStore {
    async fn published_version(&self, identity: &AggregateIdentity) -> Version {
        let shard = self.shard(identity).read().await;
        shard.get(identity).copied().unwrap_or_else(Version::initial)
    }

    async fn advance(&self, identity: &AggregateIdentity, version: Version) {
        let mut shard = self.shard(identity).write().await;
        let current = shard
            .get(identity)
            .copied()
            .unwrap_or_else(Version::initial);
        if version == current.next() {
            shard.insert(identity.clone(), version);
        } else {
            tracing::debug!(
                identity = %identity,
                current = %current,
                attempted = %version,
                "out-of-order tracker advance ignored"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_identity_is_at_version_zero() {
        let tracker = InMemoryPublishedVersionStore::new();
        let identity = AggregateIdentity::local("Order", "42");
        assert_eq!(tracker.published_version(&identity).await, Version::initial());
    }

    #[tokio::test]
    async fn advances_only_by_exactly_one() {
        let tracker = InMemoryPublishedVersionStore::new();
        let identity = AggregateIdentity::local("Order", "42");

        tracker.advance(&identity, Version::new(1)).await;
        assert_eq!(tracker.published_version(&identity).await, Version::new(1));

        // Skipping ahead is ignored.
        tracker.advance(&identity, Version::new(3)).await;
        assert_eq!(tracker.published_version(&identity).await, Version::new(1));

        // Replaying the current version is ignored.
        tracker.advance(&identity, Version::new(1)).await;
        assert_eq!(tracker.published_version(&identity).await, Version::new(1));

        tracker.advance(&identity, Version::new(2)).await;
        assert_eq!(tracker.published_version(&identity).await, Version::new(2));
    }

    #[tokio::test]
    async fn first_advance_must_be_version_one() {
        let tracker = InMemoryPublishedVersionStore::new();
        let identity = AggregateIdentity::local("Order", "42");

        tracker.advance(&identity, Version::new(2)).await;
        assert_eq!(tracker.published_version(&identity).await, Version::initial());
    }

    #[tokio::test]
    async fn identities_track_independently() {
        let tracker = InMemoryPublishedVersionStore::new();
        let a = AggregateIdentity::local("Order", "1");
        let b = AggregateIdentity::local("Order", "2");

        tracker.advance(&a, Version::new(1)).await;
        assert_eq!(tracker.published_version(&a).await, Version::new(1));
        assert_eq!(tracker.published_version(&b).await, Version::initial());
    }
}
