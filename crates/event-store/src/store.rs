use async_trait::async_trait;
use common::{AggregateIdentity, CommandId};

use crate::{EventBatch, Result, Version};

/// Contract for event batch stores.
///
/// Implementations must be thread-safe (`Send + Sync`). Durability is the
/// implementation's concern; the core only requires the per-identity
/// version discipline below.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch for its aggregate identity.
    ///
    /// Returns `Ok(false)` without any effect when a batch with the same
    /// correlation id or the same version is already stored for that
    /// identity — the idempotent re-delivery path for replayed commands.
    /// Returns `Ok(true)` when the batch was stored. A batch that would
    /// leave a gap in the version sequence is rejected with
    /// [`crate::EventStoreError::VersionGap`].
    async fn save(&self, batch: &EventBatch) -> Result<bool>;

    /// Returns the stored batch with the given correlation id, or None.
    async fn find(
        &self,
        identity: &AggregateIdentity,
        correlation_id: CommandId,
    ) -> Result<Option<EventBatch>>;

    /// Returns all batches with version greater than `from_version`,
    /// ascending by version.
    async fn find_all(
        &self,
        identity: &AggregateIdentity,
        from_version: Version,
    ) -> Result<Vec<EventBatch>>;
}
