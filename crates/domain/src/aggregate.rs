//! Event-sourced aggregate base types.

use std::sync::Arc;

use common::{AggregateIdentity, DomainEvent};
use event_store::Version;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// The bookkeeping every event-sourced aggregate embeds: identity,
/// batch-counted version, and the events raised since the last commit.
///
/// Pending events are transient working state, not part of the aggregate's
/// persisted shape, so they are skipped when snapshotting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcedRoot {
    identity: AggregateIdentity,
    version: Version,
    #[serde(skip)]
    pending: Vec<Arc<dyn DomainEvent>>,
}

impl SourcedRoot {
    /// Creates the root of a fresh aggregate at version 0.
    pub fn new(identity: AggregateIdentity) -> Self {
        Self {
            identity,
            version: Version::initial(),
            pending: Vec::new(),
        }
    }

    /// The aggregate's identity.
    pub fn identity(&self) -> &AggregateIdentity {
        &self.identity
    }

    /// The aggregate's current version (number of committed batches).
    pub fn version(&self) -> Version {
        self.version
    }

    /// Sets the version. Called on snapshot restore and batch replay.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Events raised since the last commit, in raise order.
    pub fn pending(&self) -> &[Arc<dyn DomainEvent>] {
        &self.pending
    }

    /// Appends a raised event to the pending list.
    pub fn push_pending(&mut self, event: Arc<dyn DomainEvent>) {
        self.pending.push(event);
    }

    /// Drains the pending list for commit.
    pub fn take_pending(&mut self) -> Vec<Arc<dyn DomainEvent>> {
        std::mem::take(&mut self.pending)
    }

    /// Clears the pending list. Replay must not re-raise.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }
}

/// Contract for event-sourced aggregates.
///
/// Implementors embed a [`SourcedRoot`] and expose it through
/// `root`/`root_mut`; state mutation happens exclusively through apply
/// functions registered in the
/// [`ApplierRegistry`](crate::registry::ApplierRegistry). The serde bounds
/// exist so aggregate state can be snapshotted.
pub trait EventSourced: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable aggregate type name, used in identities and error messages.
    fn aggregate_type() -> &'static str;

    /// Creates a blank aggregate at version 0 for replay or creation.
    fn blank(identity: AggregateIdentity) -> Self;

    /// The embedded root.
    fn root(&self) -> &SourcedRoot;

    /// The embedded root, mutably.
    fn root_mut(&mut self) -> &mut SourcedRoot;

    /// The aggregate's identity.
    fn identity(&self) -> &AggregateIdentity {
        self.root().identity()
    }

    /// The aggregate's current version.
    fn version(&self) -> Version {
        self.root().version()
    }

    /// Events raised since the last commit.
    fn pending_events(&self) -> &[Arc<dyn DomainEvent>] {
        self.root().pending()
    }
}
