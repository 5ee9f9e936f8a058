//! The command unit of work.
//!
//! A [`CommandContext`] is created fresh for every command handling attempt.
//! It loads and caches the aggregates the handler touches, routes raised
//! events through the applier registry, and on commit turns everything the
//! handler changed into a [`CommitSet`] for the dispatcher to persist and
//! publish. The context itself never writes to the store.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::{AggregateIdentity, CommandId, DomainEvent, EventId};
use event_store::{
    EventBatch, EventStore, Snapshot, SnapshotPolicy, SnapshotStore, Version,
};

use crate::aggregate::EventSourced;
use crate::error::DomainError;
use crate::registry::ApplierRegistry;
use crate::repository::{PlainAggregate, RepositoryRegistry};

/// The shared services a context needs, injected at construction.
#[derive(Clone)]
pub struct ContextResources {
    pub store: Arc<dyn EventStore>,
    pub registry: Arc<ApplierRegistry>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub snapshot_policy: Arc<dyn SnapshotPolicy>,
    pub repositories: Arc<RepositoryRegistry>,
}

/// Everything a committed context produced: the batches to store, the
/// snapshots that came due, and the loose events to publish without
/// storage.
pub struct CommitSet {
    pub batches: Vec<EventBatch>,
    pub snapshots: Vec<Snapshot>,
    pub published: Vec<Arc<dyn DomainEvent>>,
}

impl CommitSet {
    /// True when the command changed nothing.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.published.is_empty()
    }
}

/// Per-type operations on a tracked event-sourced aggregate, monomorphized
/// once per aggregate type and stored as plain function pointers.
#[derive(Clone, Copy)]
struct SourcedVtable {
    commit_batch: fn(
        &mut (dyn Any + Send + Sync),
    ) -> Option<(AggregateIdentity, Version, Vec<Arc<dyn DomainEvent>>)>,
    snapshot: fn(&(dyn Any + Send + Sync)) -> Result<Option<Snapshot>, DomainError>,
}

fn commit_batch_of<A: EventSourced>(
    state: &mut (dyn Any + Send + Sync),
) -> Option<(AggregateIdentity, Version, Vec<Arc<dyn DomainEvent>>)> {
    let aggregate = state.downcast_mut::<A>()?;
    let events = aggregate.root_mut().take_pending();
    if events.is_empty() {
        return None;
    }
    let version = aggregate.version().next();
    aggregate.root_mut().set_version(version);
    Some((aggregate.identity().clone(), version, events))
}

fn snapshot_of<A: EventSourced>(
    state: &(dyn Any + Send + Sync),
) -> Result<Option<Snapshot>, DomainError> {
    let Some(aggregate) = state.downcast_ref::<A>() else {
        return Ok(None);
    };
    let snapshot =
        Snapshot::from_state(aggregate.identity().clone(), aggregate.version(), aggregate)?;
    Ok(Some(snapshot))
}

struct Tracked {
    state: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
    sourced: Option<SourcedVtable>,
}

/// The unit of work a command handler runs in.
pub struct CommandContext {
    resources: ContextResources,
    tracked: HashMap<AggregateIdentity, Tracked>,
    // Commit order follows first-touch order, not hash order.
    order: Vec<AggregateIdentity>,
    loose: Vec<Arc<dyn DomainEvent>>,
    loose_ids: HashSet<EventId>,
}

impl CommandContext {
    /// Creates an empty context over the given resources.
    pub fn new(resources: ContextResources) -> Self {
        Self {
            resources,
            tracked: HashMap::new(),
            order: Vec::new(),
            loose: Vec::new(),
            loose_ids: HashSet::new(),
        }
    }

    /// The resources this context was built over.
    pub fn resources(&self) -> &ContextResources {
        &self.resources
    }

    /// Starts tracking a brand-new event-sourced aggregate.
    ///
    /// Fails when an aggregate with the same identity is already tracked.
    pub fn add<A: EventSourced>(&mut self, aggregate: A) -> Result<(), DomainError> {
        if self.tracked.contains_key(aggregate.identity()) {
            return Err(DomainError::DuplicateAggregate {
                identity: aggregate.identity().to_string(),
            });
        }
        self.track_sourced(aggregate);
        Ok(())
    }

    /// Returns the event-sourced aggregate, loading it on first touch.
    ///
    /// Fails with [`DomainError::AggregateNotFound`] when there is neither
    /// a snapshot nor any stored batch for the identity.
    pub async fn get<A: EventSourced>(
        &mut self,
        identity: &AggregateIdentity,
    ) -> Result<&mut A, DomainError> {
        match self.find::<A>(identity).await? {
            Some(aggregate) => Ok(aggregate),
            None => Err(DomainError::AggregateNotFound {
                aggregate_type: A::aggregate_type(),
                identity: identity.to_string(),
            }),
        }
    }

    /// Like [`get`](Self::get), but returns None for an unknown identity.
    pub async fn find<A: EventSourced>(
        &mut self,
        identity: &AggregateIdentity,
    ) -> Result<Option<&mut A>, DomainError> {
        if !self.tracked.contains_key(identity) {
            let Some(aggregate) = self.load_sourced::<A>(identity).await? else {
                return Ok(None);
            };
            self.track_sourced(aggregate);
        }
        let Some(tracked) = self.tracked.get_mut(identity) else {
            return Ok(None);
        };
        match tracked.state.downcast_mut::<A>() {
            Some(aggregate) => Ok(Some(aggregate)),
            None => Err(DomainError::AggregateTypeMismatch {
                identity: identity.to_string(),
                expected: A::aggregate_type(),
            }),
        }
    }

    /// Returns the plain aggregate, loading it through its repository on
    /// first touch.
    pub async fn get_plain<A: PlainAggregate>(
        &mut self,
        identity: &AggregateIdentity,
    ) -> Result<&A, DomainError> {
        match self.find_plain::<A>(identity).await? {
            Some(aggregate) => Ok(aggregate),
            None => Err(DomainError::AggregateNotFound {
                aggregate_type: A::aggregate_type(),
                identity: identity.to_string(),
            }),
        }
    }

    /// Like [`get_plain`](Self::get_plain), but returns None when the
    /// repository has no aggregate for the identity.
    pub async fn find_plain<A: PlainAggregate>(
        &mut self,
        identity: &AggregateIdentity,
    ) -> Result<Option<&A>, DomainError> {
        if !self.tracked.contains_key(identity) {
            let loaded = self.resources.repositories.load::<A>(identity).await?;
            let Some(aggregate) = loaded else {
                return Ok(None);
            };
            self.track_plain(aggregate);
        }
        let Some(tracked) = self.tracked.get(identity) else {
            return Ok(None);
        };
        match tracked.state.downcast_ref::<A>() {
            Some(aggregate) => Ok(Some(aggregate)),
            None => Err(DomainError::AggregateTypeMismatch {
                identity: identity.to_string(),
                expected: A::aggregate_type(),
            }),
        }
    }

    /// Raises an event on a tracked event-sourced aggregate: applies it
    /// immediately and queues it for commit.
    pub fn raise<A: EventSourced>(
        &mut self,
        identity: &AggregateIdentity,
        event: Arc<dyn DomainEvent>,
    ) -> Result<(), DomainError> {
        let registry = Arc::clone(&self.resources.registry);
        let Some(tracked) = self.tracked.get_mut(identity) else {
            return Err(DomainError::AggregateNotFound {
                aggregate_type: A::aggregate_type(),
                identity: identity.to_string(),
            });
        };
        let Some(aggregate) = tracked.state.downcast_mut::<A>() else {
            return Err(DomainError::AggregateTypeMismatch {
                identity: identity.to_string(),
                expected: A::aggregate_type(),
            });
        };
        registry.raise(aggregate, event)
    }

    /// Queues a loose event for publication without storage.
    ///
    /// Duplicate event ids are silently ignored, which lets a handler call
    /// this unconditionally on a retried attempt.
    pub fn pending_event(&mut self, event: Arc<dyn DomainEvent>) {
        if self.loose_ids.insert(event.event_id()) {
            self.loose.push(event);
        }
    }

    /// Consumes the context and assembles everything to persist and
    /// publish.
    ///
    /// Each tracked aggregate with pending events yields one batch at the
    /// aggregate's next version, correlated to the command; snapshots are
    /// taken where the policy says one is due.
    pub fn commit(mut self, command_id: CommandId) -> Result<CommitSet, DomainError> {
        let mut batches = Vec::new();
        let mut snapshots = Vec::new();
        for identity in &self.order {
            let Some(tracked) = self.tracked.get_mut(identity) else {
                continue;
            };
            let Some(vtable) = tracked.sourced else {
                continue;
            };
            if let Some((identity, version, events)) =
                (vtable.commit_batch)(tracked.state.as_mut())
            {
                let batch = EventBatch::new(identity, version, command_id, events)?;
                if self.resources.snapshot_policy.should_snapshot(version) {
                    if let Some(snapshot) = (vtable.snapshot)(tracked.state.as_ref())? {
                        snapshots.push(snapshot);
                    }
                }
                batches.push(batch);
            }
        }
        Ok(CommitSet {
            batches,
            snapshots,
            published: self.loose,
        })
    }

    fn track_sourced<A: EventSourced>(&mut self, aggregate: A) {
        let identity = aggregate.identity().clone();
        self.tracked.insert(
            identity.clone(),
            Tracked {
                state: Box::new(aggregate),
                type_name: A::aggregate_type(),
                sourced: Some(SourcedVtable {
                    commit_batch: commit_batch_of::<A>,
                    snapshot: snapshot_of::<A>,
                }),
            },
        );
        self.order.push(identity);
    }

    fn track_plain<A: PlainAggregate>(&mut self, aggregate: A) {
        let identity = aggregate.identity().clone();
        self.tracked.insert(
            identity.clone(),
            Tracked {
                state: Box::new(aggregate),
                type_name: A::aggregate_type(),
                sourced: None,
            },
        );
        self.order.push(identity);
    }

    /// Rebuilds an event-sourced aggregate: restore the latest snapshot if
    /// one exists, then replay every batch stored past it.
    async fn load_sourced<A: EventSourced>(
        &self,
        identity: &AggregateIdentity,
    ) -> Result<Option<A>, DomainError> {
        let snapshot = self.resources.snapshots.latest(identity).await?;
        let mut from = Version::initial();
        let mut restored = false;
        let mut aggregate = match snapshot {
            Some(snapshot) => {
                let mut aggregate: A = serde_json::from_value(snapshot.state)?;
                aggregate.root_mut().set_version(snapshot.version);
                from = snapshot.version;
                restored = true;
                aggregate
            }
            None => A::blank(identity.clone()),
        };
        let batches = self.resources.store.find_all(identity, from).await?;
        if !restored && batches.is_empty() {
            return Ok(None);
        }
        for batch in &batches {
            self.resources
                .registry
                .load_from(&mut aggregate, &batch.events)?;
        }
        Ok(Some(aggregate))
    }
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tracked: Vec<String> = self
            .order
            .iter()
            .filter_map(|identity| {
                self.tracked
                    .get(identity)
                    .map(|entry| format!("{} {}", entry.type_name, identity))
            })
            .collect();
        f.debug_struct("CommandContext")
            .field("tracked", &tracked)
            .field("loose_events", &self.loose.len())
            .finish()
    }
}
