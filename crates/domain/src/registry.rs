//! Inner handler registry: the per-aggregate-type table mapping an
//! event's runtime type to the apply function that mutates the aggregate.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use common::DomainEvent;

use crate::aggregate::EventSourced;
use crate::error::DomainError;

type ApplyFn = Box<dyn Fn(&mut dyn Any, &dyn DomainEvent) + Send + Sync>;

struct RegisteredApplier {
    apply: ApplyFn,
    aggregate_name: &'static str,
    event_name: &'static str,
}

/// Explicit dispatch table from (aggregate type, event type) to the apply
/// function for that pair.
///
/// Built once at startup through [`ApplierRegistryBuilder`] and shared by
/// `Arc`; duplicate registrations are a fatal configuration error caught
/// at build time, and a missing entry is fatal at apply time since an
/// event-sourced aggregate has no other way to reach its state.
pub struct ApplierRegistry {
    appliers: HashMap<(TypeId, TypeId), RegisteredApplier>,
}

impl ApplierRegistry {
    /// Starts building a registry.
    pub fn builder() -> ApplierRegistryBuilder {
        ApplierRegistryBuilder {
            appliers: HashMap::new(),
        }
    }

    /// Returns the number of registered (aggregate, event) pairs.
    pub fn len(&self) -> usize {
        self.appliers.len()
    }

    /// True when no appliers are registered.
    pub fn is_empty(&self) -> bool {
        self.appliers.is_empty()
    }

    /// Raises an event on an aggregate: applies it immediately so
    /// in-memory state reflects the change before commit, then appends it
    /// to the aggregate's pending list.
    pub fn raise<A: EventSourced>(
        &self,
        aggregate: &mut A,
        event: Arc<dyn DomainEvent>,
    ) -> Result<(), DomainError> {
        self.apply(aggregate, event.as_ref())?;
        aggregate.root_mut().push_pending(event);
        Ok(())
    }

    /// Replays one historical batch onto an aggregate: applies each event
    /// in order, increments the version exactly once (one batch = one
    /// version), and clears pending events — replay must not re-raise.
    pub fn load_from<A: EventSourced>(
        &self,
        aggregate: &mut A,
        events: &[Arc<dyn DomainEvent>],
    ) -> Result<(), DomainError> {
        for event in events {
            self.apply(aggregate, event.as_ref())?;
        }
        let next = aggregate.version().next();
        aggregate.root_mut().set_version(next);
        aggregate.root_mut().clear_pending();
        Ok(())
    }

    fn apply<A: EventSourced>(
        &self,
        aggregate: &mut A,
        event: &dyn DomainEvent,
    ) -> Result<(), DomainError> {
        let key = (TypeId::of::<A>(), event.as_any().type_id());
        let entry = self
            .appliers
            .get(&key)
            .ok_or_else(|| DomainError::MissingApplier {
                aggregate: A::aggregate_type(),
                event: event.event_name(),
            })?;
        (entry.apply)(aggregate, event);
        Ok(())
    }
}

impl std::fmt::Debug for ApplierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut pairs: Vec<String> = self
            .appliers
            .values()
            .map(|entry| format!("{}<-{}", entry.aggregate_name, entry.event_name))
            .collect();
        pairs.sort_unstable();
        f.debug_struct("ApplierRegistry")
            .field("appliers", &pairs)
            .finish()
    }
}

/// Builder collecting apply functions before freezing them into an
/// [`ApplierRegistry`].
pub struct ApplierRegistryBuilder {
    appliers: HashMap<(TypeId, TypeId), RegisteredApplier>,
}

impl ApplierRegistryBuilder {
    /// Registers the apply function for one (aggregate, event) pair.
    ///
    /// A second registration for the same pair is a fatal configuration
    /// error.
    pub fn applier<A, E>(mut self, apply: fn(&mut A, &E)) -> Result<Self, DomainError>
    where
        A: EventSourced,
        E: DomainEvent,
    {
        let key = (TypeId::of::<A>(), TypeId::of::<E>());
        if self.appliers.contains_key(&key) {
            return Err(DomainError::DuplicateApplier {
                aggregate: A::aggregate_type(),
                event: std::any::type_name::<E>(),
            });
        }
        let erased: ApplyFn = Box::new(move |aggregate, event| {
            if let (Some(aggregate), Some(event)) = (
                aggregate.downcast_mut::<A>(),
                event.as_any().downcast_ref::<E>(),
            ) {
                apply(aggregate, event);
            }
        });
        self.appliers.insert(
            key,
            RegisteredApplier {
                apply: erased,
                aggregate_name: A::aggregate_type(),
                event_name: std::any::type_name::<E>(),
            },
        );
        Ok(self)
    }

    /// Freezes the table.
    pub fn build(self) -> ApplierRegistry {
        ApplierRegistry {
            appliers: self.appliers,
        }
    }
}
