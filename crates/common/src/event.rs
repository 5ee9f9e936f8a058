use std::any::Any;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AggregateIdentity;

/// Unique identifier for a domain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contract for domain events.
///
/// An event is an immutable record of something that happened to one
/// aggregate. It is owned by the aggregate that raised it until committed;
/// once stored it is system-of-record data and must never change.
///
/// Events travel through the pipeline as `Arc<dyn DomainEvent>`; dispatch
/// is keyed on the concrete type via [`DomainEvent::as_any`], so no
/// serialization format is imposed on the core.
pub trait DomainEvent: std::fmt::Debug + Send + Sync + 'static {
    /// Unique id of this event instance.
    fn event_id(&self) -> EventId;

    /// UTC creation timestamp.
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Identity of the aggregate that raised this event.
    fn source(&self) -> &AggregateIdentity;

    /// Stable type name, used in logs and idempotency records.
    fn event_name(&self) -> &'static str;

    /// Upcast for `TypeId`-keyed handler lookup and downcasting.
    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Pinged {
        id: EventId,
        at: DateTime<Utc>,
        source: AggregateIdentity,
    }

    impl DomainEvent for Pinged {
        fn event_id(&self) -> EventId {
            self.id
        }
        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
        fn source(&self) -> &AggregateIdentity {
            &self.source
        }
        fn event_name(&self) -> &'static str {
            "Pinged"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn event_ids_are_unique() {
        assert_ne!(EventId::new(), EventId::new());
    }

    #[test]
    fn trait_object_downcasts_to_concrete_type() {
        let event: Box<dyn DomainEvent> = Box::new(Pinged {
            id: EventId::new(),
            at: Utc::now(),
            source: AggregateIdentity::local("Ping", "1"),
        });
        assert_eq!(event.event_name(), "Pinged");
        assert!(event.as_any().downcast_ref::<Pinged>().is_some());
    }
}
