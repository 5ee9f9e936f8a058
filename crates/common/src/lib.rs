//! Shared types for the CQRS messaging framework.
//!
//! This crate holds the vocabulary that every other crate speaks:
//! aggregate identities, message ids, the domain event contract, the
//! transport envelope, and the result type replies are made of.

pub mod envelope;
pub mod event;
pub mod identity;
pub mod result;

pub use envelope::{Envelope, TraceInfo};
pub use event::{DomainEvent, EventId};
pub use identity::{AggregateIdentity, CommandId, CorrelationId};
pub use result::{ExecutionResult, ExecutionStatus};
