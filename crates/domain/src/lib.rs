//! Aggregate model for the CQRS messaging framework.
//!
//! Event-sourced aggregates embed a [`SourcedRoot`] and mutate state only
//! by applying events through the [`ApplierRegistry`], an explicit table
//! mapping (aggregate type, event type) to the private apply function —
//! built once at startup and passed by reference, never a global.
//!
//! The [`CommandContext`] is the unit of work a command handler runs in:
//! it loads and caches the aggregates the handler touches and collects
//! the events they raise for commit.

pub mod aggregate;
pub mod context;
pub mod error;
pub mod registry;
pub mod repository;

pub use aggregate::{EventSourced, SourcedRoot};
pub use context::{CommandContext, CommitSet, ContextResources};
pub use error::DomainError;
pub use registry::{ApplierRegistry, ApplierRegistryBuilder};
pub use repository::{PlainAggregate, Repository, RepositoryRegistry, RepositoryRegistryBuilder};
