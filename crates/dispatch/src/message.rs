//! Command and query message contracts.

use std::any::Any;

use common::CommandId;

/// A request to change state, addressed to exactly one command handler.
///
/// Commands are identified by concrete type; the dispatcher resolves the
/// handler from the command's `TypeId`, and `as_any` lets the handler
/// downcast back to the concrete command.
pub trait Command: std::fmt::Debug + Send + Sync + 'static {
    /// Unique id of this command instance. Reused as the correlation id
    /// of any event batch the command produces.
    fn command_id(&self) -> CommandId;

    /// Stable command name for logs and error messages.
    fn command_name(&self) -> &'static str;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

/// A read-only request, addressed to exactly one query handler.
pub trait Query: std::fmt::Debug + Send + Sync + 'static {
    /// Stable query name for logs and error messages.
    fn query_name(&self) -> &'static str;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

/// Downcasts a dispatched command to its concrete type.
///
/// Returns None on a type mismatch, which means the registry resolved the
/// wrong handler and is a configuration fault.
pub fn expect_command<C: Command>(command: &dyn Command) -> Option<&C> {
    command.as_any().downcast_ref::<C>()
}

/// Downcasts a dispatched query to its concrete type.
pub fn expect_query<Q: Query>(query: &dyn Query) -> Option<&Q> {
    query.as_any().downcast_ref::<Q>()
}
