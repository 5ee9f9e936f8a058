//! Handler contracts and their registries.
//!
//! Handlers are resolved from explicit registries built at startup, keyed
//! by message type. Command and query handlers are one-per-message-type;
//! event handlers are keyed by the exact set of event types they consume,
//! so a batch matches at most one handler.

use std::any::TypeId;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use common::DomainEvent;
use domain::CommandContext;

use crate::error::{ConfigError, HandlerError};
use crate::message::{Command, Query};

/// Upper bound on the number of distinct event types one handler may
/// consume from a single batch.
pub const MAX_COMPOSITE_EVENTS: usize = 5;

/// Handles one command type.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// The concrete command type this handler consumes.
    fn command_type(&self) -> TypeId;

    /// Name of the handled command, for logs and registry errors.
    fn command_name(&self) -> &'static str;

    /// Name of the handler itself.
    fn handler_name(&self) -> &'static str;

    /// Whether this handler works through aggregates and the event store.
    ///
    /// Non-domain handlers cause side effects the pipeline does not track;
    /// their success is reported as soon as the handler returns.
    fn is_domain_handler(&self) -> bool {
        true
    }

    /// Handles the command inside the given unit of work.
    async fn handle(
        &self,
        context: &mut CommandContext,
        command: &dyn Command,
    ) -> Result<(), HandlerError>;
}

/// Collects what an event handler wants to happen next.
///
/// Follow-up commands are dispatched by the event dispatcher after the
/// handler returns successfully, carrying the originating trace so the
/// original caller's reply waits for the whole chain.
#[derive(Default)]
pub struct EventHandlingContext {
    follow_ups: Vec<Arc<dyn Command>>,
}

impl EventHandlingContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a command to dispatch after this handler completes.
    pub fn send(&mut self, command: Arc<dyn Command>) {
        self.follow_ups.push(command);
    }

    /// The queued follow-up commands, in send order.
    pub fn take_follow_ups(&mut self) -> Vec<Arc<dyn Command>> {
        std::mem::take(&mut self.follow_ups)
    }
}

/// Handles batches containing an exact set of event types.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// The distinct event types this handler consumes, between 1 and
    /// [`MAX_COMPOSITE_EVENTS`]. A batch matches when its own distinct
    /// type set equals this set exactly.
    fn handled_types(&self) -> Vec<TypeId>;

    /// Name of the handler, for logs and idempotency records.
    fn handler_name(&self) -> &'static str;

    /// Handles one batch's events, in batch order.
    async fn handle(
        &self,
        context: &mut EventHandlingContext,
        events: &[Arc<dyn DomainEvent>],
    ) -> Result<(), HandlerError>;
}

/// Handles one query type.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    /// The concrete query type this handler consumes.
    fn query_type(&self) -> TypeId;

    /// Name of the handled query.
    fn query_name(&self) -> &'static str;

    /// Name of the handler itself.
    fn handler_name(&self) -> &'static str;

    /// Fetches the query result as a JSON payload.
    async fn fetch(&self, query: &dyn Query) -> Result<serde_json::Value, HandlerError>;
}

/// Command handlers keyed by command type, one handler per type.
#[derive(Default)]
pub struct CommandHandlerRegistry {
    handlers: HashMap<TypeId, Arc<dyn CommandHandler>>,
}

impl CommandHandlerRegistry {
    /// Starts building a registry.
    pub fn builder() -> CommandHandlerRegistryBuilder {
        CommandHandlerRegistryBuilder {
            handlers: HashMap::new(),
        }
    }

    /// Resolves the handler for a command.
    pub fn resolve(&self, command: &dyn Command) -> Result<Arc<dyn CommandHandler>, ConfigError> {
        self.handlers
            .get(&command.as_any().type_id())
            .cloned()
            .ok_or_else(|| ConfigError::NoCommandHandler {
                command: command.command_name().to_string(),
            })
    }
}

/// Builder for [`CommandHandlerRegistry`].
pub struct CommandHandlerRegistryBuilder {
    handlers: HashMap<TypeId, Arc<dyn CommandHandler>>,
}

impl CommandHandlerRegistryBuilder {
    /// Registers a handler; a second handler for the same command type is
    /// a fatal configuration error.
    pub fn handler(mut self, handler: Arc<dyn CommandHandler>) -> Result<Self, ConfigError> {
        let key = handler.command_type();
        if self.handlers.contains_key(&key) {
            return Err(ConfigError::DuplicateCommandHandler {
                command: handler.command_name(),
            });
        }
        self.handlers.insert(key, handler);
        Ok(self)
    }

    /// Freezes the registry.
    pub fn build(self) -> CommandHandlerRegistry {
        CommandHandlerRegistry {
            handlers: self.handlers,
        }
    }
}

/// Event handlers keyed by the exact set of event types they consume.
#[derive(Default)]
pub struct EventHandlerRegistry {
    handlers: HashMap<BTreeSet<TypeId>, Arc<dyn EventHandler>>,
}

impl EventHandlerRegistry {
    /// Starts building a registry.
    pub fn builder() -> EventHandlerRegistryBuilder {
        EventHandlerRegistryBuilder {
            handlers: HashMap::new(),
        }
    }

    /// Resolves the handler whose declared type set equals the batch's
    /// distinct type set, if one is registered.
    pub fn resolve(&self, types: &BTreeSet<TypeId>) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(types).cloned()
    }

    /// True when no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Builder for [`EventHandlerRegistry`].
pub struct EventHandlerRegistryBuilder {
    handlers: HashMap<BTreeSet<TypeId>, Arc<dyn EventHandler>>,
}

impl EventHandlerRegistryBuilder {
    /// Registers a handler after validating its declared type set:
    /// non-empty, at most [`MAX_COMPOSITE_EVENTS`] types, no repeated
    /// type, and no other handler on the same set.
    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Result<Self, ConfigError> {
        let declared = handler.handled_types();
        if declared.is_empty() {
            return Err(ConfigError::EmptyEventTypeSet {
                handler: handler.handler_name(),
            });
        }
        if declared.len() > MAX_COMPOSITE_EVENTS {
            return Err(ConfigError::CompositeTooLarge {
                handler: handler.handler_name(),
                count: declared.len(),
                max: MAX_COMPOSITE_EVENTS,
            });
        }
        let key: BTreeSet<TypeId> = declared.iter().copied().collect();
        if key.len() < declared.len() {
            return Err(ConfigError::DuplicateTypeInSet {
                handler: handler.handler_name(),
            });
        }
        if self.handlers.contains_key(&key) {
            return Err(ConfigError::DuplicateEventHandlerSet {
                handler: handler.handler_name(),
            });
        }
        self.handlers.insert(key, handler);
        Ok(self)
    }

    /// Freezes the registry.
    pub fn build(self) -> EventHandlerRegistry {
        EventHandlerRegistry {
            handlers: self.handlers,
        }
    }
}

/// Query handlers keyed by query type, one handler per type.
#[derive(Default)]
pub struct QueryHandlerRegistry {
    handlers: HashMap<TypeId, Arc<dyn QueryHandler>>,
}

impl QueryHandlerRegistry {
    /// Starts building a registry.
    pub fn builder() -> QueryHandlerRegistryBuilder {
        QueryHandlerRegistryBuilder {
            handlers: HashMap::new(),
        }
    }

    /// Resolves the handler for a query.
    pub fn resolve(&self, query: &dyn Query) -> Result<Arc<dyn QueryHandler>, ConfigError> {
        self.handlers
            .get(&query.as_any().type_id())
            .cloned()
            .ok_or_else(|| ConfigError::NoQueryHandler {
                query: query.query_name().to_string(),
            })
    }
}

/// Builder for [`QueryHandlerRegistry`].
pub struct QueryHandlerRegistryBuilder {
    handlers: HashMap<TypeId, Arc<dyn QueryHandler>>,
}

impl QueryHandlerRegistryBuilder {
    /// Registers a handler; a second handler for the same query type is a
    /// fatal configuration error.
    pub fn handler(mut self, handler: Arc<dyn QueryHandler>) -> Result<Self, ConfigError> {
        let key = handler.query_type();
        if self.handlers.contains_key(&key) {
            return Err(ConfigError::DuplicateQueryHandler {
                query: handler.query_name(),
            });
        }
        self.handlers.insert(key, handler);
        Ok(self)
    }

    /// Freezes the registry.
    pub fn build(self) -> QueryHandlerRegistry {
        QueryHandlerRegistry {
            handlers: self.handlers,
        }
    }
}
