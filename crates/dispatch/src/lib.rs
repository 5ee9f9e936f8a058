//! Message dispatch pipeline for the CQRS messaging framework.
//!
//! Commands, queries, and event batches each flow through their own
//! channel-backed receiver drained by a dedicated worker. The command
//! dispatcher runs handlers inside a unit of work and turns committed
//! batches into storage and publication; the event dispatcher enforces
//! per-aggregate delivery order, runs composite handlers, and chains
//! follow-up commands; the correlation layer gives callers a synchronous
//! `execute` facade over the whole asynchronous pipeline.
//!
//! Everything is wired through [`CqrsRuntimeBuilder`]; registries are
//! explicit and validated at build time.

pub mod bus;
pub mod command_dispatcher;
pub mod config;
pub mod correlation;
pub mod error;
pub mod event_dispatcher;
pub mod faults;
pub mod handlers;
pub mod idempotency;
pub mod message;
pub mod query_dispatcher;
pub mod receiver;
pub mod retry;
pub mod runtime;

pub use bus::{ChannelCommandBus, CommandBus, EventBus, EventSubscriber};
pub use command_dispatcher::CommandDispatcher;
pub use config::RuntimeConfig;
pub use correlation::{CommandService, PendingReplies, QueryService, ReplyRouter, ReplySink};
pub use error::{ConfigError, DispatchError, HandlerError};
pub use event_dispatcher::EventDispatcher;
pub use faults::{BusinessFault, ExceptionChannel};
pub use handlers::{
    CommandHandler, CommandHandlerRegistry, EventHandler, EventHandlerRegistry,
    EventHandlingContext, MAX_COMPOSITE_EVENTS, QueryHandler, QueryHandlerRegistry,
};
pub use idempotency::{HandlerRecord, HandlerRecordStore};
pub use message::{Command, Query, expect_command, expect_query};
pub use query_dispatcher::QueryDispatcher;
pub use receiver::{ChannelReceiver, EnvelopeProcessor, WorkerLoop};
pub use retry::RetryInvoker;
pub use runtime::{CqrsRuntime, CqrsRuntimeBuilder};
