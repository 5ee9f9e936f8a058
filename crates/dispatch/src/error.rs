//! Error taxonomy of the dispatch pipeline.
//!
//! Handler failures are split into exactly two kinds so dispatchers never
//! have to guess from a message string: business errors are final and go
//! straight back to the caller, transient errors are retried.

use thiserror::Error;

/// A failure reported by a command, query, or event handler.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// A domain rule rejected the message. Never retried.
    #[error("business rule violation {code}: {message}")]
    Business { code: String, message: String },

    /// An infrastructure fault that may pass on a later attempt.
    #[error("transient failure: {message}")]
    Transient { message: String },
}

impl HandlerError {
    /// A business rule rejection with a stable error code.
    pub fn business(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Business {
            code: code.into(),
            message: message.into(),
        }
    }

    /// A retryable infrastructure failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// True for business rejections.
    pub fn is_business(&self) -> bool {
        matches!(self, Self::Business { .. })
    }
}

/// A registration mistake detected while wiring the runtime.
///
/// Configuration errors are fatal at startup; the dispatchers assume a
/// consistent registry and treat a miss at runtime as a configuration
/// fault, not a message failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no command handler registered for {command}")]
    NoCommandHandler { command: String },

    #[error("duplicate command handler for {command}")]
    DuplicateCommandHandler { command: &'static str },

    #[error("no event handler registered for type set {type_names:?}")]
    NoEventHandler { type_names: Vec<&'static str> },

    #[error("duplicate event handler for the same event type set ({handler})")]
    DuplicateEventHandlerSet { handler: &'static str },

    #[error("event handler {handler} declares an empty event type set")]
    EmptyEventTypeSet { handler: &'static str },

    #[error("event handler {handler} declares {count} event types, maximum is {max}")]
    CompositeTooLarge {
        handler: &'static str,
        count: usize,
        max: usize,
    },

    #[error("event handler {handler} declares the same event type twice")]
    DuplicateTypeInSet { handler: &'static str },

    #[error("no query handler registered for {query}")]
    NoQueryHandler { query: String },

    #[error("duplicate query handler for {query}")]
    DuplicateQueryHandler { query: &'static str },
}

/// Failures crossing the dispatch transport itself.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The receiving side of a channel is gone; the runtime is stopping.
    #[error("dispatch channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}
