//! The command dispatcher.
//!
//! Drains the command queue, resolves the handler, and runs it inside a
//! fresh unit of work per attempt. On commit the produced batches are
//! saved and published; replies follow the outcome: immediate for
//! no-effect and non-domain commands, deferred to the event dispatcher
//! when a batch was published, failed on business rejection or exhausted
//! retries.

use std::sync::Arc;

use async_trait::async_trait;
use common::{Envelope, ExecutionResult, TraceInfo};
use domain::{CommandContext, ContextResources, DomainError};
use event_store::EventStoreError;

use crate::bus::EventBus;
use crate::correlation::ReplyRouter;
use crate::error::HandlerError;
use crate::faults::{BusinessFault, ExceptionChannel};
use crate::handlers::CommandHandlerRegistry;
use crate::message::Command;
use crate::receiver::EnvelopeProcessor;
use crate::retry::RetryInvoker;

/// Converts a commit-path failure into a retry decision.
///
/// A version gap means another writer got there first; a fresh attempt
/// reloads the aggregate at the new version and usually succeeds. Storage
/// faults are likewise worth retrying. Everything else is a wiring or
/// serialization defect that retrying cannot fix.
fn commit_error(err: DomainError) -> HandlerError {
    match err {
        DomainError::EventStore(EventStoreError::VersionGap { .. })
        | DomainError::EventStore(EventStoreError::Storage(_)) => {
            HandlerError::transient(err.to_string())
        }
        other => HandlerError::business("SYS_UNEXPECTED", other.to_string()),
    }
}

pub struct CommandDispatcher {
    handlers: Arc<CommandHandlerRegistry>,
    resources: ContextResources,
    event_bus: Arc<EventBus>,
    reply_router: Arc<ReplyRouter>,
    retry: RetryInvoker,
    faults: ExceptionChannel,
}

impl CommandDispatcher {
    pub fn new(
        handlers: Arc<CommandHandlerRegistry>,
        resources: ContextResources,
        event_bus: Arc<EventBus>,
        reply_router: Arc<ReplyRouter>,
        retry: RetryInvoker,
        faults: ExceptionChannel,
    ) -> Self {
        Self {
            handlers,
            resources,
            event_bus,
            reply_router,
            retry,
            faults,
        }
    }

    async fn reply(&self, trace: &Option<TraceInfo>, result: ExecutionResult) {
        if let Some(trace) = trace {
            self.reply_router
                .send_reply(&trace.reply_address, result)
                .await;
        }
    }

    /// One handling attempt: fresh context, handle, commit, save, publish.
    /// Returns whether any batch was handed to the event dispatcher.
    async fn attempt(
        &self,
        handler: &Arc<dyn crate::handlers::CommandHandler>,
        command: &Arc<dyn Command>,
        trace: &Option<TraceInfo>,
    ) -> Result<bool, HandlerError> {
        let mut context = CommandContext::new(self.resources.clone());
        handler.handle(&mut context, command.as_ref()).await?;
        let commit = context.commit(command.command_id()).map_err(commit_error)?;

        let mut published = false;
        for batch in commit.batches {
            let saved = self
                .resources
                .store
                .save(&batch)
                .await
                .map_err(|err| HandlerError::transient(err.to_string()))?;
            if saved {
                metrics::counter!("event_batches_saved_total").increment(1);
                self.event_bus
                    .publish_batch(batch, trace.clone())
                    .map_err(|err| HandlerError::transient(err.to_string()))?;
                published = true;
            } else {
                // Duplicate command delivery. The batch from the first
                // delivery is authoritative; republish it so a reply that
                // got lost the first time can still be produced. The
                // publication tracker drops it if it already went through.
                tracing::debug!(
                    identity = %batch.identity,
                    correlation_id = %batch.correlation_id,
                    "duplicate batch save, republishing the stored batch"
                );
                let stored = self
                    .resources
                    .store
                    .find(&batch.identity, batch.correlation_id)
                    .await
                    .map_err(|err| HandlerError::transient(err.to_string()))?;
                match stored {
                    Some(stored) => {
                        self.event_bus
                            .publish_batch(stored, trace.clone())
                            .map_err(|err| HandlerError::transient(err.to_string()))?;
                        published = true;
                    }
                    None => {
                        tracing::warn!(
                            identity = %batch.identity,
                            correlation_id = %batch.correlation_id,
                            "duplicate save but stored batch not found"
                        );
                    }
                }
            }
        }

        for snapshot in commit.snapshots {
            if let Err(err) = self.resources.snapshots.save(snapshot).await {
                // Snapshots only shorten replay; losing one is harmless.
                tracing::warn!(error = %err, "snapshot save failed");
            }
        }

        self.event_bus.publish_all(&commit.published).await;
        Ok(published)
    }
}

#[async_trait]
impl EnvelopeProcessor<Arc<dyn Command>> for CommandDispatcher {
    #[tracing::instrument(skip_all, fields(command = envelope.body.command_name(), command_id = %envelope.body.command_id()))]
    async fn process(&self, envelope: Envelope<Arc<dyn Command>>) {
        let trace = envelope.trace();
        let command = envelope.body;
        let correlation = trace
            .as_ref()
            .map(|trace| trace.trace_id)
            .unwrap_or_default();

        let handler = match self.handlers.resolve(command.as_ref()) {
            Ok(handler) => handler,
            Err(err) => {
                tracing::error!(error = %err, "command handler resolution failed");
                self.reply(
                    &trace,
                    ExecutionResult::failed(correlation, "SYS_CONFIG", err.to_string()),
                )
                .await;
                return;
            }
        };

        metrics::counter!("commands_dispatched_total").increment(1);
        let started = std::time::Instant::now();
        let outcome = self
            .retry
            .invoke(handler.handler_name(), || {
                let handler = Arc::clone(&handler);
                let command = Arc::clone(&command);
                let trace = trace.clone();
                async move { self.attempt(&handler, &command, &trace).await }
            })
            .await;
        metrics::histogram!("command_execution_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(published) => {
                if !handler.is_domain_handler() {
                    // Side effects the pipeline does not track; done is done.
                    self.reply(&trace, ExecutionResult::success(correlation)).await;
                } else if !published {
                    self.reply(&trace, ExecutionResult::nothing(correlation)).await;
                }
                // Otherwise the event dispatcher replies once the batch
                // (and any follow-up chain) has been processed.
            }
            Err(HandlerError::Business { code, message }) => {
                self.faults.forward(BusinessFault::new(
                    handler.handler_name(),
                    code.clone(),
                    message.clone(),
                    trace.as_ref().map(|trace| trace.trace_id),
                ));
                self.reply(&trace, ExecutionResult::failed(correlation, code, message))
                    .await;
            }
            Err(HandlerError::Transient { message }) => {
                metrics::counter!("commands_failed_total").increment(1);
                self.reply(
                    &trace,
                    ExecutionResult::failed(correlation, "SYS_UNEXPECTED", message),
                )
                .await;
            }
        }
    }
}
