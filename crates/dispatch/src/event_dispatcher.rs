//! The event dispatcher.
//!
//! Drains the batch queue and enforces per-aggregate delivery order
//! against the publication tracker: a batch one past the tracked version
//! is processed, a later batch is requeued until its predecessor lands,
//! and an earlier batch is a duplicate and dropped. Processing a batch
//! means running the composite handler matching its exact event type set,
//! fanning the events out to subscribers, advancing the tracker, and
//! either dispatching the handler's follow-up commands or replying to the
//! caller that started the chain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Envelope, ExecutionResult, TraceInfo};
use event_store::{EventBatch, PublishedVersionStore};

use crate::bus::{CommandBus, EventBus};
use crate::correlation::ReplyRouter;
use crate::error::HandlerError;
use crate::faults::{BusinessFault, ExceptionChannel};
use crate::handlers::{EventHandlerRegistry, EventHandlingContext};
use crate::idempotency::HandlerRecordStore;
use crate::receiver::{ChannelReceiver, EnvelopeProcessor};
use crate::retry::RetryInvoker;

/// Backoff before requeueing a batch whose predecessor has not arrived.
const REQUEUE_DELAY: Duration = Duration::from_millis(10);

pub struct EventDispatcher {
    handlers: Arc<EventHandlerRegistry>,
    tracker: Arc<dyn PublishedVersionStore>,
    records: Arc<HandlerRecordStore>,
    event_bus: Arc<EventBus>,
    command_bus: Arc<dyn CommandBus>,
    reply_router: Arc<ReplyRouter>,
    retry: RetryInvoker,
    // The dispatcher's own input queue, used to put early batches back.
    queue: Arc<ChannelReceiver<EventBatch>>,
    faults: ExceptionChannel,
}

impl EventDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handlers: Arc<EventHandlerRegistry>,
        tracker: Arc<dyn PublishedVersionStore>,
        records: Arc<HandlerRecordStore>,
        event_bus: Arc<EventBus>,
        command_bus: Arc<dyn CommandBus>,
        reply_router: Arc<ReplyRouter>,
        retry: RetryInvoker,
        queue: Arc<ChannelReceiver<EventBatch>>,
        faults: ExceptionChannel,
    ) -> Self {
        Self {
            handlers,
            tracker,
            records,
            event_bus,
            command_bus,
            reply_router,
            retry,
            queue,
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

    /// Runs the composite handler, once, with idempotency records
    /// consulted and written. Returns the follow-up commands on success.
    async fn run_handler(
        &self,
        envelope: &Envelope<EventBatch>,
        handler: &Arc<dyn crate::handlers::EventHandler>,
    ) -> Result<Vec<Arc<dyn crate::message::Command>>, HandlerError> {
        if self.records.seen(envelope.message_id, handler.handler_name()) {
            tracing::debug!(
                handler = handler.handler_name(),
                message_id = %envelope.message_id,
                "batch already handled, skipping"
            );
            return Ok(Vec::new());
        }
        let batch = &envelope.body;
        let follow_ups = self
            .retry
            .invoke(handler.handler_name(), || {
                let handler = Arc::clone(handler);
                let events = batch.events.clone();
                async move {
                    let mut context = EventHandlingContext::new();
                    handler.handle(&mut context, &events).await?;
                    Ok(context.take_follow_ups())
                }
            })
            .await?;
        self.records
            .record(envelope.message_id, "EventBatch", handler.handler_name());
        Ok(follow_ups)
    }
}

#[async_trait]
impl EnvelopeProcessor<EventBatch> for EventDispatcher {
    #[tracing::instrument(skip_all, fields(identity = %envelope.body.identity, version = %envelope.body.version))]
    async fn process(&self, envelope: Envelope<EventBatch>) {
        let trace = envelope.trace();
        let correlation = trace
            .as_ref()
            .map(|trace| trace.trace_id)
            .unwrap_or_default();
        let identity = envelope.body.identity.clone();
        let version = envelope.body.version;

        let expected = self.tracker.published_version(&identity).await.next();
        if version > expected {
            tracing::debug!(expected = %expected, "batch ahead of tracker, requeueing");
            metrics::counter!("event_batches_requeued_total").increment(1);
            tokio::time::sleep(REQUEUE_DELAY).await;
            if self.queue.enqueue(envelope).is_err() {
                tracing::error!("batch queue closed, requeued batch lost");
            }
            return;
        }
        if version < expected {
            tracing::debug!(expected = %expected, "stale batch, dropping");
            metrics::counter!("event_batches_dropped_total").increment(1);
            return;
        }

        let types = envelope.body.distinct_event_types();
        let handler = self.handlers.resolve(&types);
        let outcome = match &handler {
            Some(handler) => self.run_handler(&envelope, handler).await,
            // A deployment with no composite handlers at all just streams
            // events to subscribers. A miss against a populated registry
            // is a wiring defect for this batch's type set.
            None if self.handlers.is_empty() => Ok(Vec::new()),
            None => {
                tracing::error!(
                    types = ?envelope.body.event_type_names(),
                    "no event handler matches this batch's type set"
                );
                Err(HandlerError::business(
                    "SYS_CONFIG",
                    "no event handler matches the batch's event type set",
                ))
            }
        };

        // The batch is consumed either way; a terminal handler failure is
        // surfaced through the reply and fault channel, never by wedging
        // the aggregate's stream.
        self.event_bus.publish_all(&envelope.body.events).await;
        self.tracker.advance(&identity, version).await;
        metrics::counter!("event_batches_processed_total").increment(1);

        match outcome {
            Ok(follow_ups) if follow_ups.is_empty() => {
                self.reply(&trace, ExecutionResult::nothing(correlation)).await;
            }
            Ok(follow_ups) => {
                // The reply now belongs to the end of the chain.
                for command in follow_ups {
                    let sent = match &trace {
                        Some(trace) => {
                            self.command_bus
                                .send_traced(command, trace.clone())
                                .await
                        }
                        None => self.command_bus.send(command).await,
                    };
                    if let Err(err) = sent {
                        tracing::error!(error = %err, "follow-up command dispatch failed");
                        self.reply(
                            &trace,
                            ExecutionResult::failed(
                                correlation,
                                "SYS_UNAVAILABLE",
                                "follow-up command dispatch failed",
                            ),
                        )
                        .await;
                        return;
                    }
                }
            }
            Err(HandlerError::Business { code, message }) => {
                let source = handler
                    .as_ref()
                    .map(|handler| handler.handler_name())
                    .unwrap_or("EventDispatcher");
                self.faults.forward(BusinessFault::new(
                    source,
                    code.clone(),
                    message.clone(),
                    trace.as_ref().map(|trace| trace.trace_id),
                ));
                self.reply(&trace, ExecutionResult::failed(correlation, code, message))
                    .await;
            }
            Err(HandlerError::Transient { message }) => {
                metrics::counter!("event_batches_failed_total").increment(1);
                self.reply(
                    &trace,
                    ExecutionResult::failed(correlation, "SYS_UNEXPECTED", message),
                )
                .await;
            }
        }
    }
}
