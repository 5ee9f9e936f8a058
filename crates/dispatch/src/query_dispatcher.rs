//! The query dispatcher.
//!
//! The read path is simpler than the write path: resolve the handler,
//! fetch under retry, and reply with the payload. Queries never touch the
//! event store or the tracker.

use std::sync::Arc;

use async_trait::async_trait;
use common::{Envelope, ExecutionResult, TraceInfo};

use crate::correlation::ReplyRouter;
use crate::error::HandlerError;
use crate::handlers::QueryHandlerRegistry;
use crate::message::Query;
use crate::receiver::EnvelopeProcessor;
use crate::retry::RetryInvoker;

pub struct QueryDispatcher {
    handlers: Arc<QueryHandlerRegistry>,
    reply_router: Arc<ReplyRouter>,
    retry: RetryInvoker,
}

impl QueryDispatcher {
    pub fn new(
        handlers: Arc<QueryHandlerRegistry>,
        reply_router: Arc<ReplyRouter>,
        retry: RetryInvoker,
    ) -> Self {
        Self {
            handlers,
            reply_router,
            retry,
        }
    }

    async fn reply(&self, trace: &Option<TraceInfo>, result: ExecutionResult) {
        if let Some(trace) = trace {
            self.reply_router
                .send_reply(&trace.reply_address, result)
                .await;
        }
    }
}

#[async_trait]
impl EnvelopeProcessor<Arc<dyn Query>> for QueryDispatcher {
    #[tracing::instrument(skip_all, fields(query = envelope.body.query_name()))]
    async fn process(&self, envelope: Envelope<Arc<dyn Query>>) {
        let trace = envelope.trace();
        let query = envelope.body;
        let correlation = trace
            .as_ref()
            .map(|trace| trace.trace_id)
            .unwrap_or_default();

        let handler = match self.handlers.resolve(query.as_ref()) {
            Ok(handler) => handler,
            Err(err) => {
                tracing::error!(error = %err, "query handler resolution failed");
                self.reply(
                    &trace,
                    ExecutionResult::failed(correlation, "SYS_CONFIG", err.to_string()),
                )
                .await;
                return;
            }
        };

        metrics::counter!("queries_dispatched_total").increment(1);
        let outcome = self
            .retry
            .invoke(handler.handler_name(), || {
                let handler = Arc::clone(&handler);
                let query = Arc::clone(&query);
                async move { handler.fetch(query.as_ref()).await }
            })
            .await;

        match outcome {
            Ok(data) => {
                self.reply(
                    &trace,
                    ExecutionResult::success(correlation).with_data(data),
                )
                .await;
            }
            Err(HandlerError::Business { code, message }) => {
                self.reply(&trace, ExecutionResult::failed(correlation, code, message))
                    .await;
            }
            Err(HandlerError::Transient { message }) => {
                metrics::counter!("queries_failed_total").increment(1);
                self.reply(
                    &trace,
                    ExecutionResult::failed(correlation, "SYS_UNEXPECTED", message),
                )
                .await;
            }
        }
    }
}
