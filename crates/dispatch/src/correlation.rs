//! Correlation between asynchronous dispatch and synchronous callers.
//!
//! A caller executing a command or query registers a pending completion
//! under a correlation id, the message travels through the pipeline with
//! that id in its trace, and whichever dispatcher finishes the work routes
//! an [`ExecutionResult`] back to the caller's reply sink. The caller
//! meanwhile awaits the completion under a deadline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{CorrelationId, ExecutionResult, TraceInfo};
use tokio::sync::{RwLock, oneshot};

use crate::bus::CommandBus;
use crate::message::{Command, Query};
use crate::receiver::ChannelReceiver;

/// Completions awaiting replies, capped to bound in-flight work.
pub struct PendingReplies {
    max_in_flight: usize,
    pending: Mutex<HashMap<CorrelationId, oneshot::Sender<ExecutionResult>>>,
}

impl PendingReplies {
    /// Creates a table admitting at most `max_in_flight` waiters.
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a completion. Returns None when the cap is reached, in
    /// which case nothing was registered and the caller reports Busy.
    pub fn register(&self, id: CorrelationId) -> Option<oneshot::Receiver<ExecutionResult>> {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if pending.len() >= self.max_in_flight {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        Some(rx)
    }

    /// Fulfills the completion registered under the result's correlation
    /// id. A result with no waiter (late reply after a timeout) is a
    /// no-op; the first reply wins.
    pub fn complete(&self, result: ExecutionResult) -> bool {
        let sender = {
            let mut pending = match self.pending.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            pending.remove(&result.correlation_id)
        };
        match sender {
            Some(tx) => tx.send(result).is_ok(),
            None => {
                tracing::debug!(
                    correlation_id = %result.correlation_id,
                    status = %result.status,
                    "no pending completion for reply, dropping"
                );
                false
            }
        }
    }

    /// Withdraws a completion whose caller stopped waiting.
    pub fn remove(&self, id: CorrelationId) {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.remove(&id);
    }

    /// Number of callers currently waiting.
    pub fn in_flight(&self) -> usize {
        let pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.len()
    }
}

/// Terminal point a reply is delivered to.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Delivers one result. Delivery is at-most-once per correlation id.
    async fn deliver(&self, result: ExecutionResult);
}

#[async_trait]
impl ReplySink for PendingReplies {
    async fn deliver(&self, result: ExecutionResult) {
        self.complete(result);
    }
}

/// Routes replies to sinks by the logical address carried in the trace.
#[derive(Default)]
pub struct ReplyRouter {
    sinks: RwLock<HashMap<String, Arc<dyn ReplySink>>>,
}

impl ReplyRouter {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink under an address, replacing any previous one.
    pub async fn register(&self, address: impl Into<String>, sink: Arc<dyn ReplySink>) {
        self.sinks.write().await.insert(address.into(), sink);
    }

    /// Delivers a result to the sink at the address. An unknown address
    /// is logged and dropped; replies are best-effort by design of the
    /// caller-side deadline.
    pub async fn send_reply(&self, address: &str, result: ExecutionResult) {
        let sink = { self.sinks.read().await.get(address).cloned() };
        match sink {
            Some(sink) => sink.deliver(result).await,
            None => {
                tracing::warn!(
                    address,
                    correlation_id = %result.correlation_id,
                    "no reply sink registered at address"
                );
            }
        }
    }
}

/// Synchronous facade over asynchronous command dispatch.
pub struct CommandService {
    bus: Arc<dyn CommandBus>,
    pending: Arc<PendingReplies>,
    reply_address: String,
    default_timeout: Duration,
}

impl CommandService {
    /// Creates a service replying through the given pending table, which
    /// must be registered in the router under `reply_address`.
    pub fn new(
        bus: Arc<dyn CommandBus>,
        pending: Arc<PendingReplies>,
        reply_address: impl Into<String>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            bus,
            pending,
            reply_address: reply_address.into(),
            default_timeout,
        }
    }

    /// Executes a command under the default deadline.
    pub async fn execute(&self, command: Arc<dyn Command>) -> ExecutionResult {
        self.execute_within(command, self.default_timeout).await
    }

    /// Executes a command, waiting at most `timeout` for the final reply
    /// of the command's whole processing chain.
    ///
    /// The correlation id is the command's own id. Returns Busy without
    /// dispatching when the in-flight cap is reached, and Timeout when the
    /// deadline passes first; the command may still complete after a
    /// timeout, its reply is then dropped.
    pub async fn execute_within(
        &self,
        command: Arc<dyn Command>,
        timeout: Duration,
    ) -> ExecutionResult {
        let correlation = CorrelationId::from_uuid(command.command_id().as_uuid());
        let Some(rx) = self.pending.register(correlation) else {
            metrics::counter!("commands_rejected_busy_total").increment(1);
            return ExecutionResult::busy(correlation);
        };
        let trace = TraceInfo::new(correlation, self.reply_address.clone());
        if self.bus.send_traced(command, trace).await.is_err() {
            self.pending.remove(correlation);
            return ExecutionResult::failed(
                correlation,
                "SYS_UNAVAILABLE",
                "command channel is closed",
            );
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                ExecutionResult::failed(correlation, "SYS_UNEXPECTED", "reply channel dropped")
            }
            Err(_) => {
                self.pending.remove(correlation);
                metrics::counter!("commands_timed_out_total").increment(1);
                ExecutionResult::timeout(correlation)
            }
        }
    }
}

/// Synchronous facade over asynchronous query dispatch.
pub struct QueryService {
    queue: Arc<ChannelReceiver<Arc<dyn Query>>>,
    pending: Arc<PendingReplies>,
    reply_address: String,
    default_timeout: Duration,
}

impl QueryService {
    /// Creates a service feeding the query dispatcher's receiver.
    pub fn new(
        queue: Arc<ChannelReceiver<Arc<dyn Query>>>,
        pending: Arc<PendingReplies>,
        reply_address: impl Into<String>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            pending,
            reply_address: reply_address.into(),
            default_timeout,
        }
    }

    /// Executes a query under the default deadline.
    pub async fn fetch(&self, query: Arc<dyn Query>) -> ExecutionResult {
        self.fetch_within(query, self.default_timeout).await
    }

    /// Executes a query under an explicit deadline.
    pub async fn fetch_within(&self, query: Arc<dyn Query>, timeout: Duration) -> ExecutionResult {
        let correlation = CorrelationId::new();
        let Some(rx) = self.pending.register(correlation) else {
            metrics::counter!("queries_rejected_busy_total").increment(1);
            return ExecutionResult::busy(correlation);
        };
        let trace = TraceInfo::new(correlation, self.reply_address.clone());
        let envelope = common::Envelope::new(query).with_trace(&trace);
        if self.queue.enqueue(envelope).is_err() {
            self.pending.remove(correlation);
            return ExecutionResult::failed(
                correlation,
                "SYS_UNAVAILABLE",
                "query channel is closed",
            );
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                ExecutionResult::failed(correlation, "SYS_UNEXPECTED", "reply channel dropped")
            }
            Err(_) => {
                self.pending.remove(correlation);
                metrics::counter!("queries_timed_out_total").increment(1);
                ExecutionResult::timeout(correlation)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ExecutionStatus;

    #[test]
    fn cap_rejects_excess_registrations() {
        let pending = PendingReplies::new(2);
        let _a = pending.register(CorrelationId::new()).unwrap();
        let _b = pending.register(CorrelationId::new()).unwrap();
        assert!(pending.register(CorrelationId::new()).is_none());
        assert_eq!(pending.in_flight(), 2);
    }

    #[tokio::test]
    async fn completion_is_delivered_exactly_once() {
        let pending = PendingReplies::new(10);
        let id = CorrelationId::new();
        let rx = pending.register(id).unwrap();

        assert!(pending.complete(ExecutionResult::success(id)));
        assert!(!pending.complete(ExecutionResult::success(id)));

        let result = rx.await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn removed_completion_ignores_late_replies() {
        let pending = PendingReplies::new(10);
        let id = CorrelationId::new();
        let _rx = pending.register(id).unwrap();
        pending.remove(id);
        assert!(!pending.complete(ExecutionResult::success(id)));
        assert_eq!(pending.in_flight(), 0);
    }

    #[tokio::test]
    async fn router_drops_replies_for_unknown_addresses() {
        let router = ReplyRouter::new();
        // Nothing registered; must not panic or block.
        router
            .send_reply("svc://nowhere", ExecutionResult::nothing(CorrelationId::new()))
            .await;
    }

    #[tokio::test]
    async fn router_routes_to_registered_sink() {
        let router = ReplyRouter::new();
        let pending = Arc::new(PendingReplies::new(10));
        router.register("svc://replies", pending.clone()).await;

        let id = CorrelationId::new();
        let rx = pending.register(id).unwrap();
        router
            .send_reply("svc://replies", ExecutionResult::nothing(id))
            .await;
        assert_eq!(rx.await.unwrap().status, ExecutionStatus::Nothing);
    }
}
