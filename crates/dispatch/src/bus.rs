//! Command and event buses.
//!
//! The command bus is the write entry point: it enqueues commands for the
//! command dispatcher's worker. The event bus has two faces: it enqueues
//! whole batches for the event dispatcher, and it fans individual events
//! out to type-keyed subscribers (projections, read models).

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{DomainEvent, Envelope, TraceInfo};
use event_store::EventBatch;
use tokio::sync::RwLock;

use crate::error::{DispatchError, HandlerError};
use crate::message::Command;
use crate::receiver::ChannelReceiver;
use crate::retry::RetryInvoker;

/// Accepts commands for asynchronous dispatch.
#[async_trait]
pub trait CommandBus: Send + Sync {
    /// Enqueues a command with no reply correlation.
    async fn send(&self, command: Arc<dyn Command>) -> Result<(), DispatchError>;

    /// Enqueues a command carrying the trace of the caller awaiting the
    /// final reply of the chain.
    async fn send_traced(
        &self,
        command: Arc<dyn Command>,
        trace: TraceInfo,
    ) -> Result<(), DispatchError>;
}

/// Command bus backed by the command dispatcher's channel receiver.
pub struct ChannelCommandBus {
    receiver: Arc<ChannelReceiver<Arc<dyn Command>>>,
}

impl ChannelCommandBus {
    /// Creates a bus feeding the given receiver.
    pub fn new(receiver: Arc<ChannelReceiver<Arc<dyn Command>>>) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl CommandBus for ChannelCommandBus {
    async fn send(&self, command: Arc<dyn Command>) -> Result<(), DispatchError> {
        self.receiver.enqueue(Envelope::new(command))
    }

    async fn send_traced(
        &self,
        command: Arc<dyn Command>,
        trace: TraceInfo,
    ) -> Result<(), DispatchError> {
        self.receiver.enqueue(Envelope::new(command).with_trace(&trace))
    }
}

/// Receives individual events published on the event bus.
///
/// Subscribers are the read side: a failing subscriber is retried and then
/// logged, but never fails the publication or blocks batch progress.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// The concrete event type this subscriber wants.
    fn subscribed_type(&self) -> TypeId;

    /// Name of the subscriber, for logs.
    fn subscriber_name(&self) -> &'static str;

    /// Handles one event.
    async fn on_event(&self, event: &Arc<dyn DomainEvent>) -> Result<(), HandlerError>;
}

/// Publishes batches to the event dispatcher and events to subscribers.
pub struct EventBus {
    batch_queue: Arc<ChannelReceiver<EventBatch>>,
    subscribers: RwLock<HashMap<TypeId, Vec<Arc<dyn EventSubscriber>>>>,
    retry: RetryInvoker,
}

impl EventBus {
    /// Creates a bus feeding the given batch receiver.
    pub fn new(batch_queue: Arc<ChannelReceiver<EventBatch>>, retry: RetryInvoker) -> Self {
        Self {
            batch_queue,
            subscribers: RwLock::new(HashMap::new()),
            retry,
        }
    }

    /// Registers a subscriber for its declared event type.
    pub async fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(subscriber.subscribed_type())
            .or_default()
            .push(subscriber);
    }

    /// Enqueues a batch for the event dispatcher, carrying the caller's
    /// trace when there is one.
    pub fn publish_batch(
        &self,
        batch: EventBatch,
        trace: Option<TraceInfo>,
    ) -> Result<(), DispatchError> {
        let mut envelope = Envelope::new(batch);
        if let Some(trace) = trace {
            envelope = envelope.with_trace(&trace);
        }
        self.batch_queue.enqueue(envelope)
    }

    /// Fans one event out to its subscribers.
    pub async fn publish(&self, event: &Arc<dyn DomainEvent>) {
        let interested: Vec<Arc<dyn EventSubscriber>> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .get(&event.as_any().type_id())
                .cloned()
                .unwrap_or_default()
        };
        for subscriber in interested {
            let outcome = self
                .retry
                .invoke(subscriber.subscriber_name(), || {
                    let subscriber = Arc::clone(&subscriber);
                    let event = Arc::clone(event);
                    async move { subscriber.on_event(&event).await }
                })
                .await;
            match outcome {
                Ok(()) => {
                    metrics::counter!("events_published_total").increment(1);
                }
                Err(err) => {
                    tracing::error!(
                        subscriber = subscriber.subscriber_name(),
                        event = event.event_name(),
                        error = %err,
                        "subscriber failed, event dropped for this subscriber"
                    );
                }
            }
        }
    }

    /// Fans a slice of events out, in order.
    pub async fn publish_all(&self, events: &[Arc<dyn DomainEvent>]) {
        for event in events {
            self.publish(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use common::{AggregateIdentity, EventId};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct Shipped {
        id: EventId,
        at: DateTime<Utc>,
        source: AggregateIdentity,
    }

    impl Shipped {
        fn new() -> Arc<dyn DomainEvent> {
            Arc::new(Self {
                id: EventId::new(),
                at: Utc::now(),
                source: AggregateIdentity::local("Order", "1"),
            })
        }
    }

    impl DomainEvent for Shipped {
        fn event_id(&self) -> EventId {
            self.id
        }
        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
        fn source(&self) -> &AggregateIdentity {
            &self.source
        }
        fn event_name(&self) -> &'static str {
            "Shipped"
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    struct CountingSubscriber {
        seen: AtomicU32,
        fail_first: AtomicU32,
    }

    #[async_trait]
    impl EventSubscriber for CountingSubscriber {
        fn subscribed_type(&self) -> TypeId {
            TypeId::of::<Shipped>()
        }
        fn subscriber_name(&self) -> &'static str {
            "CountingSubscriber"
        }
        async fn on_event(&self, _event: &Arc<dyn DomainEvent>) -> Result<(), HandlerError> {
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(HandlerError::transient("projection store unavailable"));
            }
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn bus() -> EventBus {
        EventBus::new(
            Arc::new(ChannelReceiver::new()),
            RetryInvoker::new(3, Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn events_reach_type_matched_subscribers() {
        let bus = bus();
        let subscriber = Arc::new(CountingSubscriber {
            seen: AtomicU32::new(0),
            fail_first: AtomicU32::new(0),
        });
        bus.subscribe(subscriber.clone()).await;

        bus.publish(&Shipped::new()).await;
        bus.publish(&Shipped::new()).await;
        assert_eq!(subscriber.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transient_subscriber_failures_are_retried() {
        let bus = bus();
        let subscriber = Arc::new(CountingSubscriber {
            seen: AtomicU32::new(0),
            fail_first: AtomicU32::new(2),
        });
        bus.subscribe(subscriber.clone()).await;

        bus.publish(&Shipped::new()).await;
        assert_eq!(subscriber.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn published_batches_land_on_the_queue() {
        let queue = Arc::new(ChannelReceiver::new());
        let bus = EventBus::new(
            Arc::clone(&queue),
            RetryInvoker::new(1, Duration::from_millis(1)),
        );
        let identity = AggregateIdentity::local("Order", "1");
        let batch = EventBatch::new(
            identity,
            event_store::Version::first(),
            common::CommandId::new(),
            vec![Shipped::new()],
        )
        .unwrap();

        bus.publish_batch(batch, None).unwrap();
        let mut rx = queue.take_rx().unwrap();
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.body.version, event_store::Version::first());
    }
}
