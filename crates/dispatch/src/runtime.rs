//! Runtime assembly.
//!
//! [`CqrsRuntimeBuilder`] collects registries, stores, and subscribers,
//! then wires the queues, dispatchers, and correlation layer into a
//! [`CqrsRuntime`]. All dependencies are injected here; nothing in the
//! pipeline reaches for a global.

use std::sync::Arc;

use domain::{ApplierRegistry, ContextResources, RepositoryRegistry};
use event_store::{
    EventStore, InMemoryEventStore, InMemoryPublishedVersionStore, InMemorySnapshotStore,
    PublishedVersionStore, SnapshotPolicy, SnapshotStore, VersionIntervalPolicy,
};
use event_store::EventBatch;

use crate::bus::{ChannelCommandBus, EventBus, EventSubscriber};
use crate::command_dispatcher::CommandDispatcher;
use crate::config::RuntimeConfig;
use crate::correlation::{CommandService, PendingReplies, QueryService, ReplyRouter};
use crate::event_dispatcher::EventDispatcher;
use crate::faults::ExceptionChannel;
use crate::handlers::{CommandHandlerRegistry, EventHandlerRegistry, QueryHandlerRegistry};
use crate::idempotency::HandlerRecordStore;
use crate::message::{Command, Query};
use crate::query_dispatcher::QueryDispatcher;
use crate::receiver::{ChannelReceiver, WorkerLoop};
use crate::retry::RetryInvoker;

/// Logical address the runtime's own reply sink is registered under.
const LOCAL_REPLY_ADDRESS: &str = "local://replies";

/// Builder for [`CqrsRuntime`].
pub struct CqrsRuntimeBuilder {
    config: RuntimeConfig,
    command_handlers: CommandHandlerRegistry,
    event_handlers: EventHandlerRegistry,
    query_handlers: QueryHandlerRegistry,
    appliers: ApplierRegistry,
    repositories: RepositoryRegistry,
    subscribers: Vec<Arc<dyn EventSubscriber>>,
    store: Arc<dyn EventStore>,
    tracker: Arc<dyn PublishedVersionStore>,
    snapshots: Arc<dyn SnapshotStore>,
    snapshot_policy: Arc<dyn SnapshotPolicy>,
    faults: ExceptionChannel,
}

impl CqrsRuntimeBuilder {
    /// Starts a builder with in-memory stores and default configuration.
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            command_handlers: CommandHandlerRegistry::default(),
            event_handlers: EventHandlerRegistry::default(),
            query_handlers: QueryHandlerRegistry::default(),
            appliers: ApplierRegistry::builder().build(),
            repositories: RepositoryRegistry::default(),
            subscribers: Vec::new(),
            store: Arc::new(InMemoryEventStore::new()),
            tracker: Arc::new(InMemoryPublishedVersionStore::new()),
            snapshots: Arc::new(InMemorySnapshotStore::new()),
            snapshot_policy: Arc::new(VersionIntervalPolicy::default()),
            faults: ExceptionChannel::disabled(),
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn command_handlers(mut self, registry: CommandHandlerRegistry) -> Self {
        self.command_handlers = registry;
        self
    }

    pub fn event_handlers(mut self, registry: EventHandlerRegistry) -> Self {
        self.event_handlers = registry;
        self
    }

    pub fn query_handlers(mut self, registry: QueryHandlerRegistry) -> Self {
        self.query_handlers = registry;
        self
    }

    pub fn appliers(mut self, registry: ApplierRegistry) -> Self {
        self.appliers = registry;
        self
    }

    pub fn repositories(mut self, registry: RepositoryRegistry) -> Self {
        self.repositories = registry;
        self
    }

    pub fn subscriber(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = store;
        self
    }

    pub fn tracker(mut self, tracker: Arc<dyn PublishedVersionStore>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn snapshot_store(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn snapshot_policy(mut self, policy: Arc<dyn SnapshotPolicy>) -> Self {
        self.snapshot_policy = policy;
        self
    }

    pub fn fault_channel(mut self, faults: ExceptionChannel) -> Self {
        self.faults = faults;
        self
    }

    /// Wires the runtime. The workers are created stopped; call
    /// [`CqrsRuntime::start`] to begin draining.
    pub async fn build(self) -> CqrsRuntime {
        let retry = RetryInvoker::new(self.config.retry_max_attempts, self.config.retry_delay);

        let command_queue: Arc<ChannelReceiver<Arc<dyn Command>>> =
            Arc::new(ChannelReceiver::new());
        let batch_queue: Arc<ChannelReceiver<EventBatch>> = Arc::new(ChannelReceiver::new());
        let query_queue: Arc<ChannelReceiver<Arc<dyn Query>>> = Arc::new(ChannelReceiver::new());

        let event_bus = Arc::new(EventBus::new(Arc::clone(&batch_queue), retry.clone()));
        for subscriber in self.subscribers {
            event_bus.subscribe(subscriber).await;
        }

        let resources = ContextResources {
            store: Arc::clone(&self.store),
            registry: Arc::new(self.appliers),
            snapshots: Arc::clone(&self.snapshots),
            snapshot_policy: Arc::clone(&self.snapshot_policy),
            repositories: Arc::new(self.repositories),
        };

        let reply_router = Arc::new(ReplyRouter::new());
        let pending = Arc::new(PendingReplies::new(self.config.max_in_flight));
        let reply_sink: Arc<dyn crate::correlation::ReplySink> = pending.clone();
        reply_router.register(LOCAL_REPLY_ADDRESS, reply_sink).await;

        let command_bus: Arc<dyn crate::bus::CommandBus> =
            Arc::new(ChannelCommandBus::new(Arc::clone(&command_queue)));

        let command_dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(self.command_handlers),
            resources.clone(),
            Arc::clone(&event_bus),
            Arc::clone(&reply_router),
            retry.clone(),
            self.faults.clone(),
        ));
        let event_dispatcher = Arc::new(EventDispatcher::new(
            Arc::new(self.event_handlers),
            Arc::clone(&self.tracker),
            Arc::new(HandlerRecordStore::new(self.config.handler_record_retention)),
            Arc::clone(&event_bus),
            Arc::clone(&command_bus),
            Arc::clone(&reply_router),
            retry.clone(),
            Arc::clone(&batch_queue),
            self.faults.clone(),
        ));
        let query_dispatcher = Arc::new(QueryDispatcher::new(
            Arc::new(self.query_handlers),
            Arc::clone(&reply_router),
            retry.clone(),
        ));

        let command_worker =
            WorkerLoop::new("command-dispatcher", Arc::clone(&command_queue), command_dispatcher);
        let batch_worker =
            WorkerLoop::new("event-dispatcher", Arc::clone(&batch_queue), event_dispatcher);
        let query_worker =
            WorkerLoop::new("query-dispatcher", Arc::clone(&query_queue), query_dispatcher);

        let command_service = Arc::new(CommandService::new(
            command_bus,
            Arc::clone(&pending),
            LOCAL_REPLY_ADDRESS,
            self.config.execute_timeout,
        ));
        let query_service = Arc::new(QueryService::new(
            query_queue,
            pending,
            LOCAL_REPLY_ADDRESS,
            self.config.execute_timeout,
        ));

        CqrsRuntime {
            command_service,
            query_service,
            event_bus,
            store: self.store,
            tracker: self.tracker,
            command_worker,
            batch_worker,
            query_worker,
        }
    }
}

impl Default for CqrsRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A wired dispatch pipeline.
pub struct CqrsRuntime {
    command_service: Arc<CommandService>,
    query_service: Arc<QueryService>,
    event_bus: Arc<EventBus>,
    store: Arc<dyn EventStore>,
    tracker: Arc<dyn PublishedVersionStore>,
    command_worker: WorkerLoop<Arc<dyn Command>>,
    batch_worker: WorkerLoop<EventBatch>,
    query_worker: WorkerLoop<Arc<dyn Query>>,
}

impl CqrsRuntime {
    /// Starts the dispatcher workers. Idempotent.
    pub fn start(&self) {
        self.command_worker.start();
        self.batch_worker.start();
        self.query_worker.start();
        tracing::info!("dispatch runtime started");
    }

    /// Stops the workers and waits for them to drain their current
    /// message. Idempotent.
    pub async fn stop(&self) {
        self.command_worker.stop().await;
        self.batch_worker.stop().await;
        self.query_worker.stop().await;
        tracing::info!("dispatch runtime stopped");
    }

    /// The synchronous command facade.
    pub fn command_service(&self) -> Arc<CommandService> {
        Arc::clone(&self.command_service)
    }

    /// The synchronous query facade.
    pub fn query_service(&self) -> Arc<QueryService> {
        Arc::clone(&self.query_service)
    }

    /// The event bus, for subscribing after assembly.
    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    /// The event store the runtime persists batches into.
    pub fn event_store(&self) -> Arc<dyn EventStore> {
        Arc::clone(&self.store)
    }

    /// The publication tracker.
    pub fn tracker(&self) -> Arc<dyn PublishedVersionStore> {
        Arc::clone(&self.tracker)
    }
}
