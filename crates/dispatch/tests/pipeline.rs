//! End-to-end pipeline tests: command execution through aggregate commit,
//! batch storage and ordered delivery, follow-up command chains, and the
//! caller-facing reply statuses.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateIdentity, CommandId, DomainEvent, EventId, ExecutionStatus};
use dispatch::{
    Command, CommandHandler, CommandHandlerRegistry, CqrsRuntime, CqrsRuntimeBuilder,
    EventHandler, EventHandlerRegistry, EventHandlingContext, ExceptionChannel, HandlerError,
    Query, QueryHandler, QueryHandlerRegistry, RuntimeConfig, expect_command, expect_query,
};
use domain::{ApplierRegistry, CommandContext, EventSourced, SourcedRoot};
use event_store::{EventBatch, Version};
use serde::{Deserialize, Serialize};

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn infra(err: impl std::fmt::Display) -> HandlerError {
    HandlerError::transient(err.to_string())
}

fn order_identity(order_id: &str) -> AggregateIdentity {
    AggregateIdentity::local("Order", order_id)
}

#[derive(Debug)]
struct OrderPlaced {
    id: EventId,
    at: DateTime<Utc>,
    source: AggregateIdentity,
    line: String,
}

impl OrderPlaced {
    fn new(source: &AggregateIdentity, line: &str) -> Arc<dyn DomainEvent> {
        Arc::new(Self {
            id: EventId::new(),
            at: Utc::now(),
            source: source.clone(),
            line: line.to_string(),
        })
    }
}

impl DomainEvent for OrderPlaced {
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
        "OrderPlaced"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct OrderConfirmed {
    id: EventId,
    at: DateTime<Utc>,
    source: AggregateIdentity,
}

impl OrderConfirmed {
    fn new(source: &AggregateIdentity) -> Arc<dyn DomainEvent> {
        Arc::new(Self {
            id: EventId::new(),
            at: Utc::now(),
            source: source.clone(),
        })
    }
}

impl DomainEvent for OrderConfirmed {
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
        "OrderConfirmed"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Order {
    root: SourcedRoot,
    lines: Vec<String>,
    confirmed: bool,
}

impl EventSourced for Order {
    fn aggregate_type() -> &'static str {
        "Order"
    }
    fn blank(identity: AggregateIdentity) -> Self {
        Self {
            root: SourcedRoot::new(identity),
            lines: Vec::new(),
            confirmed: false,
        }
    }
    fn root(&self) -> &SourcedRoot {
        &self.root
    }
    fn root_mut(&mut self) -> &mut SourcedRoot {
        &mut self.root
    }
}

fn appliers() -> ApplierRegistry {
    ApplierRegistry::builder()
        .applier::<Order, OrderPlaced>(|order, event| order.lines.push(event.line.clone()))
        .unwrap()
        .applier::<Order, OrderConfirmed>(|order, _| order.confirmed = true)
        .unwrap()
        .build()
}

#[derive(Debug)]
struct PlaceOrder {
    id: CommandId,
    order_id: String,
    line: String,
}

impl PlaceOrder {
    fn new(order_id: &str, line: &str) -> Arc<dyn Command> {
        Arc::new(Self {
            id: CommandId::new(),
            order_id: order_id.to_string(),
            line: line.to_string(),
        })
    }
}

impl Command for PlaceOrder {
    fn command_id(&self) -> CommandId {
        self.id
    }
    fn command_name(&self) -> &'static str {
        "PlaceOrder"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct ConfirmOrder {
    id: CommandId,
    order_id: String,
}

impl Command for ConfirmOrder {
    fn command_id(&self) -> CommandId {
        self.id
    }
    fn command_name(&self) -> &'static str {
        "ConfirmOrder"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct PlaceOrderHandler {
    delay: Duration,
}

#[async_trait]
impl CommandHandler for PlaceOrderHandler {
    fn command_type(&self) -> TypeId {
        TypeId::of::<PlaceOrder>()
    }
    fn command_name(&self) -> &'static str {
        "PlaceOrder"
    }
    fn handler_name(&self) -> &'static str {
        "PlaceOrderHandler"
    }
    async fn handle(
        &self,
        context: &mut CommandContext,
        command: &dyn Command,
    ) -> Result<(), HandlerError> {
        let command =
            expect_command::<PlaceOrder>(command).ok_or_else(|| infra("wrong command type"))?;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if command.line.is_empty() {
            return Err(HandlerError::business("ORD_EMPTY", "order line is empty"));
        }
        let identity = order_identity(&command.order_id);
        if context.find::<Order>(&identity).await.map_err(infra)?.is_none() {
            context.add(Order::blank(identity.clone())).map_err(infra)?;
        }
        context
            .raise::<Order>(&identity, OrderPlaced::new(&identity, &command.line))
            .map_err(infra)?;
        Ok(())
    }
}

struct ConfirmOrderHandler;

#[async_trait]
impl CommandHandler for ConfirmOrderHandler {
    fn command_type(&self) -> TypeId {
        TypeId::of::<ConfirmOrder>()
    }
    fn command_name(&self) -> &'static str {
        "ConfirmOrder"
    }
    fn handler_name(&self) -> &'static str {
        "ConfirmOrderHandler"
    }
    async fn handle(
        &self,
        context: &mut CommandContext,
        command: &dyn Command,
    ) -> Result<(), HandlerError> {
        let command =
            expect_command::<ConfirmOrder>(command).ok_or_else(|| infra("wrong command type"))?;
        let identity = order_identity(&command.order_id);
        context.get::<Order>(&identity).await.map_err(infra)?;
        context
            .raise::<Order>(&identity, OrderConfirmed::new(&identity))
            .map_err(infra)?;
        Ok(())
    }
}

/// Counts batches of {OrderPlaced}; optionally chains a ConfirmOrder.
struct PlacedPolicy {
    invocations: Arc<AtomicU32>,
    auto_confirm: bool,
}

#[async_trait]
impl EventHandler for PlacedPolicy {
    fn handled_types(&self) -> Vec<TypeId> {
        vec![TypeId::of::<OrderPlaced>()]
    }
    fn handler_name(&self) -> &'static str {
        "PlacedPolicy"
    }
    async fn handle(
        &self,
        context: &mut EventHandlingContext,
        events: &[Arc<dyn DomainEvent>],
    ) -> Result<(), HandlerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self.auto_confirm {
            let placed = events[0]
                .as_any()
                .downcast_ref::<OrderPlaced>()
                .ok_or_else(|| infra("unexpected event type"))?;
            context.send(Arc::new(ConfirmOrder {
                id: CommandId::new(),
                order_id: placed.source.instance_id.clone(),
            }));
        }
        Ok(())
    }
}

struct ConfirmedPolicy {
    invocations: Arc<AtomicU32>,
}

#[async_trait]
impl EventHandler for ConfirmedPolicy {
    fn handled_types(&self) -> Vec<TypeId> {
        vec![TypeId::of::<OrderConfirmed>()]
    }
    fn handler_name(&self) -> &'static str {
        "ConfirmedPolicy"
    }
    async fn handle(
        &self,
        _context: &mut EventHandlingContext,
        _events: &[Arc<dyn DomainEvent>],
    ) -> Result<(), HandlerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
struct CountOrderLines {
    order_id: String,
}

impl Query for CountOrderLines {
    fn query_name(&self) -> &'static str {
        "CountOrderLines"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct CountOrderLinesHandler;

#[async_trait]
impl QueryHandler for CountOrderLinesHandler {
    fn query_type(&self) -> TypeId {
        TypeId::of::<CountOrderLines>()
    }
    fn query_name(&self) -> &'static str {
        "CountOrderLines"
    }
    fn handler_name(&self) -> &'static str {
        "CountOrderLinesHandler"
    }
    async fn fetch(&self, query: &dyn Query) -> Result<serde_json::Value, HandlerError> {
        let query =
            expect_query::<CountOrderLines>(query).ok_or_else(|| infra("wrong query type"))?;
        Ok(serde_json::json!({ "order_id": query.order_id, "lines": 1 }))
    }
}

struct TestPipeline {
    runtime: CqrsRuntime,
    placed_invocations: Arc<AtomicU32>,
    confirmed_invocations: Arc<AtomicU32>,
}

async fn pipeline(auto_confirm: bool, config: RuntimeConfig, faults: ExceptionChannel) -> TestPipeline {
    init_tracing();
    let placed_invocations = Arc::new(AtomicU32::new(0));
    let confirmed_invocations = Arc::new(AtomicU32::new(0));

    let command_handlers = CommandHandlerRegistry::builder()
        .handler(Arc::new(PlaceOrderHandler {
            delay: Duration::ZERO,
        }))
        .unwrap()
        .handler(Arc::new(ConfirmOrderHandler))
        .unwrap()
        .build();
    let event_handlers = EventHandlerRegistry::builder()
        .handler(Arc::new(PlacedPolicy {
            invocations: Arc::clone(&placed_invocations),
            auto_confirm,
        }))
        .unwrap()
        .handler(Arc::new(ConfirmedPolicy {
            invocations: Arc::clone(&confirmed_invocations),
        }))
        .unwrap()
        .build();
    let query_handlers = QueryHandlerRegistry::builder()
        .handler(Arc::new(CountOrderLinesHandler))
        .unwrap()
        .build();

    let runtime = CqrsRuntimeBuilder::new()
        .config(config)
        .appliers(appliers())
        .command_handlers(command_handlers)
        .event_handlers(event_handlers)
        .query_handlers(query_handlers)
        .fault_channel(faults)
        .build()
        .await;
    runtime.start();

    TestPipeline {
        runtime,
        placed_invocations,
        confirmed_invocations,
    }
}

fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        retry_max_attempts: 3,
        retry_delay: Duration::from_millis(5),
        execute_timeout: Duration::from_secs(5),
        ..RuntimeConfig::default()
    }
}

#[tokio::test]
async fn placing_an_order_stores_one_batch_and_replies_nothing() {
    let pipeline = pipeline(false, fast_config(), ExceptionChannel::disabled()).await;
    let command = PlaceOrder::new("42", "2x widget");
    let command_id = command.command_id();

    let result = pipeline
        .runtime
        .command_service()
        .execute(command)
        .await;
    assert_eq!(result.status, ExecutionStatus::Nothing);

    let identity = order_identity("42");
    let stored = pipeline
        .runtime
        .event_store()
        .find(&identity, command_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.version, Version::first());
    assert_eq!(stored.events.len(), 1);
    assert_eq!(
        pipeline.runtime.tracker().published_version(&identity).await,
        Version::first()
    );
    assert_eq!(pipeline.placed_invocations.load(Ordering::SeqCst), 1);

    pipeline.runtime.stop().await;
}

#[tokio::test]
async fn follow_up_commands_extend_the_chain_before_the_reply() {
    let pipeline = pipeline(true, fast_config(), ExceptionChannel::disabled()).await;

    let result = pipeline
        .runtime
        .command_service()
        .execute(PlaceOrder::new("7", "1x gadget"))
        .await;
    assert_eq!(result.status, ExecutionStatus::Nothing);

    // The chain stored two gapless batches: v1 placed, v2 confirmed.
    let identity = order_identity("7");
    let batches = pipeline
        .runtime
        .event_store()
        .find_all(&identity, Version::initial())
        .await
        .unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].version, Version::first());
    assert_eq!(batches[1].version, Version::new(2));
    assert_eq!(
        pipeline.runtime.tracker().published_version(&identity).await,
        Version::new(2)
    );
    assert_eq!(pipeline.placed_invocations.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.confirmed_invocations.load(Ordering::SeqCst), 1);

    pipeline.runtime.stop().await;
}

#[tokio::test]
async fn business_rejections_fail_fast_and_reach_the_fault_channel() {
    let (faults, mut fault_rx) = ExceptionChannel::new();
    let pipeline = pipeline(false, fast_config(), faults).await;

    let result = pipeline
        .runtime
        .command_service()
        .execute(PlaceOrder::new("42", ""))
        .await;
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.error_code.as_deref(), Some("ORD_EMPTY"));

    let fault = fault_rx.recv().await.unwrap();
    assert_eq!(fault.code, "ORD_EMPTY");
    assert_eq!(fault.source, "PlaceOrderHandler");

    // Nothing was stored.
    let stored = pipeline
        .runtime
        .event_store()
        .find_all(&order_identity("42"), Version::initial())
        .await
        .unwrap();
    assert!(stored.is_empty());

    pipeline.runtime.stop().await;
}

#[tokio::test]
async fn duplicate_batch_delivery_is_dropped_by_the_tracker() {
    let pipeline = pipeline(false, fast_config(), ExceptionChannel::disabled()).await;
    let command = PlaceOrder::new("42", "2x widget");
    let command_id = command.command_id();

    let result = pipeline.runtime.command_service().execute(command).await;
    assert_eq!(result.status, ExecutionStatus::Nothing);

    // Replay the stored batch as a transport would on redelivery.
    let identity = order_identity("42");
    let stored = pipeline
        .runtime
        .event_store()
        .find(&identity, command_id)
        .await
        .unwrap()
        .unwrap();
    pipeline
        .runtime
        .event_bus()
        .publish_batch(stored, None)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(pipeline.placed_invocations.load(Ordering::SeqCst), 1);
    assert_eq!(
        pipeline.runtime.tracker().published_version(&identity).await,
        Version::first()
    );

    pipeline.runtime.stop().await;
}

#[tokio::test]
async fn a_premature_batch_waits_for_its_predecessor() {
    let pipeline = pipeline(false, fast_config(), ExceptionChannel::disabled()).await;
    let identity = order_identity("42");

    let first = EventBatch::new(
        identity.clone(),
        Version::first(),
        CommandId::new(),
        vec![OrderPlaced::new(&identity, "2x widget")],
    )
    .unwrap();
    let second = EventBatch::new(
        identity.clone(),
        Version::new(2),
        CommandId::new(),
        vec![OrderConfirmed::new(&identity)],
    )
    .unwrap();

    // v2 arrives first and must produce no side effects until v1 lands.
    pipeline
        .runtime
        .event_bus()
        .publish_batch(second, None)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pipeline.placed_invocations.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.confirmed_invocations.load(Ordering::SeqCst), 0);
    assert_eq!(
        pipeline.runtime.tracker().published_version(&identity).await,
        Version::initial()
    );

    // Once v1 arrives both batches go through, in order.
    pipeline
        .runtime
        .event_bus()
        .publish_batch(first, None)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pipeline.placed_invocations.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.confirmed_invocations.load(Ordering::SeqCst), 1);
    assert_eq!(
        pipeline.runtime.tracker().published_version(&identity).await,
        Version::new(2)
    );

    pipeline.runtime.stop().await;
}

#[tokio::test]
async fn a_slow_handler_times_out_the_caller() {
    init_tracing();
    let command_handlers = CommandHandlerRegistry::builder()
        .handler(Arc::new(PlaceOrderHandler {
            delay: Duration::from_millis(500),
        }))
        .unwrap()
        .build();
    let runtime = CqrsRuntimeBuilder::new()
        .appliers(appliers())
        .command_handlers(command_handlers)
        .build()
        .await;
    runtime.start();

    let result = runtime
        .command_service()
        .execute_within(PlaceOrder::new("42", "2x widget"), Duration::from_millis(50))
        .await;
    assert_eq!(result.status, ExecutionStatus::Timeout);

    runtime.stop().await;
}

#[tokio::test]
async fn the_in_flight_cap_rejects_with_busy() {
    let config = RuntimeConfig {
        max_in_flight: 0,
        ..fast_config()
    };
    let pipeline = pipeline(false, config, ExceptionChannel::disabled()).await;

    let result = pipeline
        .runtime
        .command_service()
        .execute(PlaceOrder::new("42", "2x widget"))
        .await;
    assert_eq!(result.status, ExecutionStatus::Busy);

    pipeline.runtime.stop().await;
}

#[tokio::test]
async fn queries_return_their_payload() {
    let pipeline = pipeline(false, fast_config(), ExceptionChannel::disabled()).await;

    let result = pipeline
        .runtime
        .query_service()
        .fetch(Arc::new(CountOrderLines {
            order_id: "42".to_string(),
        }))
        .await;
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(
        result.data,
        Some(serde_json::json!({ "order_id": "42", "lines": 1 }))
    );

    pipeline.runtime.stop().await;
}
