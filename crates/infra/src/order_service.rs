//! Order application service: locking, persistence and notification around
//! the pure [`OrderLifecycle`].
//!
//! Every operation takes the per-order lock, rebuilds the order from its
//! stream, asks the lifecycle for a decision and appends the decided events
//! as one batch at the loaded version. A failing decision appends nothing.
//! Notices go out after the commit; a delivered confirmation is recorded on
//! the order so later finalizations do not send it again.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use storefront_core::{AggregateId, AggregateRoot, DomainError, ExpectedVersion, Money, UserId, VariantId};
use storefront_events::{EventBus, EventEnvelope};
use storefront_orders::{
    CheckoutEvent, CreateOrder, LifecycleError, LifecycleResult, LineItemOptions, NoticeKind, Order,
    OrderCommand, OrderDecision, OrderId, OrderLifecycle, PaymentId, ShipmentId,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::notifications::OrderNotifier;
use crate::row_lock::{LockPoisoned, RowLocks};

pub const ORDER_AGGREGATE: &str = "orders.order";

const NUMBER_ATTEMPTS: usize = 16;

#[derive(Debug, Error)]
pub enum OrderServiceError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Dispatch(DispatchError),

    #[error(transparent)]
    Lock(#[from] LockPoisoned),
}

impl From<DomainError> for OrderServiceError {
    fn from(value: DomainError) -> Self {
        OrderServiceError::Lifecycle(LifecycleError::Domain(value))
    }
}

impl From<DispatchError> for OrderServiceError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Domain(err) => err.into(),
            other => OrderServiceError::Dispatch(other),
        }
    }
}

impl OrderServiceError {
    /// The underlying domain error, if this is one.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            OrderServiceError::Lifecycle(LifecycleError::Domain(err)) => Some(err),
            _ => None,
        }
    }
}

pub type OrderServiceResult<T> = Result<T, OrderServiceError>;

pub struct OrderService<S, B, N> {
    dispatcher: CommandDispatcher<S, B>,
    lifecycle: OrderLifecycle,
    notifier: N,
    locks: RowLocks<OrderId>,
    numbers: Mutex<HashSet<String>>,
}

impl<S, B, N> core::fmt::Debug for OrderService<S, B, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OrderService")
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl<S, B, N> OrderService<S, B, N>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    N: OrderNotifier,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>, lifecycle: OrderLifecycle, notifier: N) -> Self {
        Self {
            dispatcher,
            lifecycle,
            notifier,
            locks: RowLocks::new(),
            numbers: Mutex::new(HashSet::new()),
        }
    }

    pub fn lifecycle(&self) -> &OrderLifecycle {
        &self.lifecycle
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    /// Create an order with a freshly generated number.
    pub fn create_order(&self, user_id: Option<UserId>, at: DateTime<Utc>) -> OrderServiceResult<Order> {
        for _ in 0..NUMBER_ATTEMPTS {
            match self.create_order_with_number(generate_number(), user_id, at) {
                Err(err) if matches!(err.domain(), Some(DomainError::Conflict(_))) => continue,
                other => return other,
            }
        }
        Err(DomainError::conflict("could not find an unused order number").into())
    }

    /// Create an order under a caller-chosen number, unique across orders.
    pub fn create_order_with_number(
        &self,
        number: impl Into<String>,
        user_id: Option<UserId>,
        at: DateTime<Utc>,
    ) -> OrderServiceResult<Order> {
        let number = number.into().trim().to_string();
        self.reserve_number(&number)?;

        let order_id = OrderId(AggregateId::new());
        let created = self.execute(OrderCommand::Create(CreateOrder {
            order_id,
            number: number.clone(),
            user_id,
            occurred_at: at,
        }));
        if created.is_err() {
            self.release_number(&number);
        }
        created
    }

    /// Rebuild an order from its stream.
    pub fn load(&self, order_id: OrderId) -> OrderServiceResult<Order> {
        let order: Order = self.dispatcher.load(order_id.0, |id| Order::empty(OrderId(id)))?;
        if order.version() == 0 {
            return Err(DomainError::not_found().into());
        }
        Ok(order)
    }

    /// Run a plain aggregate command under the order lock.
    pub fn execute(&self, command: OrderCommand) -> OrderServiceResult<Order> {
        let order_id = command.order_id();
        self.locks.with_lock(&order_id, || {
            let mut order: Order = self.dispatcher.load(order_id.0, |id| Order::empty(OrderId(id)))?;
            let expected = ExpectedVersion::Exact(order.version());
            let events = storefront_events::execute(&mut order, &command)?;
            self.dispatcher.commit(order_id.0, ORDER_AGGREGATE, expected, &events)?;
            Ok(order)
        })?
    }

    /// Decide with `decide`, commit, then deliver the decision's notices.
    pub fn run<F>(&self, order_id: OrderId, decide: F) -> OrderServiceResult<Order>
    where
        F: FnOnce(&OrderLifecycle, &Order) -> LifecycleResult<OrderDecision>,
    {
        self.locks.with_lock(&order_id, || {
            let order = self.load(order_id)?;
            let decision = decide(&self.lifecycle, &order)?;
            let mut current = self.commit(&order, decision.events.as_slice(), decision.order)?;

            for notice in &decision.notices {
                match self.notifier.send(notice) {
                    Ok(()) if notice.kind == NoticeKind::OrderConfirmation => {
                        let delivered = self.lifecycle.mark_confirmation_delivered(&current, Utc::now())?;
                        current = self.commit(&current, delivered.events.as_slice(), delivered.order)?;
                    }
                    Ok(()) => {}
                    Err(err) => {
                        warn!(order = %notice.number, kind = ?notice.kind, error = %err, "order notice not delivered");
                    }
                }
            }
            Ok(current)
        })?
    }

    fn commit(
        &self,
        before: &Order,
        events: &[storefront_orders::OrderEvent],
        after: Order,
    ) -> OrderServiceResult<Order> {
        if events.is_empty() {
            return Ok(after);
        }
        let order_id = before.id_typed();
        self.dispatcher
            .commit(order_id.0, ORDER_AGGREGATE, ExpectedVersion::Exact(before.version()), events)?;
        info!(
            order = %after.number(),
            state = %after.state(),
            events = events.len(),
            "order committed"
        );
        Ok(after)
    }

    pub fn transition(&self, order_id: OrderId, event: CheckoutEvent, at: DateTime<Utc>) -> OrderServiceResult<Order> {
        self.run(order_id, |lc, order| lc.transition(order, event, at))
    }

    /// Advance checkout one step.
    pub fn next(&self, order_id: OrderId, at: DateTime<Utc>) -> OrderServiceResult<Order> {
        self.transition(order_id, CheckoutEvent::Next, at)
    }

    pub fn finalize(&self, order_id: OrderId, at: DateTime<Utc>) -> OrderServiceResult<Order> {
        self.run(order_id, |lc, order| lc.finalize(order, at))
    }

    pub fn update(&self, order_id: OrderId, at: DateTime<Utc>) -> OrderServiceResult<Order> {
        self.run(order_id, |lc, order| lc.update(order, at))
    }

    pub fn canceled_by(
        &self,
        order_id: OrderId,
        user_id: Option<UserId>,
        at: DateTime<Utc>,
    ) -> OrderServiceResult<Order> {
        self.run(order_id, |lc, order| lc.canceled_by(order, user_id, at))
    }

    pub fn approved_by(
        &self,
        order_id: OrderId,
        user_id: Option<UserId>,
        at: DateTime<Utc>,
    ) -> OrderServiceResult<Order> {
        self.run(order_id, |lc, order| lc.approved_by(order, user_id, at))
    }

    pub fn resume(&self, order_id: OrderId, at: DateTime<Utc>) -> OrderServiceResult<Order> {
        self.run(order_id, |lc, order| lc.resume(order, at))
    }

    pub fn empty(&self, order_id: OrderId, at: DateTime<Utc>) -> OrderServiceResult<Order> {
        self.run(order_id, |lc, order| lc.empty(order, at))
    }

    pub fn add_to_cart(
        &self,
        order_id: OrderId,
        variant_id: VariantId,
        quantity: i64,
        price: Money,
        options: LineItemOptions,
        at: DateTime<Utc>,
    ) -> OrderServiceResult<Order> {
        self.run(order_id, |lc, order| {
            lc.add_to_cart(order, variant_id, quantity, price, options, at)
        })
    }

    pub fn process_payments(&self, order_id: OrderId, at: DateTime<Utc>) -> OrderServiceResult<Order> {
        self.run(order_id, |lc, order| lc.process_payments(order, at))
    }

    pub fn capture_payment(
        &self,
        order_id: OrderId,
        payment_id: PaymentId,
        at: DateTime<Utc>,
    ) -> OrderServiceResult<Order> {
        self.run(order_id, |lc, order| lc.capture_payment(order, payment_id, at))
    }

    pub fn fulfill(&self, order_id: OrderId, at: DateTime<Utc>) -> OrderServiceResult<Order> {
        self.run(order_id, |lc, order| lc.fulfill(order, at))
    }

    pub fn ship_shipment(
        &self,
        order_id: OrderId,
        shipment_id: ShipmentId,
        at: DateTime<Utc>,
    ) -> OrderServiceResult<Order> {
        self.run(order_id, |lc, order| lc.ship_shipment(order, shipment_id, at))
    }

    fn reserve_number(&self, number: &str) -> OrderServiceResult<()> {
        let mut numbers = self
            .numbers
            .lock()
            .map_err(|_| LockPoisoned("order numbers".to_string()))?;
        if !numbers.insert(number.to_string()) {
            return Err(DomainError::conflict(format!("order number {number} is taken")).into());
        }
        Ok(())
    }

    fn release_number(&self, number: &str) {
        if let Ok(mut numbers) = self.numbers.lock() {
            numbers.remove(number);
        }
    }
}

/// `R` followed by nine digits.
fn generate_number() -> String {
    let random = Uuid::now_v7().as_u128() & u128::from(u64::MAX);
    format!("R{:09}", random % 1_000_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use storefront_events::InMemoryEventBus;
    use storefront_orders::{BogusGateway, LifecycleConfig, OrderNotice, OrderState};

    use crate::event_store::InMemoryEventStore;
    use crate::notifications::{BusNotifier, NotifyError};

    type Envelopes = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn service<N: OrderNotifier>(notifier: N) -> OrderService<Arc<InMemoryEventStore>, Envelopes, N> {
        let dispatcher = CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()));
        let lifecycle = OrderLifecycle::new(LifecycleConfig::default(), Arc::new(BogusGateway::new()));
        OrderService::new(dispatcher, lifecycle, notifier)
    }

    struct Unreachable;

    impl OrderNotifier for Unreachable {
        fn send(&self, _notice: &OrderNotice) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("smtp down".to_string()))
        }
    }

    #[test]
    fn generated_numbers_look_like_order_numbers() {
        let number = generate_number();
        assert_eq!(number.len(), 10);
        assert!(number.starts_with('R'));
        assert!(number[1..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn order_numbers_are_unique() {
        let svc = service(BusNotifier::new(Arc::new(InMemoryEventBus::<OrderNotice>::new())));
        let first = svc.create_order_with_number("R111111111", None, Utc::now()).unwrap();
        assert_eq!(svc.load(first.id_typed()).unwrap().number(), "R111111111");

        let err = svc.create_order_with_number(" R111111111 ", None, Utc::now()).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Conflict(_))));

        let err = svc.create_order_with_number("", None, Utc::now()).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));
        // A rejected number is free again.
        assert!(svc.reserve_number("").is_ok());
    }

    #[test]
    fn unknown_orders_are_not_found() {
        let svc = service(Unreachable);
        let err = svc.load(OrderId(AggregateId::new())).unwrap_err();
        assert_eq!(err.domain(), Some(&DomainError::NotFound));
    }

    #[test]
    fn emptied_cart_is_persisted() {
        let svc = service(Unreachable);
        let order = svc.create_order(None, Utc::now()).unwrap();
        let emptied = svc.empty(order.id_typed(), Utc::now()).unwrap();
        assert_eq!(emptied.state(), OrderState::Cart);
        assert_eq!(svc.load(order.id_typed()).unwrap().version(), emptied.version());
    }

    #[test]
    fn order_locks_are_released_after_each_operation() {
        let svc = service(Unreachable);
        for _ in 0..100 {
            let order = svc.create_order(None, Utc::now()).unwrap();
            svc.empty(order.id_typed(), Utc::now()).unwrap();
        }
        assert!(svc.locks.is_empty());
    }
}
