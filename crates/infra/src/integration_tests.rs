//! End-to-end checks across the services, stores, bus and projections.
//!
//! Order path: service → lifecycle → event store → bus → notifier.
//! Stock path: ledger → stock store → bus → worker → stock levels.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use storefront_core::{AggregateId, AggregateRoot, Money, StockLocationId, VariantId};
use storefront_events::{EventBus, EventEnvelope, InMemoryEventBus};
use storefront_observability::LogFormat;
use storefront_inventory::{BackorderedUnit, InventoryCacheStrategy, StockItemId};
use storefront_orders::{
    AddPayment, AddShipment, BogusGateway, LineItemOptions, NoticeKind, OrderCommand, OrderId,
    OrderLifecycle, OrderNotice, OrderState, PaymentId, PaymentMethod, Shipment, ShipmentId,
};

use crate::command_dispatcher::CommandDispatcher;
use crate::config::StorefrontConfig;
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::notifications::{BusNotifier, NotifyError, OrderNotifier};
use crate::order_service::{ORDER_AGGREGATE, OrderService};
use crate::projections::{InMemoryCursorStore, StockLevelsProjection, VariantStockLevel};
use crate::read_model::InMemoryStore;
use crate::stock_ledger::{STOCK_ITEM_AGGREGATE, StockLedger};
use crate::stock_store::InMemoryStockStore;
use crate::variant_cache::InMemoryVariantCache;
use crate::workers::ProjectionWorker;

type Envelopes = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Service<N> = OrderService<Arc<InMemoryEventStore>, Envelopes, N>;
type Ledger = StockLedger<Arc<InMemoryStockStore>, Envelopes, Arc<InMemoryVariantCache>>;

struct Shop<N> {
    service: Arc<Service<N>>,
    store: Arc<InMemoryEventStore>,
    envelopes: Envelopes,
}

fn shop<N: OrderNotifier>(config: &StorefrontConfig, notifier: N) -> Shop<N> {
    storefront_observability::init_with(LogFormat::Pretty);
    let store = Arc::new(InMemoryEventStore::new());
    let envelopes: Envelopes = Arc::new(InMemoryEventBus::new());
    let dispatcher = CommandDispatcher::new(store.clone(), envelopes.clone());
    let lifecycle = OrderLifecycle::new(config.lifecycle_config(), Arc::new(BogusGateway::new()));
    Shop {
        service: Arc::new(OrderService::new(dispatcher, lifecycle, notifier)),
        store,
        envelopes,
    }
}

fn ledger(strategy: InventoryCacheStrategy) -> (Arc<Ledger>, Arc<InMemoryVariantCache>, Envelopes) {
    let cache = Arc::new(InMemoryVariantCache::new());
    let envelopes: Envelopes = Arc::new(InMemoryEventBus::new());
    let ledger = StockLedger::new(
        Arc::new(InMemoryStockStore::new()),
        envelopes.clone(),
        cache.clone(),
        strategy,
    );
    (Arc::new(ledger), cache, envelopes)
}

/// One 10.00 item with a 5.00 shipment, walked to `payment`, paid in full.
fn order_at_payment<N: OrderNotifier>(service: &Service<N>) -> OrderId {
    let at = Utc::now();
    let order_id = service.create_order(None, at).unwrap().id_typed();
    service
        .add_to_cart(order_id, VariantId::new(), 1, Money::from_cents(10_00), LineItemOptions::new(), at)
        .unwrap();
    service
        .execute(OrderCommand::AddShipment(AddShipment {
            order_id,
            shipment: Shipment::new(ShipmentId::new(), StockLocationId::new(), Some(Money::from_cents(5_00)), false),
            occurred_at: at,
        }))
        .unwrap();
    for _ in 0..3 {
        service.next(order_id, at).unwrap();
    }
    assert_eq!(service.load(order_id).unwrap().state(), OrderState::Payment);

    service
        .execute(OrderCommand::AddPayment(AddPayment {
            order_id,
            payment_id: PaymentId::new(),
            amount: Money::from_cents(15_00),
            method: PaymentMethod::new("credit card"),
            source: "4111111111111111".to_string(),
            occurred_at: at,
        }))
        .unwrap();
    order_id
}

fn notices() -> (BusNotifier<Arc<InMemoryEventBus<OrderNotice>>>, Arc<InMemoryEventBus<OrderNotice>>) {
    let bus = Arc::new(InMemoryEventBus::new());
    (BusNotifier::new(bus.clone()), bus)
}

#[test]
fn checkout_persists_the_order_and_confirms_once() {
    let (notifier, notice_bus) = notices();
    let inbox = notice_bus.subscribe();
    let shop = shop(&StorefrontConfig::default(), notifier);
    let published = shop.envelopes.subscribe();

    let order_id = order_at_payment(&shop.service);
    let completed = shop.service.next(order_id, Utc::now()).unwrap();

    assert_eq!(completed.state(), OrderState::Complete);
    assert!(completed.confirmation_delivered());
    let sent = inbox.drain();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NoticeKind::OrderConfirmation);
    assert_eq!(sent[0].number, completed.number());

    let stream = shop.store.load_stream(order_id.0).unwrap();
    assert_eq!(stream.len() as u64, completed.version());
    let envelopes = published.drain();
    assert_eq!(envelopes.len(), stream.len());
    assert!(envelopes.iter().all(|e| e.aggregate_type() == ORDER_AGGREGATE));
    assert_eq!(envelopes.last().map(|e| e.event_type()), Some("orders.order.confirmation_delivered"));

    // Finalizing again finds the delivery already recorded.
    let refinalized = shop.service.finalize(order_id, Utc::now()).unwrap();
    assert!(inbox.drain().is_empty());
    assert_eq!(shop.service.load(order_id).unwrap().version(), refinalized.version());
}

/// Fails the first `failures` sends.
struct Flaky {
    failures: usize,
    attempts: AtomicUsize,
}

impl OrderNotifier for Flaky {
    fn send(&self, _notice: &OrderNotice) -> Result<(), NotifyError> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(NotifyError::Delivery("mailer unavailable".to_string()));
        }
        Ok(())
    }
}

#[test]
fn undelivered_confirmation_is_retried_by_finalize() {
    let notifier = Arc::new(Flaky {
        failures: 1,
        attempts: AtomicUsize::new(0),
    });
    let shop = shop(&StorefrontConfig::default(), notifier.clone());
    let order_id = order_at_payment(&shop.service);

    // Completion stands even though the mail did not go out.
    let completed = shop.service.next(order_id, Utc::now()).unwrap();
    assert_eq!(completed.state(), OrderState::Complete);
    assert!(!completed.confirmation_delivered());

    let finalized = shop.service.finalize(order_id, Utc::now()).unwrap();
    assert!(finalized.confirmation_delivered());
    shop.service.finalize(order_id, Utc::now()).unwrap();
    assert_eq!(notifier.attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn concurrent_finalize_sends_one_confirmation() {
    let notifier = Arc::new(Flaky {
        failures: 1,
        attempts: AtomicUsize::new(0),
    });
    let shop = shop(&StorefrontConfig::default(), notifier.clone());
    let order_id = order_at_payment(&shop.service);
    shop.service.next(order_id, Utc::now()).unwrap();

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = shop.service.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                service.finalize(order_id, Utc::now()).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    // One failed attempt at completion, one success among the finalizers.
    assert_eq!(notifier.attempts.load(Ordering::SeqCst), 2);
    assert!(shop.service.load(order_id).unwrap().confirmation_delivered());
}

#[test]
fn canceling_a_completed_order_notifies_the_customer() {
    let (notifier, notice_bus) = notices();
    let inbox = notice_bus.subscribe();
    let shop = shop(&StorefrontConfig::default(), notifier);
    let order_id = order_at_payment(&shop.service);
    shop.service.next(order_id, Utc::now()).unwrap();
    inbox.drain();

    let canceled = shop.service.canceled_by(order_id, None, Utc::now()).unwrap();
    assert_eq!(canceled.state(), OrderState::Canceled);
    assert!(inbox.drain().iter().any(|n| n.kind == NoticeKind::OrderCanceled));
}

#[test]
fn concurrent_adjustments_all_land() {
    let (ledger, _, _) = ledger(InventoryCacheStrategy::EveryChange);
    let id = ledger
        .create_stock_item(VariantId::new(), StockLocationId::new(), false, Utc::now())
        .unwrap()
        .id_typed();
    ledger.adjust_count_on_hand(id, 10, Utc::now()).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let ledger = ledger.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                ledger.adjust_count_on_hand(id, 5, Utc::now()).unwrap()
            })
        })
        .collect();
    let mut seen: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    seen.sort();

    assert_eq!(seen, vec![15, 20]);
    assert_eq!(ledger.count_on_hand(id).unwrap(), 20);
    assert_eq!(ledger.movements(id).unwrap().len(), 3);
}

#[test]
fn signed_deltas_from_many_threads_sum_exactly() {
    let (ledger, _, _) = ledger(InventoryCacheStrategy::EveryChange);
    let id = ledger
        .create_stock_item(VariantId::new(), StockLocationId::new(), true, Utc::now())
        .unwrap()
        .id_typed();
    ledger.adjust_count_on_hand(id, 3, Utc::now()).unwrap();

    let deltas: Vec<i64> = (1..=40).map(|n| if n % 3 == 0 { -n } else { n }).collect();
    let expected = 3 + deltas.iter().sum::<i64>();

    let handles: Vec<_> = deltas
        .chunks(10)
        .map(|chunk| {
            let ledger = ledger.clone();
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                for delta in chunk {
                    ledger.adjust_count_on_hand(id, delta, Utc::now()).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(ledger.count_on_hand(id).unwrap(), expected);
    let moved: i64 = ledger.movements(id).unwrap().iter().map(|m| m.quantity()).sum();
    assert_eq!(moved, expected);
}

#[test]
fn restock_fills_backorders_and_reaches_the_projection() {
    let (ledger, _, envelopes) = ledger(InventoryCacheStrategy::EveryChange);
    let projection = Arc::new(StockLevelsProjection::new(
        InMemoryStore::<VariantId, VariantStockLevel>::new(),
        InMemoryCursorStore::new(),
    ));
    let sink = projection.clone();
    let worker = ProjectionWorker::spawn(
        "stock-levels",
        &envelopes,
        |env: &EventEnvelope<JsonValue>| env.aggregate_type() == STOCK_ITEM_AGGREGATE,
        move |env| sink.apply_envelope(&env),
    )
    .unwrap();

    let variant = VariantId::new();
    let id = ledger
        .create_stock_item(variant, StockLocationId::new(), true, Utc::now())
        .unwrap()
        .id_typed();
    ledger.adjust_count_on_hand(id, -3, Utc::now()).unwrap();
    let units: Vec<Uuid> = (0..3)
        .map(|_| {
            let unit = BackorderedUnit {
                unit_id: Uuid::now_v7(),
                order_id: AggregateId::new(),
                backordered_at: Utc::now(),
            };
            ledger.backorder(id, unit.clone(), Utc::now()).unwrap();
            unit.unit_id
        })
        .collect();

    assert_eq!(ledger.adjust_count_on_hand(id, 2, Utc::now()).unwrap(), -1);
    let item = ledger.get(id).unwrap().unwrap();
    let pending: Vec<Uuid> = item.backorders().iter().map(|u| u.unit_id).collect();
    assert_eq!(pending, vec![units[2]]);

    worker.shutdown();
    assert_eq!(projection.total_on_hand(variant), -1);
}

#[test]
fn binary_cache_flag_limits_touches_to_crossings() {
    let config = StorefrontConfig::from_lookup(|key| {
        (key == crate::config::BINARY_INVENTORY_CACHE).then(|| "true".to_string())
    });
    let (ledger, cache, _) = ledger(config.cache_strategy());
    let variant = VariantId::new();
    let id = ledger
        .create_stock_item(variant, StockLocationId::new(), false, Utc::now())
        .unwrap()
        .id_typed();
    assert_eq!(cache.touches(variant), 1);

    ledger.adjust_count_on_hand(id, 5, Utc::now()).unwrap();
    ledger.adjust_count_on_hand(id, 2, Utc::now()).unwrap();
    ledger.adjust_count_on_hand(id, -7, Utc::now()).unwrap();
    assert_eq!(cache.touches(variant), 3);
}

#[test]
fn stock_levels_ignore_order_traffic_on_a_shared_bus() {
    let envelopes: Envelopes = Arc::new(InMemoryEventBus::new());
    let inbox = envelopes.subscribe();
    let ledger = StockLedger::new(
        InMemoryStockStore::new(),
        envelopes.clone(),
        InMemoryVariantCache::new(),
        InventoryCacheStrategy::EveryChange,
    );
    let lifecycle = OrderLifecycle::new(StorefrontConfig::default().lifecycle_config(), Arc::new(BogusGateway::new()));
    let service = OrderService::new(
        CommandDispatcher::new(InMemoryEventStore::new(), envelopes.clone()),
        lifecycle,
        notices().0,
    );

    let variant = VariantId::new();
    let id = ledger
        .create_stock_item(variant, StockLocationId::new(), false, Utc::now())
        .unwrap()
        .id_typed();
    let order = service.create_order(None, Utc::now()).unwrap();
    service
        .add_to_cart(order.id_typed(), variant, 2, Money::from_cents(3_00), LineItemOptions::new(), Utc::now())
        .unwrap();
    ledger.adjust_count_on_hand(id, 4, Utc::now()).unwrap();

    let published = inbox.drain();
    assert!(published.iter().any(|e| e.aggregate_type() == ORDER_AGGREGATE));

    let projection = StockLevelsProjection::new(
        InMemoryStore::<VariantId, VariantStockLevel>::new(),
        InMemoryCursorStore::new(),
    );
    for env in &published {
        projection.apply_envelope(env).unwrap();
    }
    assert_eq!(projection.total_on_hand(variant), 4);
    assert_eq!(projection.list().len(), 1);
    assert_eq!(StockItemId(published[0].aggregate_id()), id);
}
