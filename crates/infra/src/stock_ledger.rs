//! Stock ledger: every count change on a stock item goes through here.
//!
//! Each operation runs under the item's row lock for the whole
//! decide/apply/movement/touch/publish sequence, so concurrent adjustments on
//! one item compose in some serial order and callers simply wait their turn.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use storefront_core::{AggregateId, AggregateRoot, DomainError, StockLocationId, VariantId};
use storefront_events::{Event, EventBus, EventEnvelope, execute};
use storefront_inventory::{
    AdjustCountOnHand, BackorderedUnit, CreateStockItem, DiscardStockItem, InventoryCacheStrategy,
    QueueBackorder, ReduceCountOnHandToZero, SetBackorderable, SetCountOnHand, StockCommand,
    StockEvent, StockItem, StockItemId, StockItemKey, StockMovement,
};

use crate::row_lock::{LockPoisoned, RowLocks};
use crate::stock_store::{StockStore, StockStoreError, StockUpdate};
use crate::variant_cache::VariantCache;

pub const STOCK_ITEM_AGGREGATE: &str = "inventory.stock_item";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(StockStoreError),

    #[error(transparent)]
    Lock(#[from] LockPoisoned),

    #[error("failed to encode stock event: {0}")]
    Encode(String),

    /// The change is stored; only publication failed.
    #[error("stock event publication failed: {0}")]
    Publish(String),
}

impl From<StockStoreError> for LedgerError {
    fn from(value: StockStoreError) -> Self {
        match value {
            StockStoreError::Domain(err) => LedgerError::Domain(err),
            StockStoreError::NotFound(_) => LedgerError::Domain(DomainError::not_found()),
            StockStoreError::LockPoisoned(err) => LedgerError::Lock(err),
            other => LedgerError::Store(other),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Movement to record alongside a count change.
struct MovementSpec {
    quantity: i64,
    originator: Option<String>,
}

pub struct StockLedger<S, B, C> {
    store: S,
    bus: B,
    cache: C,
    strategy: InventoryCacheStrategy,
    locks: RowLocks<StockItemId>,
}

impl<S, B, C> core::fmt::Debug for StockLedger<S, B, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StockLedger")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl<S, B, C> StockLedger<S, B, C>
where
    S: StockStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    C: VariantCache,
{
    pub fn new(store: S, bus: B, cache: C, strategy: InventoryCacheStrategy) -> Self {
        Self {
            store,
            bus,
            cache,
            strategy,
            locks: RowLocks::new(),
        }
    }

    pub fn strategy(&self) -> InventoryCacheStrategy {
        self.strategy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create the item for a (variant, location) pair. Always touches the variant.
    pub fn create_stock_item(
        &self,
        variant_id: VariantId,
        stock_location_id: StockLocationId,
        backorderable: bool,
        at: DateTime<Utc>,
    ) -> LedgerResult<StockItem> {
        let id = StockItemId::new(AggregateId::new());
        let mut item = StockItem::empty(id);
        let events = execute(
            &mut item,
            &StockCommand::Create(CreateStockItem {
                stock_item_id: id,
                variant_id,
                stock_location_id,
                backorderable,
                occurred_at: at,
            }),
        )?;

        self.locks.with_lock(&id, || -> LedgerResult<()> {
            self.store.insert(&item)?;
            self.cache.touch(variant_id, at);
            self.publish(id, 0, &events)
        })??;

        info!(stock_item_id = %id, variant_id = %variant_id, stock_location_id = %stock_location_id, "stock item created");
        Ok(item)
    }

    /// Discard the item; the (variant, location) pair can be stocked again afterwards.
    pub fn remove_stock_item(&self, id: StockItemId, at: DateTime<Utc>) -> LedgerResult<()> {
        self.mutate(
            id,
            StockCommand::Discard(DiscardStockItem {
                stock_item_id: id,
                occurred_at: at,
            }),
            None,
            at,
        )?;
        info!(stock_item_id = %id, "stock item removed");
        Ok(())
    }

    /// Add `delta` (either sign) and return the new count. Positive deltas
    /// fill waiting backorders oldest first, one unit each.
    pub fn adjust_count_on_hand(&self, id: StockItemId, delta: i64, at: DateTime<Utc>) -> LedgerResult<i64> {
        let update = self.mutate(
            id,
            StockCommand::Adjust(AdjustCountOnHand {
                stock_item_id: id,
                delta,
                occurred_at: at,
            }),
            Some(MovementSpec {
                quantity: delta,
                originator: None,
            }),
            at,
        )?;
        Ok(update.item.count_on_hand())
    }

    /// Adjust with an attributed movement, returning that movement.
    pub fn move_stock(
        &self,
        id: StockItemId,
        quantity: i64,
        originator: impl Into<String>,
        at: DateTime<Utc>,
    ) -> LedgerResult<StockMovement> {
        if quantity == 0 {
            return Err(DomainError::validation("movement quantity cannot be zero").into());
        }
        let update = self.mutate(
            id,
            StockCommand::Adjust(AdjustCountOnHand {
                stock_item_id: id,
                delta: quantity,
                occurred_at: at,
            }),
            Some(MovementSpec {
                quantity,
                originator: Some(originator.into()),
            }),
            at,
        )?;
        update
            .movement
            .ok_or_else(|| DomainError::invariant("adjustment committed without a movement").into())
    }

    /// Overwrite the count. Never fills backorders and records no movement.
    pub fn set_count_on_hand(&self, id: StockItemId, value: i64, at: DateTime<Utc>) -> LedgerResult<i64> {
        let update = self.mutate(
            id,
            StockCommand::Set(SetCountOnHand {
                stock_item_id: id,
                count_on_hand: value,
                occurred_at: at,
            }),
            None,
            at,
        )?;
        Ok(update.item.count_on_hand())
    }

    pub fn reduce_count_on_hand_to_zero(&self, id: StockItemId, at: DateTime<Utc>) -> LedgerResult<i64> {
        let update = self.mutate(
            id,
            StockCommand::ReduceToZero(ReduceCountOnHandToZero {
                stock_item_id: id,
                occurred_at: at,
            }),
            None,
            at,
        )?;
        Ok(update.item.count_on_hand())
    }

    pub fn set_backorderable(&self, id: StockItemId, backorderable: bool, at: DateTime<Utc>) -> LedgerResult<()> {
        self.mutate(
            id,
            StockCommand::SetBackorderable(SetBackorderable {
                stock_item_id: id,
                backorderable,
                occurred_at: at,
            }),
            None,
            at,
        )?;
        Ok(())
    }

    /// Queue a unit waiting for stock.
    pub fn backorder(&self, id: StockItemId, unit: BackorderedUnit, at: DateTime<Utc>) -> LedgerResult<()> {
        self.mutate(
            id,
            StockCommand::QueueBackorder(QueueBackorder {
                stock_item_id: id,
                unit,
                occurred_at: at,
            }),
            None,
            at,
        )?;
        Ok(())
    }

    pub fn get(&self, id: StockItemId) -> LedgerResult<Option<StockItem>> {
        Ok(self.store.get(id)?)
    }

    pub fn find(&self, key: StockItemKey) -> LedgerResult<Option<StockItem>> {
        Ok(self.store.find_by_key(key)?)
    }

    pub fn count_on_hand(&self, id: StockItemId) -> LedgerResult<i64> {
        Ok(self.live(id)?.count_on_hand())
    }

    /// In stock or backorderable.
    pub fn is_available(&self, id: StockItemId) -> LedgerResult<bool> {
        Ok(self.live(id)?.is_available())
    }

    pub fn movements(&self, id: StockItemId) -> LedgerResult<Vec<StockMovement>> {
        Ok(self.store.movements(id)?)
    }

    fn live(&self, id: StockItemId) -> LedgerResult<StockItem> {
        self.store
            .get(id)?
            .filter(StockItem::exists)
            .ok_or_else(|| DomainError::not_found().into())
    }

    fn mutate(
        &self,
        id: StockItemId,
        command: StockCommand,
        movement: Option<MovementSpec>,
        at: DateTime<Utc>,
    ) -> LedgerResult<StockUpdate> {
        self.locks.with_lock(&id, || -> LedgerResult<StockUpdate> {
            let mut before = None;
            let update = self.store.update(id, |current| {
                before = Some((current.version(), current.count_on_hand()));
                let mut next = current.clone();
                let events = execute(&mut next, &command)?;
                if events.is_empty() {
                    return Ok(StockUpdate::unchanged(current));
                }
                let movement = movement
                    .map(|m| StockMovement::record(id, m.quantity, m.originator, at))
                    .transpose()?;
                Ok(StockUpdate {
                    item: next,
                    events,
                    movement,
                })
            })?;

            let Some((version, previous_count)) = before else {
                return Ok(update);
            };
            if update.is_noop() {
                return Ok(update);
            }

            let new_count = update.item.count_on_hand();
            if self.strategy.should_touch(previous_count, new_count) {
                self.cache.touch(update.item.variant_id(), at);
            }
            self.publish(id, version, &update.events)?;
            debug!(
                stock_item_id = %id,
                previous_count,
                new_count,
                events = update.events.len(),
                "stock item updated"
            );
            Ok(update)
        })?
    }

    /// Publish with sequence numbers continuing from `version`.
    fn publish(&self, id: StockItemId, version: u64, events: &[StockEvent]) -> LedgerResult<()> {
        for (offset, ev) in events.iter().enumerate() {
            let payload = serde_json::to_value(ev).map_err(|e| LedgerError::Encode(e.to_string()))?;
            let envelope = EventEnvelope::new(
                Uuid::now_v7(),
                id.0,
                STOCK_ITEM_AGGREGATE,
                version + offset as u64 + 1,
                ev.event_type(),
                ev.occurred_at(),
                payload,
            );
            self.bus
                .publish(envelope)
                .map_err(|e| LedgerError::Publish(format!("{e:?}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use storefront_events::{InMemoryEventBus, Subscription};

    use crate::stock_store::InMemoryStockStore;
    use crate::variant_cache::InMemoryVariantCache;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Ledger = StockLedger<InMemoryStockStore, Bus, Arc<InMemoryVariantCache>>;

    struct Harness {
        ledger: Ledger,
        cache: Arc<InMemoryVariantCache>,
        events: Subscription<EventEnvelope<JsonValue>>,
    }

    fn harness(strategy: InventoryCacheStrategy) -> Harness {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let events = bus.subscribe();
        let cache = Arc::new(InMemoryVariantCache::new());
        Harness {
            ledger: StockLedger::new(InMemoryStockStore::new(), bus, cache.clone(), strategy),
            cache,
            events,
        }
    }

    fn item(h: &Harness, backorderable: bool) -> StockItem {
        h.ledger
            .create_stock_item(VariantId::new(), StockLocationId::new(), backorderable, Utc::now())
            .unwrap()
    }

    fn unit() -> BackorderedUnit {
        BackorderedUnit {
            unit_id: Uuid::now_v7(),
            order_id: AggregateId::new(),
            backordered_at: Utc::now(),
        }
    }

    fn pending(h: &Harness, id: StockItemId) -> Vec<Uuid> {
        let item = h.ledger.get(id).unwrap().unwrap();
        item.backorders().iter().map(|u| u.unit_id).collect()
    }

    #[test]
    fn adjustments_record_movements() {
        let h = harness(InventoryCacheStrategy::EveryChange);
        let id = item(&h, false).id_typed();

        assert_eq!(h.ledger.adjust_count_on_hand(id, 5, Utc::now()).unwrap(), 5);
        assert_eq!(h.ledger.adjust_count_on_hand(id, -2, Utc::now()).unwrap(), 3);
        assert_eq!(h.ledger.adjust_count_on_hand(id, 0, Utc::now()).unwrap(), 3);

        let quantities: Vec<i64> = h.ledger.movements(id).unwrap().iter().map(|m| m.quantity()).collect();
        assert_eq!(quantities, vec![5, -2]);
    }

    #[test]
    fn positive_adjustments_fill_oldest_backorders_first() {
        let h = harness(InventoryCacheStrategy::EveryChange);
        let id = item(&h, true).id_typed();
        let units: Vec<BackorderedUnit> = (0..3).map(|_| unit()).collect();
        for u in &units {
            h.ledger.backorder(id, u.clone(), Utc::now()).unwrap();
        }

        h.ledger.adjust_count_on_hand(id, 2, Utc::now()).unwrap();
        assert_eq!(pending(&h, id), vec![units[2].unit_id]);

        h.ledger.adjust_count_on_hand(id, 5, Utc::now()).unwrap();
        assert!(pending(&h, id).is_empty());
        assert_eq!(h.ledger.count_on_hand(id).unwrap(), 7);
    }

    #[test]
    fn set_count_never_fills_backorders() {
        let h = harness(InventoryCacheStrategy::EveryChange);
        let id = item(&h, true).id_typed();
        h.ledger.backorder(id, unit(), Utc::now()).unwrap();

        assert_eq!(h.ledger.set_count_on_hand(id, 10, Utc::now()).unwrap(), 10);
        assert_eq!(pending(&h, id).len(), 1);
        assert!(h.ledger.movements(id).unwrap().is_empty());
    }

    #[test]
    fn non_backorderable_items_cannot_go_negative() {
        let h = harness(InventoryCacheStrategy::EveryChange);
        let id = item(&h, false).id_typed();
        h.ledger.set_count_on_hand(id, 3, Utc::now()).unwrap();

        assert_eq!(h.ledger.set_count_on_hand(id, 9, Utc::now()).unwrap(), 9);
        h.ledger.set_count_on_hand(id, 3, Utc::now()).unwrap();

        let err = h.ledger.set_count_on_hand(id, -3, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::StockIntegrity(_))));
        let err = h.ledger.adjust_count_on_hand(id, -6, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::StockIntegrity(_))));

        assert_eq!(h.ledger.count_on_hand(id).unwrap(), 3);
        assert!(h.ledger.movements(id).unwrap().is_empty());
    }

    #[test]
    fn counts_that_start_negative_may_keep_moving() {
        let h = harness(InventoryCacheStrategy::EveryChange);
        let id = item(&h, true).id_typed();
        h.ledger.set_count_on_hand(id, -2, Utc::now()).unwrap();
        h.ledger.set_backorderable(id, false, Utc::now()).unwrap();

        assert_eq!(h.ledger.adjust_count_on_hand(id, -1, Utc::now()).unwrap(), -3);
        assert_eq!(h.ledger.adjust_count_on_hand(id, 5, Utc::now()).unwrap(), 2);
        assert!(h.ledger.is_available(id).unwrap());
    }

    #[test]
    fn reduce_to_zero_ignores_non_positive_counts() {
        let h = harness(InventoryCacheStrategy::EveryChange);
        let id = item(&h, true).id_typed();
        h.ledger.set_count_on_hand(id, -4, Utc::now()).unwrap();
        assert_eq!(h.ledger.reduce_count_on_hand_to_zero(id, Utc::now()).unwrap(), -4);

        h.ledger.set_count_on_hand(id, 6, Utc::now()).unwrap();
        assert_eq!(h.ledger.reduce_count_on_hand_to_zero(id, Utc::now()).unwrap(), 0);
    }

    #[test]
    fn availability_follows_count_or_backorderable() {
        let h = harness(InventoryCacheStrategy::EveryChange);
        let id = item(&h, false).id_typed();
        assert!(!h.ledger.is_available(id).unwrap());

        h.ledger.set_backorderable(id, true, Utc::now()).unwrap();
        assert!(h.ledger.is_available(id).unwrap());

        h.ledger.set_backorderable(id, false, Utc::now()).unwrap();
        h.ledger.adjust_count_on_hand(id, 1, Utc::now()).unwrap();
        assert!(h.ledger.is_available(id).unwrap());
    }

    #[test]
    fn move_stock_attributes_the_movement() {
        let h = harness(InventoryCacheStrategy::EveryChange);
        let id = item(&h, false).id_typed();

        let movement = h.ledger.move_stock(id, 4, "restock", Utc::now()).unwrap();
        assert_eq!(movement.quantity(), 4);
        assert_eq!(movement.originator(), Some("restock"));
        assert_eq!(h.ledger.movements(id).unwrap(), vec![movement]);

        let err = h.ledger.move_stock(id, 0, "restock", Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::Validation(_))));
    }

    #[test]
    fn one_live_item_per_pair_and_removal_allows_recreation() {
        let h = harness(InventoryCacheStrategy::EveryChange);
        let (variant, location) = (VariantId::new(), StockLocationId::new());
        let first = h.ledger.create_stock_item(variant, location, false, Utc::now()).unwrap();

        let err = h.ledger.create_stock_item(variant, location, false, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::Store(StockStoreError::Conflict(_))));

        h.ledger.remove_stock_item(first.id_typed(), Utc::now()).unwrap();
        let err = h.ledger.adjust_count_on_hand(first.id_typed(), 1, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::NotFound)));

        let second = h.ledger.create_stock_item(variant, location, false, Utc::now()).unwrap();
        let key = StockItemKey::new(variant, location);
        assert_eq!(h.ledger.find(key).unwrap().map(|i| i.id_typed()), Some(second.id_typed()));
    }

    #[test]
    fn published_sequence_numbers_follow_the_item_version() {
        let h = harness(InventoryCacheStrategy::EveryChange);
        let id = item(&h, true).id_typed();
        h.ledger.backorder(id, unit(), Utc::now()).unwrap();
        h.ledger.adjust_count_on_hand(id, 3, Utc::now()).unwrap();

        let published = h.events.drain();
        let seqs: Vec<u64> = published.iter().map(|e| e.sequence_number()).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert!(published.iter().all(|e| e.aggregate_type() == STOCK_ITEM_AGGREGATE));
        assert_eq!(published[3].event_type(), "inventory.stock_item.backorder_filled");
        assert_eq!(h.ledger.get(id).unwrap().unwrap().version(), 4);
    }

    #[test]
    fn every_change_strategy_touches_each_time() {
        let h = harness(InventoryCacheStrategy::EveryChange);
        let created = item(&h, false);
        let id = created.id_typed();
        assert_eq!(h.cache.touches(created.variant_id()), 1);

        h.ledger.adjust_count_on_hand(id, 3, Utc::now()).unwrap();
        h.ledger.adjust_count_on_hand(id, 2, Utc::now()).unwrap();
        assert_eq!(h.cache.touches(created.variant_id()), 3);
    }

    #[test]
    fn boundary_strategy_touches_only_on_stock_flips() {
        let h = harness(InventoryCacheStrategy::BoundaryCrossing);
        let created = item(&h, false);
        let id = created.id_typed();
        let variant = created.variant_id();
        assert_eq!(h.cache.touches(variant), 1);

        h.ledger.adjust_count_on_hand(id, 3, Utc::now()).unwrap();
        assert_eq!(h.cache.touches(variant), 2);
        h.ledger.adjust_count_on_hand(id, 6, Utc::now()).unwrap();
        assert_eq!(h.cache.touches(variant), 2);
        h.ledger.set_count_on_hand(id, 0, Utc::now()).unwrap();
        assert_eq!(h.cache.touches(variant), 3);
    }

    #[test]
    fn failed_changes_publish_and_touch_nothing() {
        let h = harness(InventoryCacheStrategy::EveryChange);
        let created = item(&h, false);
        h.events.drain();

        assert!(h.ledger.adjust_count_on_hand(created.id_typed(), -1, Utc::now()).is_err());
        assert!(h.events.drain().is_empty());
        assert_eq!(h.cache.touches(created.variant_id()), 1);
    }

    #[test]
    fn removed_items_release_their_row_locks() {
        let h = harness(InventoryCacheStrategy::EveryChange);
        for _ in 0..1000 {
            let id = item(&h, false).id_typed();
            h.ledger.adjust_count_on_hand(id, 1, Utc::now()).unwrap();
            h.ledger.remove_stock_item(id, Utc::now()).unwrap();
        }
        assert!(h.ledger.locks.is_empty());
    }

    #[derive(Debug)]
    struct DownBus;

    impl EventBus<EventEnvelope<JsonValue>> for DownBus {
        type Error = String;

        fn publish(&self, _message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
            Err("bus down".to_string())
        }

        fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
            let (_tx, rx) = std::sync::mpsc::channel();
            Subscription::new(rx)
        }
    }

    #[test]
    fn failed_publication_keeps_the_change_and_the_touch() {
        let cache = Arc::new(InMemoryVariantCache::new());
        let ledger = StockLedger::new(
            InMemoryStockStore::new(),
            DownBus,
            cache.clone(),
            InventoryCacheStrategy::EveryChange,
        );
        let key = StockItemKey::new(VariantId::new(), StockLocationId::new());

        let err = ledger
            .create_stock_item(key.variant_id, key.stock_location_id, false, Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::Publish(_)));
        assert_eq!(cache.touches(key.variant_id), 1);
        let id = ledger.find(key).unwrap().unwrap().id_typed();

        let err = ledger.adjust_count_on_hand(id, 4, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::Publish(_)));
        assert_eq!(ledger.count_on_hand(id).unwrap(), 4);
        assert_eq!(cache.touches(key.variant_id), 2);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn deltas() -> impl Strategy<Value = Vec<i64>> {
            prop::collection::vec((-40i64..40).prop_filter("non-zero", |d| *d != 0), 1..30)
        }

        proptest! {
            #[test]
            fn counts_queue_and_touches_follow_the_deltas(queued in 0usize..6, deltas in deltas()) {
                let h = harness(InventoryCacheStrategy::BoundaryCrossing);
                let created = item(&h, true);
                let id = created.id_typed();
                for _ in 0..queued {
                    h.ledger.backorder(id, unit(), Utc::now()).unwrap();
                }

                let mut count = 0i64;
                let mut pending = queued as i64;
                let mut crossings = 0u64;
                for delta in &deltas {
                    let next = h.ledger.adjust_count_on_hand(id, *delta, Utc::now()).unwrap();
                    prop_assert_eq!(next, count + delta);
                    if *delta > 0 {
                        pending -= (*delta).min(pending);
                    }
                    if (count > 0) != (next > 0) {
                        crossings += 1;
                    }
                    count = next;
                }

                let stored = h.ledger.get(id).unwrap().unwrap();
                prop_assert_eq!(stored.count_on_hand(), deltas.iter().sum::<i64>());
                prop_assert_eq!(stored.backorders().len() as i64, pending);
                prop_assert_eq!(h.cache.touches(created.variant_id()), 1 + crossings);

                let moved: i64 = h.ledger.movements(id).unwrap().iter().map(|m| m.quantity()).sum();
                prop_assert_eq!(moved, count);
            }
        }
    }
}
