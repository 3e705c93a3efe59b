use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use storefront_core::{StockLocationId, VariantId};
use storefront_events::EventEnvelope;
use storefront_inventory::{StockEvent, StockItemId};

use super::cursor_store::{CursorStoreError, ProjectionCursorStore};
use crate::read_model::{KeyValueStore, ReadModelError};
use crate::stock_ledger::STOCK_ITEM_AGGREGATE;

pub const STOCK_LEVELS_PROJECTION: &str = "stock_levels";

/// Stock on hand for one variant, across its live stock items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantStockLevel {
    pub variant_id: VariantId,
    pub total_on_hand: i64,
    pub backorderable: bool,
    pub locations: BTreeMap<StockLocationId, i64>,
}

#[derive(Debug, Clone, Copy)]
struct ItemLevel {
    variant_id: VariantId,
    stock_location_id: StockLocationId,
    count_on_hand: i64,
    backorderable: bool,
}

#[derive(Debug, Error)]
pub enum StockLevelsProjectionError {
    #[error("failed to deserialize stock event: {0}")]
    Deserialize(String),

    #[error("event for stock item {event} arrived on stream {stream}")]
    StreamMismatch { stream: String, event: StockItemId },

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("event for unknown stock item {0}")]
    UnknownItem(StockItemId),

    #[error("stock levels lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Cursor(#[from] CursorStoreError),

    #[error(transparent)]
    ReadModel(#[from] ReadModelError),
}

/// Per-variant stock levels built from published stock item envelopes.
///
/// Envelopes of other aggregate types are ignored. Each stream is applied
/// in sequence order; anything at or below the stream cursor is a replay and
/// is skipped.
#[derive(Debug)]
pub struct StockLevelsProjection<S, C> {
    store: S,
    cursors: C,
    items: RwLock<HashMap<StockItemId, ItemLevel>>,
}

impl<S, C> StockLevelsProjection<S, C>
where
    S: KeyValueStore<VariantId, VariantStockLevel>,
    C: ProjectionCursorStore,
{
    pub fn new(store: S, cursors: C) -> Self {
        Self {
            store,
            cursors,
            items: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, variant_id: VariantId) -> Option<VariantStockLevel> {
        self.store.get(&variant_id)
    }

    pub fn list(&self) -> Vec<VariantStockLevel> {
        self.store.list()
    }

    pub fn total_on_hand(&self, variant_id: VariantId) -> i64 {
        self.get(variant_id).map_or(0, |level| level.total_on_hand)
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), StockLevelsProjectionError> {
        if envelope.aggregate_type() != STOCK_ITEM_AGGREGATE {
            return Ok(());
        }
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut items = self
            .items
            .write()
            .map_err(|_| StockLevelsProjectionError::LockPoisoned)?;

        let last = self
            .cursors
            .get_cursor(aggregate_id, STOCK_LEVELS_PROJECTION)?
            .unwrap_or(0);
        if seq == 0 {
            return Err(StockLevelsProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 {
            return Err(StockLevelsProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: StockEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| StockLevelsProjectionError::Deserialize(e.to_string()))?;
        let item_id = event.stock_item_id();
        if item_id.0 != aggregate_id {
            return Err(StockLevelsProjectionError::StreamMismatch {
                stream: aggregate_id.to_string(),
                event: item_id,
            });
        }

        let variant_id = match event {
            StockEvent::Created(e) => {
                items.insert(
                    item_id,
                    ItemLevel {
                        variant_id: e.variant_id,
                        stock_location_id: e.stock_location_id,
                        count_on_hand: 0,
                        backorderable: e.backorderable,
                    },
                );
                e.variant_id
            }
            StockEvent::Adjusted(e) => {
                let level = items.get_mut(&item_id).ok_or(StockLevelsProjectionError::UnknownItem(item_id))?;
                level.count_on_hand = e.count_on_hand;
                level.variant_id
            }
            StockEvent::Set(e) => {
                let level = items.get_mut(&item_id).ok_or(StockLevelsProjectionError::UnknownItem(item_id))?;
                level.count_on_hand = e.count_on_hand;
                level.variant_id
            }
            StockEvent::BackorderableChanged(e) => {
                let level = items.get_mut(&item_id).ok_or(StockLevelsProjectionError::UnknownItem(item_id))?;
                level.backorderable = e.backorderable;
                level.variant_id
            }
            StockEvent::Discarded(_) => {
                let level = items.remove(&item_id).ok_or(StockLevelsProjectionError::UnknownItem(item_id))?;
                level.variant_id
            }
            // Queue changes leave counts alone; the fill's count arrives in the preceding adjustment.
            StockEvent::BackorderQueued(_) | StockEvent::BackorderFilled(_) => {
                let level = items.get(&item_id).ok_or(StockLevelsProjectionError::UnknownItem(item_id))?;
                level.variant_id
            }
        };

        self.refresh_variant(&items, variant_id)?;
        self.cursors.update_cursor(aggregate_id, STOCK_LEVELS_PROJECTION, seq)?;
        Ok(())
    }

    fn refresh_variant(
        &self,
        items: &HashMap<StockItemId, ItemLevel>,
        variant_id: VariantId,
    ) -> Result<(), StockLevelsProjectionError> {
        let mut level = VariantStockLevel {
            variant_id,
            total_on_hand: 0,
            backorderable: false,
            locations: BTreeMap::new(),
        };
        let mut live = 0usize;
        for item in items.values().filter(|item| item.variant_id == variant_id) {
            live += 1;
            level.total_on_hand = level.total_on_hand.saturating_add(item.count_on_hand);
            level.backorderable |= item.backorderable;
            *level.locations.entry(item.stock_location_id).or_insert(0) += item.count_on_hand;
        }

        if live == 0 {
            self.store.remove(&variant_id)?;
        } else {
            self.store.upsert(variant_id, level)?;
        }
        Ok(())
    }

    /// Drop everything and replay `envelopes` in (stream, sequence) order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), StockLevelsProjectionError> {
        self.items
            .write()
            .map_err(|_| StockLevelsProjectionError::LockPoisoned)?
            .clear();
        self.cursors.clear_cursors(STOCK_LEVELS_PROJECTION)?;
        self.store.clear()?;

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid().as_bytes(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
