//! Row storage for stock items and their movements.
//!
//! Unlike orders, stock items are kept as mutable rows: each change is read,
//! decided and written under an exclusive lock on the row, so concurrent
//! adjustments compose instead of failing on a version check.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use thiserror::Error;

use storefront_core::{DomainError, DomainResult};
use storefront_inventory::{StockEvent, StockItem, StockItemId, StockItemKey, StockMovement};

use crate::row_lock::LockPoisoned;

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;

/// Result of deciding a change on one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockUpdate {
    /// The row after every event was applied.
    pub item: StockItem,
    pub events: Vec<StockEvent>,
    pub movement: Option<StockMovement>,
}

impl StockUpdate {
    /// Leaves the row as it was.
    pub fn unchanged(item: &StockItem) -> Self {
        Self {
            item: item.clone(),
            events: Vec::new(),
            movement: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum StockStoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("stock item {0} not found")]
    NotFound(StockItemId),

    /// A live item already exists for the (variant, location) pair.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error(transparent)]
    LockPoisoned(#[from] LockPoisoned),
}

pub trait StockStore: Send + Sync {
    /// Store a freshly created item. Fails with `Conflict` when a live item
    /// already holds the same key.
    fn insert(&self, item: &StockItem) -> Result<(), StockStoreError>;

    /// Read the row under an exclusive lock, let `decide` compute the change,
    /// then persist the new row and the movement before releasing the lock.
    /// Nothing is written when `decide` fails or returns a no-op.
    fn update<F>(&self, id: StockItemId, decide: F) -> Result<StockUpdate, StockStoreError>
    where
        F: FnOnce(&StockItem) -> DomainResult<StockUpdate>;

    /// Discarded rows are still returned here.
    fn get(&self, id: StockItemId) -> Result<Option<StockItem>, StockStoreError>;

    /// The live (not discarded) item for a key.
    fn find_by_key(&self, key: StockItemKey) -> Result<Option<StockItem>, StockStoreError>;

    /// Movements of one item, oldest first.
    fn movements(&self, id: StockItemId) -> Result<Vec<StockMovement>, StockStoreError>;
}

impl<S> StockStore for Arc<S>
where
    S: StockStore,
{
    fn insert(&self, item: &StockItem) -> Result<(), StockStoreError> {
        (**self).insert(item)
    }

    fn update<F>(&self, id: StockItemId, decide: F) -> Result<StockUpdate, StockStoreError>
    where
        F: FnOnce(&StockItem) -> DomainResult<StockUpdate>,
    {
        (**self).update(id, decide)
    }

    fn get(&self, id: StockItemId) -> Result<Option<StockItem>, StockStoreError> {
        (**self).get(id)
    }

    fn find_by_key(&self, key: StockItemKey) -> Result<Option<StockItem>, StockStoreError> {
        (**self).find_by_key(key)
    }

    fn movements(&self, id: StockItemId) -> Result<Vec<StockMovement>, StockStoreError> {
        (**self).movements(id)
    }
}
