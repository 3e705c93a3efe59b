use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use storefront_core::DomainResult;
use storefront_inventory::{StockItem, StockItemId, StockItemKey, StockMovement};

use super::{StockStore, StockStoreError, StockUpdate};
use crate::row_lock::LockPoisoned;

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<StockItemId, Arc<Mutex<StockItem>>>,
    live_keys: HashMap<StockItemKey, StockItemId>,
}

/// In-memory stock rows, each behind its own mutex.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    tables: RwLock<Tables>,
    movements: Mutex<HashMap<StockItemId, Vec<StockMovement>>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, id: StockItemId) -> Result<Arc<Mutex<StockItem>>, StockStoreError> {
        let tables = self.tables.read().map_err(|_| poisoned("stock tables"))?;
        tables.rows.get(&id).cloned().ok_or(StockStoreError::NotFound(id))
    }
}

fn poisoned(what: &str) -> StockStoreError {
    StockStoreError::LockPoisoned(LockPoisoned(what.to_string()))
}

impl StockStore for InMemoryStockStore {
    fn insert(&self, item: &StockItem) -> Result<(), StockStoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned("stock tables"))?;
        let id = item.id_typed();
        if tables.rows.contains_key(&id) {
            return Err(StockStoreError::Conflict(format!("stock item {id} already exists")));
        }
        if let Some(existing) = tables.live_keys.get(&item.key()) {
            return Err(StockStoreError::Conflict(format!(
                "stock item {existing} already stocks {}",
                item.key()
            )));
        }
        tables.live_keys.insert(item.key(), id);
        tables.rows.insert(id, Arc::new(Mutex::new(item.clone())));
        Ok(())
    }

    fn update<F>(&self, id: StockItemId, decide: F) -> Result<StockUpdate, StockStoreError>
    where
        F: FnOnce(&StockItem) -> DomainResult<StockUpdate>,
    {
        let row = self.row(id)?;
        let mut current = row.lock().map_err(|_| poisoned("stock row"))?;

        let update = decide(&current)?;
        if update.is_noop() {
            return Ok(update);
        }

        if let Some(movement) = &update.movement {
            let mut movements = self.movements.lock().map_err(|_| poisoned("stock movements"))?;
            movements.entry(id).or_default().push(movement.clone());
        }
        if update.item.is_discarded() && !current.is_discarded() {
            let mut tables = self.tables.write().map_err(|_| poisoned("stock tables"))?;
            if tables.live_keys.get(&current.key()) == Some(&id) {
                tables.live_keys.remove(&current.key());
            }
        }
        *current = update.item.clone();

        Ok(update)
    }

    fn get(&self, id: StockItemId) -> Result<Option<StockItem>, StockStoreError> {
        let row = match self.row(id) {
            Ok(row) => row,
            Err(StockStoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let item = row.lock().map_err(|_| poisoned("stock row"))?;
        Ok(Some(item.clone()))
    }

    fn find_by_key(&self, key: StockItemKey) -> Result<Option<StockItem>, StockStoreError> {
        let id = {
            let tables = self.tables.read().map_err(|_| poisoned("stock tables"))?;
            tables.live_keys.get(&key).copied()
        };
        match id {
            Some(id) => self.get(id),
            None => Ok(None),
        }
    }

    fn movements(&self, id: StockItemId) -> Result<Vec<StockMovement>, StockStoreError> {
        let movements = self.movements.lock().map_err(|_| poisoned("stock movements"))?;
        Ok(movements.get(&id).cloned().unwrap_or_default())
    }
}
