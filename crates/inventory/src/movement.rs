use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use storefront_core::{DomainError, DomainResult, Entity};

use crate::stock_item::StockItemId;

/// Append-only record of a quantity change on a stock item.
///
/// Movements are never edited; a correction is a new movement with the
/// opposite sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    id: Uuid,
    stock_item_id: StockItemId,
    quantity: i64,
    originator: Option<String>,
    created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Quantity must be non-zero and fit in 32 bits.
    pub fn record(
        stock_item_id: StockItemId,
        quantity: i64,
        originator: Option<String>,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity == 0 {
            return Err(DomainError::validation("movement quantity cannot be zero"));
        }
        if i32::try_from(quantity).is_err() {
            return Err(DomainError::validation(format!(
                "movement quantity {quantity} is out of range"
            )));
        }
        Ok(Self {
            id: Uuid::now_v7(),
            stock_item_id,
            quantity,
            originator,
            created_at,
        })
    }

    /// Rebuild a movement read back from storage.
    pub fn restore(
        id: Uuid,
        stock_item_id: StockItemId,
        quantity: i64,
        originator: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            stock_item_id,
            quantity,
            originator,
            created_at,
        }
    }

    pub fn stock_item_id(&self) -> StockItemId {
        self.stock_item_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn originator(&self) -> Option<&str> {
        self.originator.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Entity for StockMovement {
    type Id = Uuid;

    fn id(&self) -> &Uuid {
        &self.id
    }
}
