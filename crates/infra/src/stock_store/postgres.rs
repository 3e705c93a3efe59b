//! Postgres-backed stock rows.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE stock_items (
//!     id                UUID PRIMARY KEY,
//!     variant_id        UUID NOT NULL,
//!     stock_location_id UUID NOT NULL,
//!     count_on_hand     BIGINT NOT NULL,
//!     discarded         BOOLEAN NOT NULL DEFAULT FALSE,
//!     version           BIGINT NOT NULL,
//!     state             JSONB NOT NULL,
//!     updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! CREATE UNIQUE INDEX stock_items_live_key_idx
//!     ON stock_items (variant_id, stock_location_id) WHERE NOT discarded;
//!
//! CREATE TABLE stock_movements (
//!     id            UUID PRIMARY KEY,
//!     stock_item_id UUID NOT NULL REFERENCES stock_items (id),
//!     quantity      INT NOT NULL CHECK (quantity <> 0),
//!     originator    TEXT,
//!     created_at    TIMESTAMPTZ NOT NULL
//! );
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use storefront_core::{AggregateRoot, DomainResult, Entity};
use storefront_inventory::{StockItem, StockItemId, StockItemKey, StockMovement};

use super::{StockStore, StockStoreError, StockUpdate};
use crate::event_store::postgres::runtime_handle;

/// Stock rows in Postgres. `update` holds `SELECT ... FOR UPDATE` on the row
/// for the whole read/decide/write sequence.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    #[instrument(skip(self, item), fields(stock_item_id = %item.id_typed()), err)]
    pub async fn insert_row(&self, item: &StockItem) -> Result<(), StockStoreError> {
        let state = encode_state(item)?;
        sqlx::query(
            r#"
            INSERT INTO stock_items (
                id,
                variant_id,
                stock_location_id,
                count_on_hand,
                discarded,
                version,
                state
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(item.id_typed().0.as_uuid())
        .bind(item.variant_id().as_uuid())
        .bind(item.stock_location_id().as_uuid())
        .bind(item.count_on_hand())
        .bind(item.is_discarded())
        .bind(item.version() as i64)
        .bind(&state)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_stock_item", e))?;
        Ok(())
    }

    #[instrument(skip(self, decide), fields(stock_item_id = %id), err)]
    pub async fn update_row<F>(&self, id: StockItemId, decide: F) -> Result<StockUpdate, StockStoreError>
    where
        F: FnOnce(&StockItem) -> DomainResult<StockUpdate>,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query("SELECT state FROM stock_items WHERE id = $1 FOR UPDATE")
            .bind(id.0.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_stock_item", e))?;
        let Some(row) = row else {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StockStoreError::NotFound(id));
        };
        let current = decode_state(&row)?;

        let update = match decide(&current) {
            Ok(update) => update,
            Err(err) => {
                tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(err.into());
            }
        };
        if update.is_noop() {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(update);
        }

        write_row(&mut tx, &update.item).await?;
        if let Some(movement) = &update.movement {
            insert_movement(&mut tx, movement).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(update)
    }

    pub async fn fetch_row(&self, id: StockItemId) -> Result<Option<StockItem>, StockStoreError> {
        let row = sqlx::query("SELECT state FROM stock_items WHERE id = $1")
            .bind(id.0.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_stock_item", e))?;
        row.as_ref().map(decode_state).transpose()
    }

    pub async fn fetch_by_key(&self, key: StockItemKey) -> Result<Option<StockItem>, StockStoreError> {
        let row = sqlx::query(
            r#"
            SELECT state
            FROM stock_items
            WHERE variant_id = $1 AND stock_location_id = $2 AND NOT discarded
            "#,
        )
        .bind(key.variant_id.as_uuid())
        .bind(key.stock_location_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_stock_item", e))?;
        row.as_ref().map(decode_state).transpose()
    }

    pub async fn fetch_movements(&self, id: StockItemId) -> Result<Vec<StockMovement>, StockStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, quantity, originator, created_at
            FROM stock_movements
            WHERE stock_item_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(id.0.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_stock_movements", e))?;

        rows.iter()
            .map(|row| {
                let decode = |e: sqlx::Error| StockStoreError::Backend(format!("failed to decode movement row: {e}"));
                let movement_id: uuid::Uuid = row.try_get("id").map_err(decode)?;
                let quantity: i32 = row.try_get("quantity").map_err(decode)?;
                let originator: Option<String> = row.try_get("originator").map_err(decode)?;
                let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
                Ok(StockMovement::restore(movement_id, id, i64::from(quantity), originator, created_at))
            })
            .collect()
    }
}

async fn write_row(tx: &mut Transaction<'_, Postgres>, item: &StockItem) -> Result<(), StockStoreError> {
    let state = encode_state(item)?;
    sqlx::query(
        r#"
        UPDATE stock_items
        SET count_on_hand = $2,
            discarded = $3,
            version = $4,
            state = $5,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(item.id_typed().0.as_uuid())
    .bind(item.count_on_hand())
    .bind(item.is_discarded())
    .bind(item.version() as i64)
    .bind(&state)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_stock_item", e))?;
    Ok(())
}

async fn insert_movement(tx: &mut Transaction<'_, Postgres>, movement: &StockMovement) -> Result<(), StockStoreError> {
    let quantity = i32::try_from(movement.quantity())
        .map_err(|_| StockStoreError::Backend(format!("movement quantity {} overflows INT", movement.quantity())))?;
    sqlx::query(
        r#"
        INSERT INTO stock_movements (id, stock_item_id, quantity, originator, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(movement.id())
    .bind(movement.stock_item_id().0.as_uuid())
    .bind(quantity)
    .bind(movement.originator())
    .bind(movement.created_at())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_stock_movement", e))?;
    Ok(())
}

fn encode_state(item: &StockItem) -> Result<serde_json::Value, StockStoreError> {
    serde_json::to_value(item).map_err(|e| StockStoreError::Backend(format!("failed to encode stock item: {e}")))
}

fn decode_state(row: &sqlx::postgres::PgRow) -> Result<StockItem, StockStoreError> {
    let state: serde_json::Value = row
        .try_get("state")
        .map_err(|e| StockStoreError::Backend(format!("failed to read stock item state: {e}")))?;
    serde_json::from_value(state).map_err(|e| StockStoreError::Backend(format!("failed to decode stock item: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StockStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StockStoreError::Conflict(msg),
                _ => StockStoreError::Backend(msg),
            }
        }
        other => StockStoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

impl StockStore for PostgresStockStore {
    fn insert(&self, item: &StockItem) -> Result<(), StockStoreError> {
        runtime_handle()
            .map_err(StockStoreError::Backend)?
            .block_on(self.insert_row(item))
    }

    fn update<F>(&self, id: StockItemId, decide: F) -> Result<StockUpdate, StockStoreError>
    where
        F: FnOnce(&StockItem) -> DomainResult<StockUpdate>,
    {
        runtime_handle()
            .map_err(StockStoreError::Backend)?
            .block_on(self.update_row(id, decide))
    }

    fn get(&self, id: StockItemId) -> Result<Option<StockItem>, StockStoreError> {
        runtime_handle()
            .map_err(StockStoreError::Backend)?
            .block_on(self.fetch_row(id))
    }

    fn find_by_key(&self, key: StockItemKey) -> Result<Option<StockItem>, StockStoreError> {
        runtime_handle()
            .map_err(StockStoreError::Backend)?
            .block_on(self.fetch_by_key(key))
    }

    fn movements(&self, id: StockItemId) -> Result<Vec<StockMovement>, StockStoreError> {
        runtime_handle()
            .map_err(StockStoreError::Backend)?
            .block_on(self.fetch_movements(id))
    }
}

