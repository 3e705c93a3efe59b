//! Projection cursors: the last applied sequence number per
//! (projection, stream). Replays at or below the cursor are skipped, and a
//! cleared cursor set lets a projection rebuild from the first event.
//!
//! Postgres schema:
//!
//! ```sql
//! CREATE TABLE projection_offsets (
//!     aggregate_id         UUID NOT NULL,
//!     projection_name      TEXT NOT NULL,
//!     last_sequence_number BIGINT NOT NULL,
//!     updated_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     PRIMARY KEY (aggregate_id, projection_name)
//! );
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sqlx::{PgPool, Row};
use thiserror::Error;

use storefront_core::AggregateId;

use crate::event_store::postgres::runtime_handle;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorStoreError {
    #[error("cursor store lock poisoned")]
    LockPoisoned,

    #[error("cursor store unavailable: {0}")]
    Unavailable(String),
}

pub type CursorResult<T> = Result<T, CursorStoreError>;

pub trait ProjectionCursorStore: Send + Sync {
    fn get_cursor(&self, aggregate_id: AggregateId, projection_name: &str) -> CursorResult<Option<u64>>;

    fn update_cursor(
        &self,
        aggregate_id: AggregateId,
        projection_name: &str,
        sequence_number: u64,
    ) -> CursorResult<()>;

    /// Forget every cursor of one projection.
    fn clear_cursors(&self, projection_name: &str) -> CursorResult<()>;
}

impl<C> ProjectionCursorStore for Arc<C>
where
    C: ProjectionCursorStore + ?Sized,
{
    fn get_cursor(&self, aggregate_id: AggregateId, projection_name: &str) -> CursorResult<Option<u64>> {
        (**self).get_cursor(aggregate_id, projection_name)
    }

    fn update_cursor(
        &self,
        aggregate_id: AggregateId,
        projection_name: &str,
        sequence_number: u64,
    ) -> CursorResult<()> {
        (**self).update_cursor(aggregate_id, projection_name, sequence_number)
    }

    fn clear_cursors(&self, projection_name: &str) -> CursorResult<()> {
        (**self).clear_cursors(projection_name)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<(String, AggregateId), u64>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectionCursorStore for InMemoryCursorStore {
    fn get_cursor(&self, aggregate_id: AggregateId, projection_name: &str) -> CursorResult<Option<u64>> {
        let cursors = self.cursors.read().map_err(|_| CursorStoreError::LockPoisoned)?;
        Ok(cursors.get(&(projection_name.to_string(), aggregate_id)).copied())
    }

    fn update_cursor(
        &self,
        aggregate_id: AggregateId,
        projection_name: &str,
        sequence_number: u64,
    ) -> CursorResult<()> {
        let mut cursors = self.cursors.write().map_err(|_| CursorStoreError::LockPoisoned)?;
        cursors.insert((projection_name.to_string(), aggregate_id), sequence_number);
        Ok(())
    }

    fn clear_cursors(&self, projection_name: &str) -> CursorResult<()> {
        let mut cursors = self.cursors.write().map_err(|_| CursorStoreError::LockPoisoned)?;
        cursors.retain(|(name, _), _| name != projection_name);
        Ok(())
    }
}

/// Cursors in the `projection_offsets` table. Needs an entered tokio runtime.
#[derive(Debug, Clone)]
pub struct PostgresCursorStore {
    pool: Arc<PgPool>,
}

impl PostgresCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

fn unavailable(err: impl core::fmt::Display) -> CursorStoreError {
    CursorStoreError::Unavailable(err.to_string())
}

impl ProjectionCursorStore for PostgresCursorStore {
    fn get_cursor(&self, aggregate_id: AggregateId, projection_name: &str) -> CursorResult<Option<u64>> {
        let handle = runtime_handle().map_err(unavailable)?;
        let row = handle
            .block_on(async {
                sqlx::query(
                    r#"
                    SELECT last_sequence_number
                    FROM projection_offsets
                    WHERE aggregate_id = $1 AND projection_name = $2
                    "#,
                )
                .bind(aggregate_id.as_uuid())
                .bind(projection_name)
                .fetch_optional(&*self.pool)
                .await
            })
            .map_err(unavailable)?;

        row.map(|row| row.try_get::<i64, _>("last_sequence_number").map(|seq| seq as u64))
            .transpose()
            .map_err(unavailable)
    }

    fn update_cursor(
        &self,
        aggregate_id: AggregateId,
        projection_name: &str,
        sequence_number: u64,
    ) -> CursorResult<()> {
        let handle = runtime_handle().map_err(unavailable)?;
        handle
            .block_on(async {
                sqlx::query(
                    r#"
                    INSERT INTO projection_offsets (aggregate_id, projection_name, last_sequence_number)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (aggregate_id, projection_name)
                    DO UPDATE SET
                        last_sequence_number = EXCLUDED.last_sequence_number,
                        updated_at = NOW()
                    "#,
                )
                .bind(aggregate_id.as_uuid())
                .bind(projection_name)
                .bind(sequence_number as i64)
                .execute(&*self.pool)
                .await
            })
            .map_err(unavailable)?;
        Ok(())
    }

    fn clear_cursors(&self, projection_name: &str) -> CursorResult<()> {
        let handle = runtime_handle().map_err(unavailable)?;
        handle
            .block_on(async {
                sqlx::query("DELETE FROM projection_offsets WHERE projection_name = $1")
                    .bind(projection_name)
                    .execute(&*self.pool)
                    .await
            })
            .map_err(unavailable)?;
        Ok(())
    }
}
