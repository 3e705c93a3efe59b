//! Read model builders fed by published envelopes.
//!
//! Projections are rebuildable from the event stream and idempotent under
//! at-least-once delivery: each keeps a per-stream cursor and skips replays.

pub mod cursor_store;
pub mod stock_levels;

pub use cursor_store::{
    CursorStoreError, InMemoryCursorStore, PostgresCursorStore, ProjectionCursorStore,
};
pub use stock_levels::{
    STOCK_LEVELS_PROJECTION, StockLevelsProjection, StockLevelsProjectionError, VariantStockLevel,
};
