//! Stock keeping domain module.
//!
//! Business rules for per-(variant, location) stock: count validation,
//! backorder fulfillment order, availability and cache-touch policy. Pure
//! domain logic; locking and persistence live in `storefront-infra`.

pub mod backorder;
pub mod cache;
pub mod movement;
pub mod stock_item;

pub use backorder::{BackorderQueue, BackorderedUnit};
pub use cache::{InventoryCacheStrategy, in_stock};
pub use movement::StockMovement;
pub use stock_item::{
    AdjustCountOnHand, BackorderFilled, BackorderQueued, BackorderableChanged, CountOnHandAdjusted,
    CountOnHandSet, CreateStockItem, DiscardStockItem, QueueBackorder, ReduceCountOnHandToZero,
    SetBackorderable, SetCountOnHand, StockCommand, StockEvent, StockItem, StockItemCreated,
    StockItemDiscarded, StockItemId, StockItemKey, validate_count_change,
};
