use chrono::{DateTime, Utc};

/// A typed domain event.
///
/// Events are immutable facts, versioned for schema evolution and only ever
/// appended. Order and stock events both implement this so the same store,
/// envelope and bus code carries them.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "orders.order.completed").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
