//! Value object trait: equality by value, not identity.
//!
//! Amounts, addresses and line-item option sets are value objects: two with the
//! same attributes are interchangeable. To "modify" one, build a new one.

/// Marker trait for value objects.
///
/// Requires `Clone + PartialEq + Debug`; implementors should also be immutable
/// after construction.
///
/// ```
/// use storefront_core::{Money, ValueObject};
///
/// fn same<V: ValueObject>(a: &V, b: &V) -> bool {
///     a == b
/// }
///
/// assert!(same(&Money::from_cents(100), &Money::from_cents(100)));
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
