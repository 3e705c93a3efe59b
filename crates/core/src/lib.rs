//! `storefront-core`: domain foundation for the storefront workspace.
//!
//! Pure domain primitives only: identifiers, money, the error taxonomy and the
//! aggregate contract shared by orders and stock. No IO lives here.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, StockLocationId, UserId, VariantId};
pub use money::{Money, MoneySign, MONEY_THRESHOLD};
pub use value_object::ValueObject;
