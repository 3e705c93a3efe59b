//! Order management domain module.
//!
//! - [`Order`]: the aggregate (line items, shipments, payments, adjustments)
//! - [`checkout`]: the transition table and the named pre-transition steps
//! - [`updater`]: derived totals and the payment/shipment facets
//! - [`OrderLifecycle`]: transitions, finalization, cancel/approve/resume and
//!   the payment operations that need a [`PaymentGateway`]
//!
//! Pure domain logic. Persistence, locking and notification delivery live in
//! `storefront-infra`.

/// UUIDv7 identifier for an entity owned by an order.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            pub fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

pub mod address;
pub mod adjustment;
pub mod checkout;
pub mod gateway;
pub mod lifecycle;
pub mod line_item;
pub mod order;
pub mod payment;
pub mod shipment;
pub mod state;
pub mod updater;

#[cfg(test)]
pub(crate) mod fixtures;

pub use address::{Address, TaxZone, TaxZoneMatcher};
pub use adjustment::{
    Adjustable, Adjustment, AdjustmentDraft, AdjustmentId, AdjustmentSource, PromotionEngine,
    PromotionId, TaxCalculator,
};
pub use checkout::{CheckoutEvent, CheckoutPipeline, CheckoutStep, Guard, TRANSITIONS, Transition};
pub use gateway::{BogusGateway, GatewayError, GatewayOptions, GatewayResponse, PaymentGateway};
pub use lifecycle::{
    LifecycleConfig, LifecycleError, LifecycleResult, LineItemComparisonHook, NoticeKind,
    OrderDecision, OrderLifecycle, OrderNotice, UpdateHook,
};
pub use line_item::{LineItem, LineItemId, LineItemOptions};
pub use order::{
    AddAdjustment, AddPayment, AddShipment, CreateOrder, Order, OrderChange, OrderCommand,
    OrderEvent, OrderId, OrderTotals, SetAddresses, SetLineItemQuantity, StateChange,
    StateMachine,
};
pub use payment::{Payment, PaymentId, PaymentMethod, RISKY_AVS_CODES, Refund};
pub use shipment::{Shipment, ShipmentContext, ShipmentId};
pub use state::{OrderPaymentState, OrderShipmentState, OrderState, PaymentState, ShipmentState};
