//! State enums for orders, payments and shipments.
//!
//! Every enum round-trips through its snake_case text form; parsing unknown
//! text is a validation error rather than a silent default.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use storefront_core::DomainError;

macro_rules! state_enum {
    ($(#[$meta:meta])* $name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(DomainError::validation(format!(
                        "'{other}' is not a valid {}",
                        $label
                    ))),
                }
            }
        }
    };
}

state_enum! {
    /// Checkout and post-checkout states of an order.
    OrderState, "order state" {
        Cart => "cart",
        Address => "address",
        Delivery => "delivery",
        Payment => "payment",
        Confirm => "confirm",
        Complete => "complete",
        Canceled => "canceled",
        Resumed => "resumed",
        AwaitingReturn => "awaiting_return",
        Returned => "returned",
    }
}

state_enum! {
    /// Order-level payment facet, derived from payments and the outstanding balance.
    OrderPaymentState, "payment state" {
        BalanceDue => "balance_due",
        CreditOwed => "credit_owed",
        Failed => "failed",
        Paid => "paid",
        Void => "void",
    }
}

state_enum! {
    /// Order-level shipment facet, aggregated from the shipments.
    OrderShipmentState, "shipment state" {
        Backorder => "backorder",
        Canceled => "canceled",
        Partial => "partial",
        Pending => "pending",
        Ready => "ready",
        Shipped => "shipped",
        Arrived => "arrived",
        Done => "done",
    }
}

state_enum! {
    /// State of a single payment.
    PaymentState, "payment state" {
        Checkout => "checkout",
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Void => "void",
        Invalid => "invalid",
    }
}

state_enum! {
    /// State of a single shipment.
    ShipmentState, "shipment state" {
        Pending => "pending",
        Ready => "ready",
        Shipped => "shipped",
        Canceled => "canceled",
        Arrived => "arrived",
        Done => "done",
    }
}

impl From<ShipmentState> for OrderShipmentState {
    fn from(value: ShipmentState) -> Self {
        match value {
            ShipmentState::Pending => OrderShipmentState::Pending,
            ShipmentState::Ready => OrderShipmentState::Ready,
            ShipmentState::Shipped => OrderShipmentState::Shipped,
            ShipmentState::Canceled => OrderShipmentState::Canceled,
            ShipmentState::Arrived => OrderShipmentState::Arrived,
            ShipmentState::Done => OrderShipmentState::Done,
        }
    }
}

impl OrderState {
    /// States from which shipments may be released.
    pub fn can_ship(self) -> bool {
        matches!(
            self,
            OrderState::Complete
                | OrderState::Resumed
                | OrderState::AwaitingReturn
                | OrderState::Returned
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_forms_round_trip() {
        for s in OrderState::ALL {
            assert_eq!(s.as_str().parse::<OrderState>().unwrap(), *s);
        }
        for s in OrderShipmentState::ALL {
            assert_eq!(s.to_string().parse::<OrderShipmentState>().unwrap(), *s);
        }
        assert_eq!(
            serde_json::to_string(&OrderPaymentState::CreditOwed).unwrap(),
            "\"credit_owed\""
        );
    }

    #[test]
    fn unknown_text_is_a_validation_error() {
        match "shipped-ish".parse::<OrderShipmentState>() {
            Err(DomainError::Validation(msg)) => assert!(msg.contains("shipment state")),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!("".parse::<PaymentState>().is_err());
    }

    #[test]
    fn only_post_checkout_states_can_ship() {
        let shippable: Vec<_> = OrderState::ALL.iter().filter(|s| s.can_ship()).collect();
        assert_eq!(
            shippable,
            vec![
                &OrderState::Complete,
                &OrderState::Resumed,
                &OrderState::AwaitingReturn,
                &OrderState::Returned
            ]
        );
    }
}
