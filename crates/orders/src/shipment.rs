use serde::{Deserialize, Serialize};

use storefront_core::{Entity, Money, StockLocationId};

use crate::state::ShipmentState;

entity_id! {
    /// Shipment identifier.
    ShipmentId
}

/// What a shipment needs to know about its order to settle its own state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ShipmentContext {
    pub order_canceled: bool,
    pub order_can_ship: bool,
    pub order_paid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    id: ShipmentId,
    stock_location_id: StockLocationId,
    state: ShipmentState,
    /// Cost of the selected shipping rate; `None` until a rate is available.
    cost: Option<Money>,
    backordered: bool,
}

impl Shipment {
    pub fn new(
        id: ShipmentId,
        stock_location_id: StockLocationId,
        cost: Option<Money>,
        backordered: bool,
    ) -> Self {
        Self {
            id,
            stock_location_id,
            state: ShipmentState::Pending,
            cost,
            backordered,
        }
    }

    pub fn stock_location_id(&self) -> StockLocationId {
        self.stock_location_id
    }

    pub fn state(&self) -> ShipmentState {
        self.state
    }

    pub fn cost(&self) -> Option<Money> {
        self.cost
    }

    pub fn has_shipping_rate(&self) -> bool {
        self.cost.is_some()
    }

    pub fn is_backordered(&self) -> bool {
        self.backordered
    }

    /// The state this shipment should be in given its order.
    ///
    /// Checked in order: canceled order, order not shippable or units on
    /// backorder, already shipped, then ready once the order is paid.
    pub fn determine_state(&self, ctx: &ShipmentContext) -> ShipmentState {
        if ctx.order_canceled {
            return ShipmentState::Canceled;
        }
        if !ctx.order_can_ship || self.backordered {
            return ShipmentState::Pending;
        }
        if self.state == ShipmentState::Shipped {
            return ShipmentState::Shipped;
        }
        if ctx.order_paid {
            ShipmentState::Ready
        } else {
            ShipmentState::Pending
        }
    }

    pub(crate) fn set_state(&mut self, state: ShipmentState) {
        self.state = state;
    }
}

impl Entity for Shipment {
    type Id = ShipmentId;

    fn id(&self) -> &ShipmentId {
        &self.id
    }
}
