//! Builders shared by the unit tests of this crate.
//!
//! `emit` applies a change directly, skipping `handle`, so tests can put an
//! order into any shape without walking the whole checkout.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;

use storefront_core::{Aggregate, AggregateId, Money, StockLocationId, VariantId};

use crate::address::{Address, TaxZone, TaxZoneMatcher};
use crate::line_item::{LineItem, LineItemId, LineItemOptions};
use crate::order::{Order, OrderChange, OrderId};
use crate::payment::{Payment, PaymentId, PaymentMethod};
use crate::shipment::{Shipment, ShipmentId};
use crate::state::PaymentState;

pub fn new_order() -> Order {
    let mut order = Order::empty(OrderId::new(AggregateId::new()));
    emit(
        &mut order,
        OrderChange::Created {
            number: "R123456789".into(),
            user_id: None,
        },
    );
    order
}

pub fn emit(order: &mut Order, change: OrderChange) {
    let ev = order.event(Utc::now(), change);
    order.apply(&ev);
}

pub fn add_line_item(order: &mut Order, price_cents: i64, quantity: i64) -> LineItemId {
    let id = LineItemId::new();
    let line_item = LineItem::new(
        id,
        VariantId::new(),
        quantity,
        Money::from_cents(price_cents),
        LineItemOptions::new(),
    )
    .unwrap();
    emit(order, OrderChange::LineItemAdded { line_item });
    id
}

pub fn add_shipment(order: &mut Order, cost_cents: Option<i64>) -> ShipmentId {
    let id = ShipmentId::new();
    let shipment = Shipment::new(id, StockLocationId::new(), cost_cents.map(Money::from_cents), false);
    emit(order, OrderChange::ShipmentAdded { shipment });
    id
}

pub fn add_backordered_shipment(order: &mut Order) -> ShipmentId {
    let id = ShipmentId::new();
    let shipment = Shipment::new(id, StockLocationId::new(), Some(Money::ZERO), true);
    emit(order, OrderChange::ShipmentAdded { shipment });
    id
}

pub fn method() -> PaymentMethod {
    PaymentMethod::new("credit card")
}

pub fn add_payment_with(order: &mut Order, cents: i64, source: &str, method: PaymentMethod) -> PaymentId {
    let id = PaymentId::new();
    let payment = Payment::new(id, Money::from_cents(cents), method, source).unwrap();
    emit(order, OrderChange::PaymentAdded { payment });
    id
}

pub fn add_payment(order: &mut Order, cents: i64, source: &str) -> PaymentId {
    add_payment_with(order, cents, source, method())
}

pub fn complete_payment(order: &mut Order, payment_id: PaymentId) {
    emit(
        order,
        OrderChange::PaymentUpdated {
            payment_id,
            state: PaymentState::Completed,
            response_code: Some("BOGUS-0".into()),
            avs_result: None,
            cvv_result: None,
        },
    );
}

pub fn address(country_iso: &str) -> Address {
    Address {
        full_name: "Ada Lovelace".into(),
        line1: "12 Analytical Row".into(),
        city: "London".into(),
        zipcode: "N1 9GU".into(),
        country_iso: country_iso.into(),
        state_code: None,
    }
}

/// Zone per country; counts how often it is asked.
#[derive(Debug, Default)]
pub struct CountingZones {
    calls: AtomicUsize,
}

impl CountingZones {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TaxZoneMatcher for CountingZones {
    fn match_zone(&self, address: &Address) -> Option<TaxZone> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(TaxZone::new(address.country_iso.clone()))
    }

    fn default_tax_zone(&self) -> Option<TaxZone> {
        Some(TaxZone::new("GLOBAL"))
    }
}
