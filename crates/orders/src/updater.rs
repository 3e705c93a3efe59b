//! Derived order values: totals, the payment facet and the shipment facet.
//!
//! Everything here is a pure function of the order's children. Totals are
//! recomputed by `Order::apply`; the facets are recorded as events by the
//! lifecycle when an order is finalized or updated.

use std::collections::BTreeSet;

use storefront_core::{DomainError, DomainResult, Money, MoneySign};

use crate::adjustment::Adjustment;
use crate::order::{Order, OrderTotals};
use crate::payment::Payment;
use crate::shipment::{Shipment, ShipmentContext};
use crate::state::{OrderPaymentState, OrderShipmentState};

const MAX_ITEM_COUNT: i64 = 1 << 31;

fn sum(amounts: impl Iterator<Item = Money>) -> Money {
    amounts.fold(Money::ZERO, Money::saturating_add)
}

pub fn compute_totals(order: &Order) -> OrderTotals {
    let item_total = sum(order.line_items().iter().map(|li| li.amount()));
    let item_count = order
        .line_items()
        .iter()
        .fold(0_i64, |acc, li| acc.saturating_add(li.quantity()));
    let shipment_total = sum(order.shipments().iter().filter_map(Shipment::cost));
    let payment_total = sum(
        order
            .payments()
            .iter()
            .filter(|p| p.is_completed())
            .map(Payment::credit_allowed),
    );

    let eligible = || order.adjustments().iter().filter(|a| a.is_eligible());
    let promo_total = sum(eligible().filter(|a| a.is_promotion()).map(Adjustment::amount));
    let included_tax_total = sum(
        eligible()
            .filter(|a| a.is_tax() && a.is_included())
            .map(Adjustment::amount),
    );
    let additional_tax_total = sum(
        eligible()
            .filter(|a| a.is_tax() && !a.is_included())
            .map(Adjustment::amount),
    );
    let adjustment_total = sum(eligible().filter(|a| !a.is_included()).map(Adjustment::amount));

    let total = item_total
        .saturating_add(shipment_total)
        .saturating_add(adjustment_total);

    OrderTotals {
        item_total,
        adjustment_total,
        included_tax_total,
        additional_tax_total,
        shipment_total,
        promo_total,
        payment_total,
        total,
        item_count,
    }
}

/// Amount still owed by the customer; negative when the store owes money back.
pub fn outstanding_balance(order: &Order) -> Money {
    let totals = order.totals();
    if order.is_canceled() {
        return -totals.payment_total;
    }
    let refunds = order.refund_total();
    if refunds.is_zero() {
        totals.total - totals.payment_total
    } else {
        totals.total - (totals.payment_total + refunds)
    }
}

pub fn payment_state(order: &Order) -> OrderPaymentState {
    let payments = order.payments();
    let balance = outstanding_balance(order);

    if !payments.is_empty() && !payments.iter().any(Payment::is_valid) && !balance.is_zero() {
        return OrderPaymentState::Failed;
    }
    if order.is_canceled() && order.payment_total().is_zero() {
        return OrderPaymentState::Void;
    }
    if balance.is_positive() {
        OrderPaymentState::BalanceDue
    } else if balance.is_negative() {
        OrderPaymentState::CreditOwed
    } else {
        OrderPaymentState::Paid
    }
}

/// Summary of all shipment states; `None` when there are no shipments.
pub fn shipment_state(shipments: &[Shipment]) -> Option<OrderShipmentState> {
    if shipments.iter().any(Shipment::is_backordered) {
        return Some(OrderShipmentState::Backorder);
    }
    let states: BTreeSet<&'static str> = shipments.iter().map(|s| s.state().as_str()).collect();
    match states.len() {
        0 => None,
        1 => shipments.first().map(|s| s.state().into()),
        _ => Some(OrderShipmentState::Partial),
    }
}

pub fn shipment_context(order: &Order) -> ShipmentContext {
    ShipmentContext {
        order_canceled: order.is_canceled(),
        order_can_ship: order.can_ship(),
        order_paid: order.is_paid(),
    }
}

/// Every persisted order must pass this.
pub fn validate_totals(order: &Order) -> DomainResult<()> {
    let t = order.totals();
    t.item_total.validate("item_total", MoneySign::NonNegative)?;
    t.adjustment_total.validate("adjustment_total", MoneySign::Any)?;
    t.included_tax_total
        .validate("included_tax_total", MoneySign::NonNegative)?;
    t.additional_tax_total
        .validate("additional_tax_total", MoneySign::NonNegative)?;
    t.shipment_total.validate("shipment_total", MoneySign::Any)?;
    t.promo_total.validate("promo_total", MoneySign::NonPositive)?;
    t.payment_total.validate("payment_total", MoneySign::Any)?;
    t.total.validate("total", MoneySign::Any)?;
    if !(0..MAX_ITEM_COUNT).contains(&t.item_count) {
        return Err(DomainError::validation(format!(
            "item_count out of range: {}",
            t.item_count
        )));
    }
    Ok(())
}
