use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, Entity, Money, MoneySign,
    UserId,
    entity::{find_by_id, find_by_id_mut},
};
use storefront_events::Event;

use crate::address::{Address, TaxZone, TaxZoneMatcher};
use crate::adjustment::{Adjustable, Adjustment, AdjustmentDraft, AdjustmentId, PromotionId};
use crate::line_item::{LineItem, LineItemId, validate_quantity};
use crate::payment::{Payment, PaymentId, PaymentMethod, Refund};
use crate::shipment::{Shipment, ShipmentId};
use crate::state::{OrderPaymentState, OrderShipmentState, OrderState, PaymentState, ShipmentState};
use crate::updater;

/// Order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

const MAX_NUMBER_LEN: usize = 32;

/// Derived money totals, recomputed after every applied event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub item_total: Money,
    pub adjustment_total: Money,
    pub included_tax_total: Money,
    pub additional_tax_total: Money,
    pub shipment_total: Money,
    pub promo_total: Money,
    pub payment_total: Money,
    pub total: Money,
    pub item_count: i64,
}

impl OrderTotals {
    pub fn tax_total(&self) -> Money {
        self.included_tax_total.saturating_add(self.additional_tax_total)
    }
}

/// Which state machine a history entry belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateMachine {
    Order,
    Payment,
    Shipment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub name: StateMachine,
    pub previous: Option<String>,
    pub next: Option<String>,
    pub user_id: Option<UserId>,
    pub at: DateTime<Utc>,
}

/// Aggregate root: Order.
#[derive(Debug, Clone)]
pub struct Order {
    id: OrderId,
    number: String,
    user_id: Option<UserId>,
    state: OrderState,
    payment_state: Option<OrderPaymentState>,
    shipment_state: Option<OrderShipmentState>,
    totals: OrderTotals,
    line_items: Vec<LineItem>,
    shipments: Vec<Shipment>,
    payments: Vec<Payment>,
    adjustments: Vec<Adjustment>,
    state_changes: Vec<StateChange>,
    promotions: Vec<PromotionId>,
    bill_address: Option<Address>,
    ship_address: Option<Address>,
    completed_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    canceled_at: Option<DateTime<Utc>>,
    approver_id: Option<UserId>,
    canceler_id: Option<UserId>,
    considered_risky: bool,
    confirmation_delivered: bool,
    // Lazily resolved; cleared only by `reload`.
    tax_zone: OnceLock<Option<TaxZone>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            number: String::new(),
            user_id: None,
            state: OrderState::Cart,
            payment_state: None,
            shipment_state: None,
            totals: OrderTotals::default(),
            line_items: Vec::new(),
            shipments: Vec::new(),
            payments: Vec::new(),
            adjustments: Vec::new(),
            state_changes: Vec::new(),
            promotions: Vec::new(),
            bill_address: None,
            ship_address: None,
            completed_at: None,
            approved_at: None,
            canceled_at: None,
            approver_id: None,
            canceler_id: None,
            considered_risky: false,
            confirmation_delivered: false,
            tax_zone: OnceLock::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn payment_state(&self) -> Option<OrderPaymentState> {
        self.payment_state
    }

    pub fn shipment_state(&self) -> Option<OrderShipmentState> {
        self.shipment_state
    }

    pub fn totals(&self) -> &OrderTotals {
        &self.totals
    }

    pub fn total(&self) -> Money {
        self.totals.total
    }

    pub fn payment_total(&self) -> Money {
        self.totals.payment_total
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn line_item(&self, id: &LineItemId) -> Option<&LineItem> {
        find_by_id(&self.line_items, id)
    }

    pub fn shipments(&self) -> &[Shipment] {
        &self.shipments
    }

    pub fn shipment(&self, id: &ShipmentId) -> Option<&Shipment> {
        find_by_id(&self.shipments, id)
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn payment(&self, id: &PaymentId) -> Option<&Payment> {
        find_by_id(&self.payments, id)
    }

    pub fn adjustments(&self) -> &[Adjustment] {
        &self.adjustments
    }

    pub fn state_changes(&self) -> &[StateChange] {
        &self.state_changes
    }

    pub fn promotions(&self) -> &[PromotionId] {
        &self.promotions
    }

    pub fn bill_address(&self) -> Option<&Address> {
        self.bill_address.as_ref()
    }

    pub fn ship_address(&self) -> Option<&Address> {
        self.ship_address.as_ref()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn canceled_at(&self) -> Option<DateTime<Utc>> {
        self.canceled_at
    }

    pub fn approver_id(&self) -> Option<UserId> {
        self.approver_id
    }

    pub fn canceler_id(&self) -> Option<UserId> {
        self.canceler_id
    }

    pub fn considered_risky(&self) -> bool {
        self.considered_risky
    }

    pub fn confirmation_delivered(&self) -> bool {
        self.confirmation_delivered
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn is_canceled(&self) -> bool {
        self.state == OrderState::Canceled
    }

    pub fn is_approved(&self) -> bool {
        self.approved_at.is_some()
    }

    pub fn can_approve(&self) -> bool {
        !self.is_approved()
    }

    /// At least one line item.
    pub fn checkout_allowed(&self) -> bool {
        !self.line_items.is_empty()
    }

    pub fn payment_required(&self) -> bool {
        self.totals.total.is_positive()
    }

    pub fn confirmation_required(&self, always_include_confirm_step: bool) -> bool {
        always_include_confirm_step
            || self
                .payments
                .iter()
                .filter(|p| p.is_valid())
                .any(|p| p.method().payment_profiles_supported)
            || self.state == OrderState::Confirm
    }

    pub fn can_ship(&self) -> bool {
        self.state.can_ship()
    }

    pub fn is_paid(&self) -> bool {
        matches!(
            self.payment_state,
            Some(OrderPaymentState::Paid | OrderPaymentState::CreditOwed)
        )
    }

    pub fn is_backordered(&self) -> bool {
        self.shipments.iter().any(Shipment::is_backordered)
    }

    pub fn is_risky(&self) -> bool {
        self.payments.iter().any(Payment::is_risky)
    }

    pub fn allow_cancel(&self) -> bool {
        if !self.is_completed() || self.is_canceled() {
            return false;
        }
        match self.shipment_state {
            None => true,
            Some(s) => matches!(
                s,
                OrderShipmentState::Ready | OrderShipmentState::Backorder | OrderShipmentState::Pending
            ),
        }
    }

    pub fn all_inventory_units_returned(&self) -> bool {
        !self.line_items.is_empty() && self.line_items.iter().all(LineItem::is_fully_returned)
    }

    pub fn refund_total(&self) -> Money {
        self.payments.iter().map(Payment::refund_total).sum()
    }

    pub fn outstanding_balance(&self) -> Money {
        updater::outstanding_balance(self)
    }

    pub fn tax_address(&self, using_ship_address: bool) -> Option<&Address> {
        if using_ship_address {
            self.ship_address.as_ref()
        } else {
            self.bill_address.as_ref()
        }
    }

    /// Tax zone for this order, resolved on first use and then reused until
    /// [`Order::reload`].
    pub fn tax_zone(&self, matcher: &dyn TaxZoneMatcher, using_ship_address: bool) -> Option<&TaxZone> {
        self.tax_zone
            .get_or_init(|| {
                self.tax_address(using_ship_address)
                    .and_then(|address| matcher.match_zone(address))
                    .or_else(|| matcher.default_tax_zone())
            })
            .as_ref()
    }

    /// Drop memoized values so they are recomputed from current state.
    pub fn reload(&mut self) {
        self.tax_zone = OnceLock::new();
    }

    /// Apply `events` to a copy and check the resulting totals.
    pub fn preview(&self, events: &[OrderEvent]) -> DomainResult<Order> {
        let mut next = self.clone();
        for ev in events {
            next.apply(ev);
        }
        updater::validate_totals(&next)?;
        Ok(next)
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub order_id: OrderId,
    pub number: String,
    pub user_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetAddresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAddresses {
    pub order_id: OrderId,
    pub bill_address: Option<Address>,
    pub ship_address: Option<Address>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetLineItemQuantity. A quantity of zero removes the line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetLineItemQuantity {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddShipment {
    pub order_id: OrderId,
    pub shipment: Shipment,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPayment {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub source: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddAdjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAdjustment {
    pub order_id: OrderId,
    pub adjustment_id: AdjustmentId,
    pub draft: AdjustmentDraft,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    Create(CreateOrder),
    SetAddresses(SetAddresses),
    SetLineItemQuantity(SetLineItemQuantity),
    AddShipment(AddShipment),
    AddPayment(AddPayment),
    AddAdjustment(AddAdjustment),
}

impl OrderCommand {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderCommand::Create(c) => c.order_id,
            OrderCommand::SetAddresses(c) => c.order_id,
            OrderCommand::SetLineItemQuantity(c) => c.order_id,
            OrderCommand::AddShipment(c) => c.order_id,
            OrderCommand::AddPayment(c) => c.order_id,
            OrderCommand::AddAdjustment(c) => c.order_id,
        }
    }
}

/// Event: something changed on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
    pub change: OrderChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderChange {
    Created {
        number: String,
        user_id: Option<UserId>,
    },
    AddressesSet {
        bill_address: Option<Address>,
        ship_address: Option<Address>,
    },
    LineItemAdded {
        line_item: LineItem,
    },
    LineItemQuantityChanged {
        line_item_id: LineItemId,
        quantity: i64,
    },
    LineItemRemoved {
        line_item_id: LineItemId,
    },
    UnitsReturned {
        line_item_id: LineItemId,
        quantity: i64,
    },
    ShipmentAdded {
        shipment: Shipment,
    },
    ShipmentStateChanged {
        shipment_id: ShipmentId,
        from: ShipmentState,
        to: ShipmentState,
    },
    AdjustmentAdded {
        adjustment: Adjustment,
    },
    AdjustmentsRemoved {
        adjustment_ids: Vec<AdjustmentId>,
    },
    AdjustmentsClosed,
    PromotionApplied {
        promotion_id: PromotionId,
    },
    PaymentAdded {
        payment: Payment,
    },
    PaymentUpdated {
        payment_id: PaymentId,
        state: PaymentState,
        response_code: Option<String>,
        avs_result: Option<String>,
        cvv_result: Option<String>,
    },
    RefundRecorded {
        payment_id: PaymentId,
        refund: Refund,
    },
    StateChanged {
        from: OrderState,
        to: OrderState,
        user_id: Option<UserId>,
    },
    PaymentStateChanged {
        from: Option<OrderPaymentState>,
        to: Option<OrderPaymentState>,
    },
    ShipmentStateSummarized {
        from: Option<OrderShipmentState>,
        to: Option<OrderShipmentState>,
    },
    Completed {
        completed_at: DateTime<Utc>,
    },
    ConfirmationDelivered,
    Approved {
        approver_id: Option<UserId>,
        approved_at: DateTime<Utc>,
    },
    Canceled {
        canceler_id: Option<UserId>,
        canceled_at: DateTime<Utc>,
    },
    RiskAssessed {
        considered_risky: bool,
    },
    Emptied,
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match &self.change {
            OrderChange::Created { .. } => "orders.order.created",
            OrderChange::AddressesSet { .. } => "orders.order.addresses_set",
            OrderChange::LineItemAdded { .. } => "orders.order.line_item_added",
            OrderChange::LineItemQuantityChanged { .. } => "orders.order.line_item_quantity_changed",
            OrderChange::LineItemRemoved { .. } => "orders.order.line_item_removed",
            OrderChange::UnitsReturned { .. } => "orders.order.units_returned",
            OrderChange::ShipmentAdded { .. } => "orders.order.shipment_added",
            OrderChange::ShipmentStateChanged { .. } => "orders.order.shipment_state_changed",
            OrderChange::AdjustmentAdded { .. } => "orders.order.adjustment_added",
            OrderChange::AdjustmentsRemoved { .. } => "orders.order.adjustments_removed",
            OrderChange::AdjustmentsClosed => "orders.order.adjustments_closed",
            OrderChange::PromotionApplied { .. } => "orders.order.promotion_applied",
            OrderChange::PaymentAdded { .. } => "orders.order.payment_added",
            OrderChange::PaymentUpdated { .. } => "orders.order.payment_updated",
            OrderChange::RefundRecorded { .. } => "orders.order.refund_recorded",
            OrderChange::StateChanged { .. } => "orders.order.state_changed",
            OrderChange::PaymentStateChanged { .. } => "orders.order.payment_state_changed",
            OrderChange::ShipmentStateSummarized { .. } => "orders.order.shipment_state_summarized",
            OrderChange::Completed { .. } => "orders.order.completed",
            OrderChange::ConfirmationDelivered => "orders.order.confirmation_delivered",
            OrderChange::Approved { .. } => "orders.order.approved",
            OrderChange::Canceled { .. } => "orders.order.canceled",
            OrderChange::RiskAssessed { .. } => "orders.order.risk_assessed",
            OrderChange::Emptied => "orders.order.emptied",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        let at = event.occurred_at;
        match &event.change {
            OrderChange::Created { number, user_id } => {
                self.id = event.order_id;
                self.number = number.clone();
                self.user_id = *user_id;
                self.state = OrderState::Cart;
                self.created = true;
            }
            OrderChange::AddressesSet {
                bill_address,
                ship_address,
            } => {
                self.bill_address = bill_address.clone();
                self.ship_address = ship_address.clone();
            }
            OrderChange::LineItemAdded { line_item } => {
                self.line_items.push(line_item.clone());
            }
            OrderChange::LineItemQuantityChanged {
                line_item_id,
                quantity,
            } => {
                if let Some(li) = find_by_id_mut(&mut self.line_items, line_item_id) {
                    li.set_quantity(*quantity);
                }
            }
            OrderChange::LineItemRemoved { line_item_id } => {
                self.line_items.retain(|li| li.id() != line_item_id);
                self.adjustments
                    .retain(|a| a.adjustable() != Adjustable::LineItem(*line_item_id));
            }
            OrderChange::UnitsReturned {
                line_item_id,
                quantity,
            } => {
                if let Some(li) = find_by_id_mut(&mut self.line_items, line_item_id) {
                    li.add_returned(*quantity);
                }
            }
            OrderChange::ShipmentAdded { shipment } => {
                self.shipments.push(shipment.clone());
            }
            OrderChange::ShipmentStateChanged { shipment_id, to, .. } => {
                if let Some(s) = find_by_id_mut(&mut self.shipments, shipment_id) {
                    s.set_state(*to);
                }
            }
            OrderChange::AdjustmentAdded { adjustment } => {
                self.adjustments.push(adjustment.clone());
            }
            OrderChange::AdjustmentsRemoved { adjustment_ids } => {
                self.adjustments.retain(|a| !adjustment_ids.contains(a.id()));
            }
            OrderChange::AdjustmentsClosed => {
                self.adjustments.iter_mut().for_each(Adjustment::close);
            }
            OrderChange::PromotionApplied { promotion_id } => {
                self.promotions.push(*promotion_id);
            }
            OrderChange::PaymentAdded { payment } => {
                self.payments.push(payment.clone());
            }
            OrderChange::PaymentUpdated {
                payment_id,
                state,
                response_code,
                avs_result,
                cvv_result,
            } => {
                if let Some(p) = find_by_id_mut(&mut self.payments, payment_id) {
                    p.record_gateway_result(
                        *state,
                        response_code.as_deref(),
                        avs_result.as_deref(),
                        cvv_result.as_deref(),
                    );
                }
            }
            OrderChange::RefundRecorded { payment_id, refund } => {
                if let Some(p) = find_by_id_mut(&mut self.payments, payment_id) {
                    p.push_refund(refund.clone());
                }
            }
            OrderChange::StateChanged { from, to, user_id } => {
                self.state = *to;
                self.state_changes.push(StateChange {
                    name: StateMachine::Order,
                    previous: Some(from.to_string()),
                    next: Some(to.to_string()),
                    user_id: *user_id,
                    at,
                });
            }
            OrderChange::PaymentStateChanged { from, to } => {
                self.payment_state = *to;
                self.state_changes.push(StateChange {
                    name: StateMachine::Payment,
                    previous: from.map(|s| s.to_string()),
                    next: to.map(|s| s.to_string()),
                    user_id: self.user_id,
                    at,
                });
            }
            OrderChange::ShipmentStateSummarized { from, to } => {
                self.shipment_state = *to;
                self.state_changes.push(StateChange {
                    name: StateMachine::Shipment,
                    previous: from.map(|s| s.to_string()),
                    next: to.map(|s| s.to_string()),
                    user_id: self.user_id,
                    at,
                });
            }
            OrderChange::Completed { completed_at } => {
                self.completed_at = Some(*completed_at);
            }
            OrderChange::ConfirmationDelivered => {
                self.confirmation_delivered = true;
            }
            OrderChange::Approved {
                approver_id,
                approved_at,
            } => {
                self.approver_id = *approver_id;
                self.approved_at = Some(*approved_at);
            }
            OrderChange::Canceled {
                canceler_id,
                canceled_at,
            } => {
                self.canceler_id = *canceler_id;
                self.canceled_at = Some(*canceled_at);
            }
            OrderChange::RiskAssessed { considered_risky } => {
                self.considered_risky = *considered_risky;
            }
            OrderChange::Emptied => {
                self.line_items.clear();
                self.adjustments.clear();
                self.shipments.clear();
                self.state_changes.clear();
                self.promotions.clear();
                self.state = OrderState::Cart;
            }
        }

        self.totals = updater::compute_totals(self);
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if !matches!(command, OrderCommand::Create(_)) && !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_order_id(command.order_id())?;

        let events = match command {
            OrderCommand::Create(cmd) => self.handle_create(cmd)?,
            OrderCommand::SetAddresses(cmd) => vec![self.event(
                cmd.occurred_at,
                OrderChange::AddressesSet {
                    bill_address: cmd.bill_address.clone(),
                    ship_address: cmd.ship_address.clone(),
                },
            )],
            OrderCommand::SetLineItemQuantity(cmd) => self.handle_set_quantity(cmd)?,
            OrderCommand::AddShipment(cmd) => self.handle_add_shipment(cmd)?,
            OrderCommand::AddPayment(cmd) => self.handle_add_payment(cmd)?,
            OrderCommand::AddAdjustment(cmd) => self.handle_add_adjustment(cmd)?,
        };

        self.preview(&events)?;
        Ok(events)
    }
}

impl Order {
    pub(crate) fn event(&self, occurred_at: DateTime<Utc>, change: OrderChange) -> OrderEvent {
        OrderEvent {
            order_id: self.id,
            occurred_at,
            change,
        }
    }

    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    pub(crate) fn ensure_not_completed(&self, action: &str) -> Result<(), DomainError> {
        if self.is_completed() {
            return Err(DomainError::invalid_transition(format!(
                "cannot {action} on completed order {}",
                self.number
            )));
        }
        Ok(())
    }

    /// The adjustable must exist on this order.
    pub(crate) fn ensure_adjustable(&self, adjustable: Adjustable) -> Result<(), DomainError> {
        let found = match adjustable {
            Adjustable::Order => true,
            Adjustable::LineItem(id) => self.line_item(&id).is_some(),
            Adjustable::Shipment(id) => self.shipment(&id).is_some(),
        };
        if found { Ok(()) } else { Err(DomainError::not_found()) }
    }

    fn handle_create(&self, cmd: &CreateOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!("order {} already exists", self.id)));
        }
        let number = cmd.number.trim();
        if number.is_empty() || number.len() > MAX_NUMBER_LEN {
            return Err(DomainError::validation(format!(
                "order number must be 1 to {MAX_NUMBER_LEN} characters"
            )));
        }
        Ok(vec![self.event(
            cmd.occurred_at,
            OrderChange::Created {
                number: number.to_string(),
                user_id: cmd.user_id,
            },
        )])
    }

    fn handle_set_quantity(&self, cmd: &SetLineItemQuantity) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_not_completed("change line items")?;
        let line_item = self.line_item(&cmd.line_item_id).ok_or_else(DomainError::not_found)?;

        let change = if cmd.quantity == 0 {
            OrderChange::LineItemRemoved {
                line_item_id: cmd.line_item_id,
            }
        } else {
            validate_quantity(cmd.quantity)?;
            if cmd.quantity == line_item.quantity() {
                return Ok(Vec::new());
            }
            OrderChange::LineItemQuantityChanged {
                line_item_id: cmd.line_item_id,
                quantity: cmd.quantity,
            }
        };
        Ok(vec![self.event(cmd.occurred_at, change)])
    }

    fn handle_add_shipment(&self, cmd: &AddShipment) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_not_completed("add shipments")?;
        if self.shipment(cmd.shipment.id()).is_some() {
            return Err(DomainError::conflict("shipment already on order"));
        }
        if let Some(cost) = cmd.shipment.cost() {
            cost.validate("shipment cost", MoneySign::NonNegative)?;
        }
        Ok(vec![self.event(
            cmd.occurred_at,
            OrderChange::ShipmentAdded {
                shipment: cmd.shipment.clone(),
            },
        )])
    }

    fn handle_add_payment(&self, cmd: &AddPayment) -> Result<Vec<OrderEvent>, DomainError> {
        if self.is_canceled() {
            return Err(DomainError::invalid_transition("cannot add payments to a canceled order"));
        }
        if self.payment(&cmd.payment_id).is_some() {
            return Err(DomainError::conflict(format!("payment {} already exists", cmd.payment_id)));
        }
        let payment = Payment::new(cmd.payment_id, cmd.amount, cmd.method.clone(), cmd.source.clone())?;
        Ok(vec![self.event(cmd.occurred_at, OrderChange::PaymentAdded { payment })])
    }

    fn handle_add_adjustment(&self, cmd: &AddAdjustment) -> Result<Vec<OrderEvent>, DomainError> {
        cmd.draft.validate()?;
        self.ensure_adjustable(cmd.draft.adjustable)?;
        let adjustment = Adjustment::from_draft(cmd.adjustment_id, cmd.draft.clone());
        Ok(vec![self.event(cmd.occurred_at, OrderChange::AdjustmentAdded { adjustment })])
    }
}
