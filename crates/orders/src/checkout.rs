//! Checkout flow: the transition table and the named steps that must pass
//! before an order may enter a state.

use std::sync::Arc;

use storefront_core::{DomainError, DomainResult, Money};

use crate::order::Order;
use crate::state::{OrderState, PaymentState};

/// Events that drive an order between states.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CheckoutEvent {
    Next,
    Cancel,
    Approve,
    Resume,
    AuthorizeReturn,
    Return,
}

impl CheckoutEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckoutEvent::Next => "next",
            CheckoutEvent::Cancel => "cancel",
            CheckoutEvent::Approve => "approve",
            CheckoutEvent::Resume => "resume",
            CheckoutEvent::AuthorizeReturn => "authorize_return",
            CheckoutEvent::Return => "return",
        }
    }
}

impl core::fmt::Display for CheckoutEvent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition a transition row requires.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Guard {
    Always,
    CheckoutAllowed,
    PaymentRequired,
    ConfirmationRequired,
    AllowCancel,
    CanApprove,
    AllUnitsReturned,
}

impl Guard {
    pub fn passes(self, order: &Order, always_include_confirm_step: bool) -> bool {
        match self {
            Guard::Always => true,
            Guard::CheckoutAllowed => order.checkout_allowed(),
            Guard::PaymentRequired => order.payment_required(),
            Guard::ConfirmationRequired => order.confirmation_required(always_include_confirm_step),
            Guard::AllowCancel => order.allow_cancel(),
            Guard::CanApprove => order.can_approve(),
            Guard::AllUnitsReturned => order.all_inventory_units_returned(),
        }
    }
}

/// One row of the transition table. `to: None` keeps the current state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: &'static [OrderState],
    pub event: CheckoutEvent,
    pub to: Option<OrderState>,
    pub guard: Guard,
}

const fn row(
    from: &'static [OrderState],
    event: CheckoutEvent,
    to: Option<OrderState>,
    guard: Guard,
) -> Transition {
    Transition {
        from,
        event,
        to,
        guard,
    }
}

/// Rows are tried in order; the first whose guard passes wins.
pub const TRANSITIONS: &[Transition] = &[
    row(&[OrderState::Cart], CheckoutEvent::Next, Some(OrderState::Address), Guard::CheckoutAllowed),
    row(&[OrderState::Address], CheckoutEvent::Next, Some(OrderState::Delivery), Guard::Always),
    row(&[OrderState::Delivery], CheckoutEvent::Next, Some(OrderState::Payment), Guard::PaymentRequired),
    row(&[OrderState::Delivery], CheckoutEvent::Next, Some(OrderState::Complete), Guard::Always),
    row(&[OrderState::Payment], CheckoutEvent::Next, Some(OrderState::Confirm), Guard::ConfirmationRequired),
    row(&[OrderState::Payment], CheckoutEvent::Next, Some(OrderState::Complete), Guard::Always),
    row(&[OrderState::Confirm], CheckoutEvent::Next, Some(OrderState::Complete), Guard::Always),
    row(
        &[OrderState::Complete, OrderState::Resumed],
        CheckoutEvent::Cancel,
        Some(OrderState::Canceled),
        Guard::AllowCancel,
    ),
    row(&[OrderState::Canceled], CheckoutEvent::Resume, Some(OrderState::Resumed), Guard::Always),
    row(&[OrderState::Complete, OrderState::Resumed], CheckoutEvent::Approve, None, Guard::CanApprove),
    row(
        &[OrderState::Complete, OrderState::Resumed],
        CheckoutEvent::AuthorizeReturn,
        Some(OrderState::AwaitingReturn),
        Guard::Always,
    ),
    row(
        &[OrderState::Complete, OrderState::AwaitingReturn],
        CheckoutEvent::Return,
        Some(OrderState::Returned),
        Guard::AllUnitsReturned,
    ),
];

/// Resolve the target state for `event`, or fail with `InvalidTransition`.
pub fn next_state(
    order: &Order,
    event: CheckoutEvent,
    always_include_confirm_step: bool,
) -> DomainResult<OrderState> {
    let current = order.state();
    TRANSITIONS
        .iter()
        .filter(|t| t.event == event && t.from.contains(&current))
        .find(|t| t.guard.passes(order, always_include_confirm_step))
        .map(|t| t.to.unwrap_or(current))
        .ok_or_else(|| {
            DomainError::invalid_transition(format!(
                "cannot {event} order {} from {current}",
                order.number()
            ))
        })
}

pub type StepCheck = Arc<dyn Fn(&Order) -> DomainResult<()> + Send + Sync>;

/// A named check run before an order enters `target`.
#[derive(Clone)]
pub struct CheckoutStep {
    name: String,
    target: OrderState,
    check: StepCheck,
}

impl CheckoutStep {
    pub fn new(
        name: impl Into<String>,
        target: OrderState,
        check: impl Fn(&Order) -> DomainResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            target,
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> OrderState {
        self.target
    }

    pub fn run(&self, order: &Order) -> DomainResult<()> {
        (self.check)(order)
    }
}

impl core::fmt::Debug for CheckoutStep {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CheckoutStep")
            .field("name", &self.name)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

fn ensure_line_items_present(order: &Order) -> DomainResult<()> {
    if order.line_items().is_empty() {
        return Err(DomainError::invalid_transition(format!(
            "order {} has no line items",
            order.number()
        )));
    }
    Ok(())
}

fn ensure_available_shipping_rates(order: &Order) -> DomainResult<()> {
    if order.shipments().is_empty() || !order.shipments().iter().all(|s| s.has_shipping_rate()) {
        return Err(DomainError::invalid_transition(format!(
            "order {} has shipments without a shipping rate",
            order.number()
        )));
    }
    Ok(())
}

fn ensure_payments_cover_total(order: &Order) -> DomainResult<()> {
    if !order.payment_required() {
        return Ok(());
    }
    let covered: Money = order
        .payments()
        .iter()
        .filter(|p| matches!(p.state(), PaymentState::Pending | PaymentState::Completed))
        .map(|p| p.amount())
        .sum();
    if covered < order.total() {
        return Err(DomainError::invalid_transition(format!(
            "payments for order {} cover {covered} of {}",
            order.number(),
            order.total()
        )));
    }
    Ok(())
}

/// Ordered list of steps. The built-ins come first; pushed steps run after them.
#[derive(Debug, Clone)]
pub struct CheckoutPipeline {
    steps: Vec<CheckoutStep>,
}

impl CheckoutPipeline {
    pub fn builtin() -> Self {
        Self {
            steps: vec![
                CheckoutStep::new("ensure_line_items_present", OrderState::Address, ensure_line_items_present),
                CheckoutStep::new(
                    "ensure_available_shipping_rates",
                    OrderState::Delivery,
                    ensure_available_shipping_rates,
                ),
                CheckoutStep::new("ensure_line_items_present", OrderState::Complete, ensure_line_items_present),
                CheckoutStep::new("ensure_payments_cover_total", OrderState::Complete, ensure_payments_cover_total),
            ],
        }
    }

    pub fn push(&mut self, step: CheckoutStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[CheckoutStep] {
        &self.steps
    }

    /// Run every step registered for `target`; the first failure stops the run.
    pub fn run(&self, order: &Order, target: OrderState) -> DomainResult<()> {
        self.steps
            .iter()
            .filter(|s| s.target == target)
            .try_for_each(|s| s.run(order))
    }
}

impl Default for CheckoutPipeline {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::order::OrderChange;

    fn at_state(order: &mut Order, to: OrderState) {
        let from = order.state();
        emit(order, OrderChange::StateChanged { from, to, user_id: None });
    }

    #[test]
    fn empty_cart_cannot_advance() {
        let order = new_order();
        let err = next_state(&order, CheckoutEvent::Next, false).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn delivery_skips_payment_for_free_orders() {
        let mut order = new_order();
        add_line_item(&mut order, 0, 1);
        at_state(&mut order, OrderState::Delivery);
        assert_eq!(next_state(&order, CheckoutEvent::Next, false).unwrap(), OrderState::Complete);

        add_line_item(&mut order, 5_00, 1);
        assert_eq!(next_state(&order, CheckoutEvent::Next, false).unwrap(), OrderState::Payment);
    }

    #[test]
    fn confirm_is_included_by_flag_or_payment_profiles() {
        let mut order = new_order();
        add_line_item(&mut order, 5_00, 1);
        at_state(&mut order, OrderState::Payment);
        assert_eq!(next_state(&order, CheckoutEvent::Next, false).unwrap(), OrderState::Complete);
        assert_eq!(next_state(&order, CheckoutEvent::Next, true).unwrap(), OrderState::Confirm);

        add_payment_with(&mut order, 5_00, "tok", method().with_payment_profiles());
        assert_eq!(next_state(&order, CheckoutEvent::Next, false).unwrap(), OrderState::Confirm);
    }

    #[test]
    fn approve_keeps_the_state() {
        let mut order = new_order();
        add_line_item(&mut order, 5_00, 1);
        at_state(&mut order, OrderState::Complete);
        assert_eq!(next_state(&order, CheckoutEvent::Approve, false).unwrap(), OrderState::Complete);
    }

    #[test]
    fn steps_only_run_for_their_target() {
        let mut order = new_order();
        add_line_item(&mut order, 5_00, 1);
        let pipeline = CheckoutPipeline::builtin();

        assert!(pipeline.run(&order, OrderState::Address).is_ok());
        assert!(pipeline.run(&order, OrderState::Delivery).is_err());
        assert!(pipeline.run(&order, OrderState::Payment).is_ok());

        add_shipment(&mut order, None);
        assert!(pipeline.run(&order, OrderState::Delivery).is_err());
    }

    #[test]
    fn payments_must_cover_the_total() {
        let mut order = new_order();
        add_line_item(&mut order, 5_00, 1);
        let pipeline = CheckoutPipeline::builtin();
        assert!(pipeline.run(&order, OrderState::Complete).is_err());

        let pid = add_payment(&mut order, 5_00, "tok");
        assert!(pipeline.run(&order, OrderState::Complete).is_err());

        complete_payment(&mut order, pid);
        assert!(pipeline.run(&order, OrderState::Complete).is_ok());
    }

    #[test]
    fn custom_steps_run_after_builtins() {
        let mut pipeline = CheckoutPipeline::builtin();
        pipeline.push(CheckoutStep::new("require_ship_address", OrderState::Delivery, |o: &Order| {
            o.ship_address()
                .map(|_| ())
                .ok_or_else(|| DomainError::validation("ship address required"))
        }));
        assert_eq!(pipeline.steps().last().map(CheckoutStep::name), Some("require_ship_address"));

        let mut order = new_order();
        add_line_item(&mut order, 5_00, 1);
        add_shipment(&mut order, Some(1_00));
        let err = pipeline.run(&order, OrderState::Delivery).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
