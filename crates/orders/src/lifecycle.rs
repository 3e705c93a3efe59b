//! Order lifecycle manager.
//!
//! Every operation works on a [`Draft`]: a private copy of the order that
//! records each change as an event and applies it immediately. When all steps
//! succeed the draft becomes an [`OrderDecision`] (events to append, the
//! resulting order and the notices to send after commit). When any step fails
//! the draft is dropped and the caller's order is untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use storefront_core::{Aggregate, DomainError, DomainResult, Entity, Money, UserId, VariantId};

use crate::address::TaxZoneMatcher;
use crate::adjustment::{
    Adjustment, AdjustmentDraft, AdjustmentId, AdjustmentSource, PromotionEngine, PromotionId,
    TaxCalculator,
};
use crate::checkout::{self, CheckoutEvent, CheckoutPipeline, CheckoutStep};
use crate::gateway::{GatewayError, GatewayOptions, PaymentGateway};
use crate::line_item::{LineItem, LineItemId, LineItemOptions, validate_quantity};
use crate::order::{Order, OrderChange, OrderEvent, OrderId};
use crate::payment::{PaymentId, Refund};
use crate::shipment::ShipmentId;
use crate::state::{OrderState, PaymentState, ShipmentState};
use crate::updater;

/// Runs after the order's derived state is recomputed. An error aborts the
/// whole operation.
pub type UpdateHook = Arc<dyn Fn(&Order) -> DomainResult<()> + Send + Sync>;

/// Decides whether `options` may be merged into an existing line item.
pub type LineItemComparisonHook = Arc<dyn Fn(&LineItem, &LineItemOptions) -> bool + Send + Sync>;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub always_include_confirm_step: bool,
    pub tax_using_ship_address: bool,
    /// Purchase instead of authorize when a payment method has no preference.
    pub auto_capture: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    OrderConfirmation,
    OrderCanceled,
}

/// A notification to deliver once the decision is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNotice {
    pub order_id: OrderId,
    pub number: String,
    pub kind: NoticeKind,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("payment {payment_id} declined: {message}")]
    PaymentDeclined { payment_id: PaymentId, message: String },

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Outcome of a lifecycle operation, ready to be committed.
#[derive(Debug, Clone)]
pub struct OrderDecision {
    pub events: Vec<OrderEvent>,
    pub order: Order,
    pub notices: Vec<OrderNotice>,
}

impl OrderDecision {
    pub fn state(&self) -> OrderState {
        self.order.state()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

struct Draft {
    order: Order,
    events: Vec<OrderEvent>,
    notices: Vec<OrderNotice>,
    at: DateTime<Utc>,
}

impl Draft {
    fn new(order: &Order, at: DateTime<Utc>) -> Self {
        Self {
            order: order.clone(),
            events: Vec::new(),
            notices: Vec::new(),
            at,
        }
    }

    fn record(&mut self, change: OrderChange) {
        let ev = self.order.event(self.at, change);
        self.order.apply(&ev);
        self.events.push(ev);
    }

    fn notify(&mut self, kind: NoticeKind) {
        self.notices.push(OrderNotice {
            order_id: self.order.id_typed(),
            number: self.order.number().to_string(),
            kind,
        });
    }

    fn transition_to(&mut self, to: OrderState, user_id: Option<UserId>) {
        let from = self.order.state();
        if from != to {
            self.record(OrderChange::StateChanged { from, to, user_id });
        }
    }

    fn commit(self) -> LifecycleResult<OrderDecision> {
        updater::validate_totals(&self.order)?;
        Ok(OrderDecision {
            events: self.events,
            order: self.order,
            notices: self.notices,
        })
    }
}

/// A checkout payment that has not been sent to the gateway yet.
struct PendingPayment {
    payment_id: PaymentId,
    amount: Money,
    source: String,
    capture: bool,
}

impl PendingPayment {
    fn assume_success(&self) -> PaymentOutcome {
        PaymentOutcome {
            payment_id: self.payment_id,
            state: if self.capture {
                PaymentState::Completed
            } else {
                PaymentState::Pending
            },
            response_code: None,
            avs_result: None,
            cvv_result: None,
        }
    }
}

struct PaymentOutcome {
    payment_id: PaymentId,
    state: PaymentState,
    response_code: Option<String>,
    avs_result: Option<String>,
    cvv_result: Option<String>,
}

impl PaymentOutcome {
    fn change(&self) -> OrderChange {
        OrderChange::PaymentUpdated {
            payment_id: self.payment_id,
            state: self.state,
            response_code: self.response_code.clone(),
            avs_result: self.avs_result.clone(),
            cvv_result: self.cvv_result.clone(),
        }
    }
}

pub struct OrderLifecycle {
    config: LifecycleConfig,
    gateway: Arc<dyn PaymentGateway>,
    pipeline: CheckoutPipeline,
    update_hooks: Vec<UpdateHook>,
    line_item_comparison_hooks: Vec<LineItemComparisonHook>,
}

impl OrderLifecycle {
    pub fn new(config: LifecycleConfig, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            config,
            gateway,
            pipeline: CheckoutPipeline::builtin(),
            update_hooks: Vec::new(),
            line_item_comparison_hooks: Vec::new(),
        }
    }

    pub fn with_update_hook(
        mut self,
        hook: impl Fn(&Order) -> DomainResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.update_hooks.push(Arc::new(hook));
        self
    }

    pub fn with_line_item_comparison_hook(
        mut self,
        hook: impl Fn(&LineItem, &LineItemOptions) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.line_item_comparison_hooks.push(Arc::new(hook));
        self
    }

    pub fn with_checkout_step(mut self, step: CheckoutStep) -> Self {
        self.pipeline.push(step);
        self
    }

    pub fn config(&self) -> LifecycleConfig {
        self.config
    }

    /// Fire `event` on the order. `Cancel` and `Approve` are attributed to no user.
    pub fn transition(
        &self,
        order: &Order,
        event: CheckoutEvent,
        at: DateTime<Utc>,
    ) -> LifecycleResult<OrderDecision> {
        match event {
            CheckoutEvent::Next => self.next(order, at),
            CheckoutEvent::Cancel => self.canceled_by(order, None, at),
            CheckoutEvent::Approve => self.approved_by(order, None, at),
            CheckoutEvent::Resume => self.resume(order, at),
            CheckoutEvent::AuthorizeReturn | CheckoutEvent::Return => {
                let target = self.resolve(order, event)?;
                let mut draft = Draft::new(order, at);
                draft.transition_to(target, order.user_id());
                draft.commit()
            }
        }
    }

    fn resolve(&self, order: &Order, event: CheckoutEvent) -> DomainResult<OrderState> {
        checkout::next_state(order, event, self.config.always_include_confirm_step)
    }

    fn next(&self, order: &Order, at: DateTime<Utc>) -> LifecycleResult<OrderDecision> {
        let target = self.resolve(order, CheckoutEvent::Next)?;
        let finish = |draft: &mut Draft| -> LifecycleResult<()> {
            self.pipeline.run(&draft.order, target)?;
            draft.transition_to(target, order.user_id());
            if target == OrderState::Complete {
                self.finalize_draft(draft)?;
            }
            Ok(())
        };

        if target == OrderState::Complete && order.payment_required() {
            self.settle_payments(order, at, true, &finish)
        } else {
            self.decide(order, at, &[], &finish)
        }
    }

    /// Charge the order's checkout payments and decide `finish` on the result.
    ///
    /// `finish` is first decided against payments assumed to succeed, so a
    /// checkout that would fail anyway never reaches the gateway.
    fn settle_payments(
        &self,
        order: &Order,
        at: DateTime<Utc>,
        strict: bool,
        finish: &dyn Fn(&mut Draft) -> LifecycleResult<()>,
    ) -> LifecycleResult<OrderDecision> {
        let pending = self.pending_payments(order);
        if pending.is_empty() {
            return self.decide(order, at, &[], finish);
        }
        let assumed: Vec<_> = pending.iter().map(PendingPayment::assume_success).collect();
        self.decide(order, at, &assumed, finish)?;

        let outcomes = self.charge(order, &pending, strict)?;
        self.decide(order, at, &outcomes, finish)
    }

    fn decide(
        &self,
        order: &Order,
        at: DateTime<Utc>,
        outcomes: &[PaymentOutcome],
        finish: &dyn Fn(&mut Draft) -> LifecycleResult<()>,
    ) -> LifecycleResult<OrderDecision> {
        let mut draft = Draft::new(order, at);
        for outcome in outcomes {
            draft.record(outcome.change());
        }
        finish(&mut draft)?;
        draft.commit()
    }

    /// Re-run finalization on an order that is already complete.
    pub fn finalize(&self, order: &Order, at: DateTime<Utc>) -> LifecycleResult<OrderDecision> {
        if order.state() != OrderState::Complete {
            return Err(DomainError::invalid_transition(format!(
                "cannot finalize order {} in state {}",
                order.number(),
                order.state()
            ))
            .into());
        }
        let mut draft = Draft::new(order, at);
        self.finalize_draft(&mut draft)?;
        draft.commit()
    }

    fn finalize_draft(&self, draft: &mut Draft) -> LifecycleResult<()> {
        if draft.order.adjustments().iter().any(|a| !a.is_closed()) {
            draft.record(OrderChange::AdjustmentsClosed);
        }
        self.update_payment_state(draft);
        self.update_shipments(draft);
        self.update_shipment_state(draft);
        self.run_update_hooks(draft)?;

        draft.record(OrderChange::Completed {
            completed_at: draft.at,
        });
        if !draft.order.confirmation_delivered() {
            draft.notify(NoticeKind::OrderConfirmation);
        }
        self.consider_risk(draft);
        Ok(())
    }

    /// Recompute derived state and run the update hooks.
    pub fn update(&self, order: &Order, at: DateTime<Utc>) -> LifecycleResult<OrderDecision> {
        let mut draft = Draft::new(order, at);
        self.update_draft(&mut draft)?;
        draft.commit()
    }

    /// Record that the confirmation reached the customer, so later
    /// finalizations stop requesting it. No-op when already recorded.
    pub fn mark_confirmation_delivered(&self, order: &Order, at: DateTime<Utc>) -> LifecycleResult<OrderDecision> {
        let mut draft = Draft::new(order, at);
        if !order.confirmation_delivered() {
            draft.record(OrderChange::ConfirmationDelivered);
        }
        draft.commit()
    }

    fn update_draft(&self, draft: &mut Draft) -> LifecycleResult<()> {
        if draft.order.is_completed() {
            self.update_payment_state(draft);
            self.update_shipments(draft);
            self.update_shipment_state(draft);
        }
        self.run_update_hooks(draft)
    }

    fn update_payment_state(&self, draft: &mut Draft) {
        let from = draft.order.payment_state();
        let to = Some(updater::payment_state(&draft.order));
        if from != to {
            draft.record(OrderChange::PaymentStateChanged { from, to });
        }
    }

    fn update_shipments(&self, draft: &mut Draft) {
        let ctx = updater::shipment_context(&draft.order);
        let changes: Vec<_> = draft
            .order
            .shipments()
            .iter()
            .filter_map(|s| {
                let to = s.determine_state(&ctx);
                (to != s.state()).then(|| (*s.id(), s.state(), to))
            })
            .collect();
        for (shipment_id, from, to) in changes {
            draft.record(OrderChange::ShipmentStateChanged { shipment_id, from, to });
        }
    }

    fn update_shipment_state(&self, draft: &mut Draft) {
        let from = draft.order.shipment_state();
        let to = updater::shipment_state(draft.order.shipments());
        if from != to {
            draft.record(OrderChange::ShipmentStateSummarized { from, to });
        }
    }

    fn run_update_hooks(&self, draft: &Draft) -> LifecycleResult<()> {
        for hook in &self.update_hooks {
            hook(&draft.order)?;
        }
        Ok(())
    }

    fn consider_risk(&self, draft: &mut Draft) {
        let order = &draft.order;
        if order.is_risky() && !order.is_approved() && !order.considered_risky() {
            draft.record(OrderChange::RiskAssessed {
                considered_risky: true,
            });
        }
    }

    pub fn cancel(&self, order: &Order, at: DateTime<Utc>) -> LifecycleResult<OrderDecision> {
        self.canceled_by(order, None, at)
    }

    /// Cancel, attributing it to `user`. Shipments are canceled and completed
    /// payments voided as part of the same decision.
    pub fn canceled_by(
        &self,
        order: &Order,
        user: Option<UserId>,
        at: DateTime<Utc>,
    ) -> LifecycleResult<OrderDecision> {
        let target = self.resolve(order, CheckoutEvent::Cancel)?;
        let mut draft = Draft::new(order, at);
        draft.transition_to(target, user);
        draft.record(OrderChange::Canceled {
            canceler_id: user,
            canceled_at: at,
        });

        let shipments: Vec<_> = draft
            .order
            .shipments()
            .iter()
            .filter(|s| s.state() != ShipmentState::Canceled)
            .map(|s| (*s.id(), s.state()))
            .collect();
        for (shipment_id, from) in shipments {
            draft.record(OrderChange::ShipmentStateChanged {
                shipment_id,
                from,
                to: ShipmentState::Canceled,
            });
        }

        let completed: Vec<_> = draft
            .order
            .payments()
            .iter()
            .filter(|p| p.is_completed())
            .map(|p| (*p.id(), p.response_code().map(str::to_string)))
            .collect();
        for (payment_id, _) in &completed {
            draft.record(OrderChange::PaymentUpdated {
                payment_id: *payment_id,
                state: PaymentState::Void,
                response_code: None,
                avs_result: None,
                cvv_result: None,
            });
        }

        draft.notify(NoticeKind::OrderCanceled);
        self.update_draft(&mut draft)?;
        let decision = draft.commit()?;

        for (payment_id, token) in completed {
            let Some(token) = token else { continue };
            let response = self.gateway.void(&token, &self.gateway_options(order, payment_id))?;
            if !response.success {
                return Err(LifecycleError::PaymentDeclined {
                    payment_id,
                    message: response.message,
                });
            }
        }
        Ok(decision)
    }

    pub fn approve(&self, order: &Order, at: DateTime<Utc>) -> LifecycleResult<OrderDecision> {
        self.approved_by(order, None, at)
    }

    /// Approve, attributing it to `user`. Clears the risk flag.
    pub fn approved_by(
        &self,
        order: &Order,
        user: Option<UserId>,
        at: DateTime<Utc>,
    ) -> LifecycleResult<OrderDecision> {
        self.resolve(order, CheckoutEvent::Approve)?;
        let mut draft = Draft::new(order, at);
        draft.record(OrderChange::Approved {
            approver_id: user,
            approved_at: at,
        });
        if draft.order.considered_risky() {
            draft.record(OrderChange::RiskAssessed {
                considered_risky: false,
            });
        }
        draft.commit()
    }

    pub fn resume(&self, order: &Order, at: DateTime<Utc>) -> LifecycleResult<OrderDecision> {
        let target = self.resolve(order, CheckoutEvent::Resume)?;
        let mut draft = Draft::new(order, at);
        draft.transition_to(target, order.user_id());

        let ctx = updater::shipment_context(&draft.order);
        let resumed: Vec<_> = draft
            .order
            .shipments()
            .iter()
            .filter(|s| s.state() == ShipmentState::Canceled)
            .map(|s| (*s.id(), s.determine_state(&ctx)))
            .filter(|(_, to)| *to != ShipmentState::Canceled)
            .collect();
        for (shipment_id, to) in resumed {
            draft.record(OrderChange::ShipmentStateChanged {
                shipment_id,
                from: ShipmentState::Canceled,
                to,
            });
        }
        self.update_shipment_state(&mut draft);
        self.consider_risk(&mut draft);
        draft.commit()
    }

    /// Remove every line item, adjustment, shipment, history entry and
    /// promotion link, and go back to cart. Payments are kept.
    pub fn empty(&self, order: &Order, at: DateTime<Utc>) -> LifecycleResult<OrderDecision> {
        order.ensure_not_completed("empty")?;
        let mut draft = Draft::new(order, at);
        draft.record(OrderChange::Emptied);
        self.update_draft(&mut draft)?;
        draft.commit()
    }

    pub fn add_to_cart(
        &self,
        order: &Order,
        variant_id: VariantId,
        quantity: i64,
        price: Money,
        options: LineItemOptions,
        at: DateTime<Utc>,
    ) -> LifecycleResult<OrderDecision> {
        order.ensure_not_completed("add to cart")?;
        validate_quantity(quantity)?;

        let mut draft = Draft::new(order, at);
        let existing = order
            .line_items()
            .iter()
            .find(|li| li.variant_id() == variant_id && self.options_match(li, &options));

        match existing {
            Some(li) => {
                let merged = li.quantity().saturating_add(quantity);
                validate_quantity(merged)?;
                draft.record(OrderChange::LineItemQuantityChanged {
                    line_item_id: *li.id(),
                    quantity: merged,
                });
            }
            None => {
                let line_item = LineItem::new(LineItemId::new(), variant_id, quantity, price, options)?;
                draft.record(OrderChange::LineItemAdded { line_item });
            }
        }
        self.update_draft(&mut draft)?;
        draft.commit()
    }

    fn options_match(&self, line_item: &LineItem, options: &LineItemOptions) -> bool {
        self.line_item_comparison_hooks
            .iter()
            .all(|hook| hook(line_item, options))
    }

    /// Replace the open tax adjustments with what `calculator` computes for
    /// the order's tax zone.
    pub fn create_tax_charge(
        &self,
        order: &Order,
        calculator: &dyn TaxCalculator,
        zones: &dyn TaxZoneMatcher,
        at: DateTime<Utc>,
    ) -> LifecycleResult<OrderDecision> {
        let zone = order
            .tax_zone(zones, self.config.tax_using_ship_address)
            .cloned();
        let mut draft = Draft::new(order, at);

        let stale: Vec<AdjustmentId> = draft
            .order
            .adjustments()
            .iter()
            .filter(|a| a.is_tax() && !a.is_closed())
            .map(|a| *a.id())
            .collect();
        if !stale.is_empty() {
            draft.record(OrderChange::AdjustmentsRemoved {
                adjustment_ids: stale,
            });
        }

        for mut adjustment in calculator.compute(&draft.order, zone.as_ref()) {
            adjustment.source = AdjustmentSource::Tax;
            self.add_adjustment(&mut draft, adjustment)?;
        }
        draft.commit()
    }

    /// Attach a promotion's adjustments. Applying the same promotion twice is a no-op.
    pub fn apply_promotion(
        &self,
        order: &Order,
        promotion_id: PromotionId,
        engine: &dyn PromotionEngine,
        at: DateTime<Utc>,
    ) -> LifecycleResult<OrderDecision> {
        let mut draft = Draft::new(order, at);
        if order.promotions().contains(&promotion_id) {
            return draft.commit();
        }
        for mut adjustment in engine.activate(order, promotion_id) {
            adjustment.source = AdjustmentSource::Promotion(promotion_id);
            self.add_adjustment(&mut draft, adjustment)?;
        }
        draft.record(OrderChange::PromotionApplied { promotion_id });
        draft.commit()
    }

    fn add_adjustment(&self, draft: &mut Draft, adjustment: AdjustmentDraft) -> LifecycleResult<()> {
        adjustment.validate()?;
        draft.order.ensure_adjustable(adjustment.adjustable)?;
        draft.record(OrderChange::AdjustmentAdded {
            adjustment: Adjustment::from_draft(AdjustmentId::new(), adjustment),
        });
        Ok(())
    }

    /// Send every checkout payment to the gateway. Declines mark the payment
    /// failed instead of aborting.
    pub fn process_payments(&self, order: &Order, at: DateTime<Utc>) -> LifecycleResult<OrderDecision> {
        self.settle_payments(order, at, false, &|draft: &mut Draft| self.update_draft(draft))
    }

    fn pending_payments(&self, order: &Order) -> Vec<PendingPayment> {
        order
            .payments()
            .iter()
            .filter(|p| p.state() == PaymentState::Checkout && p.response_code().is_none())
            .map(|p| PendingPayment {
                payment_id: *p.id(),
                amount: p.amount(),
                source: p.source().to_string(),
                capture: p.method().auto_capture_or(self.config.auto_capture),
            })
            .collect()
    }

    /// Purchase or authorize each payment. With `strict`, the first decline
    /// aborts; otherwise it becomes a failed outcome.
    fn charge(
        &self,
        order: &Order,
        pending: &[PendingPayment],
        strict: bool,
    ) -> LifecycleResult<Vec<PaymentOutcome>> {
        let mut outcomes = Vec::with_capacity(pending.len());
        for payment in pending {
            let options = self.gateway_options(order, payment.payment_id);
            let response = if payment.capture {
                self.gateway.purchase(payment.amount, &payment.source, &options)?
            } else {
                self.gateway.authorize(payment.amount, &payment.source, &options)?
            };

            if !response.success {
                if strict {
                    return Err(LifecycleError::PaymentDeclined {
                        payment_id: payment.payment_id,
                        message: response.message,
                    });
                }
                outcomes.push(PaymentOutcome {
                    payment_id: payment.payment_id,
                    state: PaymentState::Failed,
                    response_code: None,
                    avs_result: response.avs_result,
                    cvv_result: response.cvv_result,
                });
                continue;
            }

            outcomes.push(PaymentOutcome {
                response_code: response.authorization,
                avs_result: response.avs_result,
                cvv_result: response.cvv_result,
                ..payment.assume_success()
            });
        }
        Ok(outcomes)
    }

    /// Capture a previously authorized payment.
    pub fn capture_payment(
        &self,
        order: &Order,
        payment_id: PaymentId,
        at: DateTime<Utc>,
    ) -> LifecycleResult<OrderDecision> {
        let payment = order.payment(&payment_id).ok_or_else(DomainError::not_found)?;
        let token = match (payment.state(), payment.response_code()) {
            (PaymentState::Pending, Some(token)) => token.to_string(),
            (state, _) => {
                return Err(DomainError::invalid_transition(format!(
                    "cannot capture payment {payment_id} in state {state}"
                ))
                .into());
            }
        };

        let mut draft = Draft::new(order, at);
        draft.record(OrderChange::PaymentUpdated {
            payment_id,
            state: PaymentState::Completed,
            response_code: None,
            avs_result: None,
            cvv_result: None,
        });
        self.update_draft(&mut draft)?;
        let decision = draft.commit()?;

        let response = self
            .gateway
            .capture(payment.amount(), &token, &self.gateway_options(order, payment_id))?;
        if !response.success {
            return Err(LifecycleError::PaymentDeclined {
                payment_id,
                message: response.message,
            });
        }
        Ok(decision)
    }

    /// Credit part of a completed payment back to the customer.
    pub fn refund_payment(
        &self,
        order: &Order,
        payment_id: PaymentId,
        amount: Money,
        reason: &str,
        at: DateTime<Utc>,
    ) -> LifecycleResult<OrderDecision> {
        let payment = order.payment(&payment_id).ok_or_else(DomainError::not_found)?;
        if !payment.is_completed() {
            return Err(DomainError::invalid_transition(format!(
                "cannot refund payment {payment_id} in state {}",
                payment.state()
            ))
            .into());
        }
        if !amount.is_positive() || amount > payment.credit_allowed() {
            return Err(DomainError::validation(format!(
                "refund of {amount} exceeds credit allowed ({})",
                payment.credit_allowed()
            ))
            .into());
        }

        let mut draft = Draft::new(order, at);
        draft.record(OrderChange::RefundRecorded {
            payment_id,
            refund: Refund {
                id: Uuid::now_v7(),
                amount,
                reason: reason.to_string(),
                created_at: at,
            },
        });
        self.update_draft(&mut draft)?;
        let decision = draft.commit()?;

        if let Some(token) = payment.response_code() {
            let response = self
                .gateway
                .credit(amount, token, &self.gateway_options(order, payment_id))?;
            if !response.success {
                return Err(LifecycleError::PaymentDeclined {
                    payment_id,
                    message: response.message,
                });
            }
        }
        Ok(decision)
    }

    /// Mark `quantity` units of a line item as returned to stock.
    pub fn record_returned_units(
        &self,
        order: &Order,
        line_item_id: LineItemId,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> LifecycleResult<OrderDecision> {
        if !order.is_completed() {
            return Err(DomainError::invalid_transition(format!(
                "order {} is not complete",
                order.number()
            ))
            .into());
        }
        let line_item = order.line_item(&line_item_id).ok_or_else(DomainError::not_found)?;
        let returnable = line_item.quantity() - line_item.returned_quantity();
        if quantity <= 0 || quantity > returnable {
            return Err(DomainError::validation(format!(
                "cannot return {quantity} units; {returnable} returnable"
            ))
            .into());
        }

        let mut draft = Draft::new(order, at);
        draft.record(OrderChange::UnitsReturned {
            line_item_id,
            quantity,
        });
        draft.commit()
    }

    /// Re-run the shipment update rule on a completed order.
    pub fn fulfill(&self, order: &Order, at: DateTime<Utc>) -> LifecycleResult<OrderDecision> {
        if !order.is_completed() {
            return Err(DomainError::invalid_transition(format!(
                "order {} is not complete",
                order.number()
            ))
            .into());
        }
        let mut draft = Draft::new(order, at);
        self.update_shipments(&mut draft);
        self.update_shipment_state(&mut draft);
        draft.commit()
    }

    /// Hand a ready shipment to the carrier.
    pub fn ship_shipment(
        &self,
        order: &Order,
        shipment_id: ShipmentId,
        at: DateTime<Utc>,
    ) -> LifecycleResult<OrderDecision> {
        let shipment = order.shipment(&shipment_id).ok_or_else(DomainError::not_found)?;
        if shipment.state() != ShipmentState::Ready {
            return Err(DomainError::invalid_transition(format!(
                "cannot ship shipment {shipment_id} in state {}",
                shipment.state()
            ))
            .into());
        }
        let mut draft = Draft::new(order, at);
        draft.record(OrderChange::ShipmentStateChanged {
            shipment_id,
            from: ShipmentState::Ready,
            to: ShipmentState::Shipped,
        });
        self.update_shipment_state(&mut draft);
        draft.commit()
    }

    fn gateway_options(&self, order: &Order, payment_id: PaymentId) -> GatewayOptions {
        GatewayOptions {
            order_number: order.number().to_string(),
            payment_id: Some(payment_id),
        }
    }
}

impl core::fmt::Debug for OrderLifecycle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OrderLifecycle")
            .field("config", &self.config)
            .field("pipeline", &self.pipeline)
            .field("update_hooks", &self.update_hooks.len())
            .field("line_item_comparison_hooks", &self.line_item_comparison_hooks.len())
            .finish_non_exhaustive()
    }
}
