//! Signed amounts applied to an order, a line item or a shipment.
//!
//! Promotion and tax engines are opaque: they hand back [`AdjustmentDraft`]s
//! and the order only sums them.

use serde::{Deserialize, Serialize};

use storefront_core::{DomainError, DomainResult, Entity, Money, MoneySign};

use crate::address::TaxZone;
use crate::line_item::LineItemId;
use crate::order::Order;
use crate::shipment::ShipmentId;

entity_id! {
    /// Adjustment identifier.
    AdjustmentId
}

entity_id! {
    /// Promotion identifier (the promotion itself lives in the promotion engine).
    PromotionId
}

/// What an adjustment is attached to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Adjustable {
    Order,
    LineItem(LineItemId),
    Shipment(ShipmentId),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "promotion_id", rename_all = "snake_case")]
pub enum AdjustmentSource {
    Promotion(PromotionId),
    Tax,
    Shipping,
    Other,
}

/// An adjustment as produced by an engine, before it is attached to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentDraft {
    pub adjustable: Adjustable,
    pub source: AdjustmentSource,
    pub label: String,
    pub amount: Money,
    pub eligible: bool,
    /// Tax already contained in the price; reported but not added to the total.
    pub included: bool,
}

impl AdjustmentDraft {
    pub fn new(
        adjustable: Adjustable,
        source: AdjustmentSource,
        label: impl Into<String>,
        amount: Money,
    ) -> Self {
        Self {
            adjustable,
            source,
            label: label.into(),
            amount,
            eligible: true,
            included: false,
        }
    }

    pub fn included(mut self) -> Self {
        self.included = true;
        self
    }

    /// Range check, plus promotions may only lower the total.
    pub fn validate(&self) -> DomainResult<()> {
        let sign = match self.source {
            AdjustmentSource::Promotion(_) => MoneySign::NonPositive,
            _ => MoneySign::Any,
        };
        self.amount.validate("adjustment amount", sign)?;
        if self.included && self.source != AdjustmentSource::Tax {
            return Err(DomainError::validation("only tax adjustments can be included in price"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    id: AdjustmentId,
    adjustable: Adjustable,
    source: AdjustmentSource,
    label: String,
    amount: Money,
    eligible: bool,
    included: bool,
    closed: bool,
}

impl Adjustment {
    pub fn from_draft(id: AdjustmentId, draft: AdjustmentDraft) -> Self {
        Self {
            id,
            adjustable: draft.adjustable,
            source: draft.source,
            label: draft.label,
            amount: draft.amount,
            eligible: draft.eligible,
            included: draft.included,
            closed: false,
        }
    }

    pub fn adjustable(&self) -> Adjustable {
        self.adjustable
    }

    pub fn source(&self) -> AdjustmentSource {
        self.source
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn is_eligible(&self) -> bool {
        self.eligible
    }

    pub fn is_included(&self) -> bool {
        self.included
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_tax(&self) -> bool {
        self.source == AdjustmentSource::Tax
    }

    pub fn is_promotion(&self) -> bool {
        matches!(self.source, AdjustmentSource::Promotion(_))
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }
}

impl Entity for Adjustment {
    type Id = AdjustmentId;

    fn id(&self) -> &AdjustmentId {
        &self.id
    }
}

/// Tax engine: computes tax adjustments for an order in a zone.
pub trait TaxCalculator: Send + Sync {
    fn compute(&self, order: &Order, zone: Option<&TaxZone>) -> Vec<AdjustmentDraft>;
}

/// Promotion engine: computes the adjustments a promotion grants an order.
pub trait PromotionEngine: Send + Sync {
    fn activate(&self, order: &Order, promotion_id: PromotionId) -> Vec<AdjustmentDraft>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotions_cannot_add_to_the_total() {
        let promo = AdjustmentSource::Promotion(PromotionId::new());
        let ok = AdjustmentDraft::new(Adjustable::Order, promo, "10% off", Money::from_cents(-500));
        assert!(ok.validate().is_ok());

        let bad = AdjustmentDraft::new(Adjustable::Order, promo, "oops", Money::from_cents(500));
        assert!(matches!(bad.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn only_tax_may_be_included() {
        let draft =
            AdjustmentDraft::new(Adjustable::Order, AdjustmentSource::Other, "fee", Money::from_cents(100))
                .included();
        assert!(draft.validate().is_err());
    }

    #[test]
    fn adjustable_serializes_with_a_type_tag() {
        let id = LineItemId::new();
        let json = serde_json::to_value(Adjustable::LineItem(id)).unwrap();
        assert_eq!(json["type"], "line_item");
        assert_eq!(json["id"], id.to_string());
    }
}
