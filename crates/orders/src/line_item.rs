use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use storefront_core::{DomainError, DomainResult, Entity, Money, MoneySign, VariantId};

/// Free-form options attached to a line item (engraving text, gift wrap, ...).
///
/// Two line items for the same variant are only merged when every
/// line-item comparison hook accepts the options.
pub type LineItemOptions = BTreeMap<String, String>;

entity_id! {
    /// Line item identifier.
    LineItemId
}

/// Exclusive upper bound on a line item quantity.
const MAX_QUANTITY: i64 = 1 << 31;

pub fn validate_quantity(quantity: i64) -> DomainResult<()> {
    if quantity <= 0 || quantity >= MAX_QUANTITY {
        return Err(DomainError::validation(format!(
            "quantity must be between 1 and {} (got {quantity})",
            MAX_QUANTITY - 1
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    id: LineItemId,
    variant_id: VariantId,
    quantity: i64,
    price: Money,
    #[serde(default)]
    options: LineItemOptions,
    #[serde(default)]
    returned_quantity: i64,
}

impl LineItem {
    pub fn new(
        id: LineItemId,
        variant_id: VariantId,
        quantity: i64,
        price: Money,
        options: LineItemOptions,
    ) -> DomainResult<Self> {
        validate_quantity(quantity)?;
        price.validate("price", MoneySign::NonNegative)?;
        Ok(Self {
            id,
            variant_id,
            quantity,
            price,
            options,
            returned_quantity: 0,
        })
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn options(&self) -> &LineItemOptions {
        &self.options
    }

    pub fn returned_quantity(&self) -> i64 {
        self.returned_quantity
    }

    /// price x quantity. Saturates on overflow; totals validation rejects it.
    pub fn amount(&self) -> Money {
        self.price.saturating_times(self.quantity)
    }

    pub fn is_fully_returned(&self) -> bool {
        self.returned_quantity >= self.quantity
    }

    pub(crate) fn set_quantity(&mut self, quantity: i64) {
        self.quantity = quantity;
    }

    pub(crate) fn add_returned(&mut self, quantity: i64) {
        self.returned_quantity += quantity;
    }
}

impl Entity for LineItem {
    type Id = LineItemId;

    fn id(&self) -> &LineItemId {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_must_be_positive_and_fit_in_31_bits() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity((1 << 31) - 1).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-3).is_err());
        assert!(validate_quantity(1 << 31).is_err());
    }

    #[test]
    fn amount_is_price_times_quantity() {
        let li = LineItem::new(
            LineItemId::new(),
            VariantId::new(),
            3,
            Money::from_cents(1999),
            LineItemOptions::new(),
        )
        .unwrap();
        assert_eq!(li.amount(), Money::from_cents(5997));
    }

    #[test]
    fn negative_prices_are_rejected() {
        let err = LineItem::new(
            LineItemId::new(),
            VariantId::new(),
            1,
            Money::from_cents(-1),
            LineItemOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
