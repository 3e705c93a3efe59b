use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use storefront_core::{DomainResult, Entity, Money, MoneySign};

use crate::state::PaymentState;

entity_id! {
    /// Payment identifier.
    PaymentId
}

/// AVS response codes that flag a payment as risky.
pub const RISKY_AVS_CODES: &[&str] = &[
    "B", "D", "E", "G", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R", "S", "T", "U", "V", "W",
    "X", "Y", "Z",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub name: String,
    /// Stored payment profiles; such methods force the confirm step.
    pub payment_profiles_supported: bool,
    /// Per-method override of the global auto-capture setting.
    pub auto_capture: Option<bool>,
}

impl PaymentMethod {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            payment_profiles_supported: false,
            auto_capture: None,
        }
    }

    pub fn with_payment_profiles(mut self) -> Self {
        self.payment_profiles_supported = true;
        self
    }

    pub fn auto_capture_or(&self, default: bool) -> bool {
        self.auto_capture.unwrap_or(default)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,
    pub amount: Money,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    id: PaymentId,
    amount: Money,
    method: PaymentMethod,
    /// Opaque instrument token handed to the gateway.
    source: String,
    state: PaymentState,
    /// Gateway authorization token.
    response_code: Option<String>,
    avs_result: Option<String>,
    cvv_result: Option<String>,
    #[serde(default)]
    refunds: Vec<Refund>,
}

impl Payment {
    pub fn new(
        id: PaymentId,
        amount: Money,
        method: PaymentMethod,
        source: impl Into<String>,
    ) -> DomainResult<Self> {
        amount.validate("payment amount", MoneySign::Any)?;
        Ok(Self {
            id,
            amount,
            method,
            source: source.into(),
            state: PaymentState::Checkout,
            response_code: None,
            avs_result: None,
            cvv_result: None,
            refunds: Vec::new(),
        })
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn method(&self) -> &PaymentMethod {
        &self.method
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn response_code(&self) -> Option<&str> {
        self.response_code.as_deref()
    }

    pub fn avs_result(&self) -> Option<&str> {
        self.avs_result.as_deref()
    }

    pub fn cvv_result(&self) -> Option<&str> {
        self.cvv_result.as_deref()
    }

    pub fn refunds(&self) -> &[Refund] {
        &self.refunds
    }

    pub fn refund_total(&self) -> Money {
        self.refunds.iter().map(|r| r.amount).sum()
    }

    /// Amount still refundable.
    pub fn credit_allowed(&self) -> Money {
        self.amount - self.refund_total()
    }

    pub fn is_completed(&self) -> bool {
        self.state == PaymentState::Completed
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self.state, PaymentState::Failed | PaymentState::Invalid)
    }

    pub fn is_risky(&self) -> bool {
        let avs = self
            .avs_result
            .as_deref()
            .is_some_and(|code| RISKY_AVS_CODES.contains(&code));
        let cvv = self
            .cvv_result
            .as_deref()
            .is_some_and(|code| !code.is_empty() && code != "M");
        avs || cvv || self.state == PaymentState::Failed
    }

    pub(crate) fn record_gateway_result(
        &mut self,
        state: PaymentState,
        response_code: Option<&str>,
        avs_result: Option<&str>,
        cvv_result: Option<&str>,
    ) {
        self.state = state;
        if let Some(code) = response_code {
            self.response_code = Some(code.to_string());
        }
        if let Some(avs) = avs_result {
            self.avs_result = Some(avs.to_string());
        }
        if let Some(cvv) = cvv_result {
            self.cvv_result = Some(cvv.to_string());
        }
    }

    pub(crate) fn push_refund(&mut self, refund: Refund) {
        self.refunds.push(refund);
    }
}

impl Entity for Payment {
    type Id = PaymentId;

    fn id(&self) -> &PaymentId {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment() -> Payment {
        Payment::new(PaymentId::new(), Money::from_cents(10_00), PaymentMethod::new("card"), "tok").unwrap()
    }

    #[test]
    fn risk_comes_from_avs_cvv_or_failure() {
        let mut p = payment();
        assert!(!p.is_risky());

        p.record_gateway_result(PaymentState::Pending, Some("AUTH"), Some("A"), Some("M"));
        assert!(!p.is_risky());

        p.record_gateway_result(PaymentState::Pending, None, Some("N"), None);
        assert!(p.is_risky());

        let mut cvv = payment();
        cvv.record_gateway_result(PaymentState::Pending, None, None, Some("N"));
        assert!(cvv.is_risky());

        let mut failed = payment();
        failed.record_gateway_result(PaymentState::Failed, None, None, None);
        assert!(failed.is_risky());
        assert!(!failed.is_valid());
    }

    #[test]
    fn refunds_reduce_credit_allowed() {
        let mut p = payment();
        p.push_refund(Refund {
            id: Uuid::now_v7(),
            amount: Money::from_cents(2_50),
            reason: "damaged".into(),
            created_at: Utc::now(),
        });
        assert_eq!(p.refund_total(), Money::from_cents(2_50));
        assert_eq!(p.credit_allowed(), Money::from_cents(7_50));
    }

    #[test]
    fn gateway_result_keeps_previous_token_when_none_given() {
        let mut p = payment();
        p.record_gateway_result(PaymentState::Pending, Some("AUTH-1"), None, None);
        p.record_gateway_result(PaymentState::Completed, None, None, None);
        assert_eq!(p.response_code(), Some("AUTH-1"));
        assert!(p.is_completed());
    }
}
