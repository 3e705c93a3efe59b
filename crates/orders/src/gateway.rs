//! Payment gateway port.
//!
//! The order only looks at `success` and the authorization token; wire
//! protocols belong to the gateway implementation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use storefront_core::Money;

use crate::payment::PaymentId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayOptions {
    pub order_number: String,
    pub payment_id: Option<PaymentId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub success: bool,
    pub authorization: Option<String>,
    pub message: String,
    pub avs_result: Option<String>,
    pub cvv_result: Option<String>,
}

impl GatewayResponse {
    pub fn approved(authorization: impl Into<String>) -> Self {
        Self {
            success: true,
            authorization: Some(authorization.into()),
            message: "approved".to_string(),
            avs_result: None,
            cvv_result: None,
        }
    }

    pub fn declined(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }
}

/// The gateway could not be reached or answered garbage.
///
/// A declined payment is not an error; it is a response with `success == false`.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
}

/// `options.payment_id` is an idempotency key for `authorize` and `purchase`:
/// repeating either for the same payment returns the first response and must
/// not charge again.
pub trait PaymentGateway: Send + Sync {
    fn authorize(
        &self,
        amount: Money,
        source: &str,
        options: &GatewayOptions,
    ) -> Result<GatewayResponse, GatewayError>;

    /// Authorize and capture in one step.
    fn purchase(
        &self,
        amount: Money,
        source: &str,
        options: &GatewayOptions,
    ) -> Result<GatewayResponse, GatewayError>;

    fn capture(
        &self,
        amount: Money,
        authorization: &str,
        options: &GatewayOptions,
    ) -> Result<GatewayResponse, GatewayError>;

    fn void(&self, authorization: &str, options: &GatewayOptions)
    -> Result<GatewayResponse, GatewayError>;

    fn credit(
        &self,
        amount: Money,
        authorization: &str,
        options: &GatewayOptions,
    ) -> Result<GatewayResponse, GatewayError>;
}

/// Deterministic in-process gateway for development and tests.
///
/// Sources equal to [`BogusGateway::DECLINED_SOURCE`] are declined, and
/// [`BogusGateway::RISKY_SOURCE`] is approved with failing AVS/CVV checks.
/// Every other source is approved with clean checks.
#[derive(Debug, Default)]
pub struct BogusGateway {
    next_token: AtomicU64,
    calls: AtomicUsize,
    charges: AtomicUsize,
    by_payment: Mutex<HashMap<PaymentId, GatewayResponse>>,
}

impl BogusGateway {
    pub const DECLINED_SOURCE: &'static str = "4000000000000002";
    pub const RISKY_SOURCE: &'static str = "4000000000000101";

    pub fn new() -> Self {
        Self::default()
    }

    /// Number of gateway calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of authorizations actually issued. Replays are not counted.
    pub fn charges(&self) -> usize {
        self.charges.load(Ordering::SeqCst)
    }

    fn charge(&self, source: &str, options: &GatewayOptions) -> Result<GatewayResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(payment_id) = options.payment_id else {
            return Ok(self.authorize_source(source));
        };
        let mut by_payment = self
            .by_payment
            .lock()
            .map_err(|_| GatewayError::Unavailable("bogus gateway state poisoned".into()))?;
        let response = by_payment
            .entry(payment_id)
            .or_insert_with(|| self.authorize_source(source));
        Ok(response.clone())
    }

    fn authorize_source(&self, source: &str) -> GatewayResponse {
        if source == Self::DECLINED_SOURCE {
            return GatewayResponse::declined("card declined");
        }
        self.charges.fetch_add(1, Ordering::SeqCst);
        let token = format!("BOGUS-{}", self.next_token.fetch_add(1, Ordering::SeqCst) + 1);
        let (avs, cvv) = if source == Self::RISKY_SOURCE {
            ("N", "N")
        } else {
            ("A", "M")
        };
        GatewayResponse {
            avs_result: Some(avs.to_string()),
            cvv_result: Some(cvv.to_string()),
            ..GatewayResponse::approved(token)
        }
    }

    fn follow_up(&self, authorization: &str) -> GatewayResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if authorization.starts_with("BOGUS-") {
            GatewayResponse::approved(authorization)
        } else {
            GatewayResponse::declined(format!("unknown authorization '{authorization}'"))
        }
    }
}

impl PaymentGateway for BogusGateway {
    fn authorize(
        &self,
        _amount: Money,
        source: &str,
        options: &GatewayOptions,
    ) -> Result<GatewayResponse, GatewayError> {
        self.charge(source, options)
    }

    fn purchase(
        &self,
        _amount: Money,
        source: &str,
        options: &GatewayOptions,
    ) -> Result<GatewayResponse, GatewayError> {
        self.charge(source, options)
    }

    fn capture(
        &self,
        _amount: Money,
        authorization: &str,
        _options: &GatewayOptions,
    ) -> Result<GatewayResponse, GatewayError> {
        Ok(self.follow_up(authorization))
    }

    fn void(
        &self,
        authorization: &str,
        _options: &GatewayOptions,
    ) -> Result<GatewayResponse, GatewayError> {
        Ok(self.follow_up(authorization))
    }

    fn credit(
        &self,
        _amount: Money,
        authorization: &str,
        _options: &GatewayOptions,
    ) -> Result<GatewayResponse, GatewayError> {
        Ok(self.follow_up(authorization))
    }
}
