//! Monetary amounts in minor units.
//!
//! Amounts are stored as signed cents, so two-decimal precision is structural
//! and only range has to be validated.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Exclusive bound for any order money field: 100 000 000.00.
pub const MONEY_THRESHOLD: Money = Money(100_000_000 * 100);

/// Signed amount in cents.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl ValueObject for Money {}

/// Sign constraint a money field must satisfy on top of the range check.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MoneySign {
    Any,
    NonNegative,
    NonPositive,
}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Multiply a unit price by a quantity, rejecting overflow.
    pub fn checked_times(self, quantity: i64) -> DomainResult<Money> {
        self.0
            .checked_mul(quantity)
            .map(Money)
            .ok_or_else(|| DomainError::validation(format!("{self} x {quantity} overflows")))
    }

    /// Saturates instead of wrapping; a saturated value always fails
    /// [`Money::validate`], so derived totals can use it without panicking.
    pub fn saturating_add(self, other: Money) -> Money {
        Money(self.0.saturating_add(other.0))
    }

    pub fn saturating_times(self, quantity: i64) -> Money {
        Money(self.0.saturating_mul(quantity))
    }

    /// Range + sign check for a named field. Never clamps.
    pub fn validate(self, field: &str, sign: MoneySign) -> DomainResult<()> {
        if self <= -MONEY_THRESHOLD || self >= MONEY_THRESHOLD {
            return Err(DomainError::validation(format!(
                "{field} must be within +/-{MONEY_THRESHOLD} (got {self})"
            )));
        }
        match sign {
            MoneySign::NonNegative if self.is_negative() => Err(DomainError::validation(format!(
                "{field} must be greater than or equal to 0 (got {self})"
            ))),
            MoneySign::NonPositive if self.is_positive() => Err(DomainError::validation(format!(
                "{field} must be less than or equal to 0 (got {self})"
            ))),
            _ => Ok(()),
        }
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Parses `-?\d+(\.\d{1,2})?`; anything finer than cents is a validation error.
impl FromStr for Money {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("invalid money amount '{s}'"));

        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = match body.split_once('.') {
            Some((w, f)) => (w, f),
            None => (body, ""),
        };
        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(whole) || (body.contains('.') && (!digits(frac) || frac.len() > 2)) {
            return Err(invalid());
        }

        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac))
            .ok_or_else(invalid)?;
        Ok(Money(if negative { -cents } else { cents }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_two_decimal_amounts() {
        assert_eq!("12.34".parse::<Money>().unwrap(), Money::from_cents(1234));
        assert_eq!("-0.5".parse::<Money>().unwrap(), Money::from_cents(-50));
        assert_eq!("7".parse::<Money>().unwrap(), Money::from_cents(700));
    }

    #[test]
    fn rejects_sub_cent_precision() {
        for bad in ["1.234", "1.", ".5", "abc", "--1", ""] {
            assert!(matches!(bad.parse::<Money>(), Err(DomainError::Validation(_))), "{bad}");
        }
    }

    #[test]
    fn threshold_is_exclusive() {
        assert!(MONEY_THRESHOLD.validate("total", MoneySign::Any).is_err());
        assert!((MONEY_THRESHOLD - Money::from_cents(1))
            .validate("total", MoneySign::Any)
            .is_ok());
        assert!((-MONEY_THRESHOLD).validate("total", MoneySign::Any).is_err());
    }

    #[test]
    fn sign_constraints_are_not_clamped() {
        let err = Money::from_cents(-1)
            .validate("item_total", MoneySign::NonNegative)
            .unwrap_err();
        assert!(err.to_string().contains("item_total"));
        assert!(Money::from_cents(1).validate("promo_total", MoneySign::NonPositive).is_err());
        assert!(Money::ZERO.validate("promo_total", MoneySign::NonPositive).is_ok());
    }

    #[test]
    fn serializes_as_plain_cents() {
        let json = serde_json::to_string(&Money::from_cents(-250)).unwrap();
        assert_eq!(json, "-250");
    }

    proptest! {
        #[test]
        fn display_parses_back(cents in -10_000_000_000i64..10_000_000_000i64) {
            let money = Money::from_cents(cents);
            prop_assert_eq!(money.to_string().parse::<Money>().unwrap(), money);
        }
    }
}
