use super::server::ServerId;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(Uuid);

impl PaymentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for PaymentId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Processor-issued reference for one attempt to collect a payment.
///
/// Unique across payments; used as the idempotency key for webhook events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentIntentRef(String);

impl PaymentIntentRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentIntentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount must be positive")]
    NotPositive,
    #[error("amount has more than two fractional digits")]
    TooPrecise,
    #[error("amount is too large")]
    Overflow,
}

/// A positive monetary amount in minor currency units (e.g. cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Amount(u64);

impl Amount {
    pub fn new(minor_units: u64) -> Result<Self, AmountError> {
        if minor_units > 0 {
            Ok(Self(minor_units))
        } else {
            Err(AmountError::NotPositive)
        }
    }

    /// Converts a major-unit price such as `5.00` into minor units.
    pub fn from_major(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive);
        }
        let minor = value
            .checked_mul(Decimal::ONE_HUNDRED)
            .ok_or(AmountError::Overflow)?;
        if minor.fract() != Decimal::ZERO {
            return Err(AmountError::TooPrecise);
        }
        minor.to_u64().ok_or(AmountError::Overflow).and_then(Self::new)
    }

    pub fn minor_units(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Amount {
    type Error = AmountError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Payment lifecycle. Resolved states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    RequiresPaymentMethod,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::RequiresPaymentMethod)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::RequiresPaymentMethod => "requires_payment_method",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payment paired 1:1 with a server at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: PaymentId,
    pub server_id: ServerId,
    /// Unset until the processor has issued an intent.
    pub intent_ref: Option<PaymentIntentRef>,
    pub amount: Amount,
    pub currency: String,
    pub status: PaymentStatus,
}

impl Payment {
    pub fn new(server_id: ServerId, amount: Amount, currency: impl Into<String>) -> Self {
        Self {
            id: PaymentId::new(),
            server_id,
            intent_ref: None,
            amount,
            currency: currency.into(),
            status: PaymentStatus::RequiresPaymentMethod,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(1).is_ok());
        assert_eq!(Amount::new(0), Err(AmountError::NotPositive));
    }

    #[test]
    fn test_amount_from_major_units() {
        assert_eq!(Amount::from_major(dec!(5.00)).unwrap().minor_units(), 500);
        assert_eq!(Amount::from_major(dec!(0.01)).unwrap().minor_units(), 1);
        assert_eq!(Amount::from_major(dec!(-1)), Err(AmountError::NotPositive));
        assert_eq!(Amount::from_major(dec!(0)), Err(AmountError::NotPositive));
        assert_eq!(Amount::from_major(dec!(1.005)), Err(AmountError::TooPrecise));
    }

    #[test]
    fn test_amount_from_major_overflow_is_an_error() {
        assert_eq!(Amount::from_major(Decimal::MAX), Err(AmountError::Overflow));
        assert_eq!(
            Amount::from_major(Decimal::from(u64::MAX)),
            Err(AmountError::Overflow)
        );
    }

    #[test]
    fn test_payment_status_wire_names() {
        let json = serde_json::to_string(&PaymentStatus::RequiresPaymentMethod).unwrap();
        assert_eq!(json, "\"requires_payment_method\"");
        assert!(PaymentStatus::Succeeded.is_terminal());
        assert!(!PaymentStatus::RequiresPaymentMethod.is_terminal());
    }

    #[test]
    fn test_new_payment_is_unresolved() {
        let payment = Payment::new(ServerId::new(), Amount::new(500).unwrap(), "eur");
        assert_eq!(payment.status, PaymentStatus::RequiresPaymentMethod);
        assert!(payment.intent_ref.is_none());
    }
}
