//! Value objects shared by the booking, payment, and group state machines.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::RentalError;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create the identifier from a `Uuid`
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a rentable equipment item
    EquipmentId
);
uuid_id!(
    /// Unique identifier for a single-renter booking
    BookingId
);
uuid_id!(
    /// Unique identifier for a payment attempt (local, not the gateway's)
    PaymentId
);
uuid_id!(
    /// Unique identifier for a group booking
    GroupBookingId
);
uuid_id!(
    /// Unique identifier for a participant row within a group booking
    ParticipantId
);
uuid_id!(
    /// Unique identifier for a user account (renter, owner, or participant)
    UserId
);

/// Reference assigned by the payment gateway to one payment attempt.
///
/// Unique across all payments; it is the key for idempotent verification.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayReference(String);

impl GatewayReference {
    /// Wrap a gateway-assigned reference.
    ///
    /// # Errors
    ///
    /// Returns [`RentalError::Validation`] for an empty or whitespace-only reference.
    pub fn parse(reference: impl Into<String>) -> Result<Self, RentalError> {
        let reference = reference.into();
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(RentalError::Validation(
                "gateway reference must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the reference as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GatewayReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money Value Object (minor units to avoid floating point errors)
// ============================================================================

/// An amount in the currency's minor unit (kobo, cents).
///
/// The gateway reports amounts in the same unit, so comparisons during
/// verification are exact integer comparisons.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Subtracts two money amounts (returns None if result would be negative)
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        if self.0 >= other.0 {
            Some(Self(self.0 - other.0))
        } else {
            None
        }
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Sums an iterator of amounts, `None` on overflow
    pub fn checked_sum<I>(amounts: I) -> Option<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, Self::checked_add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// ISO 4217 currency code (three uppercase ASCII letters).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parse and normalise a currency code.
    ///
    /// # Errors
    ///
    /// Returns [`RentalError::Validation`] unless the code is three ASCII letters.
    pub fn parse(code: &str) -> Result<Self, RentalError> {
        let code = code.trim();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_uppercase()))
        } else {
            Err(RentalError::Validation(format!(
                "invalid currency code: {code:?}"
            )))
        }
    }

    /// Nigerian naira, the gateway's settlement currency
    #[must_use]
    pub fn ngn() -> Self {
        Self("NGN".to_string())
    }

    /// Borrow the code
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = RentalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Date Range (closed interval of whole days)
// ============================================================================

/// A closed interval `[start, end]` of rental days.
///
/// Both ends are inclusive: a booking ending on day D and another starting on
/// day D overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = RentalError;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl DateRange {
    /// Create a range.
    ///
    /// # Errors
    ///
    /// Returns [`RentalError::InvalidRange`] when `end` precedes `start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, RentalError> {
        if end < start {
            return Err(RentalError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// First rental day
    #[must_use]
    pub const fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last rental day (inclusive)
    #[must_use]
    pub const fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of rental days, counting both ends.
    #[must_use]
    pub fn days(&self) -> u32 {
        let span = (self.end - self.start).num_days() + 1;
        u32::try_from(span).unwrap_or(u32::MAX)
    }

    /// Whether the two closed intervals share at least one day.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Total price for this range at `price_per_day`.
    ///
    /// # Errors
    ///
    /// Returns [`RentalError::Overflow`] if the product does not fit.
    pub fn price(&self, price_per_day: Money) -> Result<Money, RentalError> {
        price_per_day
            .checked_multiply(self.days())
            .ok_or(RentalError::Overflow("total price"))
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

// ============================================================================
// Payment channel (gateway-reported)
// ============================================================================

/// How the payer settled, as reported by the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    /// Debit/credit card
    Card,
    /// Direct bank debit
    Bank,
    /// Bank transfer to a virtual account
    BankTransfer,
    /// USSD short code
    Ussd,
    /// Mobile money wallet
    MobileMoney,
    /// QR code scan
    Qr,
    /// Any channel this service does not model explicitly
    Other(String),
}

impl PaymentChannel {
    /// Map the gateway's channel label onto a typed channel.
    #[must_use]
    pub fn from_gateway(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "card" => Self::Card,
            "bank" => Self::Bank,
            "bank_transfer" | "dedicated_nuban" => Self::BankTransfer,
            "ussd" => Self::Ussd,
            "mobile_money" => Self::MobileMoney,
            "qr" => Self::Qr,
            other => Self::Other(other.to_string()),
        }
    }

    /// Stable label for storage
    #[must_use]
    pub fn as_label(&self) -> &str {
        match self {
            Self::Card => "card",
            Self::Bank => "bank",
            Self::BankTransfer => "bank_transfer",
            Self::Ussd => "ussd",
            Self::MobileMoney => "mobile_money",
            Self::Qr => "qr",
            Self::Other(label) => label,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn test_range_counts_both_ends() {
        let range = DateRange::new(day(1), day(3)).unwrap();
        assert_eq!(range.days(), 3);
        assert_eq!(range.price(Money::from_minor(1000)).unwrap(), Money::from_minor(3000));
    }

    #[test]
    fn test_single_day_range() {
        let range = DateRange::new(day(5), day(5)).unwrap();
        assert_eq!(range.days(), 1);
    }

    #[test]
    fn test_reversed_range_rejected() {
        let result = DateRange::new(day(3), day(1));
        assert!(matches!(result, Err(RentalError::InvalidRange { .. })));
    }

    #[test]
    fn test_touching_ranges_overlap() {
        let a = DateRange::new(day(1), day(3)).unwrap();
        let b = DateRange::new(day(3), day(5)).unwrap();
        let c = DateRange::new(day(4), day(5)).unwrap();
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_range_deserialization_validates() {
        let ok: Result<DateRange, _> =
            serde_json::from_str(r#"{"start":"2024-06-01","end":"2024-06-03"}"#);
        assert!(ok.is_ok());

        let reversed: Result<DateRange, _> =
            serde_json::from_str(r#"{"start":"2024-06-03","end":"2024-06-01"}"#);
        assert!(reversed.is_err());
    }

    #[test]
    fn test_currency_normalised() {
        assert_eq!(Currency::parse("ngn").unwrap().as_str(), "NGN");
        assert!(Currency::parse("NAIRA").is_err());
    }

    #[test]
    fn test_money_sum_overflow() {
        let sum = Money::checked_sum([Money::from_minor(u64::MAX), Money::from_minor(1)]);
        assert!(sum.is_none());
        let sum = Money::checked_sum([Money::from_minor(1000), Money::from_minor(2000)]);
        assert_eq!(sum, Some(Money::from_minor(3000)));
    }

    #[test]
    fn test_channel_mapping() {
        assert_eq!(PaymentChannel::from_gateway("CARD"), PaymentChannel::Card);
        assert_eq!(
            PaymentChannel::from_gateway("apple_pay"),
            PaymentChannel::Other("apple_pay".to_string())
        );
    }

    #[test]
    fn test_empty_reference_rejected() {
        assert!(GatewayReference::parse("  ").is_err());
        assert_eq!(GatewayReference::parse(" ref_1 ").unwrap().as_str(), "ref_1");
    }
}
