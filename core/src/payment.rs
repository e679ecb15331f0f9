//! One capture attempt at the gateway.
//!
//! A payment is created `initiated` and settles exactly once, to `verified` or
//! `failed`. Settling an already-terminal payment produces no events, which is
//! what makes repeated verification (webhook retries, page refreshes, polling)
//! safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::smallvec;
use std::fmt;

use crate::environment::MachineEnvironment;
use crate::error::RentalError;
use crate::gateway::{CheckoutSession, GatewayStatus, GatewayVerification};
use crate::reducer::{Events, Reducer};
use crate::types::{
    BookingId, Currency, GatewayReference, GroupBookingId, Money, ParticipantId, PaymentChannel,
    PaymentId,
};

/// What a payment pays for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentSubject {
    /// A single-renter booking
    Booking {
        /// Booking
        booking_id: BookingId,
    },
    /// One participant's share of a group booking
    Participant {
        /// Group
        group_id: GroupBookingId,
        /// Participant row
        participant_id: ParticipantId,
    },
}

/// Payment status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Checkout session open
    Initiated,
    /// Captured for the expected amount (terminal)
    Verified,
    /// Declined, mismatched or expired (terminal)
    Failed,
}

impl PaymentStatus {
    /// `verified` or `failed`
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Initiated)
    }

    /// Stable label
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored label.
    ///
    /// # Errors
    ///
    /// Returns [`RentalError::Storage`] for an unknown label.
    pub fn parse(label: &str) -> Result<Self, RentalError> {
        match label {
            "initiated" => Ok(Self::Initiated),
            "verified" => Ok(Self::Verified),
            "failed" => Ok(Self::Failed),
            other => Err(RentalError::Storage(format!("unknown payment status {other:?}"))),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a payment failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The gateway reported failure
    Declined {
        /// Gateway message
        message: String,
    },
    /// The gateway reported success for a different amount
    AmountMismatch {
        /// Amount we asked for
        expected: Money,
        /// Amount the gateway reported
        reported: Money,
    },
    /// The gateway reported success in a different currency
    CurrencyMismatch {
        /// Currency we asked for
        expected: Currency,
        /// Currency the gateway reported
        reported: Currency,
    },
    /// The checkout session lapsed without settlement
    Expired,
}

impl FailureReason {
    /// Short label for metrics
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Declined { .. } => "declined",
            Self::AmountMismatch { .. } => "amount_mismatch",
            Self::CurrencyMismatch { .. } => "currency_mismatch",
            Self::Expired => "expired",
        }
    }

    /// Integrity failures are never reconciled silently
    #[must_use]
    pub const fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::AmountMismatch { .. } | Self::CurrencyMismatch { .. })
    }
}

/// A capture attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Local id
    pub id: PaymentId,
    /// Owning booking or participant
    pub subject: PaymentSubject,
    /// Gateway reference, unique across payments
    pub reference: GatewayReference,
    /// Expected amount
    pub amount: Money,
    /// Expected currency
    pub currency: Currency,
    /// Checkout URL handed to the payer
    pub authorization_url: String,
    /// Lifecycle status
    pub status: PaymentStatus,
    /// Gateway-reported channel
    pub channel: Option<PaymentChannel>,
    /// Gateway-reported payment time
    pub paid_at: Option<DateTime<Utc>>,
    /// When we recorded the verification
    pub verified_at: Option<DateTime<Utc>>,
    /// Set when `status` is `failed`
    pub failure: Option<FailureReason>,
    /// Checkout session expiry; after it the attempt can no longer settle
    pub expires_at: DateTime<Utc>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Record a freshly opened checkout session.
    ///
    /// # Errors
    ///
    /// Returns [`RentalError::InvalidAmount`] for a zero amount.
    pub fn initiate(
        subject: PaymentSubject,
        session: CheckoutSession,
        amount: Money,
        currency: Currency,
        env: &MachineEnvironment,
    ) -> Result<Self, RentalError> {
        if amount.is_zero() {
            return Err(RentalError::InvalidAmount(amount));
        }
        let now = env.now();
        Ok(Self {
            id: PaymentId::new(),
            subject,
            reference: session.reference,
            amount,
            currency,
            authorization_url: session.authorization_url,
            status: PaymentStatus::Initiated,
            channel: None,
            paid_at: None,
            verified_at: None,
            failure: None,
            expires_at: now + env.policy.payment_window,
            created_at: now,
        })
    }

    /// Still `initiated` with a live checkout session
    #[must_use]
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Initiated && now <= self.expires_at
    }

    /// The stored outcome, as reported to callers
    #[must_use]
    pub fn outcome(&self) -> PaymentOutcome {
        match (self.status, &self.failure) {
            (PaymentStatus::Verified, _) => PaymentOutcome::Verified {
                amount: self.amount,
                channel: self.channel.clone(),
                paid_at: self.paid_at,
            },
            (PaymentStatus::Failed, Some(reason)) => PaymentOutcome::Failed {
                reason: reason.clone(),
            },
            (PaymentStatus::Failed, None) => PaymentOutcome::Failed {
                reason: FailureReason::Declined {
                    message: String::from("unknown"),
                },
            },
            (PaymentStatus::Initiated, _) => PaymentOutcome::Pending,
        }
    }
}

/// Result of a verification, as seen by callers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// Captured for the expected amount
    Verified {
        /// Captured amount
        amount: Money,
        /// Channel used
        channel: Option<PaymentChannel>,
        /// When the payer paid
        paid_at: Option<DateTime<Utc>>,
    },
    /// Definitively not captured (or captured wrongly)
    Failed {
        /// Why
        reason: FailureReason,
    },
    /// The gateway has not settled; poll again later
    Pending,
}

impl PaymentOutcome {
    /// Metric label
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Verified { .. } => "verified",
            Self::Failed { reason } => reason.as_str(),
            Self::Pending => "pending",
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Commands accepted by [`PaymentMachine`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentAction {
    /// Apply the gateway's answer
    Settle(GatewayVerification),
    /// The checkout session lapsed
    Expire,
}

/// Facts recorded by [`PaymentMachine`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    /// Captured for the expected amount
    Verified {
        /// Gateway channel
        channel: Option<PaymentChannel>,
        /// Gateway payment time
        paid_at: Option<DateTime<Utc>>,
    },
    /// Not captured, or captured wrongly
    Failed {
        /// Why
        reason: FailureReason,
    },
}

/// Reducer for [`Payment`]
#[derive(Clone, Copy, Debug, Default)]
pub struct PaymentMachine;

impl PaymentMachine {
    fn decide(payment: &Payment, action: PaymentAction, now: DateTime<Utc>) -> Events<PaymentEvent> {
        if payment.status.is_terminal() {
            return Events::new();
        }

        match action {
            PaymentAction::Settle(verification) => match verification.status {
                GatewayStatus::Pending => Events::new(),
                GatewayStatus::Failed => smallvec![PaymentEvent::Failed {
                    reason: FailureReason::Declined {
                        message: verification
                            .message
                            .unwrap_or_else(|| String::from("declined")),
                    },
                }],
                GatewayStatus::Success if verification.amount != payment.amount => {
                    smallvec![PaymentEvent::Failed {
                        reason: FailureReason::AmountMismatch {
                            expected: payment.amount,
                            reported: verification.amount,
                        },
                    }]
                }
                GatewayStatus::Success if verification.currency != payment.currency => {
                    smallvec![PaymentEvent::Failed {
                        reason: FailureReason::CurrencyMismatch {
                            expected: payment.currency.clone(),
                            reported: verification.currency,
                        },
                    }]
                }
                GatewayStatus::Success => smallvec![PaymentEvent::Verified {
                    channel: verification.channel,
                    paid_at: verification.paid_at,
                }],
            },
            PaymentAction::Expire if now > payment.expires_at => {
                smallvec![PaymentEvent::Failed {
                    reason: FailureReason::Expired,
                }]
            }
            PaymentAction::Expire => Events::new(),
        }
    }
}

/// Apply a recorded event to the payment
pub fn apply_event(payment: &mut Payment, event: &PaymentEvent, at: DateTime<Utc>) {
    match event {
        PaymentEvent::Verified { channel, paid_at } => {
            payment.status = PaymentStatus::Verified;
            payment.channel.clone_from(channel);
            payment.paid_at = *paid_at;
            payment.verified_at = Some(at);
        }
        PaymentEvent::Failed { reason } => {
            payment.status = PaymentStatus::Failed;
            payment.failure = Some(reason.clone());
        }
    }
}

impl Reducer for PaymentMachine {
    type State = Payment;
    type Action = PaymentAction;
    type Event = PaymentEvent;
    type Environment = MachineEnvironment;

    fn reduce(
        &self,
        state: &mut Payment,
        action: PaymentAction,
        env: &MachineEnvironment,
    ) -> Result<Events<PaymentEvent>, RentalError> {
        let now = env.now();
        let events = Self::decide(state, action, now);
        for event in &events {
            apply_event(state, event, now);
        }
        Ok(events)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::environment::SystemClock;
    use crate::policy::BookingPolicy;
    use std::sync::Arc;

    fn env() -> MachineEnvironment {
        MachineEnvironment::new(Arc::new(SystemClock), BookingPolicy::default())
    }

    fn payment(env: &MachineEnvironment) -> Payment {
        let session = CheckoutSession {
            authorization_url: "https://checkout.example/abc".to_string(),
            access_code: "abc".to_string(),
            reference: GatewayReference::parse("ref_1").unwrap(),
        };
        Payment::initiate(
            PaymentSubject::Booking { booking_id: BookingId::new() },
            session,
            Money::from_minor(3000),
            Currency::ngn(),
            env,
        )
        .unwrap()
    }

    fn verification(status: GatewayStatus, amount: u64) -> GatewayVerification {
        GatewayVerification {
            reference: GatewayReference::parse("ref_1").unwrap(),
            status,
            amount: Money::from_minor(amount),
            currency: Currency::ngn(),
            paid_at: Some(Utc::now()),
            channel: Some(PaymentChannel::Card),
            message: None,
        }
    }

    #[test]
    fn test_success_verifies_once() {
        let env = env();
        let mut payment = payment(&env);
        let events = PaymentMachine
            .reduce(&mut payment, PaymentAction::Settle(verification(GatewayStatus::Success, 3000)), &env)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(payment.status, PaymentStatus::Verified);
        assert_eq!(payment.channel, Some(PaymentChannel::Card));

        let snapshot = payment.clone();
        let events = PaymentMachine
            .reduce(&mut payment, PaymentAction::Settle(verification(GatewayStatus::Failed, 0)), &env)
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(payment, snapshot);
    }

    #[test]
    fn test_amount_mismatch_fails() {
        let env = env();
        let mut payment = payment(&env);
        PaymentMachine
            .reduce(&mut payment, PaymentAction::Settle(verification(GatewayStatus::Success, 2999)), &env)
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert!(matches!(
            payment.outcome(),
            PaymentOutcome::Failed { reason: FailureReason::AmountMismatch { .. } }
        ));
    }

    #[test]
    fn test_pending_leaves_initiated() {
        let env = env();
        let mut payment = payment(&env);
        let events = PaymentMachine
            .reduce(&mut payment, PaymentAction::Settle(verification(GatewayStatus::Pending, 0)), &env)
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(payment.outcome(), PaymentOutcome::Pending);
    }

    #[test]
    fn test_expire_only_after_session_lapses() {
        let env = env();
        let mut payment = payment(&env);
        assert!(PaymentMachine.reduce(&mut payment, PaymentAction::Expire, &env).unwrap().is_empty());

        payment.expires_at = Utc::now() - chrono::Duration::minutes(1);
        PaymentMachine.reduce(&mut payment, PaymentAction::Expire, &env).unwrap();
        assert_eq!(payment.failure, Some(FailureReason::Expired));
    }

    #[test]
    fn test_zero_amount_rejected() {
        let env = env();
        let session = CheckoutSession {
            authorization_url: String::new(),
            access_code: String::new(),
            reference: GatewayReference::parse("ref_0").unwrap(),
        };
        let result = Payment::initiate(
            PaymentSubject::Booking { booking_id: BookingId::new() },
            session,
            Money::ZERO,
            Currency::ngn(),
            &env,
        );
        assert!(matches!(result, Err(RentalError::InvalidAmount(_))));
    }
}
