//! Single-renter booking lifecycle.
//!
//! ```text
//! pending ──BeginPayment──▶ awaiting_payment ──ApplyVerifiedPayment──▶ confirmed
//!    │                          │    ▲   │
//!    │                          │    └───┘ BeginPayment (retry), ApplyFailedPayment
//!    ├──Cancel──────────────────┼──────────────────────────────────▶ cancelled
//!    └──Expire──────────────────┴──────────────────────────────────▶ expired
//! ```
//!
//! A verified payment that meets a conflict at confirmation time cancels the
//! booking with [`CancellationReason::PostPaymentConflict`] and raises the
//! refund flag. A verified payment that arrives after the booking reached
//! `cancelled` or `expired` only raises the refund flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::smallvec;
use std::fmt;

use crate::availability::{Availability, ReservationKey};
use crate::environment::MachineEnvironment;
use crate::equipment::Equipment;
use crate::error::RentalError;
use crate::reducer::{Events, Reducer};
use crate::types::{BookingId, Currency, DateRange, EquipmentId, GatewayReference, Money, UserId};

// ============================================================================
// State
// ============================================================================

/// Booking status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Created, no payment yet
    Pending,
    /// A payment attempt has been initiated
    AwaitingPayment,
    /// Paid and reserved (terminal)
    Confirmed,
    /// Cancelled by a party or by a post-payment conflict (terminal)
    Cancelled,
    /// Payment window elapsed (terminal)
    Expired,
}

impl BookingStatus {
    /// No transition leaves a terminal status
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Cancelled | Self::Expired)
    }

    /// Whether a booking in this status blocks overlapping reservations
    #[must_use]
    pub const fn holds_equipment(&self) -> bool {
        matches!(self, Self::Pending | Self::AwaitingPayment | Self::Confirmed)
    }

    /// Stable label for storage and logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingPayment => "awaiting_payment",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Parse a stored label.
    ///
    /// # Errors
    ///
    /// Returns [`RentalError::Storage`] for an unknown label.
    pub fn parse(label: &str) -> Result<Self, RentalError> {
        match label {
            "pending" => Ok(Self::Pending),
            "awaiting_payment" => Ok(Self::AwaitingPayment),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(RentalError::Storage(format!("unknown booking status {other:?}"))),
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a booking or group booking was cancelled
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    /// The renter withdrew
    RequestedByRenter,
    /// The equipment owner withdrew
    RequestedByOwner,
    /// The group organiser withdrew
    RequestedByOrganizer,
    /// Payment cleared but the range was no longer available
    PostPaymentConflict,
}

impl CancellationReason {
    /// Stable label for storage and metrics
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RequestedByRenter => "requested_by_renter",
            Self::RequestedByOwner => "requested_by_owner",
            Self::RequestedByOrganizer => "requested_by_organizer",
            Self::PostPaymentConflict => "post_payment_conflict",
        }
    }

    /// Parse a stored label.
    ///
    /// # Errors
    ///
    /// Returns [`RentalError::Storage`] for an unknown label.
    pub fn parse(label: &str) -> Result<Self, RentalError> {
        match label {
            "requested_by_renter" => Ok(Self::RequestedByRenter),
            "requested_by_owner" => Ok(Self::RequestedByOwner),
            "requested_by_organizer" => Ok(Self::RequestedByOrganizer),
            "post_payment_conflict" => Ok(Self::PostPaymentConflict),
            other => Err(RentalError::Storage(format!(
                "unknown cancellation reason {other:?}"
            ))),
        }
    }
}

/// A single renter's reservation of one equipment item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking id
    pub id: BookingId,
    /// Reserved item
    pub equipment_id: EquipmentId,
    /// Renter
    pub renter_id: UserId,
    /// Reserved days (inclusive)
    pub range: DateRange,
    /// `price_per_day × days`, fixed at creation
    pub total_price: Money,
    /// Currency of `total_price`
    pub currency: Currency,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Reference of the latest payment attempt
    pub payment_reference: Option<GatewayReference>,
    /// After this instant an unpaid booking expires
    pub payment_deadline: DateTime<Utc>,
    /// Set when `status` is `cancelled`
    pub cancellation: Option<CancellationReason>,
    /// Money was captured but the booking did not confirm
    pub refund_required: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last transition time
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Create a `pending` booking priced from the equipment's daily rate.
    ///
    /// Availability is not checked here; the caller holds the equipment lock
    /// and checks before inserting.
    ///
    /// # Errors
    ///
    /// Returns [`RentalError::InvalidAmount`] for a zero price and
    /// [`RentalError::Overflow`] when the price does not fit.
    pub fn create(
        equipment: &Equipment,
        renter_id: UserId,
        range: DateRange,
        env: &MachineEnvironment,
    ) -> Result<Self, RentalError> {
        let total_price = range.price(equipment.price_per_day)?;
        if total_price.is_zero() {
            return Err(RentalError::InvalidAmount(total_price));
        }
        let now = env.now();
        Ok(Self {
            id: BookingId::new(),
            equipment_id: equipment.id,
            renter_id,
            range,
            total_price,
            currency: equipment.currency.clone(),
            status: BookingStatus::Pending,
            payment_reference: None,
            payment_deadline: now + env.policy.payment_window,
            cancellation: None,
            refund_required: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Key used when this booking re-validates its own range
    #[must_use]
    pub const fn reservation_key(&self) -> ReservationKey {
        ReservationKey::Booking(self.id)
    }

    /// Unpaid and past its deadline
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && now > self.payment_deadline
    }
}

// ============================================================================
// Actions & Events
// ============================================================================

/// Commands accepted by [`BookingMachine`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingAction {
    /// A payment attempt was created at the gateway
    BeginPayment {
        /// Reference of the new attempt
        reference: GatewayReference,
        /// Availability of the booking's range, excluding itself
        availability: Availability,
    },
    /// The gateway confirmed capture of the expected amount
    ApplyVerifiedPayment {
        /// Verified attempt
        reference: GatewayReference,
        /// Availability re-checked under the equipment lock
        availability: Availability,
    },
    /// The gateway reported the attempt failed (or it mismatched)
    ApplyFailedPayment {
        /// Failed attempt
        reference: GatewayReference,
    },
    /// Explicit withdrawal
    Cancel {
        /// Who withdrew
        reason: CancellationReason,
    },
    /// Time-based check; a no-op unless overdue
    Expire,
}

/// Facts recorded by [`BookingMachine`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingEvent {
    /// Entered (or re-entered) `awaiting_payment`
    PaymentInitiated {
        /// New attempt
        reference: GatewayReference,
        /// Reset deadline
        deadline: DateTime<Utc>,
    },
    /// A payment attempt failed; the booking keeps waiting
    PaymentFailed {
        /// Failed attempt
        reference: GatewayReference,
    },
    /// Paid and reserved
    Confirmed {
        /// Verified attempt
        reference: GatewayReference,
    },
    /// Withdrawn or conflicted
    Cancelled {
        /// Why
        reason: CancellationReason,
    },
    /// Deadline passed
    Expired,
    /// Captured money must be returned out of band
    RefundFlagged {
        /// Captured attempt
        reference: GatewayReference,
    },
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for [`Booking`]
#[derive(Clone, Copy, Debug, Default)]
pub struct BookingMachine;

impl BookingMachine {
    fn decide(
        booking: &Booking,
        action: BookingAction,
        now: DateTime<Utc>,
        env: &MachineEnvironment,
    ) -> Result<Events<BookingEvent>, RentalError> {
        use BookingStatus::{AwaitingPayment, Cancelled, Confirmed, Expired, Pending};

        match (booking.status, action) {
            (Pending | AwaitingPayment, BookingAction::BeginPayment { reference, availability }) => {
                if booking.is_overdue(now) {
                    return Err(invalid(booking, "begin payment for"));
                }
                if availability.has_conflict() {
                    return Err(RentalError::Conflict {
                        equipment_id: booking.equipment_id,
                        range: booking.range,
                    });
                }
                Ok(smallvec![BookingEvent::PaymentInitiated {
                    reference,
                    deadline: now + env.policy.payment_window,
                }])
            }

            (AwaitingPayment, BookingAction::ApplyVerifiedPayment { reference, availability }) => {
                if availability.has_conflict() {
                    Ok(smallvec![
                        BookingEvent::Cancelled {
                            reason: CancellationReason::PostPaymentConflict,
                        },
                        BookingEvent::RefundFlagged { reference },
                    ])
                } else {
                    Ok(smallvec![BookingEvent::Confirmed { reference }])
                }
            }
            (Confirmed, BookingAction::ApplyVerifiedPayment { reference, .. })
                if booking.payment_reference.as_ref() == Some(&reference) =>
            {
                Ok(Events::new())
            }
            (Confirmed | Cancelled | Expired, BookingAction::ApplyVerifiedPayment { reference, .. }) => {
                // Late or duplicate capture. Already flagged means already recorded.
                if booking.refund_required {
                    Ok(Events::new())
                } else {
                    Ok(smallvec![BookingEvent::RefundFlagged { reference }])
                }
            }

            (AwaitingPayment, BookingAction::ApplyFailedPayment { reference }) => {
                Ok(smallvec![BookingEvent::PaymentFailed { reference }])
            }
            (_, BookingAction::ApplyFailedPayment { .. }) if booking.status.is_terminal() => {
                Ok(Events::new())
            }

            (Pending | AwaitingPayment, BookingAction::Cancel { reason }) => {
                Ok(smallvec![BookingEvent::Cancelled { reason }])
            }

            (_, BookingAction::Expire) => {
                if booking.is_overdue(now) {
                    Ok(smallvec![BookingEvent::Expired])
                } else {
                    Ok(Events::new())
                }
            }

            (_, action) => Err(invalid(booking, action_label(&action))),
        }
    }
}

/// Apply a recorded event to the booking
pub fn apply_event(booking: &mut Booking, event: &BookingEvent, at: DateTime<Utc>) {
    match event {
        BookingEvent::PaymentInitiated { reference, deadline } => {
            booking.status = BookingStatus::AwaitingPayment;
            booking.payment_reference = Some(reference.clone());
            booking.payment_deadline = *deadline;
        }
        BookingEvent::PaymentFailed { .. } => {}
        BookingEvent::Confirmed { reference } => {
            booking.status = BookingStatus::Confirmed;
            booking.payment_reference = Some(reference.clone());
        }
        BookingEvent::Cancelled { reason } => {
            booking.status = BookingStatus::Cancelled;
            booking.cancellation = Some(*reason);
        }
        BookingEvent::Expired => booking.status = BookingStatus::Expired,
        BookingEvent::RefundFlagged { .. } => booking.refund_required = true,
    }
    booking.updated_at = at;
}

impl Reducer for BookingMachine {
    type State = Booking;
    type Action = BookingAction;
    type Event = BookingEvent;
    type Environment = MachineEnvironment;

    fn reduce(
        &self,
        state: &mut Booking,
        action: BookingAction,
        env: &MachineEnvironment,
    ) -> Result<Events<BookingEvent>, RentalError> {
        let now = env.now();
        let events = Self::decide(state, action, now, env)?;
        for event in &events {
            apply_event(state, event, now);
        }
        Ok(events)
    }
}

const fn action_label(action: &BookingAction) -> &'static str {
    match action {
        BookingAction::BeginPayment { .. } => "begin payment for",
        BookingAction::ApplyVerifiedPayment { .. } => "confirm",
        BookingAction::ApplyFailedPayment { .. } => "fail payment for",
        BookingAction::Cancel { .. } => "cancel",
        BookingAction::Expire => "expire",
    }
}

const fn invalid(booking: &Booking, action: &'static str) -> RentalError {
    RentalError::InvalidTransition {
        entity: "booking",
        from: booking.status.as_str(),
        action,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::availability::ConflictCause;
    use crate::environment::Clock;
    use crate::policy::BookingPolicy;
    use chrono::{Duration, NaiveDate, TimeZone};
    use std::sync::{Arc, Mutex};

    struct StepClock(Mutex<DateTime<Utc>>);

    impl Clock for StepClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    impl StepClock {
        fn advance(&self, by: Duration) {
            *self.0.lock().unwrap() += by;
        }
    }

    fn setup() -> (Arc<StepClock>, MachineEnvironment, Booking) {
        let clock = Arc::new(StepClock(Mutex::new(
            Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap(),
        )));
        let env = MachineEnvironment::new(clock.clone(), BookingPolicy::default());
        let equipment = Equipment {
            id: EquipmentId::new(),
            owner_id: UserId::new(),
            price_per_day: Money::from_minor(1000),
            currency: Currency::ngn(),
            available: true,
        };
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
        )
        .unwrap();
        let booking = Booking::create(&equipment, UserId::new(), range, &env).unwrap();
        (clock, env, booking)
    }

    fn reference(s: &str) -> GatewayReference {
        GatewayReference::parse(s).unwrap()
    }

    fn conflicted() -> Availability {
        Availability::Conflicted(ConflictCause::Overlap(ReservationKey::Booking(BookingId::new())))
    }

    #[test]
    fn test_create_prices_inclusive_days() {
        let (_, _, booking) = setup();
        assert_eq!(booking.total_price, Money::from_minor(3000));
        assert_eq!(booking.status, BookingStatus::Pending);
    }

    #[test]
    fn test_happy_path_confirms() {
        let (_, env, mut booking) = setup();
        BookingMachine
            .reduce(
                &mut booking,
                BookingAction::BeginPayment { reference: reference("r1"), availability: Availability::Clear },
                &env,
            )
            .unwrap();
        assert_eq!(booking.status, BookingStatus::AwaitingPayment);

        let events = BookingMachine
            .reduce(
                &mut booking,
                BookingAction::ApplyVerifiedPayment { reference: reference("r1"), availability: Availability::Clear },
                &env,
            )
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(booking.status, BookingStatus::Confirmed);

        // Replay is a no-op
        let events = BookingMachine
            .reduce(
                &mut booking,
                BookingAction::ApplyVerifiedPayment { reference: reference("r1"), availability: Availability::Clear },
                &env,
            )
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_begin_payment_conflict_leaves_state_untouched() {
        let (_, env, mut booking) = setup();
        let before = booking.clone();
        let result = BookingMachine.reduce(
            &mut booking,
            BookingAction::BeginPayment { reference: reference("r1"), availability: conflicted() },
            &env,
        );
        assert!(matches!(result, Err(RentalError::Conflict { .. })));
        assert_eq!(booking, before);
    }

    #[test]
    fn test_post_payment_conflict_cancels_and_flags() {
        let (_, env, mut booking) = setup();
        BookingMachine
            .reduce(
                &mut booking,
                BookingAction::BeginPayment { reference: reference("r1"), availability: Availability::Clear },
                &env,
            )
            .unwrap();
        BookingMachine
            .reduce(
                &mut booking,
                BookingAction::ApplyVerifiedPayment { reference: reference("r1"), availability: conflicted() },
                &env,
            )
            .unwrap();
        assert_eq!(booking.status, BookingStatus::Cancelled);
        assert_eq!(booking.cancellation, Some(CancellationReason::PostPaymentConflict));
        assert!(booking.refund_required);
    }

    #[test]
    fn test_expire_is_idempotent_and_deadline_bound() {
        let (clock, env, mut booking) = setup();
        assert!(BookingMachine.reduce(&mut booking, BookingAction::Expire, &env).unwrap().is_empty());

        clock.advance(Duration::minutes(31));
        let events = BookingMachine.reduce(&mut booking, BookingAction::Expire, &env).unwrap();
        assert_eq!(events.as_slice(), &[BookingEvent::Expired]);
        assert!(BookingMachine.reduce(&mut booking, BookingAction::Expire, &env).unwrap().is_empty());
        assert_eq!(booking.status, BookingStatus::Expired);
    }

    #[test]
    fn test_late_payment_after_expiry_flags_refund_once() {
        let (clock, env, mut booking) = setup();
        BookingMachine
            .reduce(
                &mut booking,
                BookingAction::BeginPayment { reference: reference("r1"), availability: Availability::Clear },
                &env,
            )
            .unwrap();
        clock.advance(Duration::hours(1));
        BookingMachine.reduce(&mut booking, BookingAction::Expire, &env).unwrap();

        let verified = BookingAction::ApplyVerifiedPayment {
            reference: reference("r1"),
            availability: Availability::Clear,
        };
        let events = BookingMachine.reduce(&mut booking, verified.clone(), &env).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(booking.status, BookingStatus::Expired);
        assert!(booking.refund_required);
        assert!(BookingMachine.reduce(&mut booking, verified, &env).unwrap().is_empty());
    }

    #[test]
    fn test_terminal_cannot_cancel() {
        let (_, env, mut booking) = setup();
        BookingMachine
            .reduce(&mut booking, BookingAction::Cancel { reason: CancellationReason::RequestedByRenter }, &env)
            .unwrap();
        let result = BookingMachine.reduce(
            &mut booking,
            BookingAction::Cancel { reason: CancellationReason::RequestedByOwner },
            &env,
        );
        assert!(matches!(result, Err(RentalError::InvalidTransition { from: "cancelled", .. })));
        assert_eq!(booking.cancellation, Some(CancellationReason::RequestedByRenter));
    }

    #[test]
    fn test_failed_payment_keeps_waiting_and_retry_resets_deadline() {
        let (clock, env, mut booking) = setup();
        BookingMachine
            .reduce(
                &mut booking,
                BookingAction::BeginPayment { reference: reference("r1"), availability: Availability::Clear },
                &env,
            )
            .unwrap();
        let first_deadline = booking.payment_deadline;
        BookingMachine
            .reduce(&mut booking, BookingAction::ApplyFailedPayment { reference: reference("r1") }, &env)
            .unwrap();
        assert_eq!(booking.status, BookingStatus::AwaitingPayment);

        clock.advance(Duration::minutes(10));
        BookingMachine
            .reduce(
                &mut booking,
                BookingAction::BeginPayment { reference: reference("r2"), availability: Availability::Clear },
                &env,
            )
            .unwrap();
        assert_eq!(booking.payment_reference, Some(reference("r2")));
        assert!(booking.payment_deadline > first_deadline);
    }

    #[test]
    fn test_pending_cannot_confirm() {
        let (_, env, mut booking) = setup();
        let result = BookingMachine.reduce(
            &mut booking,
            BookingAction::ApplyVerifiedPayment { reference: reference("r1"), availability: Availability::Clear },
            &env,
        );
        assert!(matches!(result, Err(RentalError::InvalidTransition { from: "pending", .. })));
    }
}
