//! `PaymentVerifier`: the initiate / verify protocol.
//!
//! `initiate` opens a checkout session at the gateway and records an
//! `initiated` payment. `verify` is repeatable: a payment that is already
//! terminal is answered from storage without consulting the gateway, and a
//! payment still `initiated` is settled under the equipment lock after
//! re-reading it, so concurrent verifications (webhook plus page refresh)
//! apply downstream effects exactly once.
//!
//! Gateway calls never happen while a unit of work is open.

use rental_core::booking::{Booking, BookingAction, BookingMachine, BookingStatus};
use rental_core::context::RequestContext;
use rental_core::error::RentalError;
use rental_core::gateway::{
    CheckoutSession, GatewayError, GatewayStatus, GatewayVerification, InitializeRequest,
};
use rental_core::group::{GroupAction, GroupMachine, GroupState, GroupStatus};
use rental_core::payment::{
    Payment, PaymentAction, PaymentMachine, PaymentOutcome, PaymentStatus, PaymentSubject,
};
use rental_core::reducer::Reducer;
use rental_core::types::{
    BookingId, Currency, EquipmentId, GatewayReference, GroupBookingId, Money, ParticipantId, UserId,
};
use serde::Serialize;
use std::time::Instant;

use crate::availability::AvailabilityIndex;
use crate::booking::expire_locked;
use crate::environment::RentalEnvironment;
use crate::events::{self, DomainEvent};
use crate::group::{expire_group_locked, persist_group_events};
use crate::metrics::RentalMetrics;
use crate::retry::retry_with_predicate;

/// A checkout session handed back to the payer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkout {
    /// Gateway reference of the attempt
    pub reference: GatewayReference,
    /// Hosted checkout URL
    pub authorization_url: String,
    /// Amount to be captured
    pub amount: Money,
    /// Currency of `amount`
    pub currency: Currency,
    /// `true` when an existing live session was returned instead of a new one
    pub reused: bool,
}

impl Checkout {
    fn from_payment(payment: &Payment, reused: bool) -> Self {
        Self {
            reference: payment.reference.clone(),
            authorization_url: payment.authorization_url.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            reused,
        }
    }
}

/// The entity a payment settled into, as it stands after verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettledSubject {
    /// Single booking
    Booking {
        /// Updated booking
        booking: Booking,
    },
    /// Group booking
    Group {
        /// Updated group with participants
        group: GroupState,
        /// Readiness fold result
        ready: bool,
    },
}

/// What `verify` reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    /// Reference verified
    pub reference: GatewayReference,
    /// Stored outcome after this call
    pub outcome: PaymentOutcome,
    /// Subject after this call
    pub subject: SettledSubject,
}

impl VerificationReport {
    /// Payment cleared but the subject was cancelled for a conflict
    #[must_use]
    pub fn is_post_payment_conflict(&self) -> bool {
        use rental_core::booking::CancellationReason::PostPaymentConflict;

        matches!(self.outcome, PaymentOutcome::Verified { .. })
            && match &self.subject {
                SettledSubject::Booking { booking } => booking.cancellation == Some(PostPaymentConflict),
                SettledSubject::Group { group, .. } => group.group.cancellation == Some(PostPaymentConflict),
            }
    }
}

/// Drives one payment attempt through the gateway
#[derive(Clone, Debug)]
pub struct PaymentVerifier {
    env: RentalEnvironment,
}

impl PaymentVerifier {
    /// Create a new `PaymentVerifier`
    #[must_use]
    pub const fn new(env: RentalEnvironment) -> Self {
        Self { env }
    }

    // ========================================================================
    // Initiation
    // ========================================================================

    /// Open (or reuse) a checkout session for the caller's booking and move it
    /// to `awaiting_payment`.
    ///
    /// # Errors
    ///
    /// [`RentalError::Conflict`] if the range is no longer available,
    /// [`RentalError::GatewayUnavailable`] after retries are exhausted,
    /// [`RentalError::InvalidTransition`] for a terminal or overdue booking.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id()))]
    pub async fn initiate_for_booking(
        &self,
        ctx: &RequestContext,
        booking_id: BookingId,
    ) -> Result<Checkout, RentalError> {
        let machine = self.env.machine();
        let snapshot = self
            .env
            .store
            .booking(booking_id)
            .await?
            .ok_or_else(|| RentalError::not_found("booking", booking_id))?;
        ctx.principal.ensure_is(snapshot.renter_id, "pay for this booking")?;
        let subject = PaymentSubject::Booking { booking_id };

        // Guards and session reuse, before touching the gateway
        {
            let mut uow = self.env.store.begin().await?;
            let equipment = lock(uow.as_mut(), snapshot.equipment_id).await?;
            let mut booking = load_booking(uow.as_mut(), booking_id).await?;

            let expired = expire_locked(uow.as_mut(), &mut booking, &machine).await?;
            if !expired.is_empty() {
                uow.commit().await?;
                events::publish(self.env.events.as_ref(), DomainEvent::bookings(booking_id, expired).collect()).await;
                return Err(booking_transition(&booking, "begin payment for"));
            }
            if !matches!(booking.status, BookingStatus::Pending | BookingStatus::AwaitingPayment) {
                return Err(booking_transition(&booking, "begin payment for"));
            }
            if let Some(open) = uow.open_payment(&subject).await? {
                if open.is_open(machine.now()) {
                    tracing::debug!(reference = %open.reference, "reusing live checkout session");
                    return Ok(Checkout::from_payment(&open, true));
                }
            }
            let availability = AvailabilityIndex::check_locked(
                uow.as_mut(),
                &equipment,
                &booking.range,
                Some(booking.reservation_key()),
            )
            .await?;
            if availability.has_conflict() {
                return Err(RentalError::Conflict {
                    equipment_id: booking.equipment_id,
                    range: booking.range,
                });
            }
        }

        let session = self
            .open_checkout(
                snapshot.total_price,
                snapshot.currency.clone(),
                &ctx.principal.email,
                serde_json::json!({ "booking_id": booking_id }),
            )
            .await?;

        let mut uow = self.env.store.begin().await?;
        let equipment = lock(uow.as_mut(), snapshot.equipment_id).await?;
        let mut booking = load_booking(uow.as_mut(), booking_id).await?;
        if let Some(open) = uow.open_payment(&subject).await? {
            if open.is_open(machine.now()) {
                tracing::info!(
                    reference = %open.reference,
                    orphaned = %session.reference,
                    "concurrent initialization won; its session is reused"
                );
                return Ok(Checkout::from_payment(&open, true));
            }
        }

        let availability = AvailabilityIndex::check_locked(
            uow.as_mut(),
            &equipment,
            &booking.range,
            Some(booking.reservation_key()),
        )
        .await?;
        let applied = BookingMachine.reduce(
            &mut booking,
            BookingAction::BeginPayment {
                reference: session.reference.clone(),
                availability,
            },
            &machine,
        )?;
        let payment = Payment::initiate(subject, session, booking.total_price, booking.currency.clone(), &machine)?;
        uow.insert_payment(&payment).await?;
        uow.update_booking(&booking).await?;
        uow.commit().await?;

        RentalMetrics::payment_initiated();
        tracing::info!(%booking_id, reference = %payment.reference, amount = %payment.amount, "payment initiated");
        events::publish(self.env.events.as_ref(), DomainEvent::bookings(booking_id, applied).collect()).await;
        Ok(Checkout::from_payment(&payment, false))
    }

    /// Open (or reuse) a checkout session for `user_id`'s share of a group.
    ///
    /// # Errors
    ///
    /// [`RentalError::Forbidden`] unless the caller is that participant,
    /// [`RentalError::GroupClosed`] once the group left `collecting`,
    /// [`RentalError::GatewayUnavailable`] after retries are exhausted.
    #[tracing::instrument(skip(self, ctx), fields(caller = %ctx.user_id()))]
    pub async fn initiate_for_participant(
        &self,
        ctx: &RequestContext,
        group_id: GroupBookingId,
        user_id: UserId,
    ) -> Result<Checkout, RentalError> {
        ctx.principal.ensure_is(user_id, "pay another participant's share")?;
        let machine = self.env.machine();
        let snapshot = self
            .env
            .store
            .group(group_id)
            .await?
            .ok_or_else(|| RentalError::not_found("group booking", group_id))?;
        let equipment_id = snapshot.group.equipment_id;
        if let Some(participant) = snapshot.participant_for(user_id) {
            self.reconcile_lapsed_attempt(group_id, participant.id).await?;
        }

        let (participant_id, share, currency) = {
            let mut uow = self.env.store.begin().await?;
            lock(uow.as_mut(), equipment_id).await?;
            let mut state = load_group(uow.as_mut(), group_id).await?;

            let expired = expire_group_locked(uow.as_mut(), &mut state, &machine).await?;
            if !expired.is_empty() {
                uow.commit().await?;
                events::publish(self.env.events.as_ref(), DomainEvent::groups(group_id, expired).collect()).await;
                return Err(group_closed(&state));
            }
            if state.group.status != GroupStatus::Collecting {
                return Err(group_closed(&state));
            }
            let participant = state
                .participant_for(user_id)
                .ok_or_else(|| RentalError::not_found("participant", user_id))?;
            if participant.has_paid() {
                return Err(RentalError::InvalidTransition {
                    entity: "participant",
                    from: "paid",
                    action: "start payment for",
                });
            }
            let subject = PaymentSubject::Participant {
                group_id,
                participant_id: participant.id,
            };
            if let Some(open) = uow.open_payment(&subject).await? {
                if open.is_open(machine.now()) {
                    return Ok(Checkout::from_payment(&open, true));
                }
            }
            (participant.id, participant.share, state.group.currency.clone())
        };

        let session = self
            .open_checkout(
                share,
                currency.clone(),
                &ctx.principal.email,
                serde_json::json!({ "group_id": group_id, "participant_id": participant_id }),
            )
            .await?;

        let subject = PaymentSubject::Participant { group_id, participant_id };
        let mut uow = self.env.store.begin().await?;
        lock(uow.as_mut(), equipment_id).await?;
        let mut state = load_group(uow.as_mut(), group_id).await?;
        if let Some(open) = uow.open_payment(&subject).await? {
            if open.is_open(machine.now()) {
                return Ok(Checkout::from_payment(&open, true));
            }
        }
        let applied = GroupMachine.reduce(
            &mut state,
            GroupAction::AttachPayment {
                participant_id,
                reference: session.reference.clone(),
            },
            &machine,
        )?;
        let payment = Payment::initiate(subject, session, share, currency, &machine)?;
        uow.insert_payment(&payment).await?;
        persist_group_events(uow.as_mut(), &state, &applied).await?;
        uow.commit().await?;

        RentalMetrics::payment_initiated();
        tracing::info!(%group_id, %participant_id, reference = %payment.reference, amount = %payment.amount, "participant payment initiated");
        events::publish(self.env.events.as_ref(), DomainEvent::groups(group_id, applied).collect()).await;
        Ok(Checkout::from_payment(&payment, false))
    }

    async fn open_checkout(
        &self,
        amount: Money,
        currency: Currency,
        email: &str,
        metadata: serde_json::Value,
    ) -> Result<CheckoutSession, RentalError> {
        if amount.is_zero() {
            return Err(RentalError::InvalidAmount(amount));
        }
        let request = InitializeRequest {
            amount,
            currency,
            email: email.to_string(),
            callback_url: self.env.callback_url.clone(),
            metadata,
        };

        let started = Instant::now();
        let result = retry_with_predicate(
            &self.env.retry,
            "gateway.initialize",
            || self.env.gateway.initialize(request.clone()),
            GatewayError::is_transient,
        )
        .await;
        RentalMetrics::gateway_request("initialize", started.elapsed());

        result.map_err(|error| {
            tracing::warn!(%error, "checkout initialization failed");
            RentalError::from(error)
        })
    }

    // ========================================================================
    // Verification
    // ========================================================================

    /// Verify `reference` and apply the result exactly once.
    ///
    /// Returns `Pending` (not an error) while the gateway has not settled.
    ///
    /// # Errors
    ///
    /// [`RentalError::NotFound`] for an unknown reference,
    /// [`RentalError::GatewayUnavailable`] when the gateway cannot be reached.
    #[tracing::instrument(skip(self))]
    pub async fn verify(&self, reference: &GatewayReference) -> Result<VerificationReport, RentalError> {
        let payment = self.load_payment(reference).await?;

        let report = if payment.status.is_terminal() {
            tracing::debug!(status = %payment.status, "already settled; gateway not consulted");
            self.report(payment).await?
        } else {
            match self.query_gateway(reference).await? {
                Some(verification) if verification.status != GatewayStatus::Pending => {
                    self.settle(&payment, PaymentAction::Settle(verification)).await?
                }
                _ => self.report(payment).await?,
            }
        };

        RentalMetrics::verification(&report.outcome);
        Ok(report)
    }

    /// Settle a payment whose checkout session lapsed.
    ///
    /// The gateway is asked once more; a capture that raced the expiry is
    /// applied like any other, and anything still unsettled becomes
    /// `failed` (expired).
    ///
    /// # Errors
    ///
    /// [`RentalError::GatewayUnavailable`] when the gateway cannot be reached;
    /// the payment stays `initiated` for the next attempt.
    pub async fn reconcile_lapsed(&self, reference: &GatewayReference) -> Result<VerificationReport, RentalError> {
        let payment = self.load_payment(reference).await?;
        if payment.status.is_terminal() {
            return self.report(payment).await;
        }
        let action = match self.query_gateway(reference).await? {
            Some(verification) if verification.status != GatewayStatus::Pending => {
                PaymentAction::Settle(verification)
            }
            _ => PaymentAction::Expire,
        };
        self.settle(&payment, action).await
    }

    /// Settle a participant's open attempt once its checkout lapsed, so a
    /// new attempt never overlaps an unsettled one.
    ///
    /// Returns `true` when an attempt was reconciled.
    ///
    /// # Errors
    ///
    /// [`RentalError::GatewayUnavailable`] when the gateway cannot be reached.
    pub(crate) async fn reconcile_lapsed_attempt(
        &self,
        group_id: GroupBookingId,
        participant_id: ParticipantId,
    ) -> Result<bool, RentalError> {
        let subject = PaymentSubject::Participant { group_id, participant_id };
        let now = self.env.machine().now();
        let lapsed = {
            let mut uow = self.env.store.begin().await?;
            uow.open_payment(&subject).await?.filter(|open| !open.is_open(now))
        };
        let Some(payment) = lapsed else {
            return Ok(false);
        };
        tracing::debug!(%participant_id, reference = %payment.reference, "reconciling lapsed participant checkout");
        self.reconcile_lapsed(&payment.reference).await?;
        Ok(true)
    }

    /// `Ok(None)` for an ambiguous answer (pending, undecodable, or refused)
    async fn query_gateway(
        &self,
        reference: &GatewayReference,
    ) -> Result<Option<GatewayVerification>, RentalError> {
        let started = Instant::now();
        let result = self.env.gateway.verify(reference).await;
        RentalMetrics::gateway_request("verify", started.elapsed());

        match result {
            Ok(verification) if &verification.reference == reference => Ok(Some(verification)),
            Ok(verification) => {
                tracing::warn!(returned = %verification.reference, "gateway answered for a different reference");
                Ok(None)
            }
            Err(GatewayError::Unavailable(message)) => {
                tracing::warn!(error = %message, "gateway unavailable during verification");
                Err(RentalError::GatewayUnavailable(message))
            }
            Err(error) => {
                tracing::warn!(%error, "ambiguous gateway answer; payment left initiated");
                Ok(None)
            }
        }
    }

    async fn settle(&self, snapshot: &Payment, action: PaymentAction) -> Result<VerificationReport, RentalError> {
        let machine = self.env.machine();
        let equipment_id = self.subject_equipment(&snapshot.subject).await?;

        let mut uow = self.env.store.begin().await?;
        let equipment = lock(uow.as_mut(), equipment_id).await?;
        let mut payment = uow
            .payment_by_reference(&snapshot.reference)
            .await?
            .ok_or_else(|| RentalError::not_found("payment", &snapshot.reference))?;

        let settled = PaymentMachine.reduce(&mut payment, action, &machine)?;
        if settled.is_empty() {
            // Settled by a concurrent caller, or nothing to settle yet
            drop(uow);
            return self.report(payment).await;
        }
        uow.update_payment(&payment).await?;

        let reference = payment.reference.clone();
        let mut published: Vec<DomainEvent> = DomainEvent::payments(&reference, settled).collect();

        match payment.subject {
            PaymentSubject::Booking { booking_id } => {
                let mut booking = load_booking(uow.as_mut(), booking_id).await?;
                let action = if payment.status == PaymentStatus::Verified {
                    let availability = AvailabilityIndex::check_locked(
                        uow.as_mut(),
                        &equipment,
                        &booking.range,
                        Some(booking.reservation_key()),
                    )
                    .await?;
                    BookingAction::ApplyVerifiedPayment {
                        reference: reference.clone(),
                        availability,
                    }
                } else {
                    BookingAction::ApplyFailedPayment {
                        reference: reference.clone(),
                    }
                };
                let applied = BookingMachine.reduce(&mut booking, action, &machine)?;
                if !applied.is_empty() {
                    uow.update_booking(&booking).await?;
                }
                published.extend(DomainEvent::bookings(booking_id, applied));
            }
            PaymentSubject::Participant { group_id, participant_id } => {
                let mut state = load_group(uow.as_mut(), group_id).await?;
                if payment.status == PaymentStatus::Verified && state.participant(participant_id).is_none() {
                    tracing::warn!(%group_id, %participant_id, %reference, "capture for a removed participant; refund out of band");
                }
                let applied = GroupMachine.reduce(
                    &mut state,
                    GroupAction::RecordPaymentSettled {
                        participant_id,
                        reference: reference.clone(),
                        status: payment.status,
                    },
                    &machine,
                )?;
                persist_group_events(uow.as_mut(), &state, &applied).await?;
                published.extend(DomainEvent::groups(group_id, applied));
            }
        }

        uow.commit().await?;
        events::publish(self.env.events.as_ref(), published).await;
        self.report(payment).await
    }

    async fn report(&self, payment: Payment) -> Result<VerificationReport, RentalError> {
        let subject = match payment.subject {
            PaymentSubject::Booking { booking_id } => SettledSubject::Booking {
                booking: self
                    .env
                    .store
                    .booking(booking_id)
                    .await?
                    .ok_or_else(|| RentalError::not_found("booking", booking_id))?,
            },
            PaymentSubject::Participant { group_id, .. } => {
                let group = self
                    .env
                    .store
                    .group(group_id)
                    .await?
                    .ok_or_else(|| RentalError::not_found("group booking", group_id))?;
                let ready = group.is_ready();
                SettledSubject::Group { group, ready }
            }
        };
        Ok(VerificationReport {
            outcome: payment.outcome(),
            reference: payment.reference,
            subject,
        })
    }

    async fn load_payment(&self, reference: &GatewayReference) -> Result<Payment, RentalError> {
        self.env
            .store
            .payment_by_reference(reference)
            .await?
            .ok_or_else(|| RentalError::not_found("payment", reference))
    }

    async fn subject_equipment(&self, subject: &PaymentSubject) -> Result<EquipmentId, RentalError> {
        match *subject {
            PaymentSubject::Booking { booking_id } => self
                .env
                .store
                .booking(booking_id)
                .await?
                .map(|booking| booking.equipment_id)
                .ok_or_else(|| RentalError::not_found("booking", booking_id)),
            PaymentSubject::Participant { group_id, .. } => self
                .env
                .store
                .group(group_id)
                .await?
                .map(|state| state.group.equipment_id)
                .ok_or_else(|| RentalError::not_found("group booking", group_id)),
        }
    }
}

pub(crate) async fn lock(
    uow: &mut dyn crate::store::UnitOfWork,
    equipment_id: EquipmentId,
) -> Result<rental_core::equipment::Equipment, RentalError> {
    uow.lock_equipment(equipment_id)
        .await?
        .ok_or_else(|| RentalError::not_found("equipment", equipment_id))
}

pub(crate) async fn load_booking(
    uow: &mut dyn crate::store::UnitOfWork,
    booking_id: BookingId,
) -> Result<Booking, RentalError> {
    uow.booking(booking_id)
        .await?
        .ok_or_else(|| RentalError::not_found("booking", booking_id))
}

pub(crate) async fn load_group(
    uow: &mut dyn crate::store::UnitOfWork,
    group_id: GroupBookingId,
) -> Result<GroupState, RentalError> {
    uow.group(group_id)
        .await?
        .ok_or_else(|| RentalError::not_found("group booking", group_id))
}

const fn booking_transition(booking: &Booking, action: &'static str) -> RentalError {
    RentalError::InvalidTransition {
        entity: "booking",
        from: booking.status.as_str(),
        action,
    }
}

const fn group_closed(state: &GroupState) -> RentalError {
    RentalError::GroupClosed {
        group_id: state.group.id,
        status: state.group.status.as_str(),
    }
}
