//! `BookingService`: single-renter bookings.

use rental_core::booking::{Booking, BookingAction, BookingEvent, BookingMachine, CancellationReason};
use rental_core::context::{RequestContext, Role};
use rental_core::environment::MachineEnvironment;
use rental_core::error::RentalError;
use rental_core::reducer::{Events, Reducer};
use rental_core::types::{BookingId, DateRange, EquipmentId};

use crate::availability::AvailabilityIndex;
use crate::environment::RentalEnvironment;
use crate::events::{self, DomainEvent};
use crate::metrics::RentalMetrics;
use crate::store::{BookingQuery, BookingScope, Page, UnitOfWork};

/// Create, read, list, cancel and expire bookings
#[derive(Clone, Debug)]
pub struct BookingService {
    env: RentalEnvironment,
}

impl BookingService {
    /// Create a new `BookingService`
    #[must_use]
    pub const fn new(env: RentalEnvironment) -> Self {
        Self { env }
    }

    /// Reserve `range` on `equipment_id` for the caller.
    ///
    /// The conflict check and the insert commit together under the equipment
    /// lock, so of two overlapping concurrent requests exactly one succeeds.
    ///
    /// # Errors
    ///
    /// [`RentalError::Conflict`] when the range is taken or the item is
    /// unlisted, [`RentalError::NotFound`] for unknown equipment.
    #[tracing::instrument(skip(self, ctx), fields(renter_id = %ctx.user_id()))]
    pub async fn create(
        &self,
        ctx: &RequestContext,
        equipment_id: EquipmentId,
        range: DateRange,
    ) -> Result<Booking, RentalError> {
        let machine = self.env.machine();
        let mut uow = self.env.store.begin().await?;
        let equipment = uow
            .lock_equipment(equipment_id)
            .await?
            .ok_or_else(|| RentalError::not_found("equipment", equipment_id))?;

        let availability = AvailabilityIndex::check_locked(uow.as_mut(), &equipment, &range, None).await?;
        if availability.has_conflict() {
            return Err(RentalError::Conflict { equipment_id, range });
        }

        let booking = Booking::create(&equipment, ctx.user_id(), range, &machine)?;
        uow.insert_booking(&booking).await?;
        uow.commit().await?;

        RentalMetrics::booking_created();
        tracing::info!(
            booking_id = %booking.id,
            total_price = %booking.total_price,
            deadline = %booking.payment_deadline,
            "booking created"
        );
        Ok(booking)
    }

    /// Read a booking visible to the caller, expiring it first if overdue.
    ///
    /// # Errors
    ///
    /// [`RentalError::NotFound`] when missing, [`RentalError::Forbidden`] when
    /// the caller is neither the renter nor the equipment owner.
    pub async fn get(&self, ctx: &RequestContext, id: BookingId) -> Result<Booking, RentalError> {
        let booking = self
            .env
            .store
            .booking(id)
            .await?
            .ok_or_else(|| RentalError::not_found("booking", id))?;
        self.ensure_visible(ctx, &booking).await?;

        if booking.is_overdue(self.env.clock.now()) {
            return self.expire(id).await;
        }
        Ok(booking)
    }

    /// List bookings in the caller's role scope.
    ///
    /// Overdue bookings on the page are expired before returning.
    ///
    /// # Errors
    ///
    /// [`RentalError::Storage`] on backend failure.
    pub async fn list(
        &self,
        ctx: &RequestContext,
        page: Option<u32>,
        per_page: Option<u32>,
    ) -> Result<Page<Booking>, RentalError> {
        let scope = match ctx.principal.role {
            Role::Renter => BookingScope::Renter(ctx.user_id()),
            Role::Owner => BookingScope::Owner(ctx.user_id()),
        };
        let query = BookingQuery::new(scope, page, per_page);
        let mut listing = self.env.store.list_bookings(&query).await?;

        let now = self.env.clock.now();
        for booking in &mut listing.items {
            if booking.is_overdue(now) {
                *booking = self.expire(booking.id).await?;
            }
        }
        Ok(listing)
    }

    /// Cancel a `pending` or `awaiting_payment` booking.
    ///
    /// An open checkout session is left to settle: a capture that still
    /// arrives is recorded and flagged for refund.
    ///
    /// # Errors
    ///
    /// [`RentalError::Forbidden`] unless the caller is the renter or the
    /// equipment owner; [`RentalError::InvalidTransition`] from a terminal status.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id()))]
    pub async fn cancel(&self, ctx: &RequestContext, id: BookingId) -> Result<Booking, RentalError> {
        let machine = self.env.machine();
        let snapshot = self
            .env
            .store
            .booking(id)
            .await?
            .ok_or_else(|| RentalError::not_found("booking", id))?;

        let mut uow = self.env.store.begin().await?;
        let equipment = uow
            .lock_equipment(snapshot.equipment_id)
            .await?
            .ok_or_else(|| RentalError::not_found("equipment", snapshot.equipment_id))?;
        let mut booking = uow
            .booking(id)
            .await?
            .ok_or_else(|| RentalError::not_found("booking", id))?;

        let reason = if booking.renter_id == ctx.user_id() {
            CancellationReason::RequestedByRenter
        } else if equipment.is_owned_by(ctx.user_id()) {
            CancellationReason::RequestedByOwner
        } else {
            return Err(RentalError::Forbidden(format!(
                "{} may not cancel booking {id}",
                ctx.user_id()
            )));
        };

        let mut applied = expire_locked(uow.as_mut(), &mut booking, &machine).await?;
        if !applied.is_empty() {
            uow.commit().await?;
            events::publish(self.env.events.as_ref(), DomainEvent::bookings(id, applied).collect()).await;
            return Err(RentalError::InvalidTransition {
                entity: "booking",
                from: booking.status.as_str(),
                action: "cancel",
            });
        }

        applied = BookingMachine.reduce(&mut booking, BookingAction::Cancel { reason }, &machine)?;
        uow.update_booking(&booking).await?;
        uow.commit().await?;
        events::publish(self.env.events.as_ref(), DomainEvent::bookings(id, applied).collect()).await;
        Ok(booking)
    }

    /// Expire `id` if it is overdue; otherwise return it unchanged.
    ///
    /// Safe to run from several callers at once: the second sees a terminal
    /// booking and writes nothing.
    ///
    /// # Errors
    ///
    /// [`RentalError::NotFound`] when missing.
    pub async fn expire(&self, id: BookingId) -> Result<Booking, RentalError> {
        let machine = self.env.machine();
        let snapshot = self
            .env
            .store
            .booking(id)
            .await?
            .ok_or_else(|| RentalError::not_found("booking", id))?;

        let mut uow = self.env.store.begin().await?;
        uow.lock_equipment(snapshot.equipment_id).await?;
        let mut booking = uow
            .booking(id)
            .await?
            .ok_or_else(|| RentalError::not_found("booking", id))?;

        let applied = expire_locked(uow.as_mut(), &mut booking, &machine).await?;
        if applied.is_empty() {
            return Ok(booking);
        }
        uow.commit().await?;
        events::publish(self.env.events.as_ref(), DomainEvent::bookings(id, applied).collect()).await;
        Ok(booking)
    }

    async fn ensure_visible(&self, ctx: &RequestContext, booking: &Booking) -> Result<(), RentalError> {
        if booking.renter_id == ctx.user_id() {
            return Ok(());
        }
        let owns = self
            .env
            .store
            .equipment(booking.equipment_id)
            .await?
            .is_some_and(|equipment| equipment.is_owned_by(ctx.user_id()));
        if owns {
            Ok(())
        } else {
            Err(RentalError::Forbidden(format!(
                "{} may not view booking {}",
                ctx.user_id(),
                booking.id
            )))
        }
    }
}

/// Apply `Expire` inside a unit of work that already holds the equipment lock,
/// writing the booking back when it changed.
pub(crate) async fn expire_locked(
    uow: &mut dyn UnitOfWork,
    booking: &mut Booking,
    machine: &MachineEnvironment,
) -> Result<Events<BookingEvent>, RentalError> {
    let applied = BookingMachine.reduce(booking, BookingAction::Expire, machine)?;
    if !applied.is_empty() {
        uow.update_booking(booking).await?;
    }
    Ok(applied)
}
