//! `GroupBookingService`: the group-booking aggregator.
//!
//! Composes the group state machine with [`PaymentVerifier`]: each
//! participant pays through an independent payment, settlements feed the
//! readiness fold incrementally, and the owner's confirmation re-validates the
//! range under the equipment lock.

use rental_core::booking::CancellationReason;
use rental_core::context::RequestContext;
use rental_core::environment::MachineEnvironment;
use rental_core::error::RentalError;
use rental_core::group::{GroupAction, GroupBooking, GroupEvent, GroupMachine, GroupState};
use rental_core::reducer::{Events, Reducer};
use rental_core::types::{DateRange, EquipmentId, GroupBookingId, Money, UserId};
use serde::Serialize;

use crate::availability::AvailabilityIndex;
use crate::environment::RentalEnvironment;
use crate::events::{self, DomainEvent};
use crate::payment::{lock, load_group, Checkout, PaymentVerifier};
use crate::store::{StoreError, UnitOfWork};

/// A group with its derived readiness
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupView {
    /// Group and participants
    #[serde(flatten)]
    pub state: GroupState,
    /// Readiness fold result
    pub ready: bool,
}

impl From<GroupState> for GroupView {
    fn from(state: GroupState) -> Self {
        let ready = state.is_ready();
        Self { state, ready }
    }
}

/// Result of joining a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinOutcome {
    /// Group after the join
    pub group: GroupView,
    /// The new participant's checkout, absent if the gateway was unavailable
    /// (retry through the participant payment endpoint)
    pub checkout: Option<Checkout>,
}

/// Coordinates participants of group bookings
#[derive(Clone, Debug)]
pub struct GroupBookingService {
    env: RentalEnvironment,
    verifier: PaymentVerifier,
}

impl GroupBookingService {
    /// Create a new `GroupBookingService`
    #[must_use]
    pub fn new(env: RentalEnvironment) -> Self {
        let verifier = PaymentVerifier::new(env.clone());
        Self { env, verifier }
    }

    /// Open a `collecting` group that holds `range` on the equipment.
    ///
    /// # Errors
    ///
    /// [`RentalError::Conflict`] when the range is taken,
    /// [`RentalError::Validation`] for zero slots.
    #[tracing::instrument(skip(self, ctx), fields(organizer_id = %ctx.user_id()))]
    pub async fn create(
        &self,
        ctx: &RequestContext,
        equipment_id: EquipmentId,
        range: DateRange,
        total_slots: u32,
    ) -> Result<GroupView, RentalError> {
        let machine = self.env.machine();
        let mut uow = self.env.store.begin().await?;
        let equipment = lock(uow.as_mut(), equipment_id).await?;

        let availability = AvailabilityIndex::check_locked(uow.as_mut(), &equipment, &range, None).await?;
        if availability.has_conflict() {
            return Err(RentalError::Conflict { equipment_id, range });
        }

        let group = GroupBooking::create(&equipment, ctx.user_id(), range, total_slots, &machine)?;
        uow.insert_group(&group).await?;
        uow.commit().await?;

        tracing::info!(group_id = %group.id, total_price = %group.total_price, total_slots, "group booking created");
        Ok(GroupState {
            group,
            participants: Vec::new(),
        }
        .into())
    }

    /// Read a group, expiring it first if its collection deadline passed.
    ///
    /// # Errors
    ///
    /// [`RentalError::NotFound`] when missing.
    pub async fn get(&self, id: GroupBookingId) -> Result<GroupView, RentalError> {
        let state = self.load(id).await?;
        if state.group.status == rental_core::group::GroupStatus::Collecting
            && self.env.clock.now() > state.group.collection_deadline
        {
            return self.expire(id).await;
        }
        Ok(state.into())
    }

    /// Join a group with `share` and open the caller's checkout session.
    ///
    /// # Errors
    ///
    /// [`RentalError::GroupClosed`], [`RentalError::DuplicateParticipant`],
    /// [`RentalError::OverCommitted`], [`RentalError::GroupFull`]; all rejected
    /// before any write.
    #[tracing::instrument(skip(self, ctx), fields(user_id = %ctx.user_id()))]
    pub async fn join(
        &self,
        ctx: &RequestContext,
        group_id: GroupBookingId,
        share: Money,
    ) -> Result<JoinOutcome, RentalError> {
        let user_id = ctx.user_id();
        self.mutate(group_id, |_, _| Ok(GroupAction::AddParticipant { user_id, share }))
            .await?;

        let checkout = match self.verifier.initiate_for_participant(ctx, group_id, user_id).await {
            Ok(checkout) => Some(checkout),
            Err(error) if error.is_retryable() => {
                tracing::warn!(%group_id, %error, "joined, but checkout could not be opened");
                None
            }
            Err(error) => return Err(error),
        };

        Ok(JoinOutcome {
            group: self.load(group_id).await?.into(),
            checkout,
        })
    }

    /// Re-open checkout for a participant whose payment failed or lapsed.
    ///
    /// # Errors
    ///
    /// See [`PaymentVerifier::initiate_for_participant`].
    pub async fn retry_payment(
        &self,
        ctx: &RequestContext,
        group_id: GroupBookingId,
        user_id: UserId,
    ) -> Result<Checkout, RentalError> {
        self.verifier.initiate_for_participant(ctx, group_id, user_id).await
    }

    /// Remove `user_id` from a `collecting` group (by themself or the organiser).
    ///
    /// A checkout that already lapsed is reconciled with the gateway first; a
    /// capture it reports makes the participant paid and not removable.
    ///
    /// # Errors
    ///
    /// [`RentalError::GroupClosed`] outside `collecting`,
    /// [`RentalError::InvalidTransition`] for a participant who paid or has a
    /// checkout still open, [`RentalError::Forbidden`] for anyone else,
    /// [`RentalError::GatewayUnavailable`] when a lapsed checkout cannot be
    /// reconciled.
    #[tracing::instrument(skip(self, ctx), fields(caller = %ctx.user_id()))]
    pub async fn remove_participant(
        &self,
        ctx: &RequestContext,
        group_id: GroupBookingId,
        user_id: UserId,
    ) -> Result<GroupView, RentalError> {
        let caller = ctx.user_id();
        let snapshot = self.load(group_id).await?;
        if caller != user_id && caller != snapshot.group.organizer_id {
            return Err(RentalError::Forbidden(format!(
                "{caller} may not remove participants from {group_id}"
            )));
        }
        if let Some(participant) = snapshot.participant_for(user_id) {
            self.verifier.reconcile_lapsed_attempt(group_id, participant.id).await?;
        }

        let state = self
            .mutate(group_id, |state, _| {
                if caller != user_id && caller != state.group.organizer_id {
                    return Err(RentalError::Forbidden(format!(
                        "{caller} may not remove participants from {group_id}"
                    )));
                }
                Ok(GroupAction::RemoveParticipant { user_id })
            })
            .await?;
        Ok(state.into())
    }

    /// Owner confirmation of a `ready` group.
    ///
    /// The range is re-validated first; on conflict the group is cancelled and
    /// every paid participant is flagged for refund.
    ///
    /// # Errors
    ///
    /// [`RentalError::Forbidden`] unless the caller owns the equipment,
    /// [`RentalError::InvalidTransition`] unless the group is `ready`.
    #[tracing::instrument(skip(self, ctx), fields(caller = %ctx.user_id()))]
    pub async fn confirm_by_owner(
        &self,
        ctx: &RequestContext,
        group_id: GroupBookingId,
    ) -> Result<GroupView, RentalError> {
        let machine = self.env.machine();
        let snapshot = self.load(group_id).await?;

        let mut uow = self.env.store.begin().await?;
        let equipment = lock(uow.as_mut(), snapshot.group.equipment_id).await?;
        if !equipment.is_owned_by(ctx.user_id()) {
            return Err(RentalError::Forbidden(format!(
                "{} does not own equipment {}",
                ctx.user_id(),
                equipment.id
            )));
        }
        let mut state = load_group(uow.as_mut(), group_id).await?;
        let availability = AvailabilityIndex::check_locked(
            uow.as_mut(),
            &equipment,
            &state.group.range,
            Some(state.group.reservation_key()),
        )
        .await?;
        let applied = GroupMachine.reduce(&mut state, GroupAction::ConfirmByOwner { availability }, &machine)?;
        persist_group_events(uow.as_mut(), &state, &applied).await?;
        uow.commit().await?;

        events::publish(self.env.events.as_ref(), DomainEvent::groups(group_id, applied).collect()).await;
        Ok(state.into())
    }

    /// Cancel a `collecting` or `ready` group (organiser or equipment owner).
    ///
    /// # Errors
    ///
    /// [`RentalError::Forbidden`] for anyone else,
    /// [`RentalError::InvalidTransition`] from a terminal status.
    pub async fn cancel(&self, ctx: &RequestContext, group_id: GroupBookingId) -> Result<GroupView, RentalError> {
        let caller = ctx.user_id();
        let state = self
            .mutate(group_id, |state, owner_id| {
                let reason = if caller == state.group.organizer_id {
                    CancellationReason::RequestedByOrganizer
                } else if caller == owner_id {
                    CancellationReason::RequestedByOwner
                } else {
                    return Err(RentalError::Forbidden(format!("{caller} may not cancel {group_id}")));
                };
                Ok(GroupAction::Cancel { reason })
            })
            .await?;
        Ok(state.into())
    }

    /// Expire `id` if its collection deadline passed while `collecting`.
    ///
    /// # Errors
    ///
    /// [`RentalError::NotFound`] when missing.
    pub async fn expire(&self, id: GroupBookingId) -> Result<GroupView, RentalError> {
        let machine = self.env.machine();
        let snapshot = self.load(id).await?;
        let mut uow = self.env.store.begin().await?;
        lock(uow.as_mut(), snapshot.group.equipment_id).await?;
        let mut state = load_group(uow.as_mut(), id).await?;
        let applied = expire_group_locked(uow.as_mut(), &mut state, &machine).await?;
        if !applied.is_empty() {
            uow.commit().await?;
            events::publish(self.env.events.as_ref(), DomainEvent::groups(id, applied).collect()).await;
        }
        Ok(state.into())
    }

    /// Lock, apply lazy expiry, then reduce the action built by `decide`
    /// (which sees the locked state and the equipment owner).
    async fn mutate<F>(&self, group_id: GroupBookingId, decide: F) -> Result<GroupState, RentalError>
    where
        F: FnOnce(&GroupState, UserId) -> Result<GroupAction, RentalError> + Send,
    {
        let machine = self.env.machine();
        let snapshot = self.load(group_id).await?;

        let mut uow = self.env.store.begin().await?;
        let equipment = lock(uow.as_mut(), snapshot.group.equipment_id).await?;
        let mut state = load_group(uow.as_mut(), group_id).await?;

        let expired = expire_group_locked(uow.as_mut(), &mut state, &machine).await?;
        if !expired.is_empty() {
            uow.commit().await?;
            events::publish(self.env.events.as_ref(), DomainEvent::groups(group_id, expired).collect()).await;
            return Err(RentalError::GroupClosed {
                group_id,
                status: state.group.status.as_str(),
            });
        }

        let action = decide(&state, equipment.owner_id)?;
        let applied = GroupMachine.reduce(&mut state, action, &machine)?;
        persist_group_events(uow.as_mut(), &state, &applied).await?;
        uow.commit().await?;

        events::publish(self.env.events.as_ref(), DomainEvent::groups(group_id, applied).collect()).await;
        Ok(state)
    }

    async fn load(&self, id: GroupBookingId) -> Result<GroupState, RentalError> {
        self.env
            .store
            .group(id)
            .await?
            .ok_or_else(|| RentalError::not_found("group booking", id))
    }
}

/// Apply `Expire` inside a unit of work holding the equipment lock.
pub(crate) async fn expire_group_locked(
    uow: &mut dyn UnitOfWork,
    state: &mut GroupState,
    machine: &MachineEnvironment,
) -> Result<Events<GroupEvent>, RentalError> {
    let applied = GroupMachine.reduce(state, GroupAction::Expire, machine)?;
    persist_group_events(uow, state, &applied).await?;
    Ok(applied)
}

/// Write the rows touched by `events`; `state` is the post-event state.
pub(crate) async fn persist_group_events(
    uow: &mut dyn UnitOfWork,
    state: &GroupState,
    events: &[GroupEvent],
) -> Result<(), StoreError> {
    if events.is_empty() {
        return Ok(());
    }
    for event in events {
        match event {
            GroupEvent::ParticipantJoined { participant } => uow.insert_participant(participant).await?,
            GroupEvent::ParticipantRemoved { participant_id } => uow.delete_participant(*participant_id).await?,
            GroupEvent::PaymentAttached { participant_id, .. }
            | GroupEvent::PaymentSettled { participant_id, .. }
            | GroupEvent::RefundFlagged { participant_id } => {
                if let Some(participant) = state.participants.iter().find(|p| p.id == *participant_id) {
                    uow.update_participant(participant).await?;
                }
            }
            GroupEvent::Ready | GroupEvent::Confirmed | GroupEvent::Cancelled { .. } | GroupEvent::Expired => {}
        }
    }
    uow.update_group(&state.group).await
}
