//! Group bookings: one reservation funded by several participants.
//!
//! The group holds its range from creation. Each participant pays their own
//! share through an independent [`crate::payment::Payment`]; the group becomes
//! `ready` when the readiness fold ([`GroupState::is_ready`]) holds, and
//! `confirmed` only after the equipment owner confirms and the range is
//! re-validated.
//!
//! A participant whose payment fails or lapses keeps the group `collecting`
//! until they retry or are removed. The group never confirms with a missing
//! participant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::fmt;

use crate::availability::{Availability, ReservationKey};
use crate::booking::CancellationReason;
use crate::environment::MachineEnvironment;
use crate::equipment::Equipment;
use crate::error::RentalError;
use crate::payment::PaymentStatus;
use crate::reducer::{Events, Reducer};
use crate::types::{
    Currency, DateRange, EquipmentId, GatewayReference, GroupBookingId, Money, ParticipantId,
    UserId,
};

// ============================================================================
// State
// ============================================================================

/// Group booking status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// Accepting participants and payments
    Collecting,
    /// Every participant paid, waiting for the owner
    Ready,
    /// Owner confirmed (terminal)
    Confirmed,
    /// Withdrawn or conflicted (terminal)
    Cancelled,
    /// Collection deadline passed (terminal)
    Expired,
}

impl GroupStatus {
    /// No transition leaves a terminal status
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Cancelled | Self::Expired)
    }

    /// Whether a group in this status blocks overlapping reservations
    #[must_use]
    pub const fn holds_equipment(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Expired)
    }

    /// Stable label
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Ready => "ready",
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
            "collecting" => Ok(Self::Collecting),
            "ready" => Ok(Self::Ready),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(RentalError::Storage(format!("unknown group status {other:?}"))),
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The shared reservation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupBooking {
    /// Group id
    pub id: GroupBookingId,
    /// Reserved item
    pub equipment_id: EquipmentId,
    /// User who opened the group
    pub organizer_id: UserId,
    /// Reserved days (inclusive)
    pub range: DateRange,
    /// `price_per_day × days`
    pub total_price: Money,
    /// Currency of every share
    pub currency: Currency,
    /// Maximum number of participants
    pub total_slots: u32,
    /// Lifecycle status
    pub status: GroupStatus,
    /// A `collecting` group expires after this instant
    pub collection_deadline: DateTime<Utc>,
    /// Set when `status` is `cancelled`
    pub cancellation: Option<CancellationReason>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last transition time
    pub updated_at: DateTime<Utc>,
}

impl GroupBooking {
    /// Open a `collecting` group.
    ///
    /// # Errors
    ///
    /// Returns [`RentalError::Validation`] for zero slots,
    /// [`RentalError::InvalidAmount`] for a zero price.
    pub fn create(
        equipment: &Equipment,
        organizer_id: UserId,
        range: DateRange,
        total_slots: u32,
        env: &MachineEnvironment,
    ) -> Result<Self, RentalError> {
        if total_slots == 0 {
            return Err(RentalError::Validation(
                "a group booking needs at least one slot".to_string(),
            ));
        }
        let total_price = range.price(equipment.price_per_day)?;
        if total_price.is_zero() {
            return Err(RentalError::InvalidAmount(total_price));
        }
        let now = env.now();
        Ok(Self {
            id: GroupBookingId::new(),
            equipment_id: equipment.id,
            organizer_id,
            range,
            total_price,
            currency: equipment.currency.clone(),
            total_slots,
            status: GroupStatus::Collecting,
            collection_deadline: now + env.policy.collection_window,
            cancellation: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Key used when this group re-validates its own range
    #[must_use]
    pub const fn reservation_key(&self) -> ReservationKey {
        ReservationKey::Group(self.id)
    }
}

/// One payer in a group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Participant id
    pub id: ParticipantId,
    /// Group
    pub group_id: GroupBookingId,
    /// Payer
    pub user_id: UserId,
    /// Committed share of the total
    pub share: Money,
    /// Latest payment attempt
    pub payment_reference: Option<GatewayReference>,
    /// Status of the latest attempt, mirrored from the payment
    pub payment_status: Option<PaymentStatus>,
    /// Captured money must be returned out of band
    pub refund_required: bool,
    /// Join time
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    /// Latest attempt is verified
    #[must_use]
    pub fn has_paid(&self) -> bool {
        self.payment_status == Some(PaymentStatus::Verified)
    }
}

/// A group with its participants, the unit the aggregator reduces over
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupState {
    /// The group row
    pub group: GroupBooking,
    /// Participant rows
    pub participants: Vec<Participant>,
}

impl GroupState {
    /// Sum of committed shares (`None` on overflow)
    #[must_use]
    pub fn committed(&self) -> Option<Money> {
        Money::checked_sum(self.participants.iter().map(|p| p.share))
    }

    /// Readiness fold: at least one participant, and every participant's
    /// latest payment is verified.
    ///
    /// Pure; evaluating it any number of times yields the same answer.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.participants.is_empty() && self.participants.iter().all(Participant::has_paid)
    }

    /// Participant by id
    #[must_use]
    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Participant for `user_id`
    #[must_use]
    pub fn participant_for(&self, user_id: UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    /// Participant whose latest attempt is `reference`
    #[must_use]
    pub fn participant_by_reference(&self, reference: &GatewayReference) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.payment_reference.as_ref() == Some(reference))
    }

    fn participant_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    fn refund_flags(&self) -> SmallVec<[GroupEvent; 4]> {
        self.participants
            .iter()
            .filter(|p| p.has_paid() && !p.refund_required)
            .map(|p| GroupEvent::RefundFlagged { participant_id: p.id })
            .collect()
    }
}

// ============================================================================
// Actions & Events
// ============================================================================

/// Commands accepted by [`GroupMachine`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupAction {
    /// A user joins with a share
    AddParticipant {
        /// Caller
        user_id: UserId,
        /// Committed share
        share: Money,
    },
    /// A payment attempt was opened for a participant
    AttachPayment {
        /// Participant
        participant_id: ParticipantId,
        /// New attempt
        reference: GatewayReference,
    },
    /// A participant's payment reached a terminal status
    RecordPaymentSettled {
        /// Payer
        participant_id: ParticipantId,
        /// Settled attempt, not necessarily the latest one
        reference: GatewayReference,
        /// `verified` or `failed`
        status: PaymentStatus,
    },
    /// A participant leaves
    RemoveParticipant {
        /// Participant's user
        user_id: UserId,
    },
    /// The equipment owner accepts the funded group
    ConfirmByOwner {
        /// Availability re-checked under the equipment lock
        availability: Availability,
    },
    /// Explicit withdrawal
    Cancel {
        /// Who withdrew
        reason: CancellationReason,
    },
    /// Time-based check; a no-op unless overdue
    Expire,
}

/// Facts recorded by [`GroupMachine`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupEvent {
    /// A participant joined
    ParticipantJoined {
        /// New row
        participant: Participant,
    },
    /// A participant opened a payment attempt
    PaymentAttached {
        /// Participant
        participant_id: ParticipantId,
        /// Attempt
        reference: GatewayReference,
    },
    /// A participant's payment settled
    PaymentSettled {
        /// Participant
        participant_id: ParticipantId,
        /// Attempt that settled
        reference: GatewayReference,
        /// Terminal status
        status: PaymentStatus,
    },
    /// A participant left
    ParticipantRemoved {
        /// Participant
        participant_id: ParticipantId,
    },
    /// Every participant paid
    Ready,
    /// Owner confirmed
    Confirmed,
    /// Withdrawn or conflicted
    Cancelled {
        /// Why
        reason: CancellationReason,
    },
    /// Collection deadline passed
    Expired,
    /// A paid participant must be refunded out of band
    RefundFlagged {
        /// Participant
        participant_id: ParticipantId,
    },
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for [`GroupState`]
#[derive(Clone, Copy, Debug, Default)]
pub struct GroupMachine;

impl GroupMachine {
    #[allow(clippy::too_many_lines)]
    fn decide(
        state: &GroupState,
        action: GroupAction,
        now: DateTime<Utc>,
    ) -> Result<Events<GroupEvent>, RentalError> {
        let group = &state.group;
        let closed = || RentalError::GroupClosed {
            group_id: group.id,
            status: group.status.as_str(),
        };

        match action {
            GroupAction::AddParticipant { user_id, share } => {
                if group.status != GroupStatus::Collecting || now > group.collection_deadline {
                    return Err(closed());
                }
                if share.is_zero() {
                    return Err(RentalError::InvalidAmount(share));
                }
                if state.participant_for(user_id).is_some() {
                    return Err(RentalError::DuplicateParticipant {
                        group_id: group.id,
                        user_id,
                    });
                }
                if state.participants.len() >= group.total_slots as usize {
                    return Err(RentalError::GroupFull {
                        group_id: group.id,
                        slots: group.total_slots,
                    });
                }
                let committed = state.committed().ok_or(RentalError::Overflow("committed shares"))?;
                let within_total = committed
                    .checked_add(share)
                    .is_some_and(|sum| sum <= group.total_price);
                if !within_total {
                    return Err(RentalError::OverCommitted {
                        group_id: group.id,
                        committed,
                        requested: share,
                        total: group.total_price,
                    });
                }
                Ok(smallvec![GroupEvent::ParticipantJoined {
                    participant: Participant {
                        id: ParticipantId::new(),
                        group_id: group.id,
                        user_id,
                        share,
                        payment_reference: None,
                        payment_status: None,
                        refund_required: false,
                        joined_at: now,
                    },
                }])
            }

            GroupAction::AttachPayment { participant_id, reference } => {
                if group.status != GroupStatus::Collecting {
                    return Err(closed());
                }
                let participant = state
                    .participant(participant_id)
                    .ok_or_else(|| RentalError::not_found("participant", participant_id))?;
                if participant.has_paid() {
                    return Err(RentalError::InvalidTransition {
                        entity: "participant",
                        from: "paid",
                        action: "start payment for",
                    });
                }
                Ok(smallvec![GroupEvent::PaymentAttached { participant_id, reference }])
            }

            GroupAction::RecordPaymentSettled { participant_id, reference, status } => {
                let Some(participant) = state.participant(participant_id) else {
                    return Ok(Events::new());
                };
                let latest = participant.payment_reference.as_ref() == Some(&reference);
                if latest && participant.payment_status == Some(status) {
                    return Ok(Events::new());
                }
                if !latest {
                    // An older attempt only matters if it captured money
                    match status {
                        PaymentStatus::Verified if participant.has_paid() => {
                            return Ok(smallvec![GroupEvent::RefundFlagged { participant_id }]);
                        }
                        PaymentStatus::Verified => {}
                        PaymentStatus::Initiated | PaymentStatus::Failed => return Ok(Events::new()),
                    }
                }
                let settled = GroupEvent::PaymentSettled { participant_id, reference, status };
                match group.status {
                    GroupStatus::Collecting => {
                        let mut events: Events<GroupEvent> = smallvec![settled];
                        let mut projected = state.clone();
                        if let Some(p) = projected.participant_mut(participant_id) {
                            p.payment_status = Some(status);
                        }
                        if projected.is_ready() {
                            events.push(GroupEvent::Ready);
                        }
                        Ok(events)
                    }
                    _ if status == PaymentStatus::Verified => {
                        Ok(smallvec![settled, GroupEvent::RefundFlagged { participant_id }])
                    }
                    _ => Ok(smallvec![settled]),
                }
            }

            GroupAction::RemoveParticipant { user_id } => {
                if group.status != GroupStatus::Collecting {
                    return Err(closed());
                }
                let participant = state
                    .participant_for(user_id)
                    .ok_or_else(|| RentalError::not_found("participant", user_id))?;
                match participant.payment_status {
                    Some(PaymentStatus::Verified) => Err(RentalError::InvalidTransition {
                        entity: "participant",
                        from: "paid",
                        action: "remove",
                    }),
                    Some(PaymentStatus::Initiated) => Err(RentalError::InvalidTransition {
                        entity: "participant",
                        from: "payment_in_progress",
                        action: "remove",
                    }),
                    Some(PaymentStatus::Failed) | None => {
                        let participant_id = participant.id;
                        let mut events: Events<GroupEvent> =
                            smallvec![GroupEvent::ParticipantRemoved { participant_id }];
                        let mut projected = state.clone();
                        projected.participants.retain(|p| p.id != participant_id);
                        if projected.is_ready() {
                            events.push(GroupEvent::Ready);
                        }
                        Ok(events)
                    }
                }
            }

            GroupAction::ConfirmByOwner { availability } => {
                if group.status != GroupStatus::Ready {
                    return Err(invalid(group, "confirm"));
                }
                if availability.has_conflict() {
                    let mut events: Events<GroupEvent> = smallvec![GroupEvent::Cancelled {
                        reason: CancellationReason::PostPaymentConflict,
                    }];
                    events.extend(state.refund_flags());
                    Ok(events)
                } else {
                    Ok(smallvec![GroupEvent::Confirmed])
                }
            }

            GroupAction::Cancel { reason } => {
                if group.status.is_terminal() {
                    return Err(invalid(group, "cancel"));
                }
                let mut events: Events<GroupEvent> = smallvec![GroupEvent::Cancelled { reason }];
                events.extend(state.refund_flags());
                Ok(events)
            }

            GroupAction::Expire => {
                if group.status != GroupStatus::Collecting || now <= group.collection_deadline {
                    return Ok(Events::new());
                }
                let mut events: Events<GroupEvent> = smallvec![GroupEvent::Expired];
                events.extend(state.refund_flags());
                Ok(events)
            }
        }
    }
}

/// Apply a recorded event to the group state
pub fn apply_event(state: &mut GroupState, event: &GroupEvent, at: DateTime<Utc>) {
    match event {
        GroupEvent::ParticipantJoined { participant } => state.participants.push(participant.clone()),
        GroupEvent::PaymentAttached { participant_id, reference } => {
            if let Some(p) = state.participant_mut(*participant_id) {
                p.payment_reference = Some(reference.clone());
                p.payment_status = Some(PaymentStatus::Initiated);
            }
        }
        GroupEvent::PaymentSettled { participant_id, reference, status } => {
            if let Some(p) = state.participant_mut(*participant_id) {
                p.payment_reference = Some(reference.clone());
                p.payment_status = Some(*status);
            }
        }
        GroupEvent::ParticipantRemoved { participant_id } => {
            state.participants.retain(|p| p.id != *participant_id);
        }
        GroupEvent::Ready => state.group.status = GroupStatus::Ready,
        GroupEvent::Confirmed => state.group.status = GroupStatus::Confirmed,
        GroupEvent::Cancelled { reason } => {
            state.group.status = GroupStatus::Cancelled;
            state.group.cancellation = Some(*reason);
        }
        GroupEvent::Expired => state.group.status = GroupStatus::Expired,
        GroupEvent::RefundFlagged { participant_id } => {
            if let Some(p) = state.participant_mut(*participant_id) {
                p.refund_required = true;
            }
        }
    }
    state.group.updated_at = at;
}

impl Reducer for GroupMachine {
    type State = GroupState;
    type Action = GroupAction;
    type Event = GroupEvent;
    type Environment = MachineEnvironment;

    fn reduce(
        &self,
        state: &mut GroupState,
        action: GroupAction,
        env: &MachineEnvironment,
    ) -> Result<Events<GroupEvent>, RentalError> {
        let now = env.now();
        let events = Self::decide(state, action, now)?;
        for event in &events {
            apply_event(state, event, now);
        }
        Ok(events)
    }
}

const fn invalid(group: &GroupBooking, action: &'static str) -> RentalError {
    RentalError::InvalidTransition {
        entity: "group booking",
        from: group.status.as_str(),
        action,
    }
}
