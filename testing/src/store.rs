//! In-memory [`RentalStore`] with the same serialization guarantees as the
//! Postgres backend.
//!
//! Every unit of work holds one table-wide lock from `begin` until it is
//! committed or dropped, and writes to a private copy of the tables. Commit
//! swaps the copy in; drop discards it. Reads through the store itself take
//! the same lock briefly, so they must not be issued while a unit of work is
//! held on the same task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rental_core::availability::ReservationSlot;
use rental_core::booking::Booking;
use rental_core::equipment::Equipment;
use rental_core::group::{GroupBooking, GroupState, GroupStatus, Participant};
use rental_core::payment::{Payment, PaymentStatus, PaymentSubject};
use rental_core::types::{
    BookingId, EquipmentId, GatewayReference, GroupBookingId, ParticipantId,
};
use rental_runtime::store::{
    BookingQuery, BookingScope, Page, RentalStore, StoreError, UnitOfWork,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct Tables {
    equipment: HashMap<EquipmentId, Equipment>,
    bookings: HashMap<BookingId, Booking>,
    payments: Vec<Payment>,
    groups: HashMap<GroupBookingId, GroupBooking>,
    participants: Vec<Participant>,
}

impl Tables {
    fn group_state(&self, id: GroupBookingId) -> Option<GroupState> {
        let group = self.groups.get(&id)?.clone();
        let mut participants: Vec<Participant> = self
            .participants
            .iter()
            .filter(|p| p.group_id == id)
            .cloned()
            .collect();
        participants.sort_by_key(|p| p.joined_at);
        Some(GroupState {
            group,
            participants,
        })
    }

    fn payment(&self, reference: &GatewayReference) -> Option<Payment> {
        self.payments
            .iter()
            .find(|p| &p.reference == reference)
            .cloned()
    }

    fn holdings(&self, equipment_id: EquipmentId) -> Vec<ReservationSlot> {
        let bookings = self
            .bookings
            .values()
            .filter(|b| b.equipment_id == equipment_id && b.status.holds_equipment())
            .map(|b| ReservationSlot {
                key: b.reservation_key(),
                range: b.range,
            });
        let groups = self
            .groups
            .values()
            .filter(|g| g.equipment_id == equipment_id && g.status.holds_equipment())
            .map(|g| ReservationSlot {
                key: g.reservation_key(),
                range: g.range,
            });
        bookings.chain(groups).collect()
    }
}

/// In-memory store for tests and local runs
#[derive(Debug, Clone, Default)]
pub struct InMemoryRentalStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryRentalStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an equipment row
    pub async fn insert_equipment(&self, equipment: Equipment) {
        self.tables
            .lock()
            .await
            .equipment
            .insert(equipment.id, equipment);
    }

    /// Flip the owner-controlled listing flag
    pub async fn set_equipment_available(&self, id: EquipmentId, available: bool) {
        if let Some(equipment) = self.tables.lock().await.equipment.get_mut(&id) {
            equipment.available = available;
        }
    }

    /// Every payment row, in insertion order
    pub async fn payments(&self) -> Vec<Payment> {
        self.tables.lock().await.payments.clone()
    }
}

#[async_trait]
impl RentalStore for InMemoryRentalStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork { guard, working }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn equipment(&self, id: EquipmentId) -> Result<Option<Equipment>, StoreError> {
        Ok(self.tables.lock().await.equipment.get(&id).cloned())
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.tables.lock().await.bookings.get(&id).cloned())
    }

    async fn list_bookings(&self, query: &BookingQuery) -> Result<Page<Booking>, StoreError> {
        let tables = self.tables.lock().await;
        let mut visible: Vec<&Booking> = tables
            .bookings
            .values()
            .filter(|b| match query.scope {
                BookingScope::Renter(user) => b.renter_id == user,
                BookingScope::Owner(user) => tables
                    .equipment
                    .get(&b.equipment_id)
                    .is_some_and(|e| e.owner_id == user),
            })
            .collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = visible.len() as u64;
        let skip = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let items = visible
            .into_iter()
            .skip(skip)
            .take(query.per_page as usize)
            .cloned()
            .collect();
        Ok(Page {
            items,
            page: query.page,
            per_page: query.per_page,
            total,
        })
    }

    async fn group(&self, id: GroupBookingId) -> Result<Option<GroupState>, StoreError> {
        Ok(self.tables.lock().await.group_state(id))
    }

    async fn payment_by_reference(
        &self,
        reference: &GatewayReference,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self.tables.lock().await.payment(reference))
    }

    async fn overdue_bookings(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Booking>, StoreError> {
        let tables = self.tables.lock().await;
        let mut overdue: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.is_overdue(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|b| b.payment_deadline);
        overdue.truncate(limit as usize);
        Ok(overdue)
    }

    async fn overdue_groups(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<GroupBooking>, StoreError> {
        let tables = self.tables.lock().await;
        let mut overdue: Vec<GroupBooking> = tables
            .groups
            .values()
            .filter(|g| g.status == GroupStatus::Collecting && now > g.collection_deadline)
            .cloned()
            .collect();
        overdue.sort_by_key(|g| g.collection_deadline);
        overdue.truncate(limit as usize);
        Ok(overdue)
    }

    async fn lapsed_payments(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Payment>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Initiated && now > p.expires_at)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// Holds the table lock for its whole lifetime
struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

impl InMemoryUnitOfWork {
    fn missing(entity: &'static str, key: impl ToString) -> StoreError {
        StoreError::Database(format!("{entity} {} does not exist", key.to_string()))
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn lock_equipment(&mut self, id: EquipmentId) -> Result<Option<Equipment>, StoreError> {
        Ok(self.working.equipment.get(&id).cloned())
    }

    async fn holdings(&mut self, equipment_id: EquipmentId) -> Result<Vec<ReservationSlot>, StoreError> {
        Ok(self.working.holdings(equipment_id))
    }

    async fn booking(&mut self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.working.bookings.get(&id).cloned())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        if self.working.bookings.contains_key(&booking.id) {
            return Err(StoreError::Duplicate {
                entity: "booking",
                key: booking.id.to_string(),
            });
        }
        self.working.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        let row = self
            .working
            .bookings
            .get_mut(&booking.id)
            .ok_or_else(|| Self::missing("booking", booking.id))?;
        *row = booking.clone();
        Ok(())
    }

    async fn payment_by_reference(
        &mut self,
        reference: &GatewayReference,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self.working.payment(reference))
    }

    async fn open_payment(&mut self, subject: &PaymentSubject) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .working
            .payments
            .iter()
            .rev()
            .find(|p| &p.subject == subject && p.status == PaymentStatus::Initiated)
            .cloned())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        if self
            .working
            .payments
            .iter()
            .any(|p| p.reference == payment.reference)
        {
            return Err(StoreError::Duplicate {
                entity: "payment",
                key: payment.reference.to_string(),
            });
        }
        self.working.payments.push(payment.clone());
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        let row = self
            .working
            .payments
            .iter_mut()
            .find(|p| p.id == payment.id)
            .ok_or_else(|| Self::missing("payment", &payment.reference))?;
        *row = payment.clone();
        Ok(())
    }

    async fn group(&mut self, id: GroupBookingId) -> Result<Option<GroupState>, StoreError> {
        Ok(self.working.group_state(id))
    }

    async fn insert_group(&mut self, group: &GroupBooking) -> Result<(), StoreError> {
        if self.working.groups.contains_key(&group.id) {
            return Err(StoreError::Duplicate {
                entity: "group_booking",
                key: group.id.to_string(),
            });
        }
        self.working.groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn update_group(&mut self, group: &GroupBooking) -> Result<(), StoreError> {
        let row = self
            .working
            .groups
            .get_mut(&group.id)
            .ok_or_else(|| Self::missing("group_booking", group.id))?;
        *row = group.clone();
        Ok(())
    }

    async fn insert_participant(&mut self, participant: &Participant) -> Result<(), StoreError> {
        if self
            .working
            .participants
            .iter()
            .any(|p| p.group_id == participant.group_id && p.user_id == participant.user_id)
        {
            return Err(StoreError::Duplicate {
                entity: "participant",
                key: format!("{}/{}", participant.group_id, participant.user_id),
            });
        }
        self.working.participants.push(participant.clone());
        Ok(())
    }

    async fn update_participant(&mut self, participant: &Participant) -> Result<(), StoreError> {
        let row = self
            .working
            .participants
            .iter_mut()
            .find(|p| p.id == participant.id)
            .ok_or_else(|| Self::missing("participant", participant.id))?;
        *row = participant.clone();
        Ok(())
    }

    async fn delete_participant(&mut self, id: ParticipantId) -> Result<(), StoreError> {
        self.working.participants.retain(|p| p.id != id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn test_dropped_unit_rolls_back() {
        let store = InMemoryRentalStore::new();
        let env = fixtures::machine_env();
        let booking = fixtures::booking(&env);

        let mut uow = store.begin().await.unwrap();
        uow.insert_booking(&booking).await.unwrap();
        drop(uow);

        assert!(store.booking(booking.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = InMemoryRentalStore::new();
        let env = fixtures::machine_env();
        let booking = fixtures::booking(&env);

        let mut uow = store.begin().await.unwrap();
        uow.insert_booking(&booking).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(store.booking(booking.id).await.unwrap(), Some(booking));
    }

    #[tokio::test]
    async fn test_participant_unique_per_user() {
        let store = InMemoryRentalStore::new();
        let env = fixtures::machine_env();
        let participant = fixtures::participant(GroupBookingId::new(), 500, &env);
        let mut twin = participant.clone();
        twin.id = ParticipantId::new();

        let mut uow = store.begin().await.unwrap();
        uow.insert_participant(&participant).await.unwrap();
        let err = uow.insert_participant(&twin).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { entity: "participant", .. }));
    }
}
