//! Storage contract for the reconciliation services.
//!
//! Every mutation runs inside a [`UnitOfWork`]: the first call of a mutating
//! unit is [`UnitOfWork::lock_equipment`], which serializes it against every
//! other unit touching the same equipment. The availability check and the
//! write that depends on it therefore commit atomically, and payment
//! settlement re-reads the payment under the same lock so a terminal write
//! happens at most once per gateway reference.
//!
//! A unit of work that is dropped without [`UnitOfWork::commit`] rolls back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rental_core::availability::ReservationSlot;
use rental_core::booking::Booking;
use rental_core::equipment::Equipment;
use rental_core::error::RentalError;
use rental_core::group::{GroupBooking, GroupState, Participant};
use rental_core::payment::{Payment, PaymentSubject};
use rental_core::types::{BookingId, EquipmentId, GatewayReference, GroupBookingId, ParticipantId, UserId};
use serde::Serialize;
use thiserror::Error;

/// Errors from storage backends
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend failure (connection, query, serialization)
    #[error("database error: {0}")]
    Database(String),

    /// A unique constraint rejected the write
    #[error("duplicate {entity}: {key}")]
    Duplicate {
        /// Entity kind
        entity: &'static str,
        /// Offending key
        key: String,
    },

    /// A stored row could not be mapped back to a domain value
    #[error("corrupt {entity} row: {message}")]
    Corrupt {
        /// Entity kind
        entity: &'static str,
        /// What was wrong
        message: String,
    },
}

impl From<StoreError> for RentalError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Whose bookings a listing returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingScope {
    /// Bookings made by this renter
    Renter(UserId),
    /// Bookings on equipment owned by this user
    Owner(UserId),
}

/// A page request for bookings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingQuery {
    /// Visibility scope
    pub scope: BookingScope,
    /// 1-based page number
    pub page: u32,
    /// Page size
    pub per_page: u32,
}

impl BookingQuery {
    /// Default page size
    pub const DEFAULT_PER_PAGE: u32 = 20;
    /// Largest accepted page size
    pub const MAX_PER_PAGE: u32 = 100;

    /// Build a query, clamping the page to `>= 1` and the size to `1..=100`
    #[must_use]
    pub fn new(scope: BookingScope, page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            scope,
            page: page.unwrap_or(1).max(1),
            per_page: per_page
                .unwrap_or(Self::DEFAULT_PER_PAGE)
                .clamp(1, Self::MAX_PER_PAGE),
        }
    }

    /// Rows to skip
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.per_page as u64
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    /// Rows on this page, newest first
    pub items: Vec<T>,
    /// 1-based page number
    pub page: u32,
    /// Page size
    pub per_page: u32,
    /// Total rows across all pages
    pub total: u64,
}

/// Read side and unit-of-work factory
#[async_trait]
pub trait RentalStore: Send + Sync {
    /// Start a unit of work
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot start a transaction.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Backend liveness check
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend is unreachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Load equipment without locking
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn equipment(&self, id: EquipmentId) -> Result<Option<Equipment>, StoreError>;

    /// Load a booking without locking
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// List bookings visible in `query.scope`, newest first
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn list_bookings(&self, query: &BookingQuery) -> Result<Page<Booking>, StoreError>;

    /// Load a group and its participants without locking
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn group(&self, id: GroupBookingId) -> Result<Option<GroupState>, StoreError>;

    /// Load a payment by gateway reference without locking
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn payment_by_reference(
        &self,
        reference: &GatewayReference,
    ) -> Result<Option<Payment>, StoreError>;

    /// Non-terminal bookings whose payment deadline is before `now`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn overdue_bookings(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Booking>, StoreError>;

    /// Collecting groups whose collection deadline is before `now`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn overdue_groups(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<GroupBooking>, StoreError>;

    /// Initiated payments whose checkout session lapsed before `now`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn lapsed_payments(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Payment>, StoreError>;
}

/// A transaction scoped to one equipment item
#[async_trait]
pub trait UnitOfWork: Send {
    /// Lock the equipment row for the rest of this unit and load it
    async fn lock_equipment(&mut self, id: EquipmentId) -> Result<Option<Equipment>, StoreError>;

    /// Ranges currently held on the equipment by bookings and groups
    async fn holdings(&mut self, equipment_id: EquipmentId) -> Result<Vec<ReservationSlot>, StoreError>;

    /// Load a booking
    async fn booking(&mut self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Insert a new booking
    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError>;

    /// Overwrite a booking
    async fn update_booking(&mut self, booking: &Booking) -> Result<(), StoreError>;

    /// Load a payment by reference
    async fn payment_by_reference(
        &mut self,
        reference: &GatewayReference,
    ) -> Result<Option<Payment>, StoreError>;

    /// The most recent `initiated` payment for `subject`, if any
    async fn open_payment(&mut self, subject: &PaymentSubject) -> Result<Option<Payment>, StoreError>;

    /// Insert a payment; a reused reference is [`StoreError::Duplicate`]
    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    /// Overwrite a payment
    async fn update_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    /// Load a group and its participants
    async fn group(&mut self, id: GroupBookingId) -> Result<Option<GroupState>, StoreError>;

    /// Insert a new group
    async fn insert_group(&mut self, group: &GroupBooking) -> Result<(), StoreError>;

    /// Overwrite a group row
    async fn update_group(&mut self, group: &GroupBooking) -> Result<(), StoreError>;

    /// Insert a participant; a second row for the same user is [`StoreError::Duplicate`]
    async fn insert_participant(&mut self, participant: &Participant) -> Result<(), StoreError>;

    /// Overwrite a participant
    async fn update_participant(&mut self, participant: &Participant) -> Result<(), StoreError>;

    /// Delete a participant
    async fn delete_participant(&mut self, id: ParticipantId) -> Result<(), StoreError>;

    /// Make every write in this unit visible and release the lock
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_clamps() {
        let scope = BookingScope::Renter(UserId::new());
        let query = BookingQuery::new(scope, Some(0), Some(1000));
        assert_eq!(query.page, 1);
        assert_eq!(query.per_page, 100);
        assert_eq!(query.offset(), 0);

        let query = BookingQuery::new(scope, Some(3), None);
        assert_eq!(query.per_page, 20);
        assert_eq!(query.offset(), 40);
    }
}
