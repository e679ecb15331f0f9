//! `AvailabilityIndex`: the equipment/date-range conflict query.

use rental_core::availability::{self, Availability, ReservationKey};
use rental_core::equipment::Equipment;
use rental_core::error::RentalError;
use rental_core::types::{DateRange, EquipmentId};
use std::sync::Arc;

use crate::store::{RentalStore, UnitOfWork};

/// Answers "does this range collide with a holding reservation?"
///
/// The check used for decisions always runs inside the caller's unit of work,
/// after [`UnitOfWork::lock_equipment`], so the answer stays true until the
/// dependent write commits.
#[derive(Clone)]
pub struct AvailabilityIndex {
    store: Arc<dyn RentalStore>,
}

impl AvailabilityIndex {
    /// Create an index over `store`
    #[must_use]
    pub fn new(store: Arc<dyn RentalStore>) -> Self {
        Self { store }
    }

    /// Check under a lock already held by `uow`.
    ///
    /// # Errors
    ///
    /// Returns [`RentalError::Storage`] on backend failure.
    pub async fn check_locked(
        uow: &mut dyn UnitOfWork,
        equipment: &Equipment,
        range: &DateRange,
        exclude: Option<ReservationKey>,
    ) -> Result<Availability, RentalError> {
        let holdings = uow.holdings(equipment.id).await?;
        let result = availability::check(equipment, range, &holdings, exclude);
        tracing::debug!(
            equipment_id = %equipment.id,
            %range,
            ?exclude,
            held = holdings.len(),
            conflict = result.has_conflict(),
            "availability checked"
        );
        Ok(result)
    }

    /// Advisory check in a throwaway unit of work.
    ///
    /// The answer may be stale by the time the caller acts on it; decisions
    /// use [`AvailabilityIndex::check_locked`].
    ///
    /// # Errors
    ///
    /// Returns [`RentalError::NotFound`] for unknown equipment and
    /// [`RentalError::Storage`] on backend failure.
    pub async fn has_conflict(
        &self,
        equipment_id: EquipmentId,
        range: &DateRange,
        exclude: Option<ReservationKey>,
    ) -> Result<bool, RentalError> {
        let mut uow = self.store.begin().await?;
        let equipment = uow
            .lock_equipment(equipment_id)
            .await?
            .ok_or_else(|| RentalError::not_found("equipment", equipment_id))?;
        let result = Self::check_locked(uow.as_mut(), &equipment, range, exclude).await?;
        Ok(result.has_conflict())
    }
}
