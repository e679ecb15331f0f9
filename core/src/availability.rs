//! The closed-interval conflict rule.
//!
//! Storage decides which reservations still *hold* an equipment item
//! (`pending`, `awaiting_payment`, `confirmed` bookings; `collecting`, `ready`,
//! `confirmed` groups). This module decides whether a requested range collides
//! with any of them. The answer is passed into the state machines as an
//! [`Availability`] fact, so the machines never perform I/O.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::equipment::Equipment;
use crate::types::{BookingId, DateRange, GroupBookingId};

/// Identifies the reservation that holds a range
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ReservationKey {
    /// A single-renter booking
    Booking(BookingId),
    /// A group booking
    Group(GroupBookingId),
}

impl fmt::Display for ReservationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Booking(id) => write!(f, "booking:{id}"),
            Self::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// One range currently held on an equipment item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSlot {
    /// Holder of the range
    pub key: ReservationKey,
    /// Held days
    pub range: DateRange,
}

/// Result of an availability check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    /// No holding reservation overlaps and the item is listed
    Clear,
    /// The range cannot be held
    Conflicted(ConflictCause),
}

/// Why a range is not available
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictCause {
    /// The owner unlisted the item
    Unlisted,
    /// Another reservation overlaps
    Overlap(ReservationKey),
}

impl Availability {
    /// `true` when [`Availability::Conflicted`]
    #[must_use]
    pub const fn has_conflict(&self) -> bool {
        matches!(self, Self::Conflicted(_))
    }
}

/// Check `range` against the reservations currently holding `equipment`.
///
/// `exclude` removes the caller's own reservation from consideration so an
/// existing booking can re-validate itself before confirmation.
#[must_use]
pub fn check(
    equipment: &Equipment,
    range: &DateRange,
    holdings: &[ReservationSlot],
    exclude: Option<ReservationKey>,
) -> Availability {
    if !equipment.available {
        return Availability::Conflicted(ConflictCause::Unlisted);
    }

    holdings
        .iter()
        .filter(|slot| Some(slot.key) != exclude)
        .find(|slot| slot.range.overlaps(range))
        .map_or(Availability::Clear, |slot| {
            Availability::Conflicted(ConflictCause::Overlap(slot.key))
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Currency, EquipmentId, Money, UserId};
    use chrono::NaiveDate;

    fn range(start: u32, end: u32) -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 6, start).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, end).unwrap(),
        )
        .unwrap()
    }

    fn equipment(available: bool) -> Equipment {
        Equipment {
            id: EquipmentId::new(),
            owner_id: UserId::new(),
            price_per_day: Money::from_minor(1000),
            currency: Currency::ngn(),
            available,
        }
    }

    #[test]
    fn test_no_holdings_is_clear() {
        assert_eq!(check(&equipment(true), &range(1, 3), &[], None), Availability::Clear);
    }

    #[test]
    fn test_single_day_overlap_conflicts() {
        let held = ReservationKey::Booking(BookingId::new());
        let holdings = [ReservationSlot { key: held, range: range(1, 3) }];

        let result = check(&equipment(true), &range(3, 5), &holdings, None);
        assert_eq!(result, Availability::Conflicted(ConflictCause::Overlap(held)));

        let result = check(&equipment(true), &range(4, 5), &holdings, None);
        assert_eq!(result, Availability::Clear);
    }

    #[test]
    fn test_exclude_self() {
        let me = ReservationKey::Group(GroupBookingId::new());
        let holdings = [ReservationSlot { key: me, range: range(1, 3) }];
        assert_eq!(
            check(&equipment(true), &range(1, 3), &holdings, Some(me)),
            Availability::Clear
        );
    }

    #[test]
    fn test_unlisted_equipment_conflicts() {
        assert_eq!(
            check(&equipment(false), &range(1, 3), &[], None),
            Availability::Conflicted(ConflictCause::Unlisted)
        );
    }
}
