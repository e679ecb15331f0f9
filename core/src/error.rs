//! Error taxonomy for the booking and payment reconciliation core.
//!
//! Guard violations are returned before any mutation. Conditions that are not
//! failures of the request (a pending gateway verification, a conflict found
//! after payment cleared) are reported as outcomes, not as errors; see
//! [`crate::payment::PaymentOutcome`] and [`crate::booking::CancellationReason`].

use chrono::NaiveDate;
use thiserror::Error;

use crate::types::{DateRange, EquipmentId, GroupBookingId, Money, UserId};

/// Result alias used across the rental crates.
pub type RentalResult<T> = Result<T, RentalError>;

/// Errors raised by the reconciliation core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RentalError {
    /// Availability lost between check and commit; retry with a new range or item
    #[error("equipment {equipment_id} is not available for {range}")]
    Conflict {
        /// Equipment that was requested
        equipment_id: EquipmentId,
        /// Requested range
        range: DateRange,
    },

    /// Transport failure or 5xx from the payment gateway; retry with backoff
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// The gateway refused to create a checkout session (bad email, bad amount)
    #[error("payment gateway rejected the request: {0}")]
    PaymentRejected(String),

    /// Amount must be strictly positive
    #[error("invalid amount: {0}")]
    InvalidAmount(Money),

    /// End date precedes start date
    #[error("invalid date range: {start} is after {end}")]
    InvalidRange {
        /// Requested start
        start: NaiveDate,
        /// Requested end
        end: NaiveDate,
    },

    /// The entity's current status does not permit the action
    #[error("cannot {action} {entity} in status {from}")]
    InvalidTransition {
        /// Entity kind (booking, payment, group)
        entity: &'static str,
        /// Current status label
        from: &'static str,
        /// Attempted action
        action: &'static str,
    },

    /// Group membership can only change while collecting
    #[error("group booking {group_id} is closed ({status})")]
    GroupClosed {
        /// Group
        group_id: GroupBookingId,
        /// Current status label
        status: &'static str,
    },

    /// The user already joined this group
    #[error("user {user_id} already joined group booking {group_id}")]
    DuplicateParticipant {
        /// Group
        group_id: GroupBookingId,
        /// User
        user_id: UserId,
    },

    /// Cumulative shares would exceed the group total
    #[error("share {requested} would exceed group total {total} (already committed {committed})")]
    OverCommitted {
        /// Group
        group_id: GroupBookingId,
        /// Sum of existing shares
        committed: Money,
        /// Share being added
        requested: Money,
        /// Group total price
        total: Money,
    },

    /// Every slot in the group is taken
    #[error("group booking {group_id} has no free slots (capacity {slots})")]
    GroupFull {
        /// Group
        group_id: GroupBookingId,
        /// Configured slot count
        slots: u32,
    },

    /// Entity does not exist (or is not visible to the caller)
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Identifier as supplied
        id: String,
    },

    /// Caller is authenticated but not allowed to perform the action
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Input failed boundary validation
    #[error("validation failed: {0}")]
    Validation(String),

    /// Arithmetic overflow while deriving an amount
    #[error("arithmetic overflow computing {0}")]
    Overflow(&'static str),

    /// Persistence layer failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl RentalError {
    /// Convenience constructor for [`RentalError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayUnavailable(_) | Self::Storage(_))
    }
}
