//! Equipment as seen by the booking core (read-only).

use serde::{Deserialize, Serialize};

use crate::types::{Currency, EquipmentId, Money, UserId};

/// A rentable item. Catalog CRUD lives elsewhere; the core only reads it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    /// Equipment id
    pub id: EquipmentId,
    /// Owning account
    pub owner_id: UserId,
    /// Daily rate in minor units
    pub price_per_day: Money,
    /// Currency the rate is quoted in
    pub currency: Currency,
    /// Owner-controlled listing flag. `false` blocks every new reservation
    /// and every confirmation.
    pub available: bool,
}

impl Equipment {
    /// Whether `user_id` owns this item
    #[must_use]
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_id == user_id
    }
}
