//! Application state for Axum handlers.

use rental_runtime::{BookingService, GroupBookingService, PaymentVerifier, RentalEnvironment, RentalStore};
use std::sync::Arc;

/// Services shared by every handler.
///
/// Cheap to clone: each service holds the same [`RentalEnvironment`].
#[derive(Clone)]
pub struct AppState {
    /// Booking lifecycle
    pub bookings: BookingService,
    /// Checkout initiation and verification
    pub verifier: PaymentVerifier,
    /// Group bookings
    pub groups: GroupBookingService,
    /// Store, for readiness probes
    pub store: Arc<dyn RentalStore>,
}

impl AppState {
    /// Wire every service over `env`.
    #[must_use]
    pub fn new(env: &RentalEnvironment) -> Self {
        Self {
            bookings: BookingService::new(env.clone()),
            verifier: PaymentVerifier::new(env.clone()),
            groups: GroupBookingService::new(env.clone()),
            store: Arc::clone(&env.store),
        }
    }
}
