//! Booking policy knobs shared by the services and state machines.

use chrono::Duration;

use crate::types::Currency;

/// Time windows and defaults that govern reservations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPolicy {
    /// How long a booking may hold equipment without a verified payment.
    ///
    /// Mirrors the gateway's checkout-session expiry; each payment
    /// initiation restarts the window.
    pub payment_window: Duration,
    /// How long a group booking may stay `collecting` before it expires.
    pub collection_window: Duration,
    /// Currency used for new bookings and checkout sessions.
    pub currency: Currency,
}

impl BookingPolicy {
    /// Creates a policy from explicit values
    #[must_use]
    pub const fn new(payment_window: Duration, collection_window: Duration, currency: Currency) -> Self {
        Self {
            payment_window,
            collection_window,
            currency,
        }
    }
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            payment_window: Duration::minutes(30),
            collection_window: Duration::hours(48),
            currency: Currency::ngn(),
        }
    }
}
