//! HTTP request handlers, organized by resource.

pub mod bookings;
pub mod groups;
pub mod health;
pub mod payments;

pub use health::{health_check, readiness};
