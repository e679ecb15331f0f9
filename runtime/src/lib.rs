//! # Rental Runtime
//!
//! Request-scoped services for the booking and payment reconciliation core.
//!
//! Each service operation is one short unit of work against a
//! [`store::RentalStore`]: lock the equipment, load the entities, run the pure
//! state machine from `rental-core`, write, commit, then publish the committed
//! events. Gateway round trips happen between units of work, never inside one.
//!
//! ## Services
//!
//! - [`availability::AvailabilityIndex`]: closed-interval conflict checks
//! - [`booking::BookingService`]: create, read, list, cancel, expire
//! - [`payment::PaymentVerifier`]: initiate and idempotent verify
//! - [`group::GroupBookingService`]: participants, readiness, owner confirmation
//! - [`sweeper::ExpirySweeper`]: periodic expiry
//!
//! ## Example
//!
//! ```ignore
//! let env = RentalEnvironment::new(store, gateway, Arc::new(SystemClock), Arc::new(TracingEventSink), policy);
//! let bookings = BookingService::new(env.clone());
//! let verifier = PaymentVerifier::new(env);
//!
//! let booking = bookings.create(&ctx, equipment_id, range).await?;
//! let checkout = verifier.initiate_for_booking(&ctx, booking.id).await?;
//! // payer completes checkout at checkout.authorization_url
//! let report = verifier.verify(&checkout.reference).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod availability;
pub mod booking;
pub mod environment;
pub mod events;
pub mod group;
pub mod metrics;
pub mod payment;
pub mod retry;
pub mod store;
pub mod sweeper;

pub use availability::AvailabilityIndex;
pub use booking::BookingService;
pub use environment::RentalEnvironment;
pub use events::{DomainEvent, EventSink, TracingEventSink};
pub use group::{GroupBookingService, GroupView, JoinOutcome};
pub use payment::{Checkout, PaymentVerifier, SettledSubject, VerificationReport};
pub use retry::RetryPolicy;
pub use store::{BookingQuery, BookingScope, Page, RentalStore, StoreError, UnitOfWork};
pub use sweeper::{ExpirySweeper, SweepReport};
