//! # Rental Core
//!
//! Domain types and pure state machines for the equipment-rental booking and
//! payment reconciliation core.
//!
//! This crate contains no I/O. Everything that crosses a process boundary
//! (the database, the payment gateway) is described by a trait or by a fact
//! passed into a reducer, so every transition can be tested at memory speed.
//!
//! ## Core Concepts
//!
//! - **Booking**: one renter's reservation of one equipment item for a closed
//!   date range, driven by [`booking::BookingMachine`]
//! - **Payment**: one capture attempt at the external gateway, settled exactly
//!   once by [`payment::PaymentMachine`]
//! - **Group booking**: a shared reservation funded by several participants,
//!   coordinated by [`group::GroupMachine`]
//! - **Availability**: the closed-interval overlap rule in [`availability`]
//!
//! ## Reducers
//!
//! Each state machine implements [`reducer::Reducer`]:
//! `(State, Action, Environment) → Result<Events>`. Guards run before any
//! mutation, so a rejected action leaves the state untouched. Accepted actions
//! produce events which are then applied to the state in order.
//!
//! ```ignore
//! use rental_core::booking::{BookingAction, BookingMachine};
//! use rental_core::reducer::Reducer;
//!
//! let events = BookingMachine.reduce(&mut booking, BookingAction::Cancel { by }, &env)?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod availability;
pub mod booking;
pub mod context;
pub mod environment;
pub mod equipment;
pub mod error;
pub mod gateway;
pub mod group;
pub mod payment;
pub mod policy;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, Utc};
pub use error::{RentalError, RentalResult};
pub use smallvec::{smallvec, SmallVec};

/// Reducer module - the shape shared by every state machine in this crate.
pub mod reducer {
    use crate::error::RentalError;
    use smallvec::SmallVec;

    /// Events produced by a single reduction. Most actions yield one or two.
    pub type Events<E> = SmallVec<[E; 4]>;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The entity this reducer operates on
    /// - `Action`: The commands it accepts, carrying any external facts
    ///   (such as an availability check result) already resolved by the caller
    /// - `Event`: The facts it records when an action is accepted
    /// - `Environment`: The injected dependencies (clock, policy)
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The event type this reducer emits
        type Event;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into events, applying them to `state`.
        ///
        /// Guards are evaluated first; on rejection the state is unchanged.
        /// An accepted action that is already reflected in the state yields
        /// an empty event list (idempotent replay).
        ///
        /// # Errors
        ///
        /// Returns a [`RentalError`] when a guard rejects the action.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<Events<Self::Event>, RentalError>;
    }
}
