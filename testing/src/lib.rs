//! # Rental Testing
//!
//! Test doubles and fixtures for the rental reconciliation crates.
//!
//! This crate provides:
//! - Clocks: [`FixedClock`] and the steppable [`ManualClock`]
//! - [`InMemoryRentalStore`], a `RentalStore` whose units of work serialize on
//!   one lock and roll back on drop
//! - [`MockPaymentGateway`], a scriptable gateway that counts its calls
//! - [`RecordingEventSink`] for asserting on published events
//! - [`ReducerTest`] for Given-When-Then reducer tests
//! - [`TestHarness`] wiring all of the above into a `RentalEnvironment`
//!
//! ## Example
//!
//! ```ignore
//! use rental_testing::{fixtures, TestHarness};
//!
//! #[tokio::test]
//! async fn test_booking_flow() {
//!     let harness = TestHarness::new();
//!     let equipment = harness.add_equipment(1000).await;
//!     let renter = fixtures::renter();
//!
//!     let booking = harness.bookings().create(&renter, equipment.id, fixtures::range("2024-06-01", "2024-06-03")).await.unwrap();
//!     assert_eq!(booking.total_price.minor(), 3000);
//! }
//! ```

pub mod events;
pub mod fixtures;
pub mod gateway;
pub mod store;

use chrono::{DateTime, Utc};
use rental_core::environment::Clock;

/// Mock implementations of environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use rental_testing::mocks::FixedClock;
    /// use rental_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test advances it
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move forward by `by`
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// The instant every test clock starts at: 2024-05-20 12:00:00 UTC
    #[must_use]
    pub fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_716_206_400, 0).unwrap_or_default()
    }

    /// Create a default fixed clock for tests
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(epoch())
    }
}

/// Install a test-friendly tracing subscriber once; later calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use events::RecordingEventSink;
pub use fixtures::TestHarness;
pub use gateway::MockPaymentGateway;
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use reducer_test::ReducerTest;
pub use store::InMemoryRentalStore;
