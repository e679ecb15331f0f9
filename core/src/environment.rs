//! Environment module - dependency injection for the state machines.
//!
//! Reducers never read the wall clock directly; they ask the [`Clock`] in
//! their environment so expiry and timestamps are deterministic in tests.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::policy::BookingPolicy;

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```ignore
/// // Production - uses system clock
/// let clock = SystemClock;
///
/// // Test - fixed time for deterministic tests
/// let clock = FixedClock::new(time);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Environment handed to every reducer in this crate.
#[derive(Clone)]
pub struct MachineEnvironment {
    /// Clock for timestamps and deadline checks
    pub clock: Arc<dyn Clock>,
    /// Booking and payment policy
    pub policy: BookingPolicy,
}

impl MachineEnvironment {
    /// Creates a new `MachineEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, policy: BookingPolicy) -> Self {
        Self { clock, policy }
    }

    /// Current time according to the injected clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl std::fmt::Debug for MachineEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineEnvironment")
            .field("now", &self.clock.now())
            .field("policy", &self.policy)
            .finish()
    }
}
