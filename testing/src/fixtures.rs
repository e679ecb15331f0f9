//! Canned values and a fully wired [`TestHarness`].

#![allow(clippy::missing_panics_doc)] // Fixture inputs are literals

use chrono::NaiveDate;
use rental_core::booking::Booking;
use rental_core::context::{Principal, RequestContext, Role};
use rental_core::environment::MachineEnvironment;
use rental_core::equipment::Equipment;
use rental_core::group::Participant;
use rental_core::policy::BookingPolicy;
use rental_core::types::{
    Currency, DateRange, EquipmentId, GroupBookingId, Money, ParticipantId, UserId,
};
use rental_runtime::{
    BookingService, ExpirySweeper, GroupBookingService, PaymentVerifier, RentalEnvironment,
    RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;

use crate::events::RecordingEventSink;
use crate::gateway::MockPaymentGateway;
use crate::mocks::{epoch, test_clock, ManualClock};
use crate::store::InMemoryRentalStore;

/// Parse a `YYYY-MM-DD` literal
#[allow(clippy::expect_used)]
#[must_use]
pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("fixture date literal")
}

/// Closed range between two `YYYY-MM-DD` literals
#[allow(clippy::expect_used)]
#[must_use]
pub fn range(start: &str, end: &str) -> DateRange {
    DateRange::new(date(start), date(end)).expect("fixture range literal")
}

/// Listed equipment owned by a fresh user, priced in NGN minor units per day
#[must_use]
pub fn equipment(price_per_day: u64) -> Equipment {
    Equipment {
        id: EquipmentId::new(),
        owner_id: UserId::new(),
        price_per_day: Money::from_minor(price_per_day),
        currency: Currency::ngn(),
        available: true,
    }
}

fn context(user_id: UserId, email: String, role: Role) -> RequestContext {
    #[allow(clippy::expect_used)]
    let principal = Principal::new(user_id, email, role).expect("fixture email is valid");
    RequestContext::new(principal)
}

/// A renter with a fresh id
#[must_use]
pub fn renter() -> RequestContext {
    let user_id = UserId::new();
    context(user_id, format!("renter-{user_id}@example.com"), Role::Renter)
}

/// The owner of `equipment`
#[must_use]
pub fn owner(equipment: &Equipment) -> RequestContext {
    context(
        equipment.owner_id,
        format!("owner-{}@example.com", equipment.owner_id),
        Role::Owner,
    )
}

/// Machine environment frozen at [`epoch`]
#[must_use]
pub fn machine_env() -> MachineEnvironment {
    MachineEnvironment::new(Arc::new(test_clock()), BookingPolicy::default())
}

/// A pending three-day booking at 1 000 per day
#[allow(clippy::expect_used)]
#[must_use]
pub fn booking(env: &MachineEnvironment) -> Booking {
    Booking::create(
        &equipment(1000),
        UserId::new(),
        range("2024-06-01", "2024-06-03"),
        env,
    )
    .expect("fixture booking is valid")
}

/// An unpaid participant of `group_id`
#[must_use]
pub fn participant(group_id: GroupBookingId, share: u64, env: &MachineEnvironment) -> Participant {
    Participant {
        id: ParticipantId::new(),
        group_id,
        user_id: UserId::new(),
        share: Money::from_minor(share),
        payment_reference: None,
        payment_status: None,
        refund_required: false,
        joined_at: env.now(),
    }
}

/// A retry policy that retries twice without sleeping
#[must_use]
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(2)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(1))
        .jitter(false)
        .build()
}

/// In-memory store, mock gateway, manual clock and recording sink wired into
/// one [`RentalEnvironment`]
#[derive(Clone)]
pub struct TestHarness {
    /// Store
    pub store: Arc<InMemoryRentalStore>,
    /// Gateway
    pub gateway: Arc<MockPaymentGateway>,
    /// Clock, starting at [`epoch`]
    pub clock: Arc<ManualClock>,
    /// Sink receiving every committed event
    pub events: Arc<RecordingEventSink>,
    /// The wired environment
    pub env: RentalEnvironment,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Wire a fresh harness with the default policy
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(BookingPolicy::default())
    }

    /// Wire a fresh harness with `policy`
    #[must_use]
    pub fn with_policy(policy: BookingPolicy) -> Self {
        let store = Arc::new(InMemoryRentalStore::new());
        let gateway = Arc::new(MockPaymentGateway::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        let events = Arc::new(RecordingEventSink::new());
        let env = RentalEnvironment::new(
            store.clone(),
            gateway.clone(),
            clock.clone(),
            events.clone(),
            policy,
        )
        .with_retry(fast_retry())
        .with_callback_url("https://rentals.test/payments/callback");
        Self {
            store,
            gateway,
            clock,
            events,
            env,
        }
    }

    /// Booking service over this harness
    #[must_use]
    pub fn bookings(&self) -> BookingService {
        BookingService::new(self.env.clone())
    }

    /// Payment verifier over this harness
    #[must_use]
    pub fn verifier(&self) -> PaymentVerifier {
        PaymentVerifier::new(self.env.clone())
    }

    /// Group booking service over this harness
    #[must_use]
    pub fn groups(&self) -> GroupBookingService {
        GroupBookingService::new(self.env.clone())
    }

    /// Expiry sweeper over this harness
    #[must_use]
    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(self.env.clone())
    }

    /// Seed listed equipment at `price_per_day`
    pub async fn add_equipment(&self, price_per_day: u64) -> Equipment {
        let equipment = equipment(price_per_day);
        self.store.insert_equipment(equipment.clone()).await;
        equipment
    }
}
