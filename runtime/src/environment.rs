//! Dependencies shared by the services.

use rental_core::environment::{Clock, MachineEnvironment};
use rental_core::gateway::PaymentGateway;
use rental_core::policy::BookingPolicy;
use std::sync::Arc;

use crate::events::EventSink;
use crate::retry::RetryPolicy;
use crate::store::RentalStore;

/// Everything a service needs, injected once at startup
#[derive(Clone)]
pub struct RentalEnvironment {
    /// Persistence
    pub store: Arc<dyn RentalStore>,
    /// Hosted-checkout gateway
    pub gateway: Arc<dyn PaymentGateway>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Committed-event sink
    pub events: Arc<dyn EventSink>,
    /// Windows and defaults
    pub policy: BookingPolicy,
    /// Backoff for gateway initialization
    pub retry: RetryPolicy,
    /// Where the gateway sends the payer after checkout
    pub callback_url: Option<String>,
}

impl RentalEnvironment {
    /// Build an environment with the default retry policy and no callback URL
    #[must_use]
    pub fn new(
        store: Arc<dyn RentalStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            events,
            policy,
            retry: RetryPolicy::default(),
            callback_url: None,
        }
    }

    /// Override the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the checkout callback URL
    #[must_use]
    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    /// The subset handed to the pure state machines
    #[must_use]
    pub fn machine(&self) -> MachineEnvironment {
        MachineEnvironment::new(Arc::clone(&self.clock), self.policy.clone())
    }
}

impl std::fmt::Debug for RentalEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RentalEnvironment")
            .field("policy", &self.policy)
            .field("retry", &self.retry)
            .field("callback_url", &self.callback_url)
            .finish_non_exhaustive()
    }
}
