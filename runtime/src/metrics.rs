//! Prometheus metrics for the reconciliation core.
//!
//! Recording goes through the `metrics` facade, so every call is a no-op until
//! [`MetricsServer::start`] installs the Prometheus recorder. Tests therefore
//! need no setup.
//!
//! ```rust,ignore
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! let body = server.render();
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use rental_core::booking::CancellationReason;
use rental_core::payment::PaymentOutcome;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the address its scrape endpoint is served on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the scrape endpoint should bind to
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe every metric and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or another
    /// recorder is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = builder
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "metrics recorder installed");
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder hasn't been installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!("rental_bookings_created_total", "Bookings created");
    describe_counter!("rental_bookings_confirmed_total", "Bookings confirmed after payment");
    describe_counter!("rental_bookings_cancelled_total", "Bookings cancelled, by reason");
    describe_counter!("rental_bookings_expired_total", "Bookings expired without payment");
    describe_counter!("rental_payments_initiated_total", "Checkout sessions opened");
    describe_counter!(
        "rental_payment_verifications_total",
        "Verification calls, by outcome"
    );
    describe_counter!(
        "rental_post_payment_conflicts_total",
        "Payments that cleared after their range became unavailable"
    );
    describe_counter!(
        "rental_amount_mismatches_total",
        "Gateway-reported amounts that differed from the expected amount"
    );
    describe_counter!("rental_groups_ready_total", "Group bookings that became fully funded");
    describe_counter!("rental_groups_confirmed_total", "Group bookings confirmed by the owner");
    describe_histogram!(
        "rental_gateway_request_duration_seconds",
        "Gateway round-trip latency, by operation"
    );
    describe_histogram!(
        "rental_equipment_lock_wait_duration_seconds",
        "Time spent waiting for the per-equipment lock"
    );
}

/// Recording helpers for the services.
pub struct RentalMetrics;

impl RentalMetrics {
    /// A booking was created
    pub fn booking_created() {
        counter!("rental_bookings_created_total").increment(1);
    }

    /// A booking confirmed
    pub fn booking_confirmed() {
        counter!("rental_bookings_confirmed_total").increment(1);
    }

    /// A booking was cancelled
    pub fn booking_cancelled(reason: CancellationReason) {
        counter!("rental_bookings_cancelled_total", "reason" => reason.as_str()).increment(1);
        if reason == CancellationReason::PostPaymentConflict {
            counter!("rental_post_payment_conflicts_total").increment(1);
        }
    }

    /// Bookings expired
    pub fn bookings_expired(count: u64) {
        counter!("rental_bookings_expired_total").increment(count);
    }

    /// A checkout session was opened
    pub fn payment_initiated() {
        counter!("rental_payments_initiated_total").increment(1);
    }

    /// A verification completed with `outcome`
    pub fn verification(outcome: &PaymentOutcome) {
        counter!("rental_payment_verifications_total", "outcome" => outcome.label()).increment(1);
    }

    /// The gateway reported a different amount or currency
    pub fn amount_mismatch() {
        counter!("rental_amount_mismatches_total").increment(1);
    }

    /// A group became ready
    pub fn group_ready() {
        counter!("rental_groups_ready_total").increment(1);
    }

    /// A group was confirmed
    pub fn group_confirmed() {
        counter!("rental_groups_confirmed_total").increment(1);
    }

    /// A group conflicted at owner confirmation
    pub fn group_post_payment_conflict() {
        counter!("rental_post_payment_conflicts_total").increment(1);
    }

    /// A gateway round trip finished
    pub fn gateway_request(operation: &'static str, duration: Duration) {
        histogram!("rental_gateway_request_duration_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }
}
