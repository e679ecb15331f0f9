//! Periodic expiry sweep.
//!
//! Expiry is also applied lazily whenever a service reads or mutates an
//! overdue entity; the sweep bounds how long an untouched one can stay stale
//! to one interval.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;

use rental_core::booking::BookingStatus;
use rental_core::error::RentalError;
use rental_core::group::GroupStatus;

use crate::booking::BookingService;
use crate::environment::RentalEnvironment;
use crate::group::GroupBookingService;
use crate::payment::PaymentVerifier;

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Lapsed payments reconciled with the gateway
    pub payments_reconciled: usize,
    /// Bookings moved to `expired`
    pub bookings_expired: usize,
    /// Groups moved to `expired`
    pub groups_expired: usize,
    /// Entities skipped because of an error (retried next sweep)
    pub failures: usize,
}

/// Expires overdue payments, bookings and groups
#[derive(Clone, Debug)]
pub struct ExpirySweeper {
    env: RentalEnvironment,
    bookings: BookingService,
    groups: GroupBookingService,
    verifier: PaymentVerifier,
    batch_size: u32,
}

impl ExpirySweeper {
    /// Default number of rows handled per entity kind per sweep
    pub const DEFAULT_BATCH_SIZE: u32 = 200;

    /// Gateway lookups in flight at once while reconciling lapsed payments
    pub const RECONCILE_CONCURRENCY: usize = 8;

    /// Create a sweeper over `env`
    #[must_use]
    pub fn new(env: RentalEnvironment) -> Self {
        Self {
            bookings: BookingService::new(env.clone()),
            groups: GroupBookingService::new(env.clone()),
            verifier: PaymentVerifier::new(env.clone()),
            env,
            batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }

    /// Override the batch size
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Run one sweep.
    ///
    /// Payments go first, reconciled concurrently, so a capture that raced its session expiry confirms
    /// the booking before the booking itself is considered for expiry.
    ///
    /// # Errors
    ///
    /// [`RentalError::Storage`] if the overdue queries fail. Failures on
    /// individual entities are counted, logged, and skipped.
    pub async fn sweep_once(&self) -> Result<SweepReport, RentalError> {
        let mut report = SweepReport::default();
        let now = self.env.clock.now();

        let lapsed = self.env.store.lapsed_payments(now, self.batch_size).await?;
        let reconciled: Vec<_> = stream::iter(lapsed)
            .map(|payment| async move {
                let result = self.verifier.reconcile_lapsed(&payment.reference).await;
                (payment.reference, result)
            })
            .buffer_unordered(Self::RECONCILE_CONCURRENCY)
            .collect()
            .await;
        for (reference, result) in reconciled {
            match result {
                Ok(_) => report.payments_reconciled += 1,
                Err(error) => {
                    tracing::warn!(%reference, %error, "lapsed payment not reconciled");
                    report.failures += 1;
                }
            }
        }

        for booking in self.env.store.overdue_bookings(now, self.batch_size).await? {
            match self.bookings.expire(booking.id).await {
                Ok(expired) if expired.status == BookingStatus::Expired => report.bookings_expired += 1,
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(booking_id = %booking.id, %error, "booking not expired");
                    report.failures += 1;
                }
            }
        }

        for group in self.env.store.overdue_groups(now, self.batch_size).await? {
            match self.groups.expire(group.id).await {
                Ok(view) if view.state.group.status == GroupStatus::Expired => report.groups_expired += 1,
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(group_id = %group.id, %error, "group not expired");
                    report.failures += 1;
                }
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                payments = report.payments_reconciled,
                bookings = report.bookings_expired,
                groups = report.groups_expired,
                failures = report.failures,
                "expiry sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` resolves.
    pub async fn run<S>(self, interval: Duration, shutdown: S)
    where
        S: Future<Output = ()> + Send,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(interval_secs = interval.as_secs(), "expiry sweeper started");
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("expiry sweeper stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep_once().await {
                        tracing::error!(%error, "expiry sweep failed");
                    }
                }
            }
        }
    }
}
