//! Publication of committed domain events.
//!
//! Events are published only after their unit of work commits, so a sink
//! never sees a transition that was rolled back. Delivery to notification
//! channels is out of scope; the production sink logs them.

use async_trait::async_trait;
use rental_core::booking::BookingEvent;
use rental_core::group::GroupEvent;
use rental_core::payment::PaymentEvent;
use rental_core::types::{BookingId, GatewayReference, GroupBookingId};
use serde::Serialize;

/// A committed event with the id of the entity it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Booking transition
    Booking {
        /// Booking
        booking_id: BookingId,
        /// What happened
        event: BookingEvent,
    },
    /// Payment settlement
    Payment {
        /// Attempt
        reference: GatewayReference,
        /// What happened
        event: PaymentEvent,
    },
    /// Group transition
    Group {
        /// Group
        group_id: GroupBookingId,
        /// What happened
        event: GroupEvent,
    },
}

impl DomainEvent {
    /// Wrap booking events
    pub fn bookings(booking_id: BookingId, events: impl IntoIterator<Item = BookingEvent>) -> impl Iterator<Item = Self> {
        events.into_iter().map(move |event| Self::Booking { booking_id, event })
    }

    /// Wrap payment events
    pub fn payments(
        reference: &GatewayReference,
        events: impl IntoIterator<Item = PaymentEvent>,
    ) -> impl Iterator<Item = Self> {
        let reference = reference.clone();
        events.into_iter().map(move |event| Self::Payment {
            reference: reference.clone(),
            event,
        })
    }

    /// Wrap group events
    pub fn groups(group_id: GroupBookingId, events: impl IntoIterator<Item = GroupEvent>) -> impl Iterator<Item = Self> {
        events.into_iter().map(move |event| Self::Group { group_id, event })
    }
}

/// Receives events after commit
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish a batch of committed events, in order
    async fn publish(&self, events: Vec<DomainEvent>);
}

/// Sink that writes each event as a structured log line
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            match serde_json::to_string(&event) {
                Ok(json) => tracing::info!(target: "rental::events", event = %json, "domain event"),
                Err(error) => tracing::warn!(%error, ?event, "failed to serialize domain event"),
            }
        }
    }
}

/// Record metrics and notable log lines for committed events, then hand them
/// to the sink.
pub(crate) async fn publish(sink: &dyn EventSink, events: Vec<DomainEvent>) {
    if events.is_empty() {
        return;
    }
    events.iter().for_each(observe);
    sink.publish(events).await;
}

fn observe(event: &DomainEvent) {
    use rental_core::booking::CancellationReason;
    use rental_core::payment::FailureReason;

    use crate::metrics::RentalMetrics;

    match event {
        DomainEvent::Booking { booking_id, event } => match event {
            BookingEvent::Confirmed { reference } => {
                tracing::info!(%booking_id, %reference, "booking confirmed");
                RentalMetrics::booking_confirmed();
            }
            BookingEvent::Cancelled { reason } => {
                if *reason == CancellationReason::PostPaymentConflict {
                    tracing::warn!(%booking_id, "payment cleared but range no longer available; booking cancelled");
                } else {
                    tracing::info!(%booking_id, reason = reason.as_str(), "booking cancelled");
                }
                RentalMetrics::booking_cancelled(*reason);
            }
            BookingEvent::Expired => {
                tracing::info!(%booking_id, "booking expired");
                RentalMetrics::bookings_expired(1);
            }
            BookingEvent::RefundFlagged { reference } => {
                tracing::warn!(%booking_id, %reference, "captured payment requires refund");
            }
            BookingEvent::PaymentInitiated { reference, deadline } => {
                tracing::debug!(%booking_id, %reference, %deadline, "awaiting payment");
            }
            BookingEvent::PaymentFailed { reference } => {
                tracing::info!(%booking_id, %reference, "payment attempt failed");
            }
        },
        DomainEvent::Payment { reference, event } => match event {
            PaymentEvent::Verified { channel, .. } => {
                tracing::info!(%reference, channel = ?channel, "payment verified");
            }
            PaymentEvent::Failed { reason } => match reason {
                FailureReason::AmountMismatch { expected, reported } => {
                    tracing::error!(%reference, %expected, %reported, "gateway reported a different amount");
                    RentalMetrics::amount_mismatch();
                }
                FailureReason::CurrencyMismatch { expected, reported } => {
                    tracing::error!(%reference, %expected, %reported, "gateway reported a different currency");
                    RentalMetrics::amount_mismatch();
                }
                other => tracing::info!(%reference, reason = other.as_str(), "payment failed"),
            },
        },
        DomainEvent::Group { group_id, event } => match event {
            GroupEvent::Ready => {
                tracing::info!(%group_id, "group booking fully funded");
                RentalMetrics::group_ready();
            }
            GroupEvent::Confirmed => {
                tracing::info!(%group_id, "group booking confirmed");
                RentalMetrics::group_confirmed();
            }
            GroupEvent::Cancelled { reason } => {
                if *reason == CancellationReason::PostPaymentConflict {
                    tracing::warn!(%group_id, "range no longer available at owner confirmation; group cancelled");
                    RentalMetrics::group_post_payment_conflict();
                } else {
                    tracing::info!(%group_id, reason = reason.as_str(), "group booking cancelled");
                }
            }
            GroupEvent::RefundFlagged { participant_id } => {
                tracing::warn!(%group_id, %participant_id, "participant payment requires refund");
            }
            other => tracing::debug!(%group_id, event = ?other, "group event"),
        },
    }
}
