//! Idempotent verification and the integrity checks on gateway answers.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use rental_core::booking::{Booking, BookingEvent, BookingStatus, CancellationReason};
use rental_core::error::RentalError;
use rental_core::gateway::GatewayError;
use rental_core::payment::{FailureReason, PaymentEvent, PaymentOutcome, PaymentStatus};
use rental_core::types::{GatewayReference, Money};
use rental_runtime::{Checkout, DomainEvent, SettledSubject};
use rental_testing::{fixtures, TestHarness};

/// Equipment at 1000/day, a three-day booking, and an open checkout
async fn awaiting_payment(harness: &TestHarness) -> (Booking, Checkout) {
    let equipment = harness.add_equipment(1000).await;
    let renter = fixtures::renter();
    let booking = harness
        .bookings()
        .create(&renter, equipment.id, fixtures::range("2024-06-01", "2024-06-03"))
        .await
        .unwrap();
    let checkout = harness
        .verifier()
        .initiate_for_booking(&renter, booking.id)
        .await
        .unwrap();
    (booking, checkout)
}

fn confirmed_events(harness: &TestHarness) -> usize {
    harness.events.count(|e| {
        matches!(
            e,
            DomainEvent::Booking {
                event: BookingEvent::Confirmed { .. },
                ..
            }
        )
    })
}

fn booking_of(subject: SettledSubject) -> Booking {
    match subject {
        SettledSubject::Booking { booking } => booking,
        SettledSubject::Group { .. } => panic!("expected a booking subject"),
    }
}

#[tokio::test]
async fn test_repeated_verification_applies_once() {
    let harness = TestHarness::new();
    let (_, checkout) = awaiting_payment(&harness).await;
    harness.gateway.succeed(&checkout.reference);
    let verifier = harness.verifier();

    for _ in 0..5 {
        let report = verifier.verify(&checkout.reference).await.unwrap();
        assert!(matches!(report.outcome, PaymentOutcome::Verified { .. }));
        assert_eq!(booking_of(report.subject).status, BookingStatus::Confirmed);
    }

    assert_eq!(confirmed_events(&harness), 1);
    assert_eq!(
        harness.events.count(|e| matches!(e, DomainEvent::Payment { event: PaymentEvent::Verified { .. }, .. })),
        1
    );
    // Terminal payments are answered from storage
    assert_eq!(harness.gateway.verify_calls(&checkout.reference), 1);
}

#[tokio::test]
async fn test_concurrent_verification_applies_once() {
    let harness = TestHarness::new();
    let (_, checkout) = awaiting_payment(&harness).await;
    harness.gateway.succeed(&checkout.reference);
    let (webhook, redirect) = (harness.verifier(), harness.verifier());

    let (a, b) = tokio::join!(
        webhook.verify(&checkout.reference),
        redirect.verify(&checkout.reference),
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.outcome, b.outcome);
    assert_eq!(confirmed_events(&harness), 1);
    assert_eq!(
        harness.store.payments().await[0].status,
        PaymentStatus::Verified
    );
}

#[tokio::test]
async fn test_pending_is_reported_without_writes() {
    let harness = TestHarness::new();
    let (booking, checkout) = awaiting_payment(&harness).await;
    harness.events.clear();

    let report = harness.verifier().verify(&checkout.reference).await.unwrap();
    assert_eq!(report.outcome, PaymentOutcome::Pending);
    assert_eq!(booking_of(report.subject).status, BookingStatus::AwaitingPayment);
    assert!(harness.events.events().is_empty());

    // The next poll still reaches the gateway
    harness.gateway.succeed(&checkout.reference);
    let report = harness.verifier().verify(&checkout.reference).await.unwrap();
    assert_eq!(booking_of(report.subject).id, booking.id);
    assert_eq!(harness.gateway.verify_calls(&checkout.reference), 2);
}

#[tokio::test]
async fn test_amount_mismatch_fails_payment_and_keeps_booking_waiting() {
    let harness = TestHarness::new();
    let (_, checkout) = awaiting_payment(&harness).await;
    harness
        .gateway
        .succeed_with_amount(&checkout.reference, Money::from_minor(2000));

    let report = harness.verifier().verify(&checkout.reference).await.unwrap();
    assert_eq!(
        report.outcome,
        PaymentOutcome::Failed {
            reason: FailureReason::AmountMismatch {
                expected: Money::from_minor(3000),
                reported: Money::from_minor(2000),
            },
        }
    );
    assert_eq!(booking_of(report.subject).status, BookingStatus::AwaitingPayment);
    assert_eq!(confirmed_events(&harness), 0);

    // The failure is final even if the gateway later answers differently
    harness.gateway.succeed(&checkout.reference);
    let again = harness.verifier().verify(&checkout.reference).await.unwrap();
    assert!(matches!(again.outcome, PaymentOutcome::Failed { .. }));
}

#[tokio::test]
async fn test_post_payment_conflict_cancels_and_flags_refund() {
    let harness = TestHarness::new();
    let (booking, checkout) = awaiting_payment(&harness).await;
    harness.store.set_equipment_available(booking.equipment_id, false).await;
    harness.gateway.succeed(&checkout.reference);

    let report = harness.verifier().verify(&checkout.reference).await.unwrap();
    assert!(matches!(report.outcome, PaymentOutcome::Verified { .. }));
    assert!(report.is_post_payment_conflict());

    let cancelled = booking_of(report.subject);
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.cancellation, Some(CancellationReason::PostPaymentConflict));
    assert!(cancelled.refund_required);
}

#[tokio::test]
async fn test_gateway_outage_is_an_error_and_leaves_payment_initiated() {
    let harness = TestHarness::new();
    let (_, checkout) = awaiting_payment(&harness).await;
    harness
        .gateway
        .verify_error(&checkout.reference, GatewayError::Unavailable("timeout".into()));

    let err = harness.verifier().verify(&checkout.reference).await.unwrap_err();
    assert!(matches!(err, RentalError::GatewayUnavailable(_)));
    assert_eq!(harness.store.payments().await[0].status, PaymentStatus::Initiated);
}

#[tokio::test]
async fn test_undecodable_answer_is_treated_as_pending() {
    let harness = TestHarness::new();
    let (_, checkout) = awaiting_payment(&harness).await;
    harness.gateway.verify_error(
        &checkout.reference,
        GatewayError::InvalidResponse("missing data.status".into()),
    );

    let report = harness.verifier().verify(&checkout.reference).await.unwrap();
    assert_eq!(report.outcome, PaymentOutcome::Pending);
    assert_eq!(harness.store.payments().await[0].status, PaymentStatus::Initiated);
}

#[tokio::test]
async fn test_unknown_reference_is_not_found() {
    let harness = TestHarness::new();
    let reference = GatewayReference::parse("never_issued").unwrap();

    let err = harness.verifier().verify(&reference).await.unwrap_err();
    assert!(matches!(err, RentalError::NotFound { entity: "payment", .. }));
    assert_eq!(harness.gateway.verify_calls(&reference), 0);
}

#[tokio::test]
async fn test_initiate_reuses_live_session() {
    let harness = TestHarness::new();
    let equipment = harness.add_equipment(1000).await;
    let renter = fixtures::renter();
    let booking = harness
        .bookings()
        .create(&renter, equipment.id, fixtures::range("2024-06-01", "2024-06-03"))
        .await
        .unwrap();
    let verifier = harness.verifier();

    let first = verifier.initiate_for_booking(&renter, booking.id).await.unwrap();
    let second = verifier.initiate_for_booking(&renter, booking.id).await.unwrap();

    assert_eq!(first.reference, second.reference);
    assert!(second.reused);
    assert_eq!(harness.gateway.initialize_calls(), 1);
    assert_eq!(harness.store.payments().await.len(), 1);
}

#[tokio::test]
async fn test_initiate_after_confirmation_is_rejected() {
    let harness = TestHarness::new();
    let equipment = harness.add_equipment(1000).await;
    let renter = fixtures::renter();
    let booking = harness
        .bookings()
        .create(&renter, equipment.id, fixtures::range("2024-06-01", "2024-06-03"))
        .await
        .unwrap();
    let verifier = harness.verifier();
    let checkout = verifier.initiate_for_booking(&renter, booking.id).await.unwrap();
    harness.gateway.succeed(&checkout.reference);
    verifier.verify(&checkout.reference).await.unwrap();

    let err = verifier.initiate_for_booking(&renter, booking.id).await.unwrap_err();
    assert!(matches!(err, RentalError::InvalidTransition { from: "confirmed", .. }));
}

#[tokio::test]
async fn test_retry_after_decline_confirms_with_new_reference() {
    let harness = TestHarness::new();
    let equipment = harness.add_equipment(1000).await;
    let renter = fixtures::renter();
    let booking = harness
        .bookings()
        .create(&renter, equipment.id, fixtures::range("2024-06-01", "2024-06-03"))
        .await
        .unwrap();
    let verifier = harness.verifier();

    let stale = verifier.initiate_for_booking(&renter, booking.id).await.unwrap();
    harness.clock.advance(chrono::Duration::minutes(20));
    harness.gateway.decline(&stale.reference, "abandoned");
    verifier.verify(&stale.reference).await.unwrap();
    let fresh = verifier.initiate_for_booking(&renter, booking.id).await.unwrap();

    harness.gateway.succeed(&fresh.reference);
    let report = verifier.verify(&fresh.reference).await.unwrap();
    assert_eq!(booking_of(report.subject).status, BookingStatus::Confirmed);

    let confirmed = harness.bookings().get(&renter, booking.id).await.unwrap();
    assert_eq!(confirmed.payment_reference.as_ref(), Some(&fresh.reference));
    assert!(!confirmed.refund_required);
}
