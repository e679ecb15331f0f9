//! Group bookings: shares, per-participant payments, readiness and owner confirmation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use rental_core::booking::CancellationReason;
use rental_core::context::RequestContext;
use rental_core::equipment::Equipment;
use rental_core::error::RentalError;
use rental_core::group::{GroupEvent, GroupStatus};
use rental_core::payment::{FailureReason, PaymentOutcome, PaymentStatus};
use rental_core::types::{GroupBookingId, Money};
use rental_runtime::{DomainEvent, GroupView, SettledSubject, VerificationReport};
use rental_testing::{fixtures, TestHarness};

struct Scenario {
    harness: TestHarness,
    equipment: Equipment,
    organizer: RequestContext,
    group_id: GroupBookingId,
}

/// 1000/day for three days (total 3000) with `slots` slots
async fn scenario(slots: u32) -> Scenario {
    let harness = TestHarness::new();
    let equipment = harness.add_equipment(1000).await;
    let organizer = fixtures::renter();
    let view = harness
        .groups()
        .create(&organizer, equipment.id, fixtures::range("2024-06-01", "2024-06-03"), slots)
        .await
        .unwrap();
    Scenario {
        group_id: view.state.group.id,
        harness,
        equipment,
        organizer,
    }
}

fn group_of(report: VerificationReport) -> (GroupView, bool) {
    match report.subject {
        SettledSubject::Group { group, ready } => (group.into(), ready),
        SettledSubject::Booking { .. } => panic!("expected a group subject"),
    }
}

fn ready_events(harness: &TestHarness) -> usize {
    harness.events.count(|e| {
        matches!(
            e,
            DomainEvent::Group {
                event: GroupEvent::Ready,
                ..
            }
        )
    })
}

#[tokio::test]
async fn test_create_holds_the_range() {
    let s = scenario(3).await;
    let view = s.harness.groups().get(s.group_id).await.unwrap();
    assert_eq!(view.state.group.status, GroupStatus::Collecting);
    assert_eq!(view.state.group.total_price, Money::from_minor(3000));
    assert_eq!(view.state.group.organizer_id, s.organizer.user_id());
    assert!(!view.ready);

    let err = s
        .harness
        .bookings()
        .create(&fixtures::renter(), s.equipment.id, fixtures::range("2024-06-02", "2024-06-02"))
        .await
        .unwrap_err();
    assert!(matches!(err, RentalError::Conflict { .. }));
}

#[tokio::test]
async fn test_partial_payment_then_retry_reaches_ready_and_confirms() {
    let s = scenario(3).await;
    let groups = s.harness.groups();
    let verifier = s.harness.verifier();
    let (a, b, c) = (fixtures::renter(), fixtures::renter(), fixtures::renter());

    let mut checkouts = Vec::new();
    for payer in [&a, &b, &c] {
        let joined = groups.join(payer, s.group_id, Money::from_minor(1000)).await.unwrap();
        checkouts.push(joined.checkout.unwrap());
    }

    s.harness.gateway.succeed(&checkouts[0].reference);
    s.harness.gateway.succeed(&checkouts[1].reference);
    s.harness.gateway.decline(&checkouts[2].reference, "Declined");

    for checkout in &checkouts {
        let (view, ready) = group_of(verifier.verify(&checkout.reference).await.unwrap());
        assert!(!ready);
        assert_eq!(view.state.group.status, GroupStatus::Collecting);
    }
    let view = groups.get(s.group_id).await.unwrap();
    let failed = view.state.participant_for(c.user_id()).unwrap();
    assert_eq!(failed.payment_status, Some(PaymentStatus::Failed));

    let retry = groups.retry_payment(&c, s.group_id, c.user_id()).await.unwrap();
    assert_ne!(retry.reference, checkouts[2].reference);
    s.harness.gateway.succeed(&retry.reference);

    let (view, ready) = group_of(verifier.verify(&retry.reference).await.unwrap());
    assert!(ready);
    assert_eq!(view.state.group.status, GroupStatus::Ready);
    assert_eq!(ready_events(&s.harness), 1);

    // Replaying a settled verification does not fire readiness again
    verifier.verify(&checkouts[0].reference).await.unwrap();
    assert_eq!(ready_events(&s.harness), 1);

    let confirmed = groups
        .confirm_by_owner(&fixtures::owner(&s.equipment), s.group_id)
        .await
        .unwrap();
    assert_eq!(confirmed.state.group.status, GroupStatus::Confirmed);
}

#[tokio::test]
async fn test_group_is_ready_once_every_participant_paid_below_total() {
    let s = scenario(2).await;
    let groups = s.harness.groups();
    let verifier = s.harness.verifier();

    for payer in [fixtures::renter(), fixtures::renter()] {
        let joined = groups.join(&payer, s.group_id, Money::from_minor(1000)).await.unwrap();
        let checkout = joined.checkout.unwrap();
        s.harness.gateway.succeed(&checkout.reference);
        verifier.verify(&checkout.reference).await.unwrap();
    }

    let view = groups.get(s.group_id).await.unwrap();
    assert!(view.state.participants.iter().all(|p| p.has_paid()));
    assert_eq!(view.state.committed(), Some(Money::from_minor(2000)));
    assert!(view.ready);
    assert_eq!(view.state.group.status, GroupStatus::Ready);
    assert_eq!(ready_events(&s.harness), 1);

    let confirmed = groups
        .confirm_by_owner(&fixtures::owner(&s.equipment), s.group_id)
        .await
        .unwrap();
    assert_eq!(confirmed.state.group.status, GroupStatus::Confirmed);
}

#[tokio::test]
async fn test_capture_on_lapsed_checkout_is_credited_before_retry() {
    let s = scenario(1).await;
    let groups = s.harness.groups();
    let payer = fixtures::renter();
    let old = groups
        .join(&payer, s.group_id, Money::from_minor(3000))
        .await
        .unwrap()
        .checkout
        .unwrap();

    s.harness.clock.advance(chrono::Duration::minutes(31));
    s.harness.gateway.succeed(&old.reference);

    let err = groups
        .retry_payment(&payer, s.group_id, payer.user_id())
        .await
        .unwrap_err();
    assert!(matches!(err, RentalError::GroupClosed { status: "ready", .. }));
    assert_eq!(s.harness.gateway.initialize_calls(), 1);

    let view = groups.get(s.group_id).await.unwrap();
    let participant = view.state.participant_for(payer.user_id()).unwrap();
    assert_eq!(participant.payment_reference.as_ref(), Some(&old.reference));
    assert_eq!(participant.payment_status, Some(PaymentStatus::Verified));
    assert!(view.ready);
    assert_eq!(view.state.group.status, GroupStatus::Ready);

    let report = s.harness.verifier().verify(&old.reference).await.unwrap();
    assert!(matches!(report.outcome, PaymentOutcome::Verified { .. }));
    assert_eq!(ready_events(&s.harness), 1);
}

#[tokio::test]
async fn test_retry_after_lapse_never_leaves_two_open_attempts() {
    let s = scenario(1).await;
    let groups = s.harness.groups();
    let verifier = s.harness.verifier();
    let payer = fixtures::renter();
    let old = groups
        .join(&payer, s.group_id, Money::from_minor(3000))
        .await
        .unwrap()
        .checkout
        .unwrap();

    s.harness.clock.advance(chrono::Duration::minutes(31));
    let retry = groups.retry_payment(&payer, s.group_id, payer.user_id()).await.unwrap();
    assert_ne!(retry.reference, old.reference);

    let open: Vec<_> = s
        .harness
        .store
        .payments()
        .await
        .into_iter()
        .filter(|p| p.status == PaymentStatus::Initiated)
        .collect();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].reference, retry.reference);

    let report = verifier.verify(&old.reference).await.unwrap();
    assert!(matches!(
        report.outcome,
        PaymentOutcome::Failed { reason: FailureReason::Expired }
    ));

    s.harness.gateway.succeed(&retry.reference);
    let (view, ready) = group_of(verifier.verify(&retry.reference).await.unwrap());
    assert!(ready);
    let participant = view.state.participant_for(payer.user_id()).unwrap();
    assert_eq!(participant.payment_reference.as_ref(), Some(&retry.reference));
    assert!(!participant.refund_required);
}

#[tokio::test]
async fn test_lapsed_checkout_does_not_block_removal() {
    let s = scenario(3).await;
    let groups = s.harness.groups();
    let (gone, captured, waiting) = (fixtures::renter(), fixtures::renter(), fixtures::renter());
    groups.join(&gone, s.group_id, Money::from_minor(1000)).await.unwrap();
    groups.join(&waiting, s.group_id, Money::from_minor(1000)).await.unwrap();
    let captured_checkout = groups
        .join(&captured, s.group_id, Money::from_minor(1000))
        .await
        .unwrap()
        .checkout
        .unwrap();

    s.harness.clock.advance(chrono::Duration::minutes(31));

    let view = groups
        .remove_participant(&s.organizer, s.group_id, gone.user_id())
        .await
        .unwrap();
    assert!(view.state.participant_for(gone.user_id()).is_none());

    s.harness.gateway.succeed(&captured_checkout.reference);
    let err = groups
        .remove_participant(&captured, s.group_id, captured.user_id())
        .await
        .unwrap_err();
    assert!(matches!(err, RentalError::InvalidTransition { from: "paid", .. }));

    let view = groups.get(s.group_id).await.unwrap();
    assert_eq!(view.state.participants.len(), 2);
    assert!(view.state.participant_for(captured.user_id()).unwrap().has_paid());
    assert!(!view.ready);
}

#[tokio::test]
async fn test_join_guards() {
    let s = scenario(2).await;
    let groups = s.harness.groups();
    let first = fixtures::renter();

    groups.join(&first, s.group_id, Money::from_minor(2500)).await.unwrap();

    let err = groups.join(&first, s.group_id, Money::from_minor(100)).await.unwrap_err();
    assert!(matches!(err, RentalError::DuplicateParticipant { .. }));

    let err = groups
        .join(&fixtures::renter(), s.group_id, Money::from_minor(1000))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RentalError::OverCommitted { committed, .. } if committed == Money::from_minor(2500)
    ));

    let err = groups
        .join(&fixtures::renter(), s.group_id, Money::from_minor(0))
        .await
        .unwrap_err();
    assert!(matches!(err, RentalError::InvalidAmount(_)));

    groups.join(&fixtures::renter(), s.group_id, Money::from_minor(500)).await.unwrap();
    let err = groups
        .join(&fixtures::renter(), s.group_id, Money::from_minor(1))
        .await
        .unwrap_err();
    assert!(matches!(err, RentalError::GroupFull { slots: 2, .. }));

    let view = groups.get(s.group_id).await.unwrap();
    assert_eq!(view.state.participants.len(), 2);
}

#[tokio::test]
async fn test_join_survives_gateway_outage() {
    let s = scenario(3).await;
    let groups = s.harness.groups();
    let payer = fixtures::renter();
    for _ in 0..3 {
        s.harness
            .gateway
            .fail_next_initialize(rental_core::gateway::GatewayError::Unavailable("down".into()));
    }

    let joined = groups.join(&payer, s.group_id, Money::from_minor(1000)).await.unwrap();
    assert!(joined.checkout.is_none());
    assert!(joined.group.state.participant_for(payer.user_id()).is_some());

    let checkout = groups.retry_payment(&payer, s.group_id, payer.user_id()).await.unwrap();
    assert_eq!(checkout.amount, Money::from_minor(1000));
}

#[tokio::test]
async fn test_remove_participant_rules() {
    let s = scenario(3).await;
    let groups = s.harness.groups();
    let verifier = s.harness.verifier();
    let (payer, stranger) = (fixtures::renter(), fixtures::renter());

    let checkout = groups
        .join(&payer, s.group_id, Money::from_minor(1000))
        .await
        .unwrap()
        .checkout
        .unwrap();

    let err = groups
        .remove_participant(&payer, s.group_id, payer.user_id())
        .await
        .unwrap_err();
    assert!(matches!(err, RentalError::InvalidTransition { from: "payment_in_progress", .. }));

    let err = groups
        .remove_participant(&stranger, s.group_id, payer.user_id())
        .await
        .unwrap_err();
    assert!(matches!(err, RentalError::Forbidden(_)));

    s.harness.gateway.decline(&checkout.reference, "Declined");
    verifier.verify(&checkout.reference).await.unwrap();

    let view = groups
        .remove_participant(&s.organizer, s.group_id, payer.user_id())
        .await
        .unwrap();
    assert!(view.state.participants.is_empty());
}

#[tokio::test]
async fn test_paid_participant_cannot_leave() {
    let s = scenario(3).await;
    let groups = s.harness.groups();
    let payer = fixtures::renter();
    let checkout = groups
        .join(&payer, s.group_id, Money::from_minor(1000))
        .await
        .unwrap()
        .checkout
        .unwrap();
    s.harness.gateway.succeed(&checkout.reference);
    s.harness.verifier().verify(&checkout.reference).await.unwrap();

    let err = groups
        .remove_participant(&payer, s.group_id, payer.user_id())
        .await
        .unwrap_err();
    assert!(matches!(err, RentalError::InvalidTransition { from: "paid", .. }));
}

#[tokio::test]
async fn test_participant_pays_only_their_own_share() {
    let s = scenario(3).await;
    let groups = s.harness.groups();
    let payer = fixtures::renter();
    groups.join(&payer, s.group_id, Money::from_minor(1000)).await.unwrap();

    let err = groups
        .retry_payment(&fixtures::renter(), s.group_id, payer.user_id())
        .await
        .unwrap_err();
    assert!(matches!(err, RentalError::Forbidden(_)));
}

#[tokio::test]
async fn test_owner_confirmation_requires_ready_and_ownership() {
    let s = scenario(1).await;
    let groups = s.harness.groups();

    let err = groups
        .confirm_by_owner(&fixtures::owner(&s.equipment), s.group_id)
        .await
        .unwrap_err();
    assert!(matches!(err, RentalError::InvalidTransition { from: "collecting", .. }));

    let payer = fixtures::renter();
    let checkout = groups
        .join(&payer, s.group_id, Money::from_minor(3000))
        .await
        .unwrap()
        .checkout
        .unwrap();
    s.harness.gateway.succeed(&checkout.reference);
    s.harness.verifier().verify(&checkout.reference).await.unwrap();

    let err = groups.confirm_by_owner(&s.organizer, s.group_id).await.unwrap_err();
    assert!(matches!(err, RentalError::Forbidden(_)));
}

#[tokio::test]
async fn test_confirmation_conflict_cancels_and_flags_every_payer() {
    let s = scenario(2).await;
    let groups = s.harness.groups();
    let verifier = s.harness.verifier();

    for payer in [fixtures::renter(), fixtures::renter()] {
        let checkout = groups
            .join(&payer, s.group_id, Money::from_minor(1500))
            .await
            .unwrap()
            .checkout
            .unwrap();
        s.harness.gateway.succeed(&checkout.reference);
        verifier.verify(&checkout.reference).await.unwrap();
    }
    assert!(groups.get(s.group_id).await.unwrap().ready);

    s.harness.store.set_equipment_available(s.equipment.id, false).await;
    let view = groups
        .confirm_by_owner(&fixtures::owner(&s.equipment), s.group_id)
        .await
        .unwrap();
    assert_eq!(view.state.group.status, GroupStatus::Cancelled);
    assert_eq!(view.state.group.cancellation, Some(CancellationReason::PostPaymentConflict));
    assert!(view.state.participants.iter().all(|p| p.refund_required));
}

#[tokio::test]
async fn test_cancel_flags_paid_participants_and_late_captures() {
    let s = scenario(3).await;
    let groups = s.harness.groups();
    let verifier = s.harness.verifier();
    let (paid, late) = (fixtures::renter(), fixtures::renter());

    let paid_checkout = groups
        .join(&paid, s.group_id, Money::from_minor(1000))
        .await
        .unwrap()
        .checkout
        .unwrap();
    let late_checkout = groups
        .join(&late, s.group_id, Money::from_minor(1000))
        .await
        .unwrap()
        .checkout
        .unwrap();
    s.harness.gateway.succeed(&paid_checkout.reference);
    verifier.verify(&paid_checkout.reference).await.unwrap();

    let err = groups.cancel(&fixtures::renter(), s.group_id).await.unwrap_err();
    assert!(matches!(err, RentalError::Forbidden(_)));

    let view = groups.cancel(&s.organizer, s.group_id).await.unwrap();
    assert_eq!(view.state.group.cancellation, Some(CancellationReason::RequestedByOrganizer));
    assert!(view.state.participant_for(paid.user_id()).unwrap().refund_required);
    assert!(!view.state.participant_for(late.user_id()).unwrap().refund_required);

    s.harness.gateway.succeed(&late_checkout.reference);
    let report = verifier.verify(&late_checkout.reference).await.unwrap();
    assert!(matches!(report.outcome, PaymentOutcome::Verified { .. }));
    let (view, ready) = group_of(report);
    assert!(!ready);
    let participant = view.state.participant_for(late.user_id()).unwrap();
    assert_eq!(participant.payment_status, Some(PaymentStatus::Verified));
    assert!(participant.refund_required);

    let err = groups.cancel(&s.organizer, s.group_id).await.unwrap_err();
    assert!(matches!(err, RentalError::InvalidTransition { from: "cancelled", .. }));
}

#[tokio::test]
async fn test_owner_can_cancel() {
    let s = scenario(3).await;
    let view = s
        .harness
        .groups()
        .cancel(&fixtures::owner(&s.equipment), s.group_id)
        .await
        .unwrap();
    assert_eq!(view.state.group.cancellation, Some(CancellationReason::RequestedByOwner));
}

#[tokio::test]
async fn test_collecting_group_expires_after_deadline() {
    let s = scenario(3).await;
    let groups = s.harness.groups();
    let payer = fixtures::renter();
    let checkout = groups
        .join(&payer, s.group_id, Money::from_minor(1000))
        .await
        .unwrap()
        .checkout
        .unwrap();
    s.harness.gateway.succeed(&checkout.reference);
    s.harness.verifier().verify(&checkout.reference).await.unwrap();
    groups.join(&fixtures::renter(), s.group_id, Money::from_minor(1000)).await.unwrap();

    s.harness.clock.advance(chrono::Duration::hours(49));
    let err = groups
        .join(&fixtures::renter(), s.group_id, Money::from_minor(1000))
        .await
        .unwrap_err();
    assert!(matches!(err, RentalError::GroupClosed { status: "expired", .. }));

    let view = groups.get(s.group_id).await.unwrap();
    assert_eq!(view.state.group.status, GroupStatus::Expired);
    assert!(view.state.participant_for(payer.user_id()).unwrap().refund_required);
}

#[tokio::test]
async fn test_ready_group_does_not_expire() {
    let s = scenario(1).await;
    let groups = s.harness.groups();
    let payer = fixtures::renter();
    let checkout = groups
        .join(&payer, s.group_id, Money::from_minor(3000))
        .await
        .unwrap()
        .checkout
        .unwrap();
    s.harness.gateway.succeed(&checkout.reference);
    s.harness.verifier().verify(&checkout.reference).await.unwrap();

    s.harness.clock.advance(chrono::Duration::days(7));
    let view = groups.get(s.group_id).await.unwrap();
    assert_eq!(view.state.group.status, GroupStatus::Ready);
}
