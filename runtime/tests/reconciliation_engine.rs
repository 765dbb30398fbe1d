//! Payment reconciliation: unordered, duplicated gateway deliveries.

#![allow(clippy::unwrap_used)]

use seatkeeper_core::error::EngineError;
use seatkeeper_core::notification::NotificationKind;
use seatkeeper_core::settlement::IgnoreReason;
use seatkeeper_core::types::{
    EventId, EventUpdate, Money, PaymentStatus, SeatAllocation, UserId,
};
use seatkeeper_runtime::SettlementOutcome;
use seatkeeper_testing::TestHarness;

async fn checkout(h: &TestHarness, event_id: EventId, quantity: u32, price: u64) -> String {
    h.payments
        .initiate_purchase(
            event_id,
            UserId::new(),
            quantity,
            Money::from_minor(price * u64::from(quantity)),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn checkout_validates_the_request() {
    let h = TestHarness::new();
    let paid = h.paid_event(Some(10), 5_000).await;
    let free = h.free_event(Some(10), false).await;
    let user = UserId::new();

    assert!(matches!(
        h.payments
            .initiate_purchase(paid.id, user, 0, Money::ZERO)
            .await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        h.payments
            .initiate_purchase(paid.id, user, 2, Money::from_minor(5_000))
            .await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        h.payments
            .initiate_purchase(free.id, user, 1, Money::ZERO)
            .await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        h.payments
            .initiate_purchase(EventId::new(), user, 1, Money::from_minor(5_000))
            .await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn unknown_reference_is_not_found() {
    let h = TestHarness::new();
    assert!(matches!(
        h.payments.apply_settlement("skp_missing", "DONE", None).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn unknown_vocabulary_is_rejected_without_changes() {
    let h = TestHarness::new();
    let event = h.paid_event(None, 1_000).await;
    let reference = checkout(&h, event.id, 1, 1_000).await;

    assert!(matches!(
        h.payments
            .apply_settlement(&reference, "PARTIAL_CANCELED", None)
            .await,
        Err(EngineError::InvalidInput(_))
    ));
    let payment = h.payments.payment(&reference).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn failure_then_late_success_allocates_once() {
    let h = TestHarness::new();
    let event = h.paid_event(Some(5), 1_000).await;
    let reference = checkout(&h, event.id, 2, 1_000).await;

    let failed = h
        .payments
        .apply_settlement(&reference, "EXPIRED", None)
        .await
        .unwrap();
    assert_eq!(failed.payment().status, PaymentStatus::Failed);
    assert_eq!(h.attendee_count(event.id), 0);

    let stale = h
        .payments
        .apply_settlement(&reference, "IN_PROGRESS", None)
        .await
        .unwrap();
    assert!(matches!(
        stale,
        SettlementOutcome::Ignored {
            reason: IgnoreReason::Stale,
            ..
        }
    ));

    let late = h
        .payments
        .apply_settlement(&reference, "DONE", Some("tx_9".into()))
        .await
        .unwrap();
    assert_eq!(late.payment().status, PaymentStatus::Completed);
    assert_eq!(h.attendee_count(event.id), 2);

    let cancel_after = h
        .payments
        .apply_settlement(&reference, "CANCELED", None)
        .await
        .unwrap();
    assert!(matches!(
        cancel_after,
        SettlementOutcome::Ignored {
            reason: IgnoreReason::AlreadyCompleted,
            ..
        }
    ));
    assert_eq!(h.attendee_count(event.id), 2);
    h.assert_consistent(event.id).await;
}

#[tokio::test]
async fn settlement_after_sellout_is_flagged_overbooked() {
    let h = TestHarness::new();
    let event = h.paid_event(Some(2), 1_000).await;
    let first = checkout(&h, event.id, 2, 1_000).await;
    let second = checkout(&h, event.id, 1, 1_000).await;

    h.payments.apply_settlement(&first, "PAID", None).await.unwrap();
    let outcome = h
        .payments
        .apply_settlement(&second, "PAID", None)
        .await
        .unwrap();

    assert!(outcome.is_overbooked());
    assert_eq!(outcome.payment().status, PaymentStatus::Completed);
    assert_eq!(outcome.payment().seat_allocation, SeatAllocation::Overbooked);
    assert_eq!(h.attendee_count(event.id), 2);
    assert!(matches!(
        outcome.clone().into_result(),
        Err(EngineError::OverbookedSettlement { quantity: 1, .. })
    ));

    let flagged = h.payments.overbooked_settlements().await.unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].external_reference_id, second);

    // A replay does not re-attempt the seats.
    let replay = h
        .payments
        .apply_settlement(&second, "PAID", None)
        .await
        .unwrap();
    assert!(matches!(replay, SettlementOutcome::Ignored { .. }));

    h.flush().await;
    assert!(h.sink.kinds().contains(&NotificationKind::SettlementOverbooked));
    assert!(
        h.sink
            .kinds_for(event.organizer_id)
            .contains(&NotificationKind::SettlementOverbooked)
    );
    h.assert_consistent(event.id).await;
}

#[tokio::test]
async fn operator_seats_overbooked_payment_after_capacity_grows() {
    let h = TestHarness::new();
    let event = h.paid_event(Some(1), 1_000).await;
    let first = checkout(&h, event.id, 1, 1_000).await;
    let second = checkout(&h, event.id, 1, 1_000).await;
    h.payments.apply_settlement(&first, "DONE", None).await.unwrap();
    h.payments.apply_settlement(&second, "DONE", None).await.unwrap();

    assert!(matches!(
        h.payments.retry_overbooked(&second).await,
        Err(EngineError::OverbookedSettlement { .. })
    ));

    h.catalog
        .edit(
            event.id,
            event.organizer_id,
            EventUpdate {
                capacity: Some(Some(2)),
                ..EventUpdate::default()
            },
        )
        .await
        .unwrap();

    let seated = h.payments.retry_overbooked(&second).await.unwrap();
    assert_eq!(seated.seat_allocation, SeatAllocation::Allocated);
    assert_eq!(h.attendee_count(event.id), 2);
    assert!(h.payments.overbooked_settlements().await.unwrap().is_empty());

    assert!(matches!(
        h.payments.retry_overbooked(&second).await,
        Err(EngineError::InvalidInput(_))
    ));
    h.assert_consistent(event.id).await;
}

#[tokio::test]
async fn operator_releases_overbooked_payment() {
    let h = TestHarness::new();
    let event = h.paid_event(Some(1), 1_000).await;
    let first = checkout(&h, event.id, 1, 1_000).await;
    let second = checkout(&h, event.id, 1, 1_000).await;
    h.payments.apply_settlement(&first, "DONE", None).await.unwrap();
    h.payments.apply_settlement(&second, "DONE", None).await.unwrap();

    let released = h.payments.release_overbooked(&second).await.unwrap();
    assert_eq!(released.seat_allocation, SeatAllocation::Released);
    assert_eq!(released.status, PaymentStatus::Completed);
    assert_eq!(h.attendee_count(event.id), 1);
    assert!(h.payments.overbooked_settlements().await.unwrap().is_empty());

    assert!(matches!(
        h.payments.release_overbooked(&first).await,
        Err(EngineError::InvalidInput(_))
    ));
    h.assert_consistent(event.id).await;
}

#[tokio::test]
async fn lost_settlement_response_does_not_double_allocate() {
    let h = TestHarness::new();
    let event = h.paid_event(Some(10), 1_000).await;
    let reference = checkout(&h, event.id, 3, 1_000).await;
    h.store.lose_next_response("settle", 1);

    let outcome = h
        .payments
        .apply_settlement(&reference, "DONE", None)
        .await
        .unwrap();

    // The retry found the write already applied and reports it as this call's.
    assert!(matches!(outcome, SettlementOutcome::Applied { .. }));
    assert_eq!(outcome.payment().status, PaymentStatus::Completed);
    assert_eq!(outcome.payment().seat_allocation, SeatAllocation::Allocated);
    assert_eq!(h.attendee_count(event.id), 3);
    h.assert_consistent(event.id).await;

    h.flush().await;
    assert!(h.sink.kinds().contains(&NotificationKind::PaymentCompleted));
}

#[tokio::test]
async fn lost_response_on_an_overbooked_settlement_still_flags_it() {
    let h = TestHarness::new();
    let event = h.paid_event(Some(1), 1_000).await;
    let first = checkout(&h, event.id, 1, 1_000).await;
    let second = checkout(&h, event.id, 1, 1_000).await;
    h.payments.apply_settlement(&first, "DONE", None).await.unwrap();

    h.store.lose_next_response("settle", 1);
    let outcome = h
        .payments
        .apply_settlement(&second, "DONE", Some("tx_2".into()))
        .await
        .unwrap();

    assert!(outcome.is_overbooked());
    assert_eq!(outcome.payment().seat_allocation, SeatAllocation::Overbooked);
    assert!(matches!(
        outcome.into_result(),
        Err(EngineError::OverbookedSettlement { quantity: 1, .. })
    ));
    assert_eq!(h.attendee_count(event.id), 1);
    h.assert_consistent(event.id).await;

    h.flush().await;
    assert!(
        h.sink
            .kinds_for(event.organizer_id)
            .contains(&NotificationKind::SettlementOverbooked)
    );
}

#[tokio::test]
async fn replayed_delivery_after_a_lost_response_is_still_ignored() {
    let h = TestHarness::new();
    let event = h.paid_event(Some(10), 1_000).await;
    let reference = checkout(&h, event.id, 2, 1_000).await;
    h.store.lose_next_response("settle", 1);
    h.payments
        .apply_settlement(&reference, "DONE", Some("tx".into()))
        .await
        .unwrap();

    let replay = h
        .payments
        .apply_settlement(&reference, "DONE", Some("tx".into()))
        .await
        .unwrap();

    assert!(matches!(
        replay,
        SettlementOutcome::Ignored {
            reason: IgnoreReason::AlreadyCompleted,
            ..
        }
    ));
    assert_eq!(h.attendee_count(event.id), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_webhooks_move_seats_once() {
    let h = std::sync::Arc::new(TestHarness::new());
    let event = h.paid_event(Some(100), 1_000).await;
    let reference = checkout(&h, event.id, 4, 1_000).await;

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let h = h.clone();
        let reference = reference.clone();
        tasks.push(tokio::spawn(async move {
            h.payments
                .apply_settlement(&reference, "DONE", Some("tx".into()))
                .await
        }));
    }

    let mut applied = 0;
    for task in tasks {
        if let SettlementOutcome::Applied { .. } = task.await.unwrap().unwrap() {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(h.attendee_count(event.id), 4);
    h.assert_consistent(event.id).await;
}
