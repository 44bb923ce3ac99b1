// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Expiration sweep: cascade, idempotence and reconciliation.

use chrono::Duration;
use delivery_coordinator::db::{self, collections, Filter};
use delivery_coordinator::models::{OfferStatus, OrderStatus};
use delivery_coordinator::services::NotificationKind;
use serde_json::json;

mod common;
use common::{candidate, create_test_app, PICKUP};

#[tokio::test]
async fn sweep_expires_overdue_and_reoffers() {
    let app = create_test_app();
    app.state
        .assignments
        .dispatch(
            "order-1",
            Some(PICKUP),
            &[candidate("a", 100.0, 4.0, 0), candidate("b", 900.0, 4.0, 0)],
        )
        .await
        .unwrap();

    // Not overdue yet.
    app.clock.advance(Duration::seconds(120));
    assert!(app.state.sweeper.sweep_once().await.is_noop());

    app.clock.advance(Duration::seconds(1));
    let summary = app.state.sweeper.sweep_once().await;
    assert_eq!(summary.expired, 1);
    assert_eq!(summary.reoffered, 1);
    assert!(summary.failures.is_empty());

    let offers = app.state.assignments.offers_for_order("order-1").await.unwrap();
    assert_eq!(offers.len(), 2);
    assert_eq!(offers[0].status, OfferStatus::Expired);
    assert_eq!(offers[1].status, OfferStatus::Pending);
    assert_eq!(offers[1].candidate_id, "b");
    assert_eq!(app.notifier.count(NotificationKind::OfferExpired), 1);
}

#[tokio::test]
async fn second_sweep_is_a_noop() {
    let app = create_test_app();
    app.state
        .assignments
        .dispatch("order-1", Some(PICKUP), &[candidate("a", 100.0, 4.0, 0)])
        .await
        .unwrap();

    app.clock.advance(Duration::seconds(121));
    let first = app.state.sweeper.sweep_once().await;
    assert_eq!(first.expired, 1);
    assert_eq!(first.unassignable, 1);

    let second = app.state.sweeper.sweep_once().await;
    assert!(second.is_noop(), "unexpected work: {second:?}");
    assert_eq!(app.notifier.count(NotificationKind::NoCandidateAvailable), 1);
}

#[tokio::test]
async fn concurrent_sweeps_expire_each_offer_once() {
    let app = create_test_app();
    for order in ["o1", "o2", "o3"] {
        app.state
            .assignments
            .dispatch(
                order,
                Some(PICKUP),
                &[candidate("a", 100.0, 4.0, 0), candidate("b", 900.0, 4.0, 0)],
            )
            .await
            .unwrap();
    }
    app.clock.advance(Duration::seconds(121));

    let (left, right) = tokio::join!(
        app.state.sweeper.sweep_once(),
        app.state.sweeper.sweep_once()
    );
    assert_eq!(left.expired + right.expired, 3);
    assert_eq!(left.reoffered + right.reoffered, 3);

    for order in ["o1", "o2", "o3"] {
        let offers = app.state.assignments.offers_for_order(order).await.unwrap();
        assert_eq!(offers.len(), 2, "order {order} got {} offers", offers.len());
    }
    assert_eq!(app.notifier.count(NotificationKind::OfferExpired), 3);
}

#[tokio::test]
async fn try_sweep_skips_while_running() {
    let app = create_test_app();
    let (a, b) = tokio::join!(app.state.sweeper.try_sweep(), async {
        tokio::task::yield_now().await;
        app.state.sweeper.try_sweep().await
    });
    // At least one pass ran; the runner flag never lets two overlap.
    assert!(a.is_some() || b.is_some());
    assert!(app.state.sweeper.try_sweep().await.is_some());
}

#[tokio::test]
async fn cascade_ends_in_no_candidate_accepted() {
    let app = create_test_app();
    app.state
        .assignments
        .dispatch(
            "order-1",
            Some(PICKUP),
            &[
                candidate("a", 100.0, 4.0, 0),
                candidate("b", 900.0, 4.0, 0),
                candidate("c", 3_000.0, 4.0, 0),
            ],
        )
        .await
        .unwrap();

    for _ in 0..2 {
        app.clock.advance(Duration::seconds(121));
        app.state.sweeper.sweep_once().await;
    }
    let offers = app.state.assignments.offers_for_order("order-1").await.unwrap();
    let pending: Vec<_> = offers
        .iter()
        .filter(|o| o.status == OfferStatus::Pending)
        .collect();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].candidate_id, "c");

    app.clock.advance(Duration::seconds(121));
    app.state.sweeper.sweep_once().await;
    // Nothing left to expire; a further pass must not repeat the terminal event.
    app.clock.advance(Duration::seconds(121));
    app.state.sweeper.sweep_once().await;

    let order = app.state.assignments.order("order-1").await.unwrap();
    assert_eq!(order.status, OrderStatus::NoCandidateAccepted);
    assert_eq!(app.notifier.count(NotificationKind::NoCandidateAvailable), 1);

    let events = app.store.rows(collections::ORDER_HISTORY);
    let kinds: Vec<_> = events
        .iter()
        .filter_map(|row| row["event"].as_str())
        .filter(|event| *event == "no_candidate_accepted")
        .collect();
    assert_eq!(kinds.len(), 1);
}

#[tokio::test]
async fn reconcile_reopens_assigned_order_without_acceptance() {
    let app = create_test_app();
    app.state
        .assignments
        .dispatch("order-1", Some(PICKUP), &[candidate("a", 100.0, 4.0, 0)])
        .await
        .unwrap();

    // Simulate a partial write: order marked assigned, offer still pending.
    db::update_where(
        app.store.as_ref(),
        collections::ORDERS,
        json!({"status": "assigned", "assigned_candidate_id": "a"}),
        &Filter::by_id("order-1"),
    )
    .await
    .unwrap();

    let summary = app.state.sweeper.sweep_once().await;
    assert_eq!(summary.reconciled, 1);

    let order = app.state.assignments.order("order-1").await.unwrap();
    assert_eq!(order.status, OrderStatus::AwaitingAssignment);
    assert_eq!(order.assigned_candidate_id, None);
    assert!(app.state.sweeper.sweep_once().await.is_noop());
}

#[tokio::test]
async fn reconcile_marks_accepted_order_assigned() {
    let app = create_test_app();
    let offer = app
        .state
        .assignments
        .dispatch("order-1", Some(PICKUP), &[candidate("a", 100.0, 4.0, 0)])
        .await
        .unwrap();

    // Offer accepted but the order update was lost.
    db::update_where(
        app.store.as_ref(),
        collections::ASSIGNMENT_OFFERS,
        json!({"status": "accepted"}),
        &Filter::by_id(&offer.id),
    )
    .await
    .unwrap();

    let summary = app.state.sweeper.sweep_once().await;
    assert_eq!(summary.reconciled, 1);

    let order = app.state.assignments.order("order-1").await.unwrap();
    assert_eq!(order.status, OrderStatus::Assigned);
    assert_eq!(order.assigned_candidate_id.as_deref(), Some("a"));
}

#[tokio::test]
async fn sweep_reports_storage_failures() {
    let app = create_test_app();
    app.state
        .assignments
        .dispatch("order-1", Some(PICKUP), &[candidate("a", 100.0, 4.0, 0)])
        .await
        .unwrap();
    app.clock.advance(Duration::seconds(121));

    app.store.set_offline(true);
    let summary = app.state.sweeper.sweep_once().await;
    assert_eq!(summary.expired, 0);
    assert!(!summary.failures.is_empty());

    app.store.set_offline(false);
    let summary = app.state.sweeper.sweep_once().await;
    assert_eq!(summary.expired, 1);
    assert_eq!(summary.unassignable, 1);
}

#[tokio::test]
async fn one_failing_offer_does_not_stop_the_sweep() {
    let app = create_test_app();
    let candidates = [candidate("a", 100.0, 4.0, 0), candidate("b", 900.0, 4.0, 0)];
    let stuck = app
        .state
        .assignments
        .dispatch("order-1", Some(PICKUP), &candidates)
        .await
        .unwrap();
    let other = app
        .state
        .assignments
        .dispatch("order-2", Some(PICKUP), &candidates)
        .await
        .unwrap();

    app.store.fail_row(collections::ASSIGNMENT_OFFERS, &stuck.id);
    app.clock.advance(Duration::seconds(121));
    let summary = app.state.sweeper.sweep_once().await;

    assert_eq!(summary.expired, 1);
    assert_eq!(summary.reoffered, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].stage, "expire");
    assert_eq!(summary.failures[0].item, stuck.id);

    let offers = app.state.assignments.offers_for_order("order-2").await.unwrap();
    assert_eq!(offers[0].id, other.id);
    assert_eq!(offers[0].status, OfferStatus::Expired);
    assert_eq!(offers[1].candidate_id, "b");
    assert_eq!(offers[1].status, OfferStatus::Pending);
    assert_eq!(
        app.state.assignments.offer(&stuck.id).await.unwrap().status,
        OfferStatus::Pending
    );

    // Once the row is writable again the next sweep catches up.
    app.store.heal_row(collections::ASSIGNMENT_OFFERS, &stuck.id);
    let summary = app.state.sweeper.sweep_once().await;
    assert_eq!(summary.expired, 1);
    assert_eq!(summary.reoffered, 1);
    assert!(summary.failures.is_empty());
    let offers = app.state.assignments.offers_for_order("order-1").await.unwrap();
    assert_eq!(offers[1].candidate_id, "b");
}
