mod support;

use adjustment_engine::{
    db_types::{Actor, ActorType, AdjustmentType, Money, NewOrder, OrderIdentifier, OrderStatusType, RelationFrom},
    stream::{AdjustmentSet, CompletedSet, StreamEvent},
    ReconciliationDatabase,
    ReconciliationError,
};
use futures_util::{stream, StreamExt};
use support::{request, setup, t};
use tokio::time::{timeout, Duration};

const ADMIN: Actor = Actor { id: 1, actor_type: ActorType::Admin };

#[tokio::test]
async fn rollback_discards_the_whole_stream() {
    let sys = setup().await;
    let order = sys.order("7", 5).await;
    let events = vec![
        AdjustmentSet::new(5, OrderIdentifier::Id(order.id), AdjustmentType::Return, Money::from(-30), t(1, 0)).into(),
        StreamEvent::rollback("upstream batch failed"),
    ];
    let err = sys.api.process_stream(stream::iter(events), ADMIN).await.unwrap_err();
    assert!(matches!(&err, ReconciliationError::StreamAbort(m) if m == "upstream batch failed"), "{err}");
    assert!(sys.api.list_adjustments(order.id).await.unwrap().is_empty());
    assert!(sys.api.db().fetch_payment_meta(order.id).await.unwrap().is_none());
}

#[tokio::test]
async fn fund_set_and_completion_commit_together() {
    let sys = setup().await;
    let order = sys.order("MP-2024-001", 5).await;
    let db = sys.api.db();
    db.tag_order(order.id, 10, RelationFrom::Tracking).await.unwrap();
    db.tag_order(order.id, 11, RelationFrom::User).await.unwrap();
    let by_ref = OrderIdentifier::RefId("MP-2024-001".into());
    let events = vec![
        AdjustmentSet::order_fund(5, by_ref.clone(), Money::from(500), t(1, 0)).with_description("fund").into(),
        // Same (order, type), later event: last write wins
        AdjustmentSet::order_fund(5, OrderIdentifier::Id(order.id), Money::from(600), t(2, 0)).into(),
        CompletedSet::new(5, by_ref, Money::from(590), t(3, 0)).into(),
    ];
    let summary = sys.api.process_stream(stream::iter(events), ADMIN).await.unwrap();
    assert_eq!(summary.adjustments_set, 2);
    assert_eq!(summary.orders_completed, 1);
    assert_eq!(summary.orders, vec![order.id]);

    let rows = sys.api.list_adjustments(order.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].adjustment_type, AdjustmentType::OrderFund);
    assert_eq!(rows[0].amount, Money::from(600));
    assert_eq!(rows[0].at, t(2, 0));
    assert_eq!(rows[0].fund_at, Some(t(3, 0)));
    assert_eq!(rows[0].shop_id, order.shop_id);

    let order = db.fetch_order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatusType::Completed);
    assert_eq!(order.wd_total, Money::from(590));
    assert!(order.wd_fund);
    assert_eq!(order.wd_fund_at, Some(t(3, 0)));

    let trail = db.fetch_audit_trail(order.id).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].actor_type, ActorType::Admin);
    let tags = db.fetch_tag_relations(order.id).await.unwrap();
    assert_eq!(tags.iter().map(|t| t.tag_id).collect::<Vec<_>>(), vec![11]);

    // Streams never notify the ledger
    assert!(sys.api.list_outbox(order.id).await.unwrap().is_empty());
    assert_eq!(sys.ledger.attempts(), 0);
}

#[tokio::test]
async fn a_bad_event_aborts_everything_before_it() {
    let sys = setup().await;
    let order = sys.order("good", 5).await;
    let events = vec![
        AdjustmentSet::order_fund(5, OrderIdentifier::Id(order.id), Money::from(500), t(1, 0)).into(),
        CompletedSet::new(5, OrderIdentifier::Id(order.id), Money::from(500), t(2, 0)).into(),
        AdjustmentSet::order_fund(5, OrderIdentifier::RefId("missing".into()), Money::from(1), t(1, 0)).into(),
    ];
    let err = sys.api.process_stream(stream::iter(events), ADMIN).await.unwrap_err();
    assert!(matches!(err, ReconciliationError::Validation(_)), "{err}");
    assert!(sys.api.list_adjustments(order.id).await.unwrap().is_empty());
    let order = sys.api.db().fetch_order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatusType::Created);
    assert!(!order.wd_fund);
    assert!(sys.api.db().fetch_audit_trail(order.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unresolvable_orders() {
    let sys = setup().await;
    let db = sys.api.db();
    let cancelled = db
        .insert_order(NewOrder::new("cancelled", 5, 9, Money::from(100)).with_status(OrderStatusType::Cancelled))
        .await
        .unwrap();
    let no_shop = db.insert_order(NewOrder::new("no-shop", 5, 0, Money::from(100))).await.unwrap();
    let other_team = sys.order("other-team", 6).await;

    for ident in [
        OrderIdentifier::Id(cancelled.id),
        OrderIdentifier::Id(no_shop.id),
        OrderIdentifier::Id(other_team.id),
        OrderIdentifier::Id(0),
        OrderIdentifier::RefId(String::new()),
    ] {
        let events = vec![StreamEvent::from(AdjustmentSet::order_fund(5, ident.clone(), Money::from(1), t(1, 0)))];
        let err = sys.api.process_stream(stream::iter(events), ADMIN).await.unwrap_err();
        assert!(matches!(err, ReconciliationError::Validation(_)), "{ident}: {err}");
    }
}

#[tokio::test]
async fn stream_updates_the_latest_row_of_a_type() {
    let sys = setup().await;
    let order = sys.order("latest", 5).await;
    // Two return rows recorded at different times through the single-event path
    sys.api.apply_adjustment(request(&order, AdjustmentType::Return, -10, t(1, 0))).await.unwrap();
    let second = sys.api.apply_adjustment(request(&order, AdjustmentType::Return, -20, t(2, 0))).await.unwrap();

    let events = vec![StreamEvent::from(AdjustmentSet::new(
        5,
        OrderIdentifier::Id(order.id),
        AdjustmentType::Return,
        Money::from(-25),
        t(2, 0),
    ))];
    sys.api.process_stream(stream::iter(events), ADMIN).await.unwrap();
    let rows = sys.api.list_adjustments(order.id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].amount, Money::from(-10));
    assert_eq!(rows[1].id, second.outcome.adjustment.id);
    assert_eq!(rows[1].amount, Money::from(-25));
}

#[tokio::test]
async fn empty_streams_commit_nothing() {
    let sys = setup().await;
    let summary = sys.api.process_stream(stream::iter(Vec::<StreamEvent>::new()), Actor::system()).await.unwrap();
    assert_eq!(summary.events_applied(), 0);
    assert!(summary.orders.is_empty());
}

#[tokio::test]
async fn a_stream_cancelled_mid_transaction_is_rolled_back() {
    let sys = setup().await;
    let order = sys.order("stalled", 5).await;
    // The producer sends one event and then never finishes
    let events = stream::iter(vec![StreamEvent::from(AdjustmentSet::order_fund(
        5,
        OrderIdentifier::Id(order.id),
        Money::from(500),
        t(1, 0),
    ))])
    .chain(stream::pending());
    let result = timeout(Duration::from_millis(200), sys.api.process_stream(events, ADMIN)).await;
    assert!(result.is_err(), "the stream should still have been open");

    assert!(sys.api.list_adjustments(order.id).await.unwrap().is_empty());
    assert!(sys.api.db().fetch_payment_meta(order.id).await.unwrap().is_none());
    // The write lock went with the abandoned transaction
    let receipt = sys.api.apply_adjustment(request(&order, AdjustmentType::Return, -10, t(2, 0))).await.unwrap();
    assert_eq!(receipt.outcome.adjustment.amount, Money::from(-10));
    assert_eq!(sys.api.list_adjustments(order.id).await.unwrap().len(), 1);
}
