use adjustment_engine::{
    db_types::{Actor, AdjustmentType, LedgerCategory, Money, OrderIdentifier, OrderStatusType, OutboxStatus},
    stream::{AdjustmentSet, CompletedSet, StreamEvent},
    AdjustmentRequest,
    ReconciliationDatabase,
};
use cucumber::{gherkin::Step, then, when};
use futures_util::stream;

use crate::cucumber::{
    adjustment_world::{day, error_kind},
    AdjustmentWorld,
};

fn adjustment_type(s: &str) -> AdjustmentType {
    s.parse().unwrap_or_else(|_| panic!("{s} is not an adjustment type"))
}

#[when(expr = "team {int} reports a {word} of {int} for order {word} on day {int}")]
async fn report_adjustment(world: &mut AdjustmentWorld, team_id: i64, kind: String, amount: i64, ref_id: String, d: u32) {
    let order = world.order(&ref_id);
    let adjustment_type = adjustment_type(&kind);
    let request = AdjustmentRequest::new(
        order.id,
        team_id,
        order.shop_id,
        adjustment_type,
        Money::from(amount),
        day(d),
        day(28),
    )
    .with_description(format!("{kind} reported by the marketplace"))
    .with_source("cucumber");
    let result = world.api().apply_adjustment(request).await;
    world.record(result);
}

#[when(expr = "returned goods arrive for return {word}")]
async fn returned_goods_arrive(world: &mut AdjustmentWorld, return_tx: String) {
    let result = world.api().return_arrived(&return_tx, Actor::system()).await;
    world.record(result);
}

#[when(expr = "team {int} completes order {word}")]
async fn complete_order(world: &mut AdjustmentWorld, team_id: i64, ref_id: String) {
    let order_id = world.order(&ref_id).id;
    let result = world.api().complete_order(order_id, team_id, Actor::system()).await;
    world.record(result);
}

#[when(expr = "team {int} deletes the {word} adjustment on order {word}")]
async fn delete_adjustment(world: &mut AdjustmentWorld, team_id: i64, kind: String, ref_id: String) {
    let order_id = world.order(&ref_id).id;
    let adjustment_type = adjustment_type(&kind);
    let rows = world.api().list_adjustments(order_id).await.expect("Error fetching adjustments");
    let adj = rows.iter().rev().find(|a| a.adjustment_type == adjustment_type).expect("No adjustment of that type");
    let result = world.api().delete_adjustment(adj.id, team_id).await;
    world.record(result);
}

#[when(expr = "team {int} changes the estimated revenue of order {word} to {int}")]
async fn change_estimated_revenue(world: &mut AdjustmentWorld, team_id: i64, ref_id: String, total: i64) {
    let order_id = world.order(&ref_id).id;
    let result = world.api().change_estimated_revenue(order_id, team_id, Money::from(total)).await;
    world.record(result);
}

#[when("the outbox sweep runs")]
async fn outbox_sweep(world: &mut AdjustmentWorld) {
    let result = world.api().drain_all_pending().await;
    world.record(result);
}

// | event    | order | type      | amount | day |
// | set      | MP-1  | OrderFund | 500    | 1   |
// | complete | MP-1  |           | 490    | 3   |
// | rollback |       |           |        |     |
#[when(expr = "a stream for team {int} arrives with")]
async fn stream_arrives(world: &mut AdjustmentWorld, team_id: i64, step: &Step) {
    let table = step.table.as_ref().expect("The stream needs a table of events");
    let events = table
        .rows
        .iter()
        .skip(1)
        .map(|row| {
            let order = OrderIdentifier::RefId(row[1].clone());
            let amount = || Money::from(row[3].parse::<i64>().expect("Amount is not a number"));
            let at = || day(row[4].parse().expect("Day is not a number"));
            match row[0].as_str() {
                "set" => AdjustmentSet::new(team_id, order, adjustment_type(&row[2]), amount(), at()).into(),
                "complete" => CompletedSet::new(team_id, order, amount(), at()).into(),
                "rollback" => StreamEvent::rollback("producer gave up"),
                e => panic!("Unknown stream event {e}"),
            }
        })
        .collect::<Vec<StreamEvent>>();
    let result = world.api().process_stream(stream::iter(events), Actor::system()).await;
    world.record(result);
}

#[then("the operation succeeds")]
async fn operation_succeeds(world: &mut AdjustmentWorld) {
    if let Some(e) = &world.last_error {
        panic!("Expected success, but got {e}");
    }
}

#[then(expr = "the operation fails with a(n) {word} error")]
async fn operation_fails(world: &mut AdjustmentWorld, kind: String) {
    let err = world.last_error.as_ref().expect("Expected the operation to fail");
    assert_eq!(error_kind(err), kind, "Unexpected error: {err}");
}

#[then(expr = "order {word} has {int} adjustment(s)")]
async fn adjustment_count(world: &mut AdjustmentWorld, ref_id: String, count: usize) {
    let order_id = world.order(&ref_id).id;
    let rows = world.api().list_adjustments(order_id).await.expect("Error fetching adjustments");
    assert_eq!(rows.len(), count, "Adjustments: {rows:?}");
}

#[then(expr = "the {word} adjustment on order {word} is {int}")]
async fn adjustment_amount(world: &mut AdjustmentWorld, kind: String, ref_id: String, amount: i64) {
    let order_id = world.order(&ref_id).id;
    let adjustment_type = adjustment_type(&kind);
    let rows = world.api().list_adjustments(order_id).await.expect("Error fetching adjustments");
    let adj = rows.iter().rev().find(|a| a.adjustment_type == adjustment_type).expect("No adjustment of that type");
    assert_eq!(adj.amount, Money::from(amount));
}

#[then(expr = "the ledger has received {int} notification(s)")]
async fn ledger_count(world: &mut AdjustmentWorld, count: usize) {
    assert_eq!(world.ledger().submission_count(), count, "Submissions: {:?}", world.ledger().submissions());
}

#[then(expr = "ledger notification {int} is {word} for {int}")]
async fn ledger_notification(world: &mut AdjustmentWorld, n: usize, category: String, amount: i64) {
    let submissions = world.ledger().submissions();
    let notification = submissions.get(n - 1).unwrap_or_else(|| panic!("Only {} notifications", submissions.len()));
    let category: LedgerCategory = category.parse().expect("Not a ledger category");
    assert_eq!(notification.category, category);
    assert_eq!(notification.amount, Money::from(amount));
}

#[then(expr = "order {word} has {int} undelivered notification(s)")]
async fn undelivered(world: &mut AdjustmentWorld, ref_id: String, count: usize) {
    let order_id = world.order(&ref_id).id;
    let entries = world.api().list_outbox(order_id).await.expect("Error fetching outbox");
    let pending = entries.iter().filter(|e| e.status != OutboxStatus::Delivered).count();
    assert_eq!(pending, count, "Outbox: {entries:?}");
}

#[then(expr = "the receivable for order {word} has been created")]
async fn receivable_created(world: &mut AdjustmentWorld, ref_id: String) {
    let order_id = world.order(&ref_id).id;
    let meta = world.api().db().fetch_payment_meta(order_id).await.expect("Error fetching payment meta");
    assert!(meta.is_some_and(|m| m.receivable_adjusted), "Receivable was not created");
}

#[then(expr = "order {word} has status {word}")]
async fn order_status(world: &mut AdjustmentWorld, ref_id: String, status: String) {
    let order_id = world.order(&ref_id).id;
    let order = world.api().db().fetch_order(order_id).await.expect("Error fetching order").expect("Order is gone");
    let status: OrderStatusType = status.parse().expect("Not an order status");
    assert_eq!(order.status, status);
}

#[then(expr = "order {word} has an estimated revenue of {int}")]
async fn order_estimated_revenue(world: &mut AdjustmentWorld, ref_id: String, total: i64) {
    let order_id = world.order(&ref_id).id;
    let order = world.api().db().fetch_order(order_id).await.expect("Error fetching order").expect("Order is gone");
    assert_eq!(order.mp_total, Money::from(total));
}

#[then(expr = "order {word} has a withdrawal of {int} on day {int}")]
async fn order_withdrawal(world: &mut AdjustmentWorld, ref_id: String, amount: i64, d: u32) {
    let order_id = world.order(&ref_id).id;
    let order = world.api().db().fetch_order(order_id).await.expect("Error fetching order").expect("Order is gone");
    assert!(order.wd_fund);
    assert_eq!(order.wd_total, Money::from(amount));
    assert_eq!(order.wd_fund_at, Some(day(d)));
}
