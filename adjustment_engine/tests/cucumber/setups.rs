use adjustment_engine::db_types::{Money, NewOrder};
use cucumber::given;

use crate::cucumber::{adjustment_world::AdjustmentSystem, AdjustmentWorld};

#[given("a fresh install")]
async fn fresh_database(world: &mut AdjustmentWorld) {
    let system = AdjustmentSystem::new().await;
    world.system = Some(system);
}

#[given(expr = "order {word} for team {int} in shop {int} with a marketplace total of {int}")]
async fn existing_order(world: &mut AdjustmentWorld, ref_id: String, team_id: i64, shop_id: i64, total: i64) {
    insert(world, NewOrder::new(ref_id, team_id, shop_id, Money::from(total))).await;
}

#[given(expr = "order {word} for team {int} in shop {int} with a marketplace total of {int} awaiting return {word}")]
async fn order_awaiting_return(
    world: &mut AdjustmentWorld,
    ref_id: String,
    team_id: i64,
    shop_id: i64,
    total: i64,
    return_tx: String,
) {
    let order = NewOrder::new(ref_id, team_id, shop_id, Money::from(total)).with_return_tx_id(return_tx);
    insert(world, order).await;
}

async fn insert(world: &mut AdjustmentWorld, order: NewOrder) {
    let order = world.api().db().insert_order(order).await.expect("Error inserting order");
    world.orders.insert(order.order_ref_id.clone(), order);
}

#[given("the ledger is offline")]
async fn ledger_offline(world: &mut AdjustmentWorld) {
    world.ledger().set_offline(true);
}

#[given("the ledger is back online")]
async fn ledger_online(world: &mut AdjustmentWorld) {
    world.ledger().set_offline(false);
}
