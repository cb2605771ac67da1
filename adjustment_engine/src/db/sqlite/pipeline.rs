//! Executes the reconciliation [`Step`]s against a SQLite transaction.
use log::*;
use sqlx::SqliteConnection;

use super::{adjustments, orders, outbox, payment_meta};
use crate::{
    db::traits::ReconciliationError,
    pipeline::{decide, validate_ownership, validate_request, ReconciliationContext, Step, RECONCILIATION_STEPS},
};

/// Runs every step in [`RECONCILIATION_STEPS`] over `ctx`, stopping at the first failure. The caller owns the
/// transaction and decides whether to commit.
pub async fn run(ctx: &mut ReconciliationContext, conn: &mut SqliteConnection) -> Result<(), ReconciliationError> {
    for step in RECONCILIATION_STEPS {
        if let Err(e) = run_step(step, ctx, conn).await {
            debug!("🔀️ Reconciliation of order {} stopped at {step:?}. {e}", ctx.request.order_id);
            return Err(e);
        }
        ctx.completed.push(step);
    }
    Ok(())
}

pub async fn run_step(
    step: Step,
    ctx: &mut ReconciliationContext,
    conn: &mut SqliteConnection,
) -> Result<(), ReconciliationError> {
    match step {
        Step::ValidateOwnership => {
            validate_request(&ctx.request)?;
            let order = orders::fetch_order_by_id(ctx.request.order_id, conn)
                .await?
                .ok_or(ReconciliationError::OrderNotFound(ctx.request.order_id))?;
            validate_ownership(&order, ctx.request.team_id)?;
            ctx.order = Some(order);
        },
        Step::AcquireGate => {
            let order_id = ctx.order(step)?.id;
            let meta = payment_meta::acquire(order_id, conn).await?;
            let (meta, flipped) = payment_meta::latch(meta, ctx.request.adjustment_type, conn).await?;
            ctx.meta = Some(meta);
            ctx.receivable_created = flipped;
        },
        Step::SnapshotTotal => {
            if ctx.receivable_created {
                ctx.snapshot_total = Some(ctx.order(step)?.mp_total);
            }
        },
        Step::Upsert => {
            ctx.order(step)?;
            let result = adjustments::upsert(ctx.request.new_adjustment(), conn).await?;
            ctx.upsert = Some(result);
        },
        Step::StampWithdrawal => {
            if ctx.receivable_created {
                let adj = &ctx.upsert(step)?.adjustment;
                let order = orders::stamp_withdrawal(adj.order_id, adj.amount, adj.fund_at, conn).await?;
                ctx.order = Some(order);
            }
        },
        Step::Decide => {
            ctx.decision = decide(ctx)?;
        },
        Step::Enqueue => {
            if let Some(notification) = ctx.decision.clone() {
                ctx.queued = Some(outbox::enqueue(notification, conn).await?);
            }
        },
    }
    Ok(())
}
