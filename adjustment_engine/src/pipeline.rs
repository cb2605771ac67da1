//! The single-event reconciliation pipeline.
//!
//! Reconciling an adjustment is an ordered list of [`Step`]s run over a shared [`ReconciliationContext`]. Each step
//! reads what earlier steps left in the context, does its work and records its own result. The first failing step
//! aborts the run; the backend then drops its transaction, so no step's writes survive.
//!
//! The steps that touch storage are executed by the backend (see `db::sqlite::pipeline`). The notification decision
//! itself, [`decide`], is pure and lives here so that it can be tested without a database.
use chrono::{DateTime, Duration, Utc};
use log::*;
use serde::Serialize;

use crate::{
    classifier,
    db::traits::{AdjustmentRequest, ReconciliationError},
    db_types::{LedgerCategory, LedgerNotification, Money, Order, OutboxEntry, PaymentMeta, UpsertResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Step {
    /// The order exists and belongs to the request's team; the amount is non-zero.
    ValidateOwnership,
    /// Lock the order's payment meta record and evaluate the receivable latch.
    AcquireGate,
    /// Capture the order's marketplace total before anything is mutated. Only needed for initial creation events.
    SnapshotTotal,
    /// Diff-upsert the adjustment on `(order, at, type)`.
    Upsert,
    /// Initial creation events stamp the order's withdrawal fields.
    StampWithdrawal,
    /// Decide whether (and what) to notify the ledger.
    Decide,
    /// Write the decided notification to the outbox.
    Enqueue,
}

/// The canonical step order for a single adjustment event.
pub const RECONCILIATION_STEPS: [Step; 7] = [
    Step::ValidateOwnership,
    Step::AcquireGate,
    Step::SnapshotTotal,
    Step::Upsert,
    Step::StampWithdrawal,
    Step::Decide,
    Step::Enqueue,
];

/// Everything the pipeline knows about one reconciliation run. Each field is filled in by exactly one step, so the
/// pre- and post-state of any step can be inspected in isolation.
#[derive(Debug, Clone)]
pub struct ReconciliationContext {
    pub request: AdjustmentRequest,
    pub order: Option<Order>,
    pub meta: Option<PaymentMeta>,
    /// True if this run flipped the order's receivable latch
    pub receivable_created: bool,
    pub snapshot_total: Option<Money>,
    pub upsert: Option<UpsertResult>,
    pub decision: Option<LedgerNotification>,
    pub queued: Option<OutboxEntry>,
    pub completed: Vec<Step>,
}

impl ReconciliationContext {
    pub fn new(request: AdjustmentRequest) -> Self {
        Self {
            request,
            order: None,
            meta: None,
            receivable_created: false,
            snapshot_total: None,
            upsert: None,
            decision: None,
            queued: None,
            completed: Vec::with_capacity(RECONCILIATION_STEPS.len()),
        }
    }

    pub fn order(&self, step: Step) -> Result<&Order, ReconciliationError> {
        self.order.as_ref().ok_or(ReconciliationError::StepOutOfOrder(step))
    }

    pub fn upsert(&self, step: Step) -> Result<&UpsertResult, ReconciliationError> {
        self.upsert.as_ref().ok_or(ReconciliationError::StepOutOfOrder(step))
    }
}

/// Checks the parts of a request that can be validated without touching the database.
pub fn validate_request(request: &AdjustmentRequest) -> Result<(), ReconciliationError> {
    if request.amount.is_zero() {
        return Err(ReconciliationError::Validation(format!(
            "Adjustment amount for order {} cannot be zero",
            request.order_id
        )));
    }
    Ok(())
}

/// Checks that `order` is owned by the team making the request.
pub fn validate_ownership(order: &Order, team_id: i64) -> Result<(), ReconciliationError> {
    if order.team_id != team_id {
        warn!("🔀️ Team {team_id} attempted to adjust order {} which belongs to team {}", order.id, order.team_id);
        return Err(ReconciliationError::Validation(format!("Order {} does not belong to team {team_id}", order.id)));
    }
    Ok(())
}

/// How long after its creation an order's estimated revenue may still be corrected.
pub const REVENUE_EDIT_WINDOW_DAYS: i64 = 7;

/// Checks a correction of the order's estimated revenue to `total` at time `now`.
pub fn validate_revenue_change(order: &Order, total: Money, now: DateTime<Utc>) -> Result<(), ReconciliationError> {
    if total.is_negative() {
        return Err(ReconciliationError::Validation(format!("Estimated revenue cannot be negative ({total})")));
    }
    if now - order.created_at > Duration::days(REVENUE_EDIT_WINDOW_DAYS) {
        return Err(ReconciliationError::Validation(format!("Order {} is more than a week old", order.order_ref_id)));
    }
    Ok(())
}

/// Decides which ledger notification, if any, this reconciliation run must produce.
///
/// * The event that flipped the receivable latch produces a `CreatedRevenue` notification of the net receivable
///   impact, `snapshot_total - amount`.
/// * Otherwise, a newly created adjustment of a notify-worthy type, or any edit, produces a standard notification in
///   the category resolved by the classifier. Failing to resolve a category is an error.
/// * Anything else (no-ops, and new rows of types the ledger does not track) produces nothing.
pub fn decide(ctx: &ReconciliationContext) -> Result<Option<LedgerNotification>, ReconciliationError> {
    let upsert = ctx.upsert(Step::Decide)?;
    let order = ctx.order(Step::Decide)?;
    let adj = &upsert.adjustment;
    let req = &ctx.request;
    let description =
        if upsert.pre_existed() { format!("edit of previous entry: {}", adj.description) } else { adj.description.clone() };
    let base = LedgerNotification {
        order_id: order.id,
        team_id: req.team_id,
        shop_id: req.shop_id,
        reference_id: adj.reference_id(),
        amount: adj.amount,
        description,
        category: LedgerCategory::CreatedRevenue,
        event_at: req.at,
        settle_at: Some(req.fund_at),
    };
    if ctx.receivable_created {
        let snapshot = ctx.snapshot_total.ok_or(ReconciliationError::StepOutOfOrder(Step::Decide))?;
        let delta = snapshot.checked_sub(adj.amount).ok_or_else(|| {
            ReconciliationError::Validation(format!(
                "Net receivable impact of {} against a total of {snapshot} is out of range",
                adj.amount
            ))
        })?;
        debug!("🔀️ Order {} receivable created. Net receivable impact is {delta}", order.id);
        return Ok(Some(LedgerNotification {
            reference_id: format!("{}-{}", adj.adjustment_type, adj.id),
            amount: delta,
            ..base
        }));
    }
    use crate::db_types::UpsertState::*;
    let notify = match upsert.state {
        Created => classifier::needs_notification(adj.adjustment_type),
        Edited => true,
        Noop => false,
    };
    if !notify {
        trace!("🔀️ Adjustment {} ({}) needs no ledger notification", adj.id, upsert.state);
        return Ok(None);
    }
    let category = classifier::resolve(adj.adjustment_type, adj.amount)?;
    let amount = classifier::ledger_amount(category, adj.amount).ok_or_else(|| {
        ReconciliationError::Validation(format!("Adjustment amount {} cannot be sent as {category}", adj.amount))
    })?;
    Ok(Some(LedgerNotification { amount, category, ..base }))
}
