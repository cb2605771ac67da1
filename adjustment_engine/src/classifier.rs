//! Maps internal adjustment types onto the ledger's receivable categories.
//!
//! Two independent questions are answered here:
//! * [`needs_notification`]: does a newly created adjustment of this type have to be reported to the ledger at all?
//! * [`resolve`]: which ledger category does it go into?
//!
//! A type can be in the notify set without having a category. That is deliberate: once a notification has been
//! decided on, failing to classify it is fatal ([`ClassificationError`]) and aborts the enclosing transaction.
use thiserror::Error;

use crate::db_types::{AdjustmentType, LedgerCategory, Money};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Adjustment type {0} has no ledger category mapping")]
pub struct ClassificationError(pub AdjustmentType);

/// Resolves the ledger category for an adjustment of the given type and signed amount.
pub fn resolve(adjustment_type: AdjustmentType, amount: Money) -> Result<LedgerCategory, ClassificationError> {
    use AdjustmentType::*;
    match adjustment_type {
        Return => Ok(LedgerCategory::ReturnCost),
        LostCompensation => Ok(LedgerCategory::RefundLost),
        OrderFund => Ok(LedgerCategory::OrderFund),
        Premium if amount.is_negative() => Ok(LedgerCategory::OtherCost),
        Premium => Ok(LedgerCategory::OtherRevenue),
        t => Err(ClassificationError(t)),
    }
}

/// Whether a newly created adjustment of this type must be reported to the ledger. Edits are always reported,
/// regardless of type.
pub fn needs_notification(adjustment_type: AdjustmentType) -> bool {
    use AdjustmentType::*;
    matches!(adjustment_type, Return | Commission | Compensation | Unknown | UnknownAdjustment | LostCompensation)
}

/// The amount the ledger expects for a category. Cost/revenue categories carry the sign themselves, so they are
/// sent as absolute values; everything else is sent as stored. `None` if the amount has no absolute value.
pub fn ledger_amount(category: LedgerCategory, amount: Money) -> Option<Money> {
    match category {
        LedgerCategory::OtherCost | LedgerCategory::OtherRevenue => amount.checked_abs(),
        _ => Some(amount),
    }
}
