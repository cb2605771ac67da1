use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db_types::{Adjustment, AdjustmentType, Money, NewAdjustment, Order, OutboxEntry, UpsertState};

/// A single marketplace financial event to be recorded against an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentRequest {
    pub order_id: i64,
    /// The team the caller acts for. Must own the order.
    pub team_id: i64,
    pub shop_id: i64,
    pub adjustment_type: AdjustmentType,
    pub amount: Money,
    pub at: DateTime<Utc>,
    pub fund_at: DateTime<Utc>,
    pub source: String,
    pub description: String,
    pub is_multi_region: bool,
}

impl AdjustmentRequest {
    pub fn new(
        order_id: i64,
        team_id: i64,
        shop_id: i64,
        adjustment_type: AdjustmentType,
        amount: Money,
        at: DateTime<Utc>,
        fund_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            team_id,
            shop_id,
            adjustment_type,
            amount,
            at,
            fund_at,
            source: String::default(),
            description: String::default(),
            is_multi_region: false,
        }
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_source<S: Into<String>>(mut self, source: S) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_multi_region(mut self, is_multi_region: bool) -> Self {
        self.is_multi_region = is_multi_region;
        self
    }

    pub fn with_amount(mut self, amount: Money) -> Self {
        self.amount = amount;
        self
    }

    pub fn new_adjustment(&self) -> NewAdjustment {
        NewAdjustment::new(self.order_id, self.adjustment_type, self.amount, self.at)
            .with_shop_id(self.shop_id)
            .with_fund_at(self.fund_at)
            .with_description(self.description.clone())
            .with_source(self.source.clone())
            .with_multi_region(self.is_multi_region)
    }
}

/// The committed result of a single-event reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationOutcome {
    pub adjustment: Adjustment,
    pub state: UpsertState,
    /// True if this event flipped the order's receivable latch
    pub receivable_created: bool,
    /// The ledger notification queued in the outbox by this event, if any
    pub notification: Option<OutboxEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOutcome {
    pub order: Order,
    /// False if the order's status did not allow completion and was left unchanged
    pub status_changed: bool,
    pub tags_removed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnArrivedOutcome {
    pub order: Order,
    pub notification: Option<OutboxEntry>,
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn request_maps_onto_new_adjustment() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let fund_at = Utc.with_ymd_and_hms(2024, 5, 8, 0, 0, 0).unwrap();
        let req = AdjustmentRequest::new(100, 5, 9, AdjustmentType::Return, Money::from(-50), at, fund_at)
            .with_description("buyer return")
            .with_source("api");
        let adj = req.new_adjustment();
        assert_eq!(adj.order_id, 100);
        assert_eq!(adj.shop_id, 9);
        assert_eq!(adj.fund_at, Some(fund_at));
        assert_eq!(adj.description, "buyer return");
        assert_eq!(adj.source, "api");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevenueChangeOutcome {
    pub order: Order,
    pub previous_total: Money,
    /// `None` if the total was unchanged
    pub notification: Option<OutboxEntry>,
}
