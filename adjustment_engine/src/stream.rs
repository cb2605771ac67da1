//! Types for stream reconciliation: the fund-set / completion workflow, where a producer sends a sequence of events
//! that must be applied all together or not at all.
//!
//! A stream starts out [`StreamState::Streaming`]. It ends either [`StreamState::Committed`] (the producer finished the
//! stream cleanly) or [`StreamState::Aborted`] (a `Rollback` event, or any error while applying an event). Both end
//! states are terminal. There is no way to commit part of a stream.
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{AdjustmentType, Money, OrderIdentifier};

/// Sets the amount of an order's adjustment of a given type. Keyed on `(order, type)` only: the last write wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentSet {
    pub team_id: i64,
    pub order: OrderIdentifier,
    pub adjustment_type: AdjustmentType,
    pub amount: Money,
    pub at: DateTime<Utc>,
    pub description: String,
}

impl AdjustmentSet {
    /// The usual fund-set event: the marketplace's fund release for an order.
    pub fn order_fund(team_id: i64, order: OrderIdentifier, amount: Money, at: DateTime<Utc>) -> Self {
        Self::new(team_id, order, AdjustmentType::OrderFund, amount, at)
    }

    pub fn new(
        team_id: i64,
        order: OrderIdentifier,
        adjustment_type: AdjustmentType,
        amount: Money,
        at: DateTime<Utc>,
    ) -> Self {
        Self { team_id, order, adjustment_type, amount, at, description: String::default() }
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }
}

/// The marketplace paid out the order. The order is completed and its withdrawal fields stamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSet {
    pub team_id: i64,
    pub order: OrderIdentifier,
    /// The amount withdrawn
    pub amount: Money,
    pub wd_at: DateTime<Utc>,
}

impl CompletedSet {
    pub fn new(team_id: i64, order: OrderIdentifier, amount: Money, wd_at: DateTime<Utc>) -> Self {
        Self { team_id, order, amount, wd_at }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    AdjustmentSet(AdjustmentSet),
    CompletedSet(CompletedSet),
    /// The producer gave up. Everything applied so far is discarded.
    Rollback { message: String },
}

impl StreamEvent {
    pub fn rollback<S: Into<String>>(message: S) -> Self {
        Self::Rollback { message: message.into() }
    }
}

impl From<AdjustmentSet> for StreamEvent {
    fn from(value: AdjustmentSet) -> Self {
        Self::AdjustmentSet(value)
    }
}

impl From<CompletedSet> for StreamEvent {
    fn from(value: CompletedSet) -> Self {
        Self::CompletedSet(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    Streaming,
    Aborted,
    Committed,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Streaming)
    }
}

impl Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamState::Streaming => f.write_str("Streaming"),
            StreamState::Aborted => f.write_str("Aborted"),
            StreamState::Committed => f.write_str("Committed"),
        }
    }
}

/// What a committed stream did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub adjustments_set: usize,
    pub orders_completed: usize,
    /// The ids of every order touched by the stream, in first-seen order
    pub orders: Vec<i64>,
}

impl StreamSummary {
    pub fn events_applied(&self) -> usize {
        self.adjustments_set + self.orders_completed
    }

    pub(crate) fn touch(&mut self, order_id: i64) {
        if !self.orders.contains(&order_id) {
            self.orders.push(order_id);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn summary_tracks_distinct_orders() {
        let mut summary = StreamSummary::default();
        summary.touch(7);
        summary.touch(9);
        summary.touch(7);
        summary.adjustments_set = 2;
        summary.orders_completed = 1;
        assert_eq!(summary.orders, vec![7, 9]);
        assert_eq!(summary.events_applied(), 3);
    }

    #[test]
    fn only_streaming_is_live() {
        assert!(!StreamState::Streaming.is_terminal());
        assert!(StreamState::Aborted.is_terminal());
        assert!(StreamState::Committed.is_terminal());
    }
}
