//! Data types shared between the database backends and the public reconciliation API.
use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
pub use oms_common::Money;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid value for {kind}: {value}")]
pub struct ConversionError {
    pub kind: &'static str,
    pub value: String,
}

impl ConversionError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}

/// Generates `Display`, `FromStr` and a lenient `From<String>` for the plain text enums stored in the database.
/// The string form is always the variant name.
macro_rules! text_enum {
    ($name:ident, $fallback:ident, [$($variant:ident),+ $(,)?]) => {
        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str(stringify!($variant)),)+
                }
            }
        }

        impl FromStr for $name {
            type Err = ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok(Self::$variant),)+
                    s => Err(ConversionError::new(stringify!($name), s)),
                }
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                value.parse().unwrap_or_else(|_| {
                    error!("Invalid {}: {value}. But this conversion cannot fail. Defaulting to {}",
                        stringify!($name), stringify!($fallback));
                    Self::$fallback
                })
            }
        }
    };
}

//--------------------------------------   OrderStatusType     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OrderStatusType {
    /// The order has been placed on the marketplace.
    Created,
    /// The order is being picked and packed.
    Processing,
    /// The order has left the warehouse.
    Shipped,
    /// The marketplace has released the funds and the order is closed.
    Completed,
    /// The order was cancelled before shipping.
    Cancelled,
    /// The buyer returned the goods.
    Return,
    /// A return is disputed or lost.
    ReturnProblem,
    /// Returned goods were accepted back into the warehouse.
    ReturnCompleted,
}

text_enum!(OrderStatusType, Created, [
    Created,
    Processing,
    Shipped,
    Completed,
    Cancelled,
    Return,
    ReturnProblem,
    ReturnCompleted
]);

impl OrderStatusType {
    /// Statuses from which an order may no longer be marked as completed.
    pub fn blocks_completion(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::ReturnProblem)
    }
}

//--------------------------------------        Order          ---------------------------------------------------------
/// The slice of an order that the reconciliation engine reads and writes. Orders are created and owned by the order
/// service; the engine only reads team, shop and total, and writes the withdrawal fields and completion status.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Order {
    pub id: i64,
    /// The marketplace's own reference for the order
    pub order_ref_id: String,
    pub team_id: i64,
    /// Marketplace shop reference. Zero means the shop has not been set.
    pub shop_id: i64,
    pub status: OrderStatusType,
    /// The order total as reported by the marketplace
    pub mp_total: Money,
    pub wd_total: Money,
    pub wd_fund: bool,
    pub wd_fund_at: Option<DateTime<Utc>>,
    pub inventory_return_tx_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------       NewOrder        ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_ref_id: String,
    pub team_id: i64,
    pub shop_id: i64,
    pub status: OrderStatusType,
    pub mp_total: Money,
    pub inventory_return_tx_id: Option<String>,
}

impl NewOrder {
    pub fn new<S: Into<String>>(order_ref_id: S, team_id: i64, shop_id: i64, mp_total: Money) -> Self {
        Self {
            order_ref_id: order_ref_id.into(),
            team_id,
            shop_id,
            status: OrderStatusType::Created,
            mp_total,
            inventory_return_tx_id: None,
        }
    }

    pub fn with_status(mut self, status: OrderStatusType) -> Self {
        self.status = status;
        self
    }

    pub fn with_return_tx_id<S: Into<String>>(mut self, tx_id: S) -> Self {
        self.inventory_return_tx_id = Some(tx_id.into());
        self
    }
}

//--------------------------------------   OrderIdentifier     ---------------------------------------------------------
/// How an inbound event refers to an order. Either form is always scoped to a team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderIdentifier {
    Id(i64),
    RefId(String),
}

impl Display for OrderIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderIdentifier::Id(id) => write!(f, "#{id}"),
            OrderIdentifier::RefId(r) => write!(f, "ref:{r}"),
        }
    }
}

//--------------------------------------    AdjustmentType     ---------------------------------------------------------
/// The internal classification of a marketplace financial event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
pub enum AdjustmentType {
    /// Goods returned by the buyer; the marketplace claws back the sale amount
    Return,
    /// Marketplace commission or service fee
    Commission,
    /// Compensation paid by the marketplace
    Compensation,
    /// Funds for the order have been released by the marketplace
    OrderFund,
    /// Insurance premium charged or refunded on the order
    Premium,
    /// Compensation for a parcel lost in transit
    LostCompensation,
    /// The marketplace reported an event we could not identify
    Unknown,
    /// The marketplace reported an adjustment of unidentifiable kind
    UnknownAdjustment,
    /// Shipping fee charged or rebated separately from the order total
    ShippingFee,
}

text_enum!(AdjustmentType, Unknown, [
    Return,
    Commission,
    Compensation,
    OrderFund,
    Premium,
    LostCompensation,
    Unknown,
    UnknownAdjustment,
    ShippingFee
]);

impl AdjustmentType {
    /// The first adjustment of one of these types creates the order's receivable on the ledger.
    pub fn creates_receivable(&self) -> bool {
        matches!(self, Self::OrderFund | Self::LostCompensation)
    }
}

//--------------------------------------      Adjustment       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Adjustment {
    pub id: i64,
    pub order_id: i64,
    pub shop_id: i64,
    pub adjustment_type: AdjustmentType,
    pub amount: Money,
    /// When the marketplace event happened
    pub at: DateTime<Utc>,
    /// When the funds settle
    pub fund_at: Option<DateTime<Utc>>,
    pub description: String,
    pub source: String,
    pub is_multi_region: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Adjustment {
    /// The id the ledger uses to deduplicate notifications about this adjustment.
    pub fn reference_id(&self) -> String {
        self.id.to_string()
    }

    /// True if the fields that matter to the ledger are the same as in `other`.
    pub fn same_financials(&self, other: &NewAdjustment) -> bool {
        self.amount == other.amount && self.at == other.at && self.fund_at == other.fund_at
    }
}

//--------------------------------------     NewAdjustment     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAdjustment {
    pub order_id: i64,
    pub shop_id: i64,
    pub adjustment_type: AdjustmentType,
    pub amount: Money,
    pub at: DateTime<Utc>,
    pub fund_at: Option<DateTime<Utc>>,
    pub description: String,
    pub source: String,
    pub is_multi_region: bool,
}

impl NewAdjustment {
    pub fn new(order_id: i64, adjustment_type: AdjustmentType, amount: Money, at: DateTime<Utc>) -> Self {
        Self {
            order_id,
            shop_id: 0,
            adjustment_type,
            amount,
            at,
            fund_at: None,
            description: String::default(),
            source: String::default(),
            is_multi_region: false,
        }
    }

    pub fn with_shop_id(mut self, shop_id: i64) -> Self {
        self.shop_id = shop_id;
        self
    }

    pub fn with_fund_at(mut self, fund_at: DateTime<Utc>) -> Self {
        self.fund_at = Some(fund_at);
        self
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
}

//--------------------------------------      UpsertState      ---------------------------------------------------------
/// The outcome of a diff-based upsert. Callers branch on this; they never recompute the diff themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpsertState {
    /// No row existed for the natural key; one was inserted.
    Created,
    /// A row existed and its financial fields changed; it was overwritten.
    Edited,
    /// A row existed with identical financial fields; nothing was written.
    Noop,
}

text_enum!(UpsertState, Noop, [Created, Edited, Noop]);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertResult {
    pub adjustment: Adjustment,
    pub state: UpsertState,
}

impl UpsertResult {
    pub fn new(adjustment: Adjustment, state: UpsertState) -> Self {
        Self { adjustment, state }
    }

    /// True if a row with this natural key existed before the upsert.
    pub fn pre_existed(&self) -> bool {
        self.state != UpsertState::Created
    }
}

//--------------------------------------      PaymentMeta      ---------------------------------------------------------
/// The per-order gating record. Holding it (inside a transaction) serialises every adjustment-affecting operation on
/// the order.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PaymentMeta {
    pub id: i64,
    pub order_id: i64,
    /// One-way latch: set once the receivable for the order has been created on the ledger.
    pub receivable_adjusted: bool,
    pub lock_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------        Actor          ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum ActorType {
    User,
    Admin,
    System,
}

text_enum!(ActorType, System, [User, Admin, System]);

/// The identity on whose behalf a status transition is made. Recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: i64,
    pub actor_type: ActorType,
}

impl Actor {
    pub fn new(id: i64, actor_type: ActorType) -> Self {
        Self { id, actor_type }
    }

    pub fn system() -> Self {
        Self { id: 0, actor_type: ActorType::System }
    }
}

//--------------------------------------    AuditTimestamp     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AuditTimestamp {
    pub id: i64,
    pub order_id: i64,
    pub actor_id: i64,
    pub actor_type: ActorType,
    pub order_status: OrderStatusType,
    pub timestamp: DateTime<Utc>,
}

//--------------------------------------      TagRelation      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum RelationFrom {
    /// Tagged by a user
    User,
    /// Tagged automatically by the shipment tracking synchroniser
    Tracking,
}

text_enum!(RelationFrom, User, [User, Tracking]);

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TagRelation {
    pub id: i64,
    pub order_id: i64,
    pub tag_id: i64,
    pub relation_from: RelationFrom,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------    LedgerCategory     ---------------------------------------------------------
/// The external ledger's receivable adjustment categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerCategory {
    ReturnCost,
    RefundLost,
    OrderFund,
    OtherCost,
    OtherRevenue,
    /// The receivable for the order is created, carrying the net receivable impact
    CreatedRevenue,
    /// Returned goods arrived before the receivable was settled; the receivable is cancelled
    CancelReceive,
    /// The order's estimated revenue was corrected; the receivable is re-based on the new total
    EditReceivable,
}

text_enum!(LedgerCategory, OtherCost, [
    ReturnCost,
    RefundLost,
    OrderFund,
    OtherCost,
    OtherRevenue,
    CreatedRevenue,
    CancelReceive,
    EditReceivable
]);

//--------------------------------------  LedgerNotification   ---------------------------------------------------------
/// A receivable adjustment to be submitted to the ledger. This is both the outbox payload and the ledger request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerNotification {
    pub order_id: i64,
    pub team_id: i64,
    pub shop_id: i64,
    pub reference_id: String,
    pub amount: Money,
    pub description: String,
    pub category: LedgerCategory,
    pub event_at: DateTime<Utc>,
    pub settle_at: Option<DateTime<Utc>>,
}

//--------------------------------------     OutboxStatus      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize)]
pub enum OutboxStatus {
    /// Committed, waiting to be dispatched
    Pending,
    /// Claimed by a drainer; dispatch is in progress
    InFlight,
    /// The ledger acknowledged the notification
    Delivered,
}

text_enum!(OutboxStatus, Pending, [Pending, InFlight, Delivered]);

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct OutboxEntry {
    pub id: i64,
    pub order_id: i64,
    pub team_id: i64,
    pub shop_id: i64,
    pub reference_id: String,
    pub amount: Money,
    pub description: String,
    pub category: LedgerCategory,
    pub event_at: DateTime<Utc>,
    pub settle_at: Option<DateTime<Utc>>,
    pub status: OutboxStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn notification(&self) -> LedgerNotification {
        LedgerNotification {
            order_id: self.order_id,
            team_id: self.team_id,
            shop_id: self.shop_id,
            reference_id: self.reference_id.clone(),
            amount: self.amount,
            description: self.description.clone(),
            category: self.category,
            event_at: self.event_at,
            settle_at: self.settle_at,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn text_enums_round_trip_through_strings() {
        assert_eq!("LostCompensation".parse::<AdjustmentType>().unwrap(), AdjustmentType::LostCompensation);
        assert_eq!(AdjustmentType::UnknownAdjustment.to_string(), "UnknownAdjustment");
        assert_eq!(OrderStatusType::from("ReturnProblem".to_string()), OrderStatusType::ReturnProblem);
        assert!("Refunded".parse::<OutboxStatus>().is_err());
        assert_eq!(OutboxStatus::from("garbage".to_string()), OutboxStatus::Pending);
    }

    #[test]
    fn completion_blockers() {
        assert!(OrderStatusType::Cancelled.blocks_completion());
        assert!(OrderStatusType::ReturnProblem.blocks_completion());
        assert!(!OrderStatusType::Shipped.blocks_completion());
    }

    #[test]
    fn ledger_categories_serialize_in_wire_format() {
        let json = serde_json::to_string(&LedgerCategory::CreatedRevenue).unwrap();
        assert_eq!(json, "\"CREATED_REVENUE\"");
    }
}
