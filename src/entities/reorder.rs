use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Purchase order to a supplier
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reorders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub store_id: Uuid,
    pub supplier_id: Option<Uuid>,
    pub status: ReorderStatus,
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub total_value: Decimal,
    pub note: Option<String>,
    pub external_ref: Option<String>,
    pub created_by: Option<Uuid>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::reorder_item::Entity")]
    ReorderItems,
}

impl Related<super::reorder_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReorderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Reorder lifecycle
///
/// ```text
/// DRAFT              -> SENT | CANCELLED
/// SENT               -> CONFIRMED | CANCELLED | FAILED
/// CONFIRMED          -> PARTIALLY_RECEIVED | RECEIVED | CANCELLED
/// PARTIALLY_RECEIVED -> RECEIVED | CANCELLED
/// RECEIVED, CANCELLED, FAILED are terminal
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(24))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReorderStatus {
    #[sea_orm(string_value = "DRAFT")]
    Draft,
    #[sea_orm(string_value = "SENT")]
    Sent,
    #[sea_orm(string_value = "CONFIRMED")]
    Confirmed,
    #[sea_orm(string_value = "PARTIALLY_RECEIVED")]
    PartiallyReceived,
    #[sea_orm(string_value = "RECEIVED")]
    Received,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

impl ReorderStatus {
    /// States reachable in one step.
    pub fn successors(self) -> &'static [ReorderStatus] {
        use ReorderStatus::*;
        match self {
            Draft => &[Sent, Cancelled],
            Sent => &[Confirmed, Cancelled, Failed],
            Confirmed => &[PartiallyReceived, Received, Cancelled],
            PartiallyReceived => &[Received, Cancelled],
            Received | Cancelled | Failed => &[],
        }
    }

    pub fn can_transition_to(self, next: ReorderStatus) -> bool {
        self.successors().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    /// Goods may be booked in from these states. DRAFT is accepted and
    /// passes through SENT first.
    pub fn accepts_receipts(self) -> bool {
        matches!(
            self,
            Self::Draft | Self::Sent | Self::Confirmed | Self::PartiallyReceived
        )
    }

    /// Item lines can only be edited before the order leaves the store.
    pub fn items_editable(self) -> bool {
        matches!(self, Self::Draft)
    }
}
