use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Append-only ledger row. Never updated or deleted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub store_id: Uuid,
    pub batch_id: Uuid,
    pub medicine_id: Uuid,
    pub delta: i32,
    pub reason: MovementReason,
    pub note: Option<String>,
    pub performed_by: Option<Uuid>,
    pub sale_item_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::inventory_batch::Entity",
        from = "Column::BatchId",
        to = "super::inventory_batch::Column::Id"
    )]
    InventoryBatch,
}

impl Related<super::inventory_batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryBatch.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Why a batch quantity changed
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
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementReason {
    #[sea_orm(string_value = "RECEIPT")]
    Receipt,
    #[sea_orm(string_value = "SALE")]
    Sale,
    #[sea_orm(string_value = "ADJUSTMENT")]
    Adjustment,
    #[sea_orm(string_value = "RETURN")]
    Return,
    #[sea_orm(string_value = "DAMAGE")]
    Damage,
    #[sea_orm(string_value = "TRANSFER")]
    Transfer,
    #[sea_orm(string_value = "IMPORT")]
    Import,
}

impl MovementReason {
    /// Receipts grow `qty_received`; every other reason only moves
    /// available/reserved stock.
    pub fn is_receipt(self) -> bool {
        matches!(self, Self::Receipt | Self::Import)
    }
}
