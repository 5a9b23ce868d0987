use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A physically distinct, expiring lot of one medicine in one store.
///
/// `qty_available` and `qty_reserved` are a cached projection of the
/// movement ledger. Every mutation goes through the version-guarded
/// compare-and-swap, which bumps `version` by exactly one.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_batches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub store_id: Uuid,
    pub medicine_id: Uuid,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub received_at: DateTime<Utc>,
    pub qty_received: i32,
    pub qty_available: i32,
    pub qty_reserved: i32,
    #[sea_orm(column_type = "Decimal(Some((12, 2)))", nullable)]
    pub purchase_price: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((12, 2)))", nullable)]
    pub mrp: Option<Decimal>,
    pub location: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::medicine::Entity",
        from = "Column::MedicineId",
        to = "super::medicine::Column::Id"
    )]
    Medicine,
    #[sea_orm(has_many = "super::stock_movement::Entity")]
    StockMovements,
}

impl Related<super::medicine::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Medicine.def()
    }
}

impl Related<super::stock_movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockMovements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Units still sitting on the shelf, held or not.
    pub fn on_hand(&self) -> i32 {
        self.qty_available + self.qty_reserved
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.map(|d| d < today).unwrap_or(false)
    }
}
