use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reorder_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub reorder_id: Uuid,
    pub medicine_id: Uuid,
    pub qty: i32,
    #[sea_orm(column_type = "Decimal(Some((12, 2)))", nullable)]
    pub price: Option<Decimal>,
    pub sku: Option<String>,
    pub batch_pref: Option<String>,
    /// Cumulative across every receive call
    pub qty_received: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::reorder::Entity",
        from = "Column::ReorderId",
        to = "super::reorder::Column::Id"
    )]
    Reorder,
}

impl Related<super::reorder::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reorder.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn line_value(&self) -> Decimal {
        self.price.unwrap_or_default() * Decimal::from(self.qty)
    }
}
