//! Movement ledger
//!
//! Append-only record of every quantity change applied to a batch. The batch
//! quantity columns are a cached projection of it: for any batch,
//! `qty_available + qty_reserved` equals the sum of its movement deltas.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{inventory_batch, stock_movement, MovementReason};
use crate::errors::ServiceError;

/// A movement about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub store_id: Uuid,
    pub batch_id: Uuid,
    pub medicine_id: Uuid,
    pub delta: i32,
    pub reason: MovementReason,
    pub note: Option<String>,
    pub performed_by: Option<Uuid>,
    pub sale_item_id: Option<Uuid>,
}

impl NewMovement {
    pub fn for_batch(batch: &inventory_batch::Model, delta: i32, reason: MovementReason) -> Self {
        Self {
            store_id: batch.store_id,
            batch_id: batch.id,
            medicine_id: batch.medicine_id,
            delta,
            reason,
            note: None,
            performed_by: None,
            sale_item_id: None,
        }
    }

    pub fn note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub fn performed_by(mut self, user_id: Option<Uuid>) -> Self {
        self.performed_by = user_id;
        self
    }

    pub fn sale_item(mut self, sale_item_id: Uuid) -> Self {
        self.sale_item_id = Some(sale_item_id);
        self
    }
}

/// Appends one movement and returns its id.
///
/// Runs on whatever handle the caller is using, so inside a coordinator
/// it lands in the same transaction as the batch write it records.
pub async fn append<C: ConnectionTrait>(
    conn: &C,
    movement: NewMovement,
) -> Result<Uuid, ServiceError> {
    if movement.delta == 0 {
        return Err(ServiceError::ValidationError(
            "movement delta must not be zero".into(),
        ));
    }
    let id = Uuid::new_v4();
    stock_movement::ActiveModel {
        id: Set(id),
        store_id: Set(movement.store_id),
        batch_id: Set(movement.batch_id),
        medicine_id: Set(movement.medicine_id),
        delta: Set(movement.delta),
        reason: Set(movement.reason),
        note: Set(movement.note),
        performed_by: Set(movement.performed_by),
        sale_item_id: Set(movement.sale_item_id),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(id)
}

/// Outcome of checking a batch against its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub batch_id: Uuid,
    pub qty_received: i32,
    pub qty_available: i32,
    pub qty_reserved: i32,
    /// Sum of RECEIPT and IMPORT deltas
    pub receipts_total: i32,
    /// Sum of every other delta
    pub non_receipt_total: i32,
    pub movement_count: usize,
}

impl Reconciliation {
    pub fn ledger_total(&self) -> i32 {
        self.receipts_total + self.non_receipt_total
    }

    pub fn on_hand(&self) -> i32 {
        self.qty_available + self.qty_reserved
    }

    /// On-hand stock matches the ledger and received matches the receipts.
    pub fn is_consistent(&self) -> bool {
        self.on_hand() == self.ledger_total() && self.qty_received == self.receipts_total
    }
}

/// Read side of the ledger
#[derive(Clone)]
pub struct LedgerService {
    db_pool: Arc<DbPool>,
}

impl LedgerService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Movements of one batch, oldest first.
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        store_id: Uuid,
        batch_id: Uuid,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        let db = &*self.db_pool;
        find_batch(db, store_id, batch_id).await?;
        let movements = stock_movement::Entity::find()
            .filter(stock_movement::Column::StoreId.eq(store_id))
            .filter(stock_movement::Column::BatchId.eq(batch_id))
            .order_by_asc(stock_movement::Column::CreatedAt)
            .all(db)
            .await?;
        Ok(movements)
    }

    /// Recomputes a batch's quantities from its movements.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        store_id: Uuid,
        batch_id: Uuid,
    ) -> Result<Reconciliation, ServiceError> {
        let db = &*self.db_pool;
        let batch = find_batch(db, store_id, batch_id).await?;
        let movements = stock_movement::Entity::find()
            .filter(stock_movement::Column::StoreId.eq(store_id))
            .filter(stock_movement::Column::BatchId.eq(batch_id))
            .all(db)
            .await?;

        let (receipts_total, non_receipt_total) =
            movements
                .iter()
                .fold((0, 0), |(receipts, other), m| {
                    if m.reason.is_receipt() {
                        (receipts + m.delta, other)
                    } else {
                        (receipts, other + m.delta)
                    }
                });

        let report = Reconciliation {
            batch_id,
            qty_received: batch.qty_received,
            qty_available: batch.qty_available,
            qty_reserved: batch.qty_reserved,
            receipts_total,
            non_receipt_total,
            movement_count: movements.len(),
        };

        if !report.is_consistent() {
            warn!(
                batch_id = %batch_id,
                on_hand = report.on_hand(),
                ledger_total = report.ledger_total(),
                "Batch drifted from its ledger"
            );
        }
        Ok(report)
    }
}

/// Loads a batch owned by `store_id`; foreign batches look missing.
pub(crate) async fn find_batch<C: ConnectionTrait>(
    conn: &C,
    store_id: Uuid,
    batch_id: Uuid,
) -> Result<inventory_batch::Model, ServiceError> {
    inventory_batch::Entity::find_by_id(batch_id)
        .filter(inventory_batch::Column::StoreId.eq(store_id))
        .one(conn)
        .await?
        .ok_or(ServiceError::BatchNotFound(batch_id))
}
