//! Batch operations and generic stock movements
//!
//! Manual batch entry and import, version-guarded corrections, and the
//! catch-all movement recorder for damage, returns, transfers and ad-hoc
//! receipts. Each call is one transaction.

use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseTransaction, Set};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::db::transaction::{begin, bounded, finish};
use crate::entities::{inventory_batch, MovementReason};
use crate::errors::ServiceError;
use crate::events::Event;
use crate::services::allocation;
use crate::services::concurrency::{apply_with_reread, compare_and_swap_quantity, QuantityDelta};
use crate::services::ledger::{append, find_batch, NewMovement};
use crate::services::LedgerContext;

/// Where a manually created batch came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatchSource {
    #[default]
    Manual,
    Import,
}

impl BatchSource {
    fn reason(self) -> MovementReason {
        match self {
            BatchSource::Manual => MovementReason::Receipt,
            BatchSource::Import => MovementReason::Import,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewBatch {
    pub medicine_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    #[validate(range(min = 1))]
    pub qty_received: i32,
    pub purchase_price: Option<Decimal>,
    pub mrp: Option<Decimal>,
    #[validate(length(max = 100))]
    pub location: Option<String>,
    /// Defaults to now
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: BatchSource,
    pub performed_by: Option<Uuid>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

impl NewBatch {
    pub fn new(medicine_id: Uuid, qty_received: i32) -> Self {
        Self {
            medicine_id,
            batch_number: None,
            expiry_date: None,
            qty_received,
            purchase_price: None,
            mrp: None,
            location: None,
            received_at: None,
            source: BatchSource::Manual,
            performed_by: None,
            note: None,
        }
    }
}

/// Manual correction of a batch's available quantity.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BatchAdjustment {
    pub expected_version: i32,
    #[validate(range(min = 0))]
    pub new_available: i32,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    pub performed_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MovementLine {
    pub medicine_id: Uuid,
    #[validate(range(min = 1))]
    pub qty: i32,
    /// Without a batch, consuming reasons draw FEFO.
    pub batch_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MovementRequest {
    pub reason: MovementReason,
    #[validate(length(min = 1))]
    pub items: Vec<MovementLine>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    pub performed_by: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedMovements {
    pub movement_ids: Vec<Uuid>,
    pub batches_touched: Vec<Uuid>,
}

pub(crate) fn ensure_non_negative(label: &str, value: Option<Decimal>) -> Result<(), ServiceError> {
    match value {
        Some(v) if v.is_sign_negative() && !v.is_zero() => Err(ServiceError::ValidationError(
            format!("{} must not be negative", label),
        )),
        _ => Ok(()),
    }
}

/// Inserts a fresh batch with `qty_available = qty_received` at version 0.
pub(crate) async fn insert_batch<C: ConnectionTrait>(
    conn: &C,
    store_id: Uuid,
    input: &NewBatch,
) -> Result<inventory_batch::Model, ServiceError> {
    let now = Utc::now();
    let batch = inventory_batch::ActiveModel {
        id: Set(Uuid::new_v4()),
        store_id: Set(store_id),
        medicine_id: Set(input.medicine_id),
        batch_number: Set(input.batch_number.clone()),
        expiry_date: Set(input.expiry_date),
        received_at: Set(input.received_at.unwrap_or(now)),
        qty_received: Set(input.qty_received),
        qty_available: Set(input.qty_received),
        qty_reserved: Set(0),
        purchase_price: Set(input.purchase_price),
        mrp: Set(input.mrp),
        location: Set(input.location.clone()),
        version: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;
    Ok(batch)
}

/// Service for batches and generic stock movements
#[derive(Clone)]
pub struct InventoryService {
    ctx: LedgerContext,
}

impl InventoryService {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Creates a batch and its RECEIPT (or IMPORT) movement.
    #[instrument(skip(self, input), fields(medicine_id = %input.medicine_id))]
    pub async fn create_batch(
        &self,
        store_id: Uuid,
        input: NewBatch,
    ) -> Result<inventory_batch::Model, ServiceError> {
        input.validate()?;
        ensure_non_negative("purchase_price", input.purchase_price)?;
        ensure_non_negative("mrp", input.mrp)?;
        self.ctx
            .catalog
            .ensure_medicine(store_id, input.medicine_id)
            .await?;

        let txn = begin(&self.ctx.db).await?;
        let outcome = bounded(
            self.ctx.policy.transaction_timeout,
            Self::create_batch_in(&txn, store_id, &input),
        )
        .await;
        let batch = finish(txn, outcome).await?;

        counter!("rx_ledger.batches.created", 1);
        info!(batch_id = %batch.id, qty = batch.qty_received, "Batch created");
        self.ctx.events.emit(Event::BatchCreated {
            store_id,
            batch_id: batch.id,
            medicine_id: batch.medicine_id,
            qty: batch.qty_received,
        });
        Ok(batch)
    }

    async fn create_batch_in(
        txn: &DatabaseTransaction,
        store_id: Uuid,
        input: &NewBatch,
    ) -> Result<inventory_batch::Model, ServiceError> {
        let batch = insert_batch(txn, store_id, input).await?;
        append(
            txn,
            NewMovement::for_batch(&batch, batch.qty_received, input.source.reason())
                .note(input.note.clone())
                .performed_by(input.performed_by),
        )
        .await?;
        Ok(batch)
    }

    #[instrument(skip(self))]
    pub async fn get_batch(
        &self,
        store_id: Uuid,
        batch_id: Uuid,
    ) -> Result<inventory_batch::Model, ServiceError> {
        find_batch(&*self.ctx.db, store_id, batch_id).await
    }

    /// Sets a batch's available quantity, guarded by the caller's version.
    ///
    /// Writes an ADJUSTMENT movement of `new - old`. Setting the current
    /// value is a no-op that leaves the version alone.
    #[instrument(skip(self, adjustment), fields(expected_version = adjustment.expected_version, new_available = adjustment.new_available))]
    pub async fn adjust_batch(
        &self,
        store_id: Uuid,
        batch_id: Uuid,
        adjustment: BatchAdjustment,
    ) -> Result<inventory_batch::Model, ServiceError> {
        adjustment.validate()?;

        let txn = begin(&self.ctx.db).await?;
        let outcome = bounded(
            self.ctx.policy.transaction_timeout,
            Self::adjust_batch_in(&txn, store_id, batch_id, &adjustment),
        )
        .await;
        let (old_available, batch) = finish(txn, outcome).await?;

        if old_available != batch.qty_available {
            counter!("rx_ledger.batches.adjusted", 1);
            info!(
                batch_id = %batch_id,
                old_available,
                new_available = batch.qty_available,
                version = batch.version,
                "Batch adjusted"
            );
            self.ctx.events.emit(Event::BatchAdjusted {
                store_id,
                batch_id,
                old_available,
                new_available: batch.qty_available,
            });
        }
        Ok(batch)
    }

    async fn adjust_batch_in(
        txn: &DatabaseTransaction,
        store_id: Uuid,
        batch_id: Uuid,
        adjustment: &BatchAdjustment,
    ) -> Result<(i32, inventory_batch::Model), ServiceError> {
        let batch = find_batch(txn, store_id, batch_id).await?;
        if batch.version != adjustment.expected_version {
            counter!("rx_ledger.cas.version_conflicts", 1);
            return Err(ServiceError::VersionConflict {
                batch_id,
                expected: adjustment.expected_version,
            });
        }

        let old_available = batch.qty_available;
        let delta = adjustment.new_available - old_available;
        if delta == 0 {
            return Ok((old_available, batch));
        }

        let updated = compare_and_swap_quantity(
            txn,
            batch_id,
            adjustment.expected_version,
            QuantityDelta::adjust(delta),
        )
        .await?;
        append(
            txn,
            NewMovement::for_batch(&updated, delta, MovementReason::Adjustment)
                .note(adjustment.note.clone())
                .performed_by(adjustment.performed_by),
        )
        .await?;
        Ok((old_available, updated))
    }

    /// Records a set of stock movements of one reason as a single unit.
    ///
    /// Consuming reasons take from the pinned batch or FEFO; RECEIPT and
    /// IMPORT add to a pinned batch and grow its received quantity.
    #[instrument(skip(self, request), fields(reason = %request.reason, lines = request.items.len()))]
    pub async fn record_movements(
        &self,
        store_id: Uuid,
        request: MovementRequest,
    ) -> Result<RecordedMovements, ServiceError> {
        request.validate()?;
        for line in &request.items {
            line.validate()?;
            if request.reason.is_receipt() && line.batch_id.is_none() {
                return Err(ServiceError::ValidationError(format!(
                    "{} lines must name a batch",
                    request.reason
                )));
            }
        }
        let medicine_ids: Vec<Uuid> = request.items.iter().map(|l| l.medicine_id).collect();
        self.ctx.catalog.ensure_all(store_id, &medicine_ids).await?;

        let txn = begin(&self.ctx.db).await?;
        let outcome = bounded(
            self.ctx.policy.transaction_timeout,
            Self::record_movements_in(
                &txn,
                store_id,
                &request,
                self.ctx.policy.conflict_retry_limit,
            ),
        )
        .await;
        let recorded = finish(txn, outcome).await?;

        counter!("rx_ledger.movements.recorded", recorded.movement_ids.len() as u64);
        info!(
            movements = recorded.movement_ids.len(),
            batches = recorded.batches_touched.len(),
            "Stock movements recorded"
        );
        self.ctx.events.emit(Event::MovementsRecorded {
            store_id,
            reason: request.reason.to_string(),
            movement_ids: recorded.movement_ids.clone(),
        });
        Ok(recorded)
    }

    async fn record_movements_in(
        txn: &DatabaseTransaction,
        store_id: Uuid,
        request: &MovementRequest,
        retry_limit: u32,
    ) -> Result<RecordedMovements, ServiceError> {
        let mut recorded = RecordedMovements {
            movement_ids: Vec::new(),
            batches_touched: Vec::new(),
        };

        for line in &request.items {
            let touched: Vec<(inventory_batch::Model, i32)> = match line.batch_id {
                Some(batch_id) => {
                    let batch = find_batch(txn, store_id, batch_id).await?;
                    if batch.medicine_id != line.medicine_id {
                        return Err(ServiceError::InvalidBatch(format!(
                            "batch {} does not hold medicine {}",
                            batch_id, line.medicine_id
                        )));
                    }
                    let (delta, signed) = if request.reason.is_receipt() {
                        (QuantityDelta::receive(line.qty), line.qty)
                    } else {
                        (QuantityDelta::consume(line.qty), -line.qty)
                    };
                    let updated = apply_with_reread(txn, &batch, delta, retry_limit).await?;
                    vec![(updated, signed)]
                }
                None => {
                    let steps =
                        allocation::plan(txn, store_id, line.medicine_id, line.qty).await?;
                    let mut touched = Vec::with_capacity(steps.len());
                    for step in steps {
                        let updated = compare_and_swap_quantity(
                            txn,
                            step.batch_id,
                            step.version,
                            QuantityDelta::consume(step.take),
                        )
                        .await?;
                        touched.push((updated, -step.take));
                    }
                    touched
                }
            };

            for (batch, delta) in touched {
                let id = append(
                    txn,
                    NewMovement::for_batch(&batch, delta, request.reason)
                        .note(request.note.clone())
                        .performed_by(request.performed_by),
                )
                .await?;
                recorded.movement_ids.push(id);
                if !recorded.batches_touched.contains(&batch.id) {
                    recorded.batches_touched.push(batch.id);
                }
            }
        }

        Ok(recorded)
    }
}
