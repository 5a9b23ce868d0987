//! Reorder coordinator
//!
//! Purchase orders to suppliers and the receiving flow that books goods into
//! batches. Receiving is the one operation retried automatically: a version
//! conflict reruns the whole unit of work after a backoff.

use chrono::{NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::db::transaction::{begin, bounded, finish};
use crate::db::DbPool;
use crate::entities::reorder::{self, ReorderStatus};
use crate::entities::{inventory_batch, reorder_item, MovementReason};
use crate::errors::ServiceError;
use crate::events::Event;
use crate::services::concurrency::{
    compare_and_swap_receipt, retry_on_version_conflict, LotDetails,
};
use crate::services::inventory::{ensure_non_negative, insert_batch, BatchSource, NewBatch};
use crate::services::ledger::{append, NewMovement};
use crate::services::LedgerContext;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReorderLine {
    pub medicine_id: Uuid,
    #[validate(range(min = 1))]
    pub qty: i32,
    /// Expected unit price
    pub price: Option<Decimal>,
    #[validate(length(max = 100))]
    pub sku: Option<String>,
    /// Preferred batch number when goods arrive
    #[validate(length(max = 100))]
    pub batch_pref: Option<String>,
}

impl ReorderLine {
    pub fn new(medicine_id: Uuid, qty: i32) -> Self {
        Self {
            medicine_id,
            qty,
            price: None,
            sku: None,
            batch_pref: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CreateReorder {
    pub supplier_id: Option<Uuid>,
    #[validate(length(min = 1))]
    pub items: Vec<ReorderLine>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    #[validate(length(max = 100))]
    pub external_ref: Option<String>,
    pub created_by: Option<Uuid>,
    /// Send straight away instead of leaving a DRAFT
    #[serde(default)]
    pub auto_send: bool,
}

impl CreateReorder {
    pub fn new(items: Vec<ReorderLine>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }
}

/// Goods received against one reorder item.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReceivedLine {
    pub reorder_item_id: Uuid,
    #[validate(range(min = 1))]
    pub qty: i32,
    /// An existing batch with this number is topped up; otherwise a new
    /// batch is created.
    #[validate(length(min = 1, max = 100))]
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub purchase_price: Option<Decimal>,
    pub mrp: Option<Decimal>,
    #[validate(length(max = 100))]
    pub location: Option<String>,
}

impl ReceivedLine {
    pub fn new(reorder_item_id: Uuid, qty: i32) -> Self {
        Self {
            reorder_item_id,
            qty,
            batch_number: None,
            expiry_date: None,
            purchase_price: None,
            mrp: None,
            location: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ReceiveReorder {
    #[validate(length(min = 1))]
    pub lines: Vec<ReceivedLine>,
    /// Supplier delivery note or invoice number
    #[validate(length(max = 100))]
    pub receipt_ref: Option<String>,
    pub performed_by: Option<Uuid>,
}

impl ReceiveReorder {
    pub fn new(lines: Vec<ReceivedLine>) -> Self {
        Self {
            lines,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderWithItems {
    pub reorder: reorder::Model,
    pub items: Vec<reorder_item::Model>,
}

impl ReorderWithItems {
    pub fn total_ordered(&self) -> i32 {
        self.items.iter().map(|i| i.qty).sum()
    }

    pub fn total_received(&self) -> i32 {
        self.items.iter().map(|i| i.qty_received).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveOutcome {
    pub reorder: ReorderWithItems,
    pub batches_touched: Vec<Uuid>,
    pub movement_ids: Vec<Uuid>,
    pub status: ReorderStatus,
    /// Status changes applied by this receipt, in order
    pub transitions: Vec<(ReorderStatus, ReorderStatus)>,
    pub attempts: u32,
}

fn total_value(lines: &[ReorderLine]) -> Decimal {
    lines
        .iter()
        .map(|l| l.price.unwrap_or_default() * Decimal::from(l.qty))
        .sum()
}

fn validate_lines(lines: &[ReorderLine]) -> Result<(), ServiceError> {
    for line in lines {
        line.validate()?;
        ensure_non_negative("price", line.price)?;
    }
    Ok(())
}

async fn load_reorder<C: ConnectionTrait>(
    conn: &C,
    store_id: Uuid,
    reorder_id: Uuid,
) -> Result<ReorderWithItems, ServiceError> {
    let reorder = reorder::Entity::find_by_id(reorder_id)
        .filter(reorder::Column::StoreId.eq(store_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("reorder {}", reorder_id)))?;
    let items = reorder_item::Entity::find()
        .filter(reorder_item::Column::ReorderId.eq(reorder_id))
        .all(conn)
        .await?;
    Ok(ReorderWithItems { reorder, items })
}

async fn insert_items(
    txn: &DatabaseTransaction,
    reorder_id: Uuid,
    lines: &[ReorderLine],
) -> Result<Vec<reorder_item::Model>, ServiceError> {
    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let item = reorder_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            reorder_id: Set(reorder_id),
            medicine_id: Set(line.medicine_id),
            qty: Set(line.qty),
            price: Set(line.price),
            sku: Set(line.sku.clone()),
            batch_pref: Set(line.batch_pref.clone()),
            qty_received: Set(0),
        }
        .insert(txn)
        .await?;
        items.push(item);
    }
    Ok(items)
}

/// Moves a reorder to `to` if it is still in `from`. Stamps `sent_at` on the
/// way into SENT.
async fn claim_status<C: ConnectionTrait>(
    conn: &C,
    reorder_id: Uuid,
    from: &[ReorderStatus],
    to: ReorderStatus,
) -> Result<bool, ServiceError> {
    let now = Utc::now();
    let mut update = reorder::Entity::update_many()
        .col_expr(reorder::Column::Status, Expr::value(to))
        .col_expr(reorder::Column::UpdatedAt, Expr::value(now))
        .filter(reorder::Column::Id.eq(reorder_id))
        .filter(reorder::Column::Status.is_in(from.iter().copied()));
    if to == ReorderStatus::Sent {
        update = update.col_expr(reorder::Column::SentAt, Expr::value(Some(now)));
    }
    Ok(update.exec(conn).await?.rows_affected == 1)
}

/// Service for supplier reorders
#[derive(Clone)]
pub struct ReorderService {
    ctx: LedgerContext,
}

impl ReorderService {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Creates a DRAFT reorder, or a SENT one when `auto_send` is set.
    #[instrument(skip(self, request), fields(lines = request.items.len(), auto_send = request.auto_send))]
    pub async fn create_reorder(
        &self,
        store_id: Uuid,
        request: CreateReorder,
    ) -> Result<ReorderWithItems, ServiceError> {
        request.validate()?;
        validate_lines(&request.items)?;
        let medicine_ids: Vec<Uuid> = request.items.iter().map(|l| l.medicine_id).collect();
        self.ctx.catalog.ensure_all(store_id, &medicine_ids).await?;

        let txn = begin(&self.ctx.db).await?;
        let outcome = bounded(
            self.ctx.policy.transaction_timeout,
            Self::create_in(&txn, store_id, &request),
        )
        .await;
        let created = finish(txn, outcome).await?;

        counter!("rx_ledger.reorders.created", 1);
        info!(
            reorder_id = %created.reorder.id,
            status = %created.reorder.status,
            total_value = %created.reorder.total_value,
            "Reorder created"
        );
        self.ctx.events.emit(Event::ReorderCreated {
            store_id,
            reorder_id: created.reorder.id,
        });
        if request.auto_send {
            self.ctx.events.emit(Event::ReorderStatusChanged {
                store_id,
                reorder_id: created.reorder.id,
                old_status: ReorderStatus::Draft.to_string(),
                new_status: ReorderStatus::Sent.to_string(),
            });
        }
        Ok(created)
    }

    async fn create_in(
        txn: &DatabaseTransaction,
        store_id: Uuid,
        request: &CreateReorder,
    ) -> Result<ReorderWithItems, ServiceError> {
        let now = Utc::now();
        let reorder = reorder::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id),
            supplier_id: Set(request.supplier_id),
            status: Set(ReorderStatus::Draft),
            total_value: Set(total_value(&request.items)),
            note: Set(request.note.clone()),
            external_ref: Set(request.external_ref.clone()),
            created_by: Set(request.created_by),
            sent_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await?;
        insert_items(txn, reorder.id, &request.items).await?;

        if request.auto_send {
            claim_status(txn, reorder.id, &[ReorderStatus::Draft], ReorderStatus::Sent).await?;
        }
        load_reorder(txn, store_id, reorder.id).await
    }

    /// Applies one legal state-machine step.
    #[instrument(skip(self))]
    pub async fn update_reorder_status(
        &self,
        store_id: Uuid,
        reorder_id: Uuid,
        next: ReorderStatus,
    ) -> Result<ReorderWithItems, ServiceError> {
        let db = &*self.ctx.db;
        let current = load_reorder(db, store_id, reorder_id).await?;
        let from = current.reorder.status;
        if !from.can_transition_to(next) {
            return Err(ServiceError::invalid_transition("reorder", from, next));
        }

        if !claim_status(db, reorder_id, &[from], next).await? {
            let now = load_reorder(db, store_id, reorder_id).await?;
            return Err(ServiceError::invalid_transition(
                "reorder",
                now.reorder.status,
                next,
            ));
        }

        counter!("rx_ledger.reorders.transitions", 1, "to" => next.to_string());
        info!(reorder_id = %reorder_id, from = %from, to = %next, "Reorder status changed");
        self.ctx.events.emit(Event::ReorderStatusChanged {
            store_id,
            reorder_id,
            old_status: from.to_string(),
            new_status: next.to_string(),
        });
        load_reorder(db, store_id, reorder_id).await
    }

    /// Replaces every item of a DRAFT reorder and recomputes its value.
    #[instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn replace_reorder_items(
        &self,
        store_id: Uuid,
        reorder_id: Uuid,
        items: Vec<ReorderLine>,
    ) -> Result<ReorderWithItems, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "a reorder needs at least one item".into(),
            ));
        }
        validate_lines(&items)?;
        let medicine_ids: Vec<Uuid> = items.iter().map(|l| l.medicine_id).collect();
        self.ctx.catalog.ensure_all(store_id, &medicine_ids).await?;

        let txn = begin(&self.ctx.db).await?;
        let outcome = bounded(
            self.ctx.policy.transaction_timeout,
            Self::replace_items_in(&txn, store_id, reorder_id, &items),
        )
        .await;
        let replaced = finish(txn, outcome).await?;

        info!(reorder_id = %reorder_id, total_value = %replaced.reorder.total_value, "Reorder items replaced");
        self.ctx.events.emit(Event::ReorderItemsReplaced {
            store_id,
            reorder_id,
        });
        Ok(replaced)
    }

    async fn replace_items_in(
        txn: &DatabaseTransaction,
        store_id: Uuid,
        reorder_id: Uuid,
        items: &[ReorderLine],
    ) -> Result<ReorderWithItems, ServiceError> {
        let current = load_reorder(txn, store_id, reorder_id).await?;
        if !current.reorder.status.items_editable() {
            return Err(ServiceError::invalid_transition(
                "reorder items",
                current.reorder.status,
                "EDITED",
            ));
        }

        // Guard against a concurrent send between the read and the edit.
        let touched = reorder::Entity::update_many()
            .col_expr(reorder::Column::TotalValue, Expr::value(total_value(items)))
            .col_expr(reorder::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(reorder::Column::Id.eq(reorder_id))
            .filter(reorder::Column::Status.eq(ReorderStatus::Draft))
            .exec(txn)
            .await?;
        if touched.rows_affected != 1 {
            let now = load_reorder(txn, store_id, reorder_id).await?;
            return Err(ServiceError::invalid_transition(
                "reorder items",
                now.reorder.status,
                "EDITED",
            ));
        }

        reorder_item::Entity::delete_many()
            .filter(reorder_item::Column::ReorderId.eq(reorder_id))
            .exec(txn)
            .await?;
        insert_items(txn, reorder_id, items).await?;
        load_reorder(txn, store_id, reorder_id).await
    }

    /// Books received goods into batches.
    ///
    /// Version conflicts rerun the whole receipt, up to the configured number
    /// of attempts with doubling backoff. Other failures surface at once.
    #[instrument(skip(self, request), fields(lines = request.lines.len()))]
    pub async fn receive_reorder(
        &self,
        store_id: Uuid,
        reorder_id: Uuid,
        request: ReceiveReorder,
    ) -> Result<ReceiveOutcome, ServiceError> {
        request.validate()?;
        for line in &request.lines {
            line.validate()?;
            ensure_non_negative("purchase_price", line.purchase_price)?;
            ensure_non_negative("mrp", line.mrp)?;
        }

        let policy = &self.ctx.policy;
        let db: &DbPool = &self.ctx.db;
        let request = &request;
        let (mut outcome, attempt) = retry_on_version_conflict(
            policy.receiving_max_attempts,
            |attempt| policy.receiving_backoff_for(attempt),
            move |_| async move {
                let txn = begin(db).await?;
                let staged = bounded(
                    policy.transaction_timeout,
                    Self::receive_in(&txn, store_id, reorder_id, request),
                )
                .await;
                finish(txn, staged).await
            },
        )
        .await
        .map_err(|e| {
            counter!("rx_ledger.receiving.failed", 1, "error" => e.code());
            e
        })?;
        outcome.attempts = attempt;

        counter!("rx_ledger.receiving.completed", 1);
        info!(
            reorder_id = %reorder_id,
            status = %outcome.status,
            received = outcome.reorder.total_received(),
            ordered = outcome.reorder.total_ordered(),
            attempts = attempt,
            "Reorder received"
        );
        for (old, new) in &outcome.transitions {
            self.ctx.events.emit(Event::ReorderStatusChanged {
                store_id,
                reorder_id,
                old_status: old.to_string(),
                new_status: new.to_string(),
            });
        }
        self.ctx.events.emit(Event::ReorderReceived {
            store_id,
            reorder_id,
            batches_touched: outcome.batches_touched.clone(),
        });
        Ok(outcome)
    }

    async fn receive_in(
        txn: &DatabaseTransaction,
        store_id: Uuid,
        reorder_id: Uuid,
        request: &ReceiveReorder,
    ) -> Result<ReceiveOutcome, ServiceError> {
        let current = load_reorder(txn, store_id, reorder_id).await?;
        let mut status = current.reorder.status;
        if !status.accepts_receipts() {
            return Err(ServiceError::invalid_transition(
                "reorder",
                status,
                ReorderStatus::Received,
            ));
        }

        let mut transitions = Vec::new();
        if status == ReorderStatus::Draft
            && claim_status(txn, reorder_id, &[ReorderStatus::Draft], ReorderStatus::Sent).await?
        {
            transitions.push((ReorderStatus::Draft, ReorderStatus::Sent));
            status = ReorderStatus::Sent;
        }

        let items: HashMap<Uuid, &reorder_item::Model> =
            current.items.iter().map(|i| (i.id, i)).collect();
        let note = match &request.receipt_ref {
            Some(r) => format!("reorder {} receipt {}", reorder_id, r),
            None => format!("reorder {}", reorder_id),
        };

        let mut batches_touched = Vec::new();
        let mut movement_ids = Vec::new();
        for line in &request.lines {
            let item = items.get(&line.reorder_item_id).ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "reorder item {} on reorder {}",
                    line.reorder_item_id, reorder_id
                ))
            })?;
            let batch_number = line.batch_number.clone().or_else(|| item.batch_pref.clone());

            let existing = match &batch_number {
                Some(number) => {
                    inventory_batch::Entity::find()
                        .filter(inventory_batch::Column::StoreId.eq(store_id))
                        .filter(inventory_batch::Column::MedicineId.eq(item.medicine_id))
                        .filter(inventory_batch::Column::BatchNumber.eq(number.as_str()))
                        .order_by_asc(inventory_batch::Column::CreatedAt)
                        .one(txn)
                        .await?
                }
                None => None,
            };

            let batch = match existing {
                Some(batch) => {
                    compare_and_swap_receipt(
                        txn,
                        batch.id,
                        batch.version,
                        line.qty,
                        LotDetails {
                            expiry_date: line.expiry_date,
                            purchase_price: line.purchase_price,
                            mrp: line.mrp,
                        },
                    )
                    .await?
                }
                None => {
                    let input = NewBatch {
                        batch_number,
                        expiry_date: line.expiry_date,
                        purchase_price: line.purchase_price.or(item.price),
                        mrp: line.mrp,
                        location: line.location.clone(),
                        source: BatchSource::Manual,
                        performed_by: request.performed_by,
                        ..NewBatch::new(item.medicine_id, line.qty)
                    };
                    insert_batch(txn, store_id, &input).await?
                }
            };

            let movement_id = append(
                txn,
                NewMovement::for_batch(&batch, line.qty, MovementReason::Receipt)
                    .note(Some(note.clone()))
                    .performed_by(request.performed_by),
            )
            .await?;
            movement_ids.push(movement_id);
            if !batches_touched.contains(&batch.id) {
                batches_touched.push(batch.id);
            }

            reorder_item::Entity::update_many()
                .col_expr(
                    reorder_item::Column::QtyReceived,
                    Expr::col(reorder_item::Column::QtyReceived).add(line.qty),
                )
                .filter(reorder_item::Column::Id.eq(item.id))
                .exec(txn)
                .await?;
        }

        let after = load_reorder(txn, store_id, reorder_id).await?;
        let target = if after.total_received() >= after.total_ordered() {
            ReorderStatus::Received
        } else {
            ReorderStatus::PartiallyReceived
        };
        if target != status {
            if !claim_status(txn, reorder_id, &[status], target).await? {
                let now = load_reorder(txn, store_id, reorder_id).await?;
                return Err(ServiceError::invalid_transition(
                    "reorder",
                    now.reorder.status,
                    target,
                ));
            }
            transitions.push((status, target));
        }

        Ok(ReceiveOutcome {
            reorder: load_reorder(txn, store_id, reorder_id).await?,
            batches_touched,
            movement_ids,
            status: target,
            transitions,
            attempts: 1,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_reorder(
        &self,
        store_id: Uuid,
        reorder_id: Uuid,
    ) -> Result<ReorderWithItems, ServiceError> {
        load_reorder(&*self.ctx.db, store_id, reorder_id).await
    }
}
