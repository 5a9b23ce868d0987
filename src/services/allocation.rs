//! FEFO allocation
//!
//! Picks the batches a quantity should come out of: nearest expiry first,
//! batches without an expiry last, then oldest receipt, then id so the
//! order is total. Planning never writes.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::inventory_batch;
use crate::errors::ServiceError;

/// One planned take from one batch, with the version it was planned against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationStep {
    pub batch_id: Uuid,
    pub take: i32,
    pub version: i32,
}

/// The slice of a batch the planner looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub batch_id: Uuid,
    pub expiry_date: Option<NaiveDate>,
    pub received_at: DateTime<Utc>,
    pub free: i32,
    pub version: i32,
}

impl From<&inventory_batch::Model> for Candidate {
    fn from(batch: &inventory_batch::Model) -> Self {
        Self {
            batch_id: batch.id,
            expiry_date: batch.expiry_date,
            received_at: batch.received_at,
            free: batch.qty_available,
            version: batch.version,
        }
    }
}

fn fefo_cmp(a: &Candidate, b: &Candidate) -> Ordering {
    let by_expiry = match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_expiry
        .then_with(|| a.received_at.cmp(&b.received_at))
        .then_with(|| a.batch_id.cmp(&b.batch_id))
}

/// Sorts candidates into consumption order.
pub fn fefo_order(candidates: &mut [Candidate]) {
    candidates.sort_by(fefo_cmp);
}

/// Walks the candidates in FEFO order taking `min(remaining, free)` from each.
///
/// Returns `InsufficientStock` when the candidates cannot cover `quantity`.
pub fn plan_from_candidates(
    medicine_id: Uuid,
    quantity: i32,
    mut candidates: Vec<Candidate>,
) -> Result<Vec<AllocationStep>, ServiceError> {
    candidates.retain(|c| c.free > 0);
    fefo_order(&mut candidates);

    let mut remaining = quantity;
    let mut steps = Vec::new();
    for candidate in &candidates {
        if remaining <= 0 {
            break;
        }
        let take = remaining.min(candidate.free);
        steps.push(AllocationStep {
            batch_id: candidate.batch_id,
            take,
            version: candidate.version,
        });
        remaining -= take;
    }

    if remaining > 0 {
        let available = candidates.iter().map(|c| c.free).sum();
        return Err(ServiceError::insufficient(medicine_id, quantity, available));
    }

    Ok(steps)
}

/// Plans against the store, on a plain connection or inside a transaction.
pub async fn plan<C: ConnectionTrait>(
    conn: &C,
    store_id: Uuid,
    medicine_id: Uuid,
    quantity: i32,
) -> Result<Vec<AllocationStep>, ServiceError> {
    let batches = inventory_batch::Entity::find()
        .filter(inventory_batch::Column::StoreId.eq(store_id))
        .filter(inventory_batch::Column::MedicineId.eq(medicine_id))
        .filter(inventory_batch::Column::QtyAvailable.gt(0))
        .all(conn)
        .await?;

    let candidates = batches.iter().map(Candidate::from).collect();
    let steps = plan_from_candidates(medicine_id, quantity, candidates)?;
    debug!(
        medicine_id = %medicine_id,
        quantity,
        batches = steps.len(),
        "FEFO plan built"
    );
    Ok(steps)
}

/// Read-only planning entry point
#[derive(Clone)]
pub struct AllocationService {
    db_pool: Arc<DbPool>,
}

impl AllocationService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Returns the batches `quantity` units would currently be taken from.
    #[instrument(skip(self))]
    pub async fn plan_allocation(
        &self,
        store_id: Uuid,
        medicine_id: Uuid,
        quantity: i32,
    ) -> Result<Vec<AllocationStep>, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be positive".into(),
            ));
        }
        plan(&*self.db_pool, store_id, medicine_id, quantity).await
    }
}
