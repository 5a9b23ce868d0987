//! Optimistic concurrency on batches
//!
//! Every change to a batch's quantities is a single conditional UPDATE keyed
//! on `(id, version)`. A successful write bumps the version by exactly one.
//! The swap itself never retries. `apply_with_reread` and
//! `retry_on_version_conflict` carry the two retry policies callers choose from.

use std::future::Future;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entities::inventory_batch::{self, Column};
use crate::errors::ServiceError;

/// Signed change to a batch's quantity columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuantityDelta {
    pub available: i32,
    pub reserved: i32,
    pub received: i32,
}

impl QuantityDelta {
    /// Sale or write-off straight from the shelf.
    pub fn consume(qty: i32) -> Self {
        Self {
            available: -qty,
            ..Default::default()
        }
    }

    /// Move units from available into a hold.
    pub fn hold(qty: i32) -> Self {
        Self {
            available: -qty,
            reserved: qty,
            ..Default::default()
        }
    }

    /// Give held units back to the shelf.
    pub fn release(qty: i32) -> Self {
        Self {
            available: qty,
            reserved: -qty,
            ..Default::default()
        }
    }

    /// Held units leave the store.
    pub fn settle_hold(qty: i32) -> Self {
        Self {
            reserved: -qty,
            ..Default::default()
        }
    }

    /// Goods booked in from a supplier or import.
    pub fn receive(qty: i32) -> Self {
        Self {
            available: qty,
            received: qty,
            ..Default::default()
        }
    }

    /// Manual correction of the available column.
    pub fn adjust(delta: i32) -> Self {
        Self {
            available: delta,
            ..Default::default()
        }
    }

    /// Net change to on-hand stock, which is what the ledger records.
    pub fn on_hand(&self) -> i32 {
        self.available + self.reserved
    }
}

/// Lot attributes a supplier receipt may restate. `None` keeps the stored
/// value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LotDetails {
    pub expiry_date: Option<NaiveDate>,
    pub purchase_price: Option<Decimal>,
    pub mrp: Option<Decimal>,
}

/// Applies `delta` to a batch if and only if its version is still
/// `expected_version`, returning the updated row.
///
/// A write that would drive `qty_available` or `qty_reserved` negative is
/// refused the same way. When no row was updated the batch is re-read to
/// report why: missing, version moved, or not enough stock.
#[instrument(skip(conn))]
pub async fn compare_and_swap_quantity<C: ConnectionTrait>(
    conn: &C,
    batch_id: Uuid,
    expected_version: i32,
    delta: QuantityDelta,
) -> Result<inventory_batch::Model, ServiceError> {
    swap(conn, batch_id, expected_version, delta, LotDetails::default()).await
}

/// Books `qty` received units into an existing lot and restates whichever
/// lot details the receipt carries, under the same version guard.
#[instrument(skip(conn))]
pub async fn compare_and_swap_receipt<C: ConnectionTrait>(
    conn: &C,
    batch_id: Uuid,
    expected_version: i32,
    qty: i32,
    details: LotDetails,
) -> Result<inventory_batch::Model, ServiceError> {
    swap(
        conn,
        batch_id,
        expected_version,
        QuantityDelta::receive(qty),
        details,
    )
    .await
}

async fn swap<C: ConnectionTrait>(
    conn: &C,
    batch_id: Uuid,
    expected_version: i32,
    delta: QuantityDelta,
    details: LotDetails,
) -> Result<inventory_batch::Model, ServiceError> {
    let mut update = inventory_batch::Entity::update_many()
        .col_expr(
            Column::QtyAvailable,
            Expr::col(Column::QtyAvailable).add(delta.available),
        )
        .col_expr(
            Column::QtyReserved,
            Expr::col(Column::QtyReserved).add(delta.reserved),
        )
        .col_expr(
            Column::QtyReceived,
            Expr::col(Column::QtyReceived).add(delta.received),
        )
        .col_expr(Column::Version, Expr::value(expected_version + 1))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(Column::Id.eq(batch_id))
        .filter(Column::Version.eq(expected_version));

    if let Some(expiry) = details.expiry_date {
        update = update.col_expr(Column::ExpiryDate, Expr::value(Some(expiry)));
    }
    if let Some(price) = details.purchase_price {
        update = update.col_expr(Column::PurchasePrice, Expr::value(Some(price)));
    }
    if let Some(mrp) = details.mrp {
        update = update.col_expr(Column::Mrp, Expr::value(Some(mrp)));
    }
    if delta.available < 0 {
        update = update.filter(Column::QtyAvailable.gte(-delta.available));
    }
    if delta.reserved < 0 {
        update = update.filter(Column::QtyReserved.gte(-delta.reserved));
    }

    let result = update.exec(conn).await?;

    if result.rows_affected == 1 {
        counter!("rx_ledger.cas.applied", 1);
        let updated = inventory_batch::Entity::find_by_id(batch_id)
            .one(conn)
            .await?
            .ok_or(ServiceError::BatchNotFound(batch_id))?;
        debug!(batch_id = %batch_id, version = updated.version, "Batch quantities swapped");
        return Ok(updated);
    }

    let current = inventory_batch::Entity::find_by_id(batch_id)
        .one(conn)
        .await?
        .ok_or(ServiceError::BatchNotFound(batch_id))?;

    if current.version != expected_version {
        counter!("rx_ledger.cas.version_conflicts", 1);
        debug!(
            batch_id = %batch_id,
            expected_version,
            actual_version = current.version,
            "Version conflict"
        );
        return Err(ServiceError::VersionConflict {
            batch_id,
            expected: expected_version,
        });
    }

    counter!("rx_ledger.cas.insufficient", 1);
    if delta.available < 0 && current.qty_available < -delta.available {
        Err(ServiceError::insufficient(
            current.medicine_id,
            -delta.available,
            current.qty_available,
        ))
    } else {
        Err(ServiceError::insufficient(
            current.medicine_id,
            -delta.reserved,
            current.qty_reserved,
        ))
    }
}

/// Applies `delta` starting from the version in `batch`, re-reading and
/// trying again after a version conflict at most `retry_limit` times.
///
/// Stock shortfalls are never retried.
pub async fn apply_with_reread<C: ConnectionTrait>(
    conn: &C,
    batch: &inventory_batch::Model,
    delta: QuantityDelta,
    retry_limit: u32,
) -> Result<inventory_batch::Model, ServiceError> {
    let mut version = batch.version;
    let mut retries = 0;
    loop {
        match compare_and_swap_quantity(conn, batch.id, version, delta).await {
            Err(ServiceError::VersionConflict { .. }) if retries < retry_limit => {
                retries += 1;
                counter!("rx_ledger.cas.retries", 1);
                let current = inventory_batch::Entity::find_by_id(batch.id)
                    .one(conn)
                    .await?
                    .ok_or(ServiceError::BatchNotFound(batch.id))?;
                debug!(
                    batch_id = %batch.id,
                    stale_version = version,
                    current_version = current.version,
                    retries,
                    "Retrying against re-read version"
                );
                version = current.version;
            }
            outcome => return outcome,
        }
    }
}

/// Runs `op` until it stops failing with a version conflict or
/// `max_attempts` runs have been made, sleeping `backoff(attempt)` between
/// runs. Returns the value together with the number of attempts used.
///
/// `op` receives the 1-based attempt number and must be a complete unit of
/// work, since a conflict means everything it staged was rolled back.
pub async fn retry_on_version_conflict<T, F, Fut, B>(
    max_attempts: u32,
    backoff: B,
    mut op: F,
) -> Result<(T, u32), ServiceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
    B: Fn(u32) -> Duration,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(e) if e.is_version_conflict() && attempt < max_attempts => {
                let wait = backoff(attempt);
                counter!("rx_ledger.cas.retries", 1);
                warn!(
                    attempt,
                    backoff_ms = wait.as_millis() as u64,
                    error = %e,
                    "Version conflict; rerunning unit of work"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::cell::Cell;

    fn conflict() -> ServiceError {
        ServiceError::VersionConflict {
            batch_id: Uuid::nil(),
            expected: 0,
        }
    }

    #[tokio::test]
    async fn conflicts_rerun_until_success() {
        let calls = Cell::new(0);
        let (value, attempts) = retry_on_version_conflict(
            5,
            |_| Duration::from_millis(1),
            |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 3 {
                        Err(conflict())
                    } else {
                        Ok(attempt * 10)
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!((value, attempts), (30, 3));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = Cell::new(0);
        let result: Result<((), u32), _> = retry_on_version_conflict(
            2,
            |_| Duration::ZERO,
            |_| {
                calls.set(calls.get() + 1);
                async { Err(conflict()) }
            },
        )
        .await;

        assert_matches!(result, Err(ServiceError::VersionConflict { .. }));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn other_failures_are_not_rerun() {
        let calls = Cell::new(0);
        let result: Result<((), u32), _> = retry_on_version_conflict(
            5,
            |_| Duration::ZERO,
            |_| {
                calls.set(calls.get() + 1);
                async { Err(ServiceError::insufficient(Uuid::nil(), 3, 1)) }
            },
        )
        .await;

        assert_matches!(result, Err(ServiceError::InsufficientStock { .. }));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn deltas_keep_on_hand_consistent() {
        assert_eq!(QuantityDelta::hold(4).on_hand(), 0);
        assert_eq!(QuantityDelta::release(4).on_hand(), 0);
        assert_eq!(QuantityDelta::consume(3).on_hand(), -3);
        assert_eq!(QuantityDelta::settle_hold(3).on_hand(), -3);
        assert_eq!(QuantityDelta::receive(10).on_hand(), 10);
        assert_eq!(QuantityDelta::receive(10).received, 10);
    }
}
