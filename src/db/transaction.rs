/*!
 * Transaction Helper Utilities
 *
 * One logical unit of work (a sale, a reservation operation, a receipt) runs
 * inside exactly one database transaction. These helpers open it, bound it by
 * the configured timeout, and commit or roll it back as a whole.
 */

use crate::errors::ServiceError;
use metrics::counter;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Opens a transaction on the pool.
pub async fn begin(db: &DatabaseConnection) -> Result<DatabaseTransaction, ServiceError> {
    db.begin().await.map_err(|e| {
        warn!(error = %e, "Failed to open transaction");
        ServiceError::InternalStoreFailure(format!("failed to open transaction: {}", e))
    })
}

/// Runs the staged work of a transaction under a deadline.
///
/// An elapsed deadline is reported as an internal store failure; the caller
/// must then hand the outcome to [`finish`], which rolls everything back.
pub async fn bounded<T, F>(limit: Duration, work: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(limit, work).await {
        Ok(outcome) => outcome,
        Err(_) => {
            counter!("rx_ledger.transactions.timed_out", 1);
            Err(ServiceError::InternalStoreFailure(format!(
                "transaction exceeded {:?}",
                limit
            )))
        }
    }
}

/// Commits on success, rolls back on failure.
///
/// A failed commit is surfaced as an internal store failure. A failed
/// rollback is logged and the original error is returned; the store
/// discards the uncommitted transaction either way.
pub async fn finish<T>(
    txn: DatabaseTransaction,
    outcome: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    match outcome {
        Ok(value) => {
            txn.commit().await.map_err(|e| {
                counter!("rx_ledger.transactions.commit_failed", 1);
                ServiceError::InternalStoreFailure(format!("commit failed: {}", e))
            })?;
            Ok(value)
        }
        Err(err) => {
            debug!(error = %err, "Rolling back transaction");
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection, run_migrations};
    use crate::entities::medicine;
    use assert_matches::assert_matches;
    use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
    use uuid::Uuid;

    async fn pool() -> DatabaseConnection {
        let pool = establish_connection("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn medicine_row() -> medicine::ActiveModel {
        medicine::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(Uuid::new_v4()),
            name: Set("Paracetamol 500mg".into()),
        }
    }

    #[tokio::test]
    async fn commit_keeps_staged_rows() {
        let db = pool().await;
        let txn = begin(&db).await.unwrap();
        let outcome = medicine_row().insert(&txn).await.map_err(ServiceError::from);
        finish(txn, outcome).await.unwrap();

        assert_eq!(medicine::Entity::find().count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failure_rolls_back_staged_rows() {
        let db = pool().await;
        let txn = begin(&db).await.unwrap();
        let outcome: Result<(), ServiceError> = async {
            medicine_row().insert(&txn).await?;
            Err(ServiceError::ValidationError("abort".into()))
        }
        .await;
        let result = finish(txn, outcome).await;

        assert_matches!(result, Err(ServiceError::ValidationError(_)));
        assert_eq!(medicine::Entity::find().count(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn elapsed_deadline_is_a_store_failure() {
        let result: Result<(), ServiceError> = bounded(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

        assert_matches!(result, Err(ServiceError::InternalStoreFailure(_)));
    }
}
