use async_trait::async_trait;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::medicine;
use crate::errors::ServiceError;

/// Lookup used to check that a medicine id belongs to the calling store.
///
/// Coordinators call it before opening their transaction.
#[async_trait]
pub trait MedicineCatalog: Send + Sync {
    async fn ensure_medicine(&self, store_id: Uuid, medicine_id: Uuid) -> Result<(), ServiceError>;

    /// Checks every distinct id once.
    async fn ensure_all(
        &self,
        store_id: Uuid,
        medicine_ids: &[Uuid],
    ) -> Result<(), ServiceError> {
        let distinct: BTreeSet<Uuid> = medicine_ids.iter().copied().collect();
        for medicine_id in distinct {
            self.ensure_medicine(store_id, medicine_id).await?;
        }
        Ok(())
    }
}

/// Catalog backed by the `medicines` table.
#[derive(Clone)]
pub struct DbMedicineCatalog {
    db_pool: Arc<DbPool>,
}

impl DbMedicineCatalog {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Adds a medicine to a store's catalog.
    #[instrument(skip(self))]
    pub async fn register(
        &self,
        store_id: Uuid,
        name: &str,
    ) -> Result<medicine::Model, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "medicine name must not be empty".into(),
            ));
        }
        let model = medicine::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id),
            name: Set(name.trim().to_string()),
        }
        .insert(&*self.db_pool)
        .await?;
        debug!(medicine_id = %model.id, "Medicine registered");
        Ok(model)
    }
}

#[async_trait]
impl MedicineCatalog for DbMedicineCatalog {
    async fn ensure_medicine(&self, store_id: Uuid, medicine_id: Uuid) -> Result<(), ServiceError> {
        medicine::Entity::find_by_id(medicine_id)
            .filter(medicine::Column::StoreId.eq(store_id))
            .one(&*self.db_pool)
            .await?
            .map(|_| ())
            .ok_or(ServiceError::MedicineNotFound(medicine_id))
    }
}
