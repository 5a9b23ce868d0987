use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error taxonomy of the inventory engine.
///
/// Every public operation returns `Result<T, ServiceError>`. Stock and
/// concurrency failures are typed so callers can tell "retry the whole
/// operation" apart from "fix the request".
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Insufficient stock for medicine {medicine_id}: requested {requested}, available {available}")]
    InsufficientStock {
        medicine_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Version conflict on batch {batch_id}: expected version {expected}")]
    VersionConflict { batch_id: Uuid, expected: i32 },

    #[error("Batch not found: {0}")]
    BatchNotFound(Uuid),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Medicine not found for store: {0}")]
    MedicineNotFound(Uuid),

    #[error("Invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal store failure: {0}")]
    InternalStoreFailure(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    pub fn insufficient(medicine_id: Uuid, requested: i32, available: i32) -> Self {
        ServiceError::InsufficientStock {
            medicine_id,
            requested,
            available,
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        ServiceError::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Stable machine-readable code, suitable for an API layer to surface.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::VersionConflict { .. } => "version_conflict",
            Self::BatchNotFound(_) => "batch_not_found",
            Self::InvalidBatch(_) => "invalid_batch",
            Self::MedicineNotFound(_) => "medicine_not_found",
            Self::InvalidTransition { .. } => "invalid_status_transition",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_failed",
            Self::InternalStoreFailure(_) | Self::DatabaseError(_) | Self::Other(_) => {
                "internal_store_failure"
            }
        }
    }

    /// Whether re-running the whole logical operation may succeed without
    /// changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict { .. }
                | Self::InsufficientStock { .. }
                | Self::InternalStoreFailure(_)
                | Self::DatabaseError(_)
        )
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// Client-facing message; store internals are not leaked.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::Other(_) | Self::InternalStoreFailure(_) => {
                "Internal store failure".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Serializable error body for whatever layer sits in front of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&ServiceError> for ErrorResponse {
    fn from(error: &ServiceError) -> Self {
        Self {
            error: error.code().to_string(),
            message: error.response_message(),
            retryable: error.is_retryable(),
        }
    }
}

pub type AppError = ServiceError;
