use std::sync::Arc;
use std::time::Duration;

use crate::config::LedgerConfig;
use crate::db::DbPool;
use crate::events::EventSender;

// Building blocks shared by every coordinator
pub mod allocation;
pub mod catalog;
pub mod concurrency;
pub mod ledger;

// Coordinators
pub mod inventory;
pub mod reorders;
pub mod reservations;
pub mod sales;

// Service factory for dependency injection
pub mod factory;

use catalog::{DbMedicineCatalog, MedicineCatalog};

/// Retry and timeout knobs shared by the coordinators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyPolicy {
    /// Upper bound for one unit of work; exceeding it rolls everything back.
    pub transaction_timeout: Duration,
    /// Re-reads after a version conflict on pinned sale lines and on
    /// reservation cancel/consume.
    pub conflict_retry_limit: u32,
    /// Whole-operation attempts for supplier receiving.
    pub receiving_max_attempts: u32,
    /// First receiving backoff; doubled per attempt.
    pub receiving_backoff: Duration,
    pub reservation_ttl: chrono::Duration,
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        Self {
            transaction_timeout: Duration::from_secs(45),
            conflict_retry_limit: 1,
            receiving_max_attempts: 5,
            receiving_backoff: Duration::from_millis(25),
            reservation_ttl: chrono::Duration::minutes(30),
        }
    }
}

impl From<&LedgerConfig> for ConcurrencyPolicy {
    fn from(cfg: &LedgerConfig) -> Self {
        Self {
            transaction_timeout: cfg.transaction_timeout(),
            conflict_retry_limit: cfg.conflict_retry_limit,
            receiving_max_attempts: cfg.receiving_max_attempts,
            receiving_backoff: Duration::from_millis(cfg.receiving_backoff_ms),
            reservation_ttl: chrono::Duration::minutes(cfg.reservation_ttl_minutes),
        }
    }
}

impl ConcurrencyPolicy {
    /// Backoff before receiving attempt `attempt` (1-based).
    pub fn receiving_backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(10);
        self.receiving_backoff.saturating_mul(1u32 << exp)
    }
}

/// Everything a coordinator needs, handed in explicitly.
#[derive(Clone)]
pub struct LedgerContext {
    pub db: Arc<DbPool>,
    pub events: EventSender,
    pub catalog: Arc<dyn MedicineCatalog>,
    pub policy: ConcurrencyPolicy,
}

impl LedgerContext {
    /// Context backed by the `medicines` table with the default policy.
    pub fn new(db: Arc<DbPool>, events: EventSender) -> Self {
        let catalog: Arc<dyn MedicineCatalog> = Arc::new(DbMedicineCatalog::new(db.clone()));
        Self {
            db,
            events,
            catalog,
            policy: ConcurrencyPolicy::default(),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn MedicineCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_follows_config() {
        let mut cfg = LedgerConfig::new("sqlite::memory:", "test");
        cfg.conflict_retry_limit = 3;
        cfg.receiving_backoff_ms = 10;
        cfg.reservation_ttl_minutes = 5;
        let policy = ConcurrencyPolicy::from(&cfg);

        assert_eq!(policy.conflict_retry_limit, 3);
        assert_eq!(policy.reservation_ttl, chrono::Duration::minutes(5));
        assert_eq!(policy.receiving_backoff_for(1), Duration::from_millis(10));
        assert_eq!(policy.receiving_backoff_for(3), Duration::from_millis(40));
    }
}
