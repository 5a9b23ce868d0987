#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rx_ledger::db::{self, DbPool};
use rx_ledger::entities::inventory_batch;
use rx_ledger::events::{process_events, EventSender};
use rx_ledger::services::inventory::NewBatch;
use rx_ledger::services::ledger::Reconciliation;
use rx_ledger::{ConcurrencyPolicy, DbMedicineCatalog, LedgerContext, ServiceContainer};
use sea_orm::EntityTrait;
use uuid::Uuid;

/// One store's worth of engine backed by a private in-memory SQLite database.
pub struct TestLedger {
    pub db: Arc<DbPool>,
    pub services: ServiceContainer,
    pub catalog: DbMedicineCatalog,
    pub store_id: Uuid,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestLedger {
    pub async fn new() -> Self {
        Self::with_policy(ConcurrencyPolicy::default()).await
    }

    pub async fn with_policy(policy: ConcurrencyPolicy) -> Self {
        let pool = db::establish_connection("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        db::run_migrations(&pool).await.expect("migrations");
        let db = Arc::new(pool);

        let (events, rx) = EventSender::channel(256);
        let event_task = tokio::spawn(process_events(rx));

        let ctx = LedgerContext::new(db.clone(), events).with_policy(policy);
        Self {
            services: ServiceContainer::from_context(ctx),
            catalog: DbMedicineCatalog::new(db.clone()),
            db,
            store_id: Uuid::new_v4(),
            _event_task: event_task,
        }
    }

    /// Registers a medicine in this ledger's store.
    pub async fn medicine(&self, name: &str) -> Uuid {
        self.medicine_in(self.store_id, name).await
    }

    pub async fn medicine_in(&self, store_id: Uuid, name: &str) -> Uuid {
        self.catalog
            .register(store_id, name)
            .await
            .expect("register medicine")
            .id
    }

    /// Creates a batch through the inventory service so its RECEIPT movement
    /// exists too.
    pub async fn batch(
        &self,
        medicine_id: Uuid,
        qty: i32,
        expiry: Option<NaiveDate>,
    ) -> inventory_batch::Model {
        self.batch_received(medicine_id, qty, expiry, Utc::now()).await
    }

    pub async fn batch_received(
        &self,
        medicine_id: Uuid,
        qty: i32,
        expiry: Option<NaiveDate>,
        received_at: DateTime<Utc>,
    ) -> inventory_batch::Model {
        let input = NewBatch {
            expiry_date: expiry,
            received_at: Some(received_at),
            ..NewBatch::new(medicine_id, qty)
        };
        self.services
            .inventory
            .create_batch(self.store_id, input)
            .await
            .expect("create batch")
    }

    pub async fn reload(&self, batch_id: Uuid) -> inventory_batch::Model {
        inventory_batch::Entity::find_by_id(batch_id)
            .one(&*self.db)
            .await
            .expect("query batch")
            .expect("batch exists")
    }

    pub async fn quantities(&self, batch_id: Uuid) -> (i32, i32) {
        let batch = self.reload(batch_id).await;
        (batch.qty_available, batch.qty_reserved)
    }

    pub async fn reconcile(&self, batch_id: Uuid) -> Reconciliation {
        self.services
            .ledger
            .reconcile(self.store_id, batch_id)
            .await
            .expect("reconcile")
    }

    pub async fn assert_reconciles(&self, batch_id: Uuid) {
        let report = self.reconcile(batch_id).await;
        assert!(report.is_consistent(), "ledger drift: {:?}", report);
        assert!(report.qty_available >= 0 && report.qty_reserved >= 0);
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}
