use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::LedgerConfig;
use crate::db::establish_connection_from_config;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::{
    allocation::AllocationService, inventory::InventoryService, ledger::LedgerService,
    reorders::ReorderService, reservations::ReservationService, sales::SaleService,
    ConcurrencyPolicy, LedgerContext,
};

/// Factory for creating service instances with shared dependencies
pub struct ServiceFactory {
    ctx: LedgerContext,
}

impl ServiceFactory {
    /// Creates a new service factory with the given context
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Connects to the configured database and wires the engine from
    /// `cfg`. The caller owns the event receiver, usually handing it to
    /// [`crate::events::process_events`].
    pub async fn from_config(
        cfg: &LedgerConfig,
    ) -> Result<(Self, mpsc::Receiver<Event>), ServiceError> {
        let db = Arc::new(establish_connection_from_config(cfg).await?);
        let (events, rx) = EventSender::channel(cfg.event_channel_capacity);
        let ctx = LedgerContext::new(db, events).with_policy(ConcurrencyPolicy::from(cfg));
        info!(
            environment = %cfg.environment,
            event_channel_capacity = cfg.event_channel_capacity,
            "Ledger services configured"
        );
        Ok((Self::new(ctx), rx))
    }

    pub fn allocation_service(&self) -> AllocationService {
        AllocationService::new(self.ctx.db.clone())
    }

    pub fn ledger_service(&self) -> LedgerService {
        LedgerService::new(self.ctx.db.clone())
    }

    pub fn inventory_service(&self) -> InventoryService {
        InventoryService::new(self.ctx.clone())
    }

    pub fn sale_service(&self) -> SaleService {
        SaleService::new(self.ctx.clone())
    }

    pub fn reservation_service(&self) -> ReservationService {
        ReservationService::new(self.ctx.clone())
    }

    pub fn reorder_service(&self) -> ReorderService {
        ReorderService::new(self.ctx.clone())
    }

    /// Gets a reference to the shared context
    pub fn context(&self) -> &LedgerContext {
        &self.ctx
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub allocation: Arc<AllocationService>,
    pub ledger: Arc<LedgerService>,
    pub inventory: Arc<InventoryService>,
    pub sales: Arc<SaleService>,
    pub reservations: Arc<ReservationService>,
    pub reorders: Arc<ReorderService>,
}

impl ServiceContainer {
    /// Creates a new service container with all services initialized
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            allocation: Arc::new(factory.allocation_service()),
            ledger: Arc::new(factory.ledger_service()),
            inventory: Arc::new(factory.inventory_service()),
            sales: Arc::new(factory.sale_service()),
            reservations: Arc::new(factory.reservation_service()),
            reorders: Arc::new(factory.reorder_service()),
        }
    }

    pub fn from_context(ctx: LedgerContext) -> Self {
        Self::new(&ServiceFactory::new(ctx))
    }
}
