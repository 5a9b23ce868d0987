//! rx-ledger
//!
//! Inventory ledger and allocation engine for multi-tenant pharmacies:
//! expiring batches drawn first-expiry-first-out, an append-only movement
//! ledger that reconciles with batch quantities, and optimistic concurrency
//! on every batch write. Sales, reservations and supplier receiving are each
//! applied as a single all-or-nothing transaction.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

pub use config::{init_tracing, load_config, LedgerConfig};
pub use errors::{ErrorResponse, ServiceError};
pub use events::{Event, EventSender};
pub use services::allocation::AllocationStep;
pub use services::catalog::{DbMedicineCatalog, MedicineCatalog};
pub use services::factory::{ServiceContainer, ServiceFactory};
pub use services::{ConcurrencyPolicy, LedgerContext};
