//! Reservation coordinator
//!
//! A reservation moves units from a batch's available quantity into its
//! reserved quantity. Cancelling gives them back; a sale made from the
//! reservation takes them out of the store.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::db::transaction::{begin, bounded, finish};
use crate::entities::reservation::{self, ReservationStatus};
use crate::entities::{inventory_batch, reservation_item};
use crate::errors::ServiceError;
use crate::events::Event;
use crate::services::allocation;
use crate::services::concurrency::{apply_with_reread, compare_and_swap_quantity, QuantityDelta};
use crate::services::LedgerContext;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReservationLine {
    pub medicine_id: Uuid,
    #[validate(range(min = 1))]
    pub qty: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CreateReservation {
    #[validate(length(min = 1))]
    pub items: Vec<ReservationLine>,
    /// Defaults to now plus the configured hold time
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
}

impl CreateReservation {
    pub fn new(items: Vec<ReservationLine>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationWithItems {
    pub reservation: reservation::Model,
    pub items: Vec<reservation_item::Model>,
}

impl ReservationWithItems {
    pub fn held_qty(&self) -> i32 {
        self.items.iter().map(|i| i.qty).sum()
    }
}

pub(crate) async fn load_reservation<C: ConnectionTrait>(
    conn: &C,
    store_id: Uuid,
    reservation_id: Uuid,
) -> Result<ReservationWithItems, ServiceError> {
    let reservation = reservation::Entity::find_by_id(reservation_id)
        .filter(reservation::Column::StoreId.eq(store_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("reservation {}", reservation_id)))?;
    let items = reservation_item::Entity::find()
        .filter(reservation_item::Column::ReservationId.eq(reservation_id))
        .all(conn)
        .await?;
    Ok(ReservationWithItems { reservation, items })
}

/// Moves a reservation to `to` only if it is still in one of `from`.
///
/// Returns false when another writer got there first, so a transition is
/// claimed before any stock is touched and can never be applied twice.
pub(crate) async fn claim_transition<C: ConnectionTrait>(
    conn: &C,
    reservation_id: Uuid,
    from: &[ReservationStatus],
    to: ReservationStatus,
) -> Result<bool, ServiceError> {
    let result = reservation::Entity::update_many()
        .col_expr(reservation::Column::Status, Expr::value(to))
        .col_expr(reservation::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(reservation::Column::Id.eq(reservation_id))
        .filter(reservation::Column::Status.is_in(from.iter().copied()))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

/// Service for reservations
#[derive(Clone)]
pub struct ReservationService {
    ctx: LedgerContext,
}

impl ReservationService {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Holds stock for every line, FEFO. All lines are held or none.
    #[instrument(skip(self, request), fields(lines = request.items.len()))]
    pub async fn create_reservation(
        &self,
        store_id: Uuid,
        request: CreateReservation,
    ) -> Result<ReservationWithItems, ServiceError> {
        request.validate()?;
        for line in &request.items {
            line.validate()?;
        }
        let medicine_ids: Vec<Uuid> = request.items.iter().map(|l| l.medicine_id).collect();
        self.ctx.catalog.ensure_all(store_id, &medicine_ids).await?;

        let expires_at = request
            .expires_at
            .unwrap_or_else(|| Utc::now() + self.ctx.policy.reservation_ttl);

        let txn = begin(&self.ctx.db).await?;
        let outcome = bounded(
            self.ctx.policy.transaction_timeout,
            Self::create_in(&txn, store_id, &request, expires_at),
        )
        .await;
        let created = finish(txn, outcome).await?;

        counter!("rx_ledger.reservations.created", 1);
        info!(
            reservation_id = %created.reservation.id,
            held = created.held_qty(),
            batches = created.items.len(),
            "Reservation created"
        );
        self.ctx.events.emit(Event::ReservationCreated {
            store_id,
            reservation_id: created.reservation.id,
        });
        Ok(created)
    }

    async fn create_in(
        txn: &DatabaseTransaction,
        store_id: Uuid,
        request: &CreateReservation,
        expires_at: DateTime<Utc>,
    ) -> Result<ReservationWithItems, ServiceError> {
        let now = Utc::now();
        let reservation = reservation::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id),
            status: Set(ReservationStatus::Pending),
            created_by: Set(request.created_by),
            expires_at: Set(expires_at),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await?;

        let mut items = Vec::new();
        for line in &request.items {
            let steps = allocation::plan(txn, store_id, line.medicine_id, line.qty).await?;
            for step in steps {
                compare_and_swap_quantity(
                    txn,
                    step.batch_id,
                    step.version,
                    QuantityDelta::hold(step.take),
                )
                .await?;
                let item = reservation_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    reservation_id: Set(reservation.id),
                    batch_id: Set(step.batch_id),
                    medicine_id: Set(line.medicine_id),
                    qty: Set(step.take),
                }
                .insert(txn)
                .await?;
                items.push(item);
            }
        }

        Ok(ReservationWithItems { reservation, items })
    }

    /// PENDING to CONFIRMED. Confirming twice is a no-op; stock is untouched.
    #[instrument(skip(self))]
    pub async fn confirm_reservation(
        &self,
        store_id: Uuid,
        reservation_id: Uuid,
    ) -> Result<ReservationWithItems, ServiceError> {
        let db = &*self.ctx.db;
        let current = load_reservation(db, store_id, reservation_id).await?;
        match current.reservation.status {
            ReservationStatus::Confirmed => return Ok(current),
            ReservationStatus::Pending => {}
            other => {
                return Err(ServiceError::invalid_transition(
                    "reservation",
                    other,
                    ReservationStatus::Confirmed,
                ))
            }
        }

        if !claim_transition(
            db,
            reservation_id,
            &[ReservationStatus::Pending],
            ReservationStatus::Confirmed,
        )
        .await?
        {
            // Lost a race; report whatever state won.
            let now = load_reservation(db, store_id, reservation_id).await?;
            return match now.reservation.status {
                ReservationStatus::Confirmed => Ok(now),
                other => Err(ServiceError::invalid_transition(
                    "reservation",
                    other,
                    ReservationStatus::Confirmed,
                )),
            };
        }

        counter!("rx_ledger.reservations.confirmed", 1);
        info!(reservation_id = %reservation_id, "Reservation confirmed");
        self.ctx.events.emit(Event::ReservationConfirmed {
            store_id,
            reservation_id,
        });
        load_reservation(db, store_id, reservation_id).await
    }

    /// Releases every hold and marks the reservation CANCELLED.
    ///
    /// Cancelling a cancelled reservation is a no-op; a consumed one cannot
    /// be cancelled.
    #[instrument(skip(self))]
    pub async fn cancel_reservation(
        &self,
        store_id: Uuid,
        reservation_id: Uuid,
    ) -> Result<ReservationWithItems, ServiceError> {
        let txn = begin(&self.ctx.db).await?;
        let outcome = bounded(
            self.ctx.policy.transaction_timeout,
            Self::cancel_in(
                &txn,
                store_id,
                reservation_id,
                self.ctx.policy.conflict_retry_limit,
            ),
        )
        .await;
        let (cancelled, released) = finish(txn, outcome).await?;

        if released {
            counter!("rx_ledger.reservations.cancelled", 1);
            info!(
                reservation_id = %reservation_id,
                released = cancelled.held_qty(),
                "Reservation cancelled"
            );
            self.ctx.events.emit(Event::ReservationCancelled {
                store_id,
                reservation_id,
            });
        }
        Ok(cancelled)
    }

    async fn cancel_in(
        txn: &DatabaseTransaction,
        store_id: Uuid,
        reservation_id: Uuid,
        retry_limit: u32,
    ) -> Result<(ReservationWithItems, bool), ServiceError> {
        let current = load_reservation(txn, store_id, reservation_id).await?;
        let claimed = current.reservation.status.is_holding()
            && claim_transition(
                txn,
                reservation_id,
                &[ReservationStatus::Pending, ReservationStatus::Confirmed],
                ReservationStatus::Cancelled,
            )
            .await?;

        if !claimed {
            let now = load_reservation(txn, store_id, reservation_id).await?;
            return match now.reservation.status {
                ReservationStatus::Cancelled => {
                    debug!(reservation_id = %reservation_id, "Reservation already cancelled");
                    Ok((now, false))
                }
                other => Err(ServiceError::invalid_transition(
                    "reservation",
                    other,
                    ReservationStatus::Cancelled,
                )),
            };
        }

        for item in &current.items {
            let batch = inventory_batch::Entity::find_by_id(item.batch_id)
                .one(txn)
                .await?
                .ok_or(ServiceError::BatchNotFound(item.batch_id))?;
            apply_with_reread(txn, &batch, QuantityDelta::release(item.qty), retry_limit).await?;
        }

        let cancelled = load_reservation(txn, store_id, reservation_id).await?;
        Ok((cancelled, true))
    }

    #[instrument(skip(self))]
    pub async fn get_reservation(
        &self,
        store_id: Uuid,
        reservation_id: Uuid,
    ) -> Result<ReservationWithItems, ServiceError> {
        load_reservation(&*self.ctx.db, store_id, reservation_id).await
    }
}
