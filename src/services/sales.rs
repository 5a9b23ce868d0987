//! Sale coordinator
//!
//! A sale consumes stock line by line, either from a pinned batch or FEFO
//! across several, and records one SALE movement per batch touched. The
//! whole sale commits or nothing does.

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::transaction::{begin, bounded, finish};
use crate::entities::reservation::ReservationStatus;
use crate::entities::sale::{PaymentMethod, PaymentStatus};
use crate::entities::{inventory_batch, sale, sale_item, stock_movement, MovementReason};
use crate::errors::ServiceError;
use crate::events::Event;
use crate::services::allocation;
use crate::services::concurrency::{apply_with_reread, compare_and_swap_quantity, QuantityDelta};
use crate::services::inventory::ensure_non_negative;
use crate::services::ledger::{append, NewMovement};
use crate::services::reservations::{claim_transition, load_reservation};
use crate::services::LedgerContext;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaleLine {
    pub medicine_id: Uuid,
    #[validate(range(min = 1))]
    pub qty: i32,
    /// Pins the line to one batch; otherwise FEFO.
    pub batch_id: Option<Uuid>,
    pub unit_price: Option<Decimal>,
}

impl SaleLine {
    pub fn fefo(medicine_id: Uuid, qty: i32) -> Self {
        Self {
            medicine_id,
            qty,
            batch_id: None,
            unit_price: None,
        }
    }

    pub fn pinned(medicine_id: Uuid, batch_id: Uuid, qty: i32) -> Self {
        Self {
            medicine_id,
            qty,
            batch_id: Some(batch_id),
            unit_price: None,
        }
    }

    pub fn priced(mut self, unit_price: Decimal) -> Self {
        self.unit_price = Some(unit_price);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CreateSale {
    #[validate(length(min = 1))]
    pub items: Vec<SaleLine>,
    pub tax: Option<Decimal>,
    pub discounts: Option<Decimal>,
    pub payment_method: Option<PaymentMethod>,
    #[validate(length(max = 100))]
    pub external_ref: Option<String>,
    pub created_by: Option<Uuid>,
}

impl CreateSale {
    pub fn new(items: Vec<SaleLine>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }
}

/// Payment details recorded when a sale is settled.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct PaySale {
    pub payment_method: Option<PaymentMethod>,
    #[validate(length(max = 100))]
    pub external_ref: Option<String>,
}

/// Turns a reservation's held stock into a sale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaleFromReservation {
    /// Unit price per medicine
    #[serde(default)]
    pub unit_prices: HashMap<Uuid, Decimal>,
    pub tax: Option<Decimal>,
    pub discounts: Option<Decimal>,
    pub payment_method: Option<PaymentMethod>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleWithItems {
    pub sale: sale::Model,
    pub items: Vec<sale_item::Model>,
    pub movement_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub discounts: Decimal,
    pub total_value: Decimal,
}

/// Subtotal of the priced lines plus tax minus discounts, never below zero.
pub fn compute_totals(
    priced_lines: impl IntoIterator<Item = (Option<Decimal>, i32)>,
    tax: Option<Decimal>,
    discounts: Option<Decimal>,
) -> SaleTotals {
    let subtotal: Decimal = priced_lines
        .into_iter()
        .filter_map(|(price, qty)| price.map(|p| p * Decimal::from(qty)))
        .sum();
    let tax = tax.unwrap_or_default();
    let discounts = discounts.unwrap_or_default();
    let total_value = (subtotal + tax - discounts).max(Decimal::ZERO);
    SaleTotals {
        subtotal,
        tax,
        discounts,
        total_value,
    }
}

struct SaleHeader {
    store_id: Uuid,
    totals: SaleTotals,
    payment_method: Option<PaymentMethod>,
    external_ref: Option<String>,
    created_by: Option<Uuid>,
}

async fn insert_sale(
    txn: &DatabaseTransaction,
    header: SaleHeader,
) -> Result<sale::Model, ServiceError> {
    let now = Utc::now();
    let sale = sale::ActiveModel {
        id: Set(Uuid::new_v4()),
        store_id: Set(header.store_id),
        subtotal: Set(header.totals.subtotal),
        tax: Set(header.totals.tax),
        discounts: Set(header.totals.discounts),
        total_value: Set(header.totals.total_value),
        payment_status: Set(PaymentStatus::Pending),
        payment_method: Set(header.payment_method),
        external_ref: Set(header.external_ref),
        created_by: Set(header.created_by),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(txn)
    .await?;
    Ok(sale)
}

async fn insert_sale_item(
    txn: &DatabaseTransaction,
    sale_id: Uuid,
    medicine_id: Uuid,
    batch_id: Option<Uuid>,
    qty: i32,
    unit_price: Option<Decimal>,
) -> Result<sale_item::Model, ServiceError> {
    let item = sale_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        sale_id: Set(sale_id),
        medicine_id: Set(medicine_id),
        batch_id: Set(batch_id),
        qty: Set(qty),
        unit_price: Set(unit_price),
        line_total: Set(unit_price.map(|p| p * Decimal::from(qty))),
        created_at: Set(Utc::now()),
    }
    .insert(txn)
    .await?;
    Ok(item)
}

/// Loads a pinned batch; anything not belonging to the store and medicine
/// is an invalid reference rather than a missing one.
async fn pinned_batch(
    txn: &DatabaseTransaction,
    store_id: Uuid,
    medicine_id: Uuid,
    batch_id: Uuid,
) -> Result<inventory_batch::Model, ServiceError> {
    let batch = inventory_batch::Entity::find_by_id(batch_id)
        .one(txn)
        .await?
        .filter(|b| b.store_id == store_id)
        .ok_or_else(|| {
            ServiceError::InvalidBatch(format!("batch {} does not belong to this store", batch_id))
        })?;
    if batch.medicine_id != medicine_id {
        return Err(ServiceError::InvalidBatch(format!(
            "batch {} does not hold medicine {}",
            batch_id, medicine_id
        )));
    }
    Ok(batch)
}

/// Service for sales
#[derive(Clone)]
pub struct SaleService {
    ctx: LedgerContext,
}

impl SaleService {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Creates a sale and consumes its stock atomically.
    #[instrument(skip(self, request), fields(lines = request.items.len()))]
    pub async fn create_sale(
        &self,
        store_id: Uuid,
        request: CreateSale,
    ) -> Result<SaleWithItems, ServiceError> {
        request.validate()?;
        for line in &request.items {
            line.validate()?;
            ensure_non_negative("unit_price", line.unit_price)?;
        }
        ensure_non_negative("tax", request.tax)?;
        ensure_non_negative("discounts", request.discounts)?;
        let medicine_ids: Vec<Uuid> = request.items.iter().map(|l| l.medicine_id).collect();
        self.ctx.catalog.ensure_all(store_id, &medicine_ids).await?;

        let txn = begin(&self.ctx.db).await?;
        let outcome = bounded(
            self.ctx.policy.transaction_timeout,
            Self::create_sale_in(
                &txn,
                store_id,
                &request,
                self.ctx.policy.conflict_retry_limit,
            ),
        )
        .await;
        let created = match finish(txn, outcome).await {
            Ok(created) => created,
            Err(e) => {
                counter!("rx_ledger.sales.failed", 1, "error" => e.code());
                warn!(error = %e, "Sale rolled back");
                return Err(e);
            }
        };

        counter!("rx_ledger.sales.created", 1);
        info!(
            sale_id = %created.sale.id,
            total_value = %created.sale.total_value,
            movements = created.movement_ids.len(),
            "Sale created"
        );
        self.ctx.events.emit(Event::SaleCreated {
            store_id,
            sale_id: created.sale.id,
            movements: created.movement_ids.len(),
        });
        Ok(created)
    }

    async fn create_sale_in(
        txn: &DatabaseTransaction,
        store_id: Uuid,
        request: &CreateSale,
        retry_limit: u32,
    ) -> Result<SaleWithItems, ServiceError> {
        let totals = compute_totals(
            request.items.iter().map(|l| (l.unit_price, l.qty)),
            request.tax,
            request.discounts,
        );
        let sale = insert_sale(
            txn,
            SaleHeader {
                store_id,
                totals,
                payment_method: request.payment_method,
                external_ref: request.external_ref.clone(),
                created_by: request.created_by,
            },
        )
        .await?;

        let mut items = Vec::with_capacity(request.items.len());
        let mut movement_ids = Vec::new();

        for line in &request.items {
            let item = insert_sale_item(
                txn,
                sale.id,
                line.medicine_id,
                line.batch_id,
                line.qty,
                line.unit_price,
            )
            .await?;

            let touched: Vec<(inventory_batch::Model, i32)> = match line.batch_id {
                Some(batch_id) => {
                    let batch = pinned_batch(txn, store_id, line.medicine_id, batch_id).await?;
                    let updated = apply_with_reread(
                        txn,
                        &batch,
                        QuantityDelta::consume(line.qty),
                        retry_limit,
                    )
                    .await?;
                    vec![(updated, line.qty)]
                }
                None => {
                    let steps =
                        allocation::plan(txn, store_id, line.medicine_id, line.qty).await?;
                    let mut touched = Vec::with_capacity(steps.len());
                    for step in steps {
                        let updated = compare_and_swap_quantity(
                            txn,
                            step.batch_id,
                            step.version,
                            QuantityDelta::consume(step.take),
                        )
                        .await?;
                        touched.push((updated, step.take));
                    }
                    touched
                }
            };

            for (batch, take) in touched {
                let id = append(
                    txn,
                    NewMovement::for_batch(&batch, -take, MovementReason::Sale)
                        .sale_item(item.id)
                        .performed_by(request.created_by),
                )
                .await?;
                movement_ids.push(id);
            }
            items.push(item);
        }

        Ok(SaleWithItems {
            sale,
            items,
            movement_ids,
        })
    }

    /// Marks a sale paid. Paying a paid sale changes nothing.
    #[instrument(skip(self, payment))]
    pub async fn pay_sale(
        &self,
        store_id: Uuid,
        sale_id: Uuid,
        payment: PaySale,
    ) -> Result<sale::Model, ServiceError> {
        payment.validate()?;
        let db = &*self.ctx.db;
        let sale = Self::load_sale(db, store_id, sale_id).await?;
        if sale.payment_status == PaymentStatus::Paid {
            info!(sale_id = %sale_id, "Sale already paid");
            return Ok(sale);
        }

        let mut active: sale::ActiveModel = sale.into();
        active.payment_status = Set(PaymentStatus::Paid);
        if payment.payment_method.is_some() {
            active.payment_method = Set(payment.payment_method);
        }
        if payment.external_ref.is_some() {
            active.external_ref = Set(payment.external_ref);
        }
        active.updated_at = Set(Utc::now());
        let updated = active.update(db).await?;

        counter!("rx_ledger.sales.paid", 1);
        info!(sale_id = %sale_id, "Sale paid");
        self.ctx.events.emit(Event::SalePaid { store_id, sale_id });
        Ok(updated)
    }

    /// Converts a holding reservation into a sale: held units leave the
    /// store, SALE movements are written and the reservation is CONSUMED.
    #[instrument(skip(self, request))]
    pub async fn create_sale_from_reservation(
        &self,
        store_id: Uuid,
        reservation_id: Uuid,
        request: SaleFromReservation,
    ) -> Result<SaleWithItems, ServiceError> {
        for price in request.unit_prices.values() {
            ensure_non_negative("unit_price", Some(*price))?;
        }
        ensure_non_negative("tax", request.tax)?;
        ensure_non_negative("discounts", request.discounts)?;

        let txn = begin(&self.ctx.db).await?;
        let outcome = bounded(
            self.ctx.policy.transaction_timeout,
            Self::sale_from_reservation_in(
                &txn,
                store_id,
                reservation_id,
                &request,
                self.ctx.policy.conflict_retry_limit,
            ),
        )
        .await;
        let created = finish(txn, outcome).await?;

        counter!("rx_ledger.sales.created", 1);
        counter!("rx_ledger.reservations.consumed", 1);
        info!(
            sale_id = %created.sale.id,
            reservation_id = %reservation_id,
            "Reservation consumed into sale"
        );
        self.ctx.events.emit(Event::ReservationConsumed {
            store_id,
            reservation_id,
            sale_id: created.sale.id,
        });
        self.ctx.events.emit(Event::SaleCreated {
            store_id,
            sale_id: created.sale.id,
            movements: created.movement_ids.len(),
        });
        Ok(created)
    }

    async fn sale_from_reservation_in(
        txn: &DatabaseTransaction,
        store_id: Uuid,
        reservation_id: Uuid,
        request: &SaleFromReservation,
        retry_limit: u32,
    ) -> Result<SaleWithItems, ServiceError> {
        let held = load_reservation(txn, store_id, reservation_id).await?;
        let claimed = held.reservation.status.is_holding()
            && claim_transition(
                txn,
                reservation_id,
                &[ReservationStatus::Pending, ReservationStatus::Confirmed],
                ReservationStatus::Consumed,
            )
            .await?;
        if !claimed {
            let now = load_reservation(txn, store_id, reservation_id).await?;
            return Err(ServiceError::invalid_transition(
                "reservation",
                now.reservation.status,
                ReservationStatus::Consumed,
            ));
        }

        let price_of = |medicine_id: &Uuid| request.unit_prices.get(medicine_id).copied();
        let totals = compute_totals(
            held.items.iter().map(|i| (price_of(&i.medicine_id), i.qty)),
            request.tax,
            request.discounts,
        );
        let sale = insert_sale(
            txn,
            SaleHeader {
                store_id,
                totals,
                payment_method: request.payment_method,
                external_ref: Some(format!("reservation:{}", reservation_id)),
                created_by: request.created_by,
            },
        )
        .await?;

        let mut items = Vec::with_capacity(held.items.len());
        let mut movement_ids = Vec::with_capacity(held.items.len());
        for held_item in &held.items {
            let item = insert_sale_item(
                txn,
                sale.id,
                held_item.medicine_id,
                Some(held_item.batch_id),
                held_item.qty,
                price_of(&held_item.medicine_id),
            )
            .await?;
            let batch = inventory_batch::Entity::find_by_id(held_item.batch_id)
                .one(txn)
                .await?
                .ok_or(ServiceError::BatchNotFound(held_item.batch_id))?;
            let updated = apply_with_reread(
                txn,
                &batch,
                QuantityDelta::settle_hold(held_item.qty),
                retry_limit,
            )
            .await?;
            let id = append(
                txn,
                NewMovement::for_batch(&updated, -held_item.qty, MovementReason::Sale)
                    .sale_item(item.id)
                    .performed_by(request.created_by)
                    .note(Some(format!("reservation {}", reservation_id))),
            )
            .await?;
            movement_ids.push(id);
            items.push(item);
        }

        Ok(SaleWithItems {
            sale,
            items,
            movement_ids,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_sale(
        &self,
        store_id: Uuid,
        sale_id: Uuid,
    ) -> Result<SaleWithItems, ServiceError> {
        let db = &*self.ctx.db;
        let sale = Self::load_sale(db, store_id, sale_id).await?;
        let items = sale_item::Entity::find()
            .filter(sale_item::Column::SaleId.eq(sale_id))
            .order_by_asc(sale_item::Column::CreatedAt)
            .all(db)
            .await?;
        let item_ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();
        let movement_ids = if item_ids.is_empty() {
            Vec::new()
        } else {
            stock_movement::Entity::find()
                .filter(stock_movement::Column::SaleItemId.is_in(item_ids))
                .order_by_asc(stock_movement::Column::CreatedAt)
                .all(db)
                .await?
                .into_iter()
                .map(|m| m.id)
                .collect()
        };
        Ok(SaleWithItems {
            sale,
            items,
            movement_ids,
        })
    }

    async fn load_sale<C: ConnectionTrait>(
        conn: &C,
        store_id: Uuid,
        sale_id: Uuid,
    ) -> Result<sale::Model, ServiceError> {
        sale::Entity::find_by_id(sale_id)
            .filter(sale::Column::StoreId.eq(store_id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("sale {}", sale_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn totals_skip_unpriced_lines() {
        let totals = compute_totals(
            vec![(Some(dec!(12.50)), 2), (None, 5), (Some(dec!(3.00)), 1)],
            Some(dec!(1.40)),
            None,
        );
        assert_eq!(totals.subtotal, dec!(28.00));
        assert_eq!(totals.total_value, dec!(29.40));
    }

    #[test]
    fn total_never_goes_negative() {
        let totals = compute_totals(vec![(Some(dec!(10)), 1)], None, Some(dec!(25)));
        assert_eq!(totals.total_value, Decimal::ZERO);
        assert_eq!(totals.discounts, dec!(25));
    }
}
