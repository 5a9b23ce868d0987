mod common;

use std::collections::HashMap;

use assert_matches::assert_matches;
use common::{date, TestLedger};
use rx_ledger::entities::reservation::ReservationStatus;
use rx_ledger::entities::sale::PaymentMethod;
use rx_ledger::entities::{reservation, MovementReason};
use rx_ledger::services::reservations::{CreateReservation, ReservationLine};
use rx_ledger::services::sales::SaleFromReservation;
use rx_ledger::ServiceError;
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait};
use uuid::Uuid;

fn hold(medicine_id: Uuid, qty: i32) -> CreateReservation {
    CreateReservation::new(vec![ReservationLine { medicine_id, qty }])
}

#[tokio::test]
async fn cancel_returns_every_hold() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Metoprolol 25mg").await;
    let near = ledger.batch(med, 4, Some(date(2026, 12, 1))).await;
    let far = ledger.batch(med, 10, Some(date(2027, 6, 1))).await;

    let created = ledger
        .services
        .reservations
        .create_reservation(ledger.store_id, hold(med, 6))
        .await
        .unwrap();
    assert_eq!(created.reservation.status, ReservationStatus::Pending);
    assert_eq!(created.held_qty(), 6);
    assert_eq!(created.items.len(), 2);
    assert_eq!(ledger.quantities(near.id).await, (0, 4));
    assert_eq!(ledger.quantities(far.id).await, (8, 2));

    let cancelled = ledger
        .services
        .reservations
        .cancel_reservation(ledger.store_id, created.reservation.id)
        .await
        .unwrap();
    assert_eq!(cancelled.reservation.status, ReservationStatus::Cancelled);
    assert_eq!(ledger.quantities(near.id).await, (4, 0));
    assert_eq!(ledger.quantities(far.id).await, (10, 0));

    let again = ledger
        .services
        .reservations
        .cancel_reservation(ledger.store_id, created.reservation.id)
        .await
        .unwrap();
    assert_eq!(again.reservation.status, ReservationStatus::Cancelled);
    assert_eq!(ledger.quantities(far.id).await, (10, 0));

    ledger.assert_reconciles(near.id).await;
    ledger.assert_reconciles(far.id).await;
}

#[tokio::test]
async fn confirm_is_idempotent_and_keeps_stock() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Pantoprazole 40mg").await;
    let batch = ledger.batch(med, 5, None).await;

    let created = ledger
        .services
        .reservations
        .create_reservation(ledger.store_id, hold(med, 2))
        .await
        .unwrap();
    let id = created.reservation.id;

    for _ in 0..2 {
        let confirmed = ledger
            .services
            .reservations
            .confirm_reservation(ledger.store_id, id)
            .await
            .unwrap();
        assert_eq!(confirmed.reservation.status, ReservationStatus::Confirmed);
    }
    assert_eq!(ledger.quantities(batch.id).await, (3, 2));
}

#[tokio::test]
async fn cancelled_reservation_cannot_be_confirmed() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Fluconazole 150mg").await;
    ledger.batch(med, 5, None).await;

    let created = ledger
        .services
        .reservations
        .create_reservation(ledger.store_id, hold(med, 1))
        .await
        .unwrap();
    ledger
        .services
        .reservations
        .cancel_reservation(ledger.store_id, created.reservation.id)
        .await
        .unwrap();

    let result = ledger
        .services
        .reservations
        .confirm_reservation(ledger.store_id, created.reservation.id)
        .await;
    assert_matches!(
        result,
        Err(ServiceError::InvalidTransition { entity: "reservation", ref from, ref to })
            if from == "CANCELLED" && to == "CONFIRMED"
    );
}

#[tokio::test]
async fn consuming_turns_holds_into_a_sale() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Montelukast 10mg").await;
    let batch = ledger.batch(med, 10, None).await;

    let created = ledger
        .services
        .reservations
        .create_reservation(ledger.store_id, hold(med, 4))
        .await
        .unwrap();
    ledger
        .services
        .reservations
        .confirm_reservation(ledger.store_id, created.reservation.id)
        .await
        .unwrap();

    let sale = ledger
        .services
        .sales
        .create_sale_from_reservation(
            ledger.store_id,
            created.reservation.id,
            SaleFromReservation {
                unit_prices: HashMap::from([(med, dec!(3.25))]),
                payment_method: Some(PaymentMethod::Card),
                ..SaleFromReservation::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(sale.sale.total_value, dec!(13.00));
    assert_eq!(
        sale.sale.external_ref,
        Some(format!("reservation:{}", created.reservation.id))
    );
    assert_eq!(sale.items.len(), 1);
    assert_eq!(sale.items[0].batch_id, Some(batch.id));
    assert_eq!(sale.movement_ids.len(), 1);
    assert_eq!(ledger.quantities(batch.id).await, (6, 0));

    let consumed = ledger
        .services
        .reservations
        .get_reservation(ledger.store_id, created.reservation.id)
        .await
        .unwrap();
    assert_eq!(consumed.reservation.status, ReservationStatus::Consumed);

    let history = ledger
        .services
        .ledger
        .history(ledger.store_id, batch.id)
        .await
        .unwrap();
    assert_eq!(history.last().unwrap().reason, MovementReason::Sale);
    assert_eq!(history.last().unwrap().delta, -4);
    ledger.assert_reconciles(batch.id).await;

    let twice = ledger
        .services
        .sales
        .create_sale_from_reservation(
            ledger.store_id,
            created.reservation.id,
            SaleFromReservation::default(),
        )
        .await;
    assert_matches!(twice, Err(ServiceError::InvalidTransition { .. }));

    let cancel = ledger
        .services
        .reservations
        .cancel_reservation(ledger.store_id, created.reservation.id)
        .await;
    assert_matches!(cancel, Err(ServiceError::InvalidTransition { .. }));
    assert_eq!(ledger.quantities(batch.id).await, (6, 0));
}

#[tokio::test]
async fn short_line_releases_nothing_and_holds_nothing() {
    let ledger = TestLedger::new().await;
    let plenty = ledger.medicine("Vitamin D3 1000IU").await;
    let scarce = ledger.medicine("Rifampicin 300mg").await;
    let a = ledger.batch(plenty, 50, None).await;
    let b = ledger.batch(scarce, 2, None).await;

    let result = ledger
        .services
        .reservations
        .create_reservation(
            ledger.store_id,
            CreateReservation::new(vec![
                ReservationLine {
                    medicine_id: plenty,
                    qty: 10,
                },
                ReservationLine {
                    medicine_id: scarce,
                    qty: 3,
                },
            ]),
        )
        .await;

    assert_matches!(
        result,
        Err(ServiceError::InsufficientStock { medicine_id, requested: 3, available: 2 })
            if medicine_id == scarce
    );
    assert_eq!(ledger.quantities(a.id).await, (50, 0));
    assert_eq!(ledger.quantities(b.id).await, (2, 0));
    assert_eq!(reservation::Entity::find().count(&*ledger.db).await.unwrap(), 0);
}

#[tokio::test]
async fn reserved_units_are_not_for_sale() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Hydroxychloroquine 200mg").await;
    ledger.batch(med, 5, None).await;

    ledger
        .services
        .reservations
        .create_reservation(ledger.store_id, hold(med, 4))
        .await
        .unwrap();
    let second = ledger
        .services
        .reservations
        .create_reservation(ledger.store_id, hold(med, 2))
        .await;
    assert_matches!(
        second,
        Err(ServiceError::InsufficientStock { available: 1, .. })
    );
}

#[tokio::test]
async fn unknown_reservation_is_not_found() {
    let ledger = TestLedger::new().await;
    let result = ledger
        .services
        .reservations
        .cancel_reservation(ledger.store_id, Uuid::new_v4())
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}
