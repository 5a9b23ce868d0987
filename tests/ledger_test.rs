mod common;

use assert_matches::assert_matches;
use common::{date, TestLedger};
use rx_ledger::entities::MovementReason;
use rx_ledger::services::inventory::{BatchAdjustment, MovementLine, MovementRequest};
use rx_ledger::services::reservations::{CreateReservation, ReservationLine};
use rx_ledger::services::sales::{CreateSale, SaleLine};
use rx_ledger::ServiceError;
use uuid::Uuid;

fn movement(reason: MovementReason, medicine_id: Uuid, qty: i32, batch_id: Option<Uuid>) -> MovementRequest {
    MovementRequest {
        reason,
        items: vec![MovementLine {
            medicine_id,
            qty,
            batch_id,
        }],
        note: None,
        performed_by: None,
    }
}

#[tokio::test]
async fn ledger_explains_every_quantity_after_mixed_activity() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Amlodipine 5mg").await;
    let first = ledger.batch(med, 30, Some(date(2026, 9, 1))).await;
    let second = ledger.batch(med, 20, Some(date(2027, 3, 1))).await;

    ledger
        .services
        .sales
        .create_sale(ledger.store_id, CreateSale::new(vec![SaleLine::fefo(med, 35)]))
        .await
        .unwrap();
    let held = ledger
        .services
        .reservations
        .create_reservation(
            ledger.store_id,
            CreateReservation::new(vec![ReservationLine {
                medicine_id: med,
                qty: 4,
            }]),
        )
        .await
        .unwrap();
    ledger
        .services
        .inventory
        .record_movements(
            ledger.store_id,
            movement(MovementReason::Damage, med, 2, Some(second.id)),
        )
        .await
        .unwrap();
    ledger
        .services
        .reservations
        .cancel_reservation(ledger.store_id, held.reservation.id)
        .await
        .unwrap();

    assert_eq!(ledger.quantities(first.id).await, (0, 0));
    assert_eq!(ledger.quantities(second.id).await, (13, 0));
    for id in [first.id, second.id] {
        ledger.assert_reconciles(id).await;
    }

    let report = ledger.reconcile(second.id).await;
    assert_eq!(report.receipts_total, 20);
    assert_eq!(report.non_receipt_total, -7);
    assert_eq!(report.ledger_total(), 13);
}

#[tokio::test]
async fn history_starts_with_the_receipt() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Cetirizine 10mg").await;
    let batch = ledger.batch(med, 12, None).await;

    ledger
        .services
        .sales
        .create_sale(
            ledger.store_id,
            CreateSale::new(vec![SaleLine::pinned(med, batch.id, 5)]),
        )
        .await
        .unwrap();

    let history = ledger
        .services
        .ledger
        .history(ledger.store_id, batch.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].reason, MovementReason::Receipt);
    assert_eq!(history[0].delta, 12);
    assert_eq!(history[1].reason, MovementReason::Sale);
    assert_eq!(history[1].delta, -5);
    assert!(history[1].sale_item_id.is_some());
}

#[tokio::test]
async fn damage_without_a_batch_draws_fefo() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Insulin glargine").await;
    let near = ledger.batch(med, 3, Some(date(2026, 11, 1))).await;
    let far = ledger.batch(med, 10, Some(date(2027, 11, 1))).await;

    let recorded = ledger
        .services
        .inventory
        .record_movements(ledger.store_id, movement(MovementReason::Damage, med, 5, None))
        .await
        .unwrap();

    assert_eq!(recorded.batches_touched, vec![near.id, far.id]);
    assert_eq!(recorded.movement_ids.len(), 2);
    assert_eq!(ledger.quantities(near.id).await, (0, 0));
    assert_eq!(ledger.quantities(far.id).await, (8, 0));
    ledger.assert_reconciles(near.id).await;
    ledger.assert_reconciles(far.id).await;
}

#[tokio::test]
async fn receipt_grows_received_and_available() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Salbutamol inhaler").await;
    let batch = ledger.batch(med, 6, None).await;

    ledger
        .services
        .inventory
        .record_movements(
            ledger.store_id,
            movement(MovementReason::Receipt, med, 4, Some(batch.id)),
        )
        .await
        .unwrap();

    let after = ledger.reload(batch.id).await;
    assert_eq!(after.qty_received, 10);
    assert_eq!(after.qty_available, 10);
    assert_eq!(after.version, 1);
    ledger.assert_reconciles(batch.id).await;
}

#[tokio::test]
async fn receipt_must_name_its_batch() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Folic acid 5mg").await;
    ledger.batch(med, 6, None).await;

    let result = ledger
        .services
        .inventory
        .record_movements(ledger.store_id, movement(MovementReason::Receipt, med, 4, None))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn failed_line_discards_the_whole_request() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Warfarin 5mg").await;
    let batch = ledger.batch(med, 5, None).await;

    let request = MovementRequest {
        reason: MovementReason::Transfer,
        items: vec![
            MovementLine {
                medicine_id: med,
                qty: 2,
                batch_id: Some(batch.id),
            },
            MovementLine {
                medicine_id: med,
                qty: 9,
                batch_id: None,
            },
        ],
        note: Some("to branch".into()),
        performed_by: None,
    };
    let result = ledger
        .services
        .inventory
        .record_movements(ledger.store_id, request)
        .await;

    assert_matches!(result, Err(ServiceError::InsufficientStock { .. }));
    assert_eq!(ledger.quantities(batch.id).await, (5, 0));
    assert_eq!(ledger.reconcile(batch.id).await.movement_count, 1);
}

#[tokio::test]
async fn adjustment_is_written_to_the_ledger() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Ibuprofen 400mg").await;
    let batch = ledger.batch(med, 40, None).await;

    let adjusted = ledger
        .services
        .inventory
        .adjust_batch(
            ledger.store_id,
            batch.id,
            BatchAdjustment {
                expected_version: 0,
                new_available: 43,
                note: Some("recount".into()),
                performed_by: Some(Uuid::new_v4()),
            },
        )
        .await
        .unwrap();
    assert_eq!(adjusted.qty_available, 43);
    assert_eq!(adjusted.qty_received, 40);

    let history = ledger
        .services
        .ledger
        .history(ledger.store_id, batch.id)
        .await
        .unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.reason, MovementReason::Adjustment);
    assert_eq!(last.delta, 3);
    assert_eq!(last.note.as_deref(), Some("recount"));
    ledger.assert_reconciles(batch.id).await;
}

#[tokio::test]
async fn batches_are_private_to_their_store() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Losartan 50mg").await;
    let batch = ledger.batch(med, 8, None).await;
    let other_store = Uuid::new_v4();

    assert_matches!(
        ledger.services.inventory.get_batch(other_store, batch.id).await,
        Err(ServiceError::BatchNotFound(id)) if id == batch.id
    );
    assert_matches!(
        ledger.services.ledger.history(other_store, batch.id).await,
        Err(ServiceError::BatchNotFound(_))
    );
    let own = ledger
        .services
        .inventory
        .get_batch(ledger.store_id, batch.id)
        .await
        .unwrap();
    assert_eq!(own.qty_available, 8);
}
