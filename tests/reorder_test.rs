mod common;

use assert_matches::assert_matches;
use common::{date, TestLedger};
use rx_ledger::entities::reorder::ReorderStatus;
use rx_ledger::entities::{inventory_batch, MovementReason};
use rx_ledger::services::inventory::NewBatch;
use rx_ledger::services::reorders::{
    CreateReorder, ReceiveReorder, ReceivedLine, ReorderLine, ReorderWithItems,
};
use rx_ledger::ServiceError;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

async fn draft(ledger: &TestLedger, medicine_id: Uuid, qty: i32) -> ReorderWithItems {
    let line = ReorderLine {
        price: Some(dec!(2.50)),
        batch_pref: Some("LOT-A1".into()),
        ..ReorderLine::new(medicine_id, qty)
    };
    ledger
        .services
        .reorders
        .create_reorder(ledger.store_id, CreateReorder::new(vec![line]))
        .await
        .unwrap()
}

fn receipt(item_id: Uuid, qty: i32) -> ReceiveReorder {
    ReceiveReorder::new(vec![ReceivedLine {
        expiry_date: Some(date(2028, 1, 31)),
        ..ReceivedLine::new(item_id, qty)
    }])
}

#[tokio::test]
async fn partial_then_full_receipt_walks_the_state_machine() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Atorvastatin 20mg").await;
    let reorder = draft(&ledger, med, 100).await;
    assert_eq!(reorder.reorder.status, ReorderStatus::Draft);
    assert_eq!(reorder.reorder.total_value, dec!(250.00));
    let item_id = reorder.items[0].id;

    let first = ledger
        .services
        .reorders
        .receive_reorder(ledger.store_id, reorder.reorder.id, receipt(item_id, 60))
        .await
        .unwrap();
    assert_eq!(first.status, ReorderStatus::PartiallyReceived);
    assert_eq!(
        first.transitions,
        vec![
            (ReorderStatus::Draft, ReorderStatus::Sent),
            (ReorderStatus::Sent, ReorderStatus::PartiallyReceived),
        ]
    );
    assert_eq!(first.attempts, 1);
    assert!(first.reorder.reorder.sent_at.is_some());
    assert_eq!(first.reorder.total_received(), 60);

    let second = ledger
        .services
        .reorders
        .receive_reorder(ledger.store_id, reorder.reorder.id, receipt(item_id, 40))
        .await
        .unwrap();
    assert_eq!(second.status, ReorderStatus::Received);
    assert_eq!(
        second.transitions,
        vec![(ReorderStatus::PartiallyReceived, ReorderStatus::Received)]
    );

    // Both receipts land in the preferred lot.
    assert_eq!(first.batches_touched, second.batches_touched);
    let batch_id = first.batches_touched[0];
    let batch = ledger.reload(batch_id).await;
    assert_eq!(batch.batch_number.as_deref(), Some("LOT-A1"));
    assert_eq!(batch.qty_received, 100);
    assert_eq!(batch.qty_available, 100);
    assert_eq!(batch.purchase_price, Some(dec!(2.50)));

    let history = ledger
        .services
        .ledger
        .history(ledger.store_id, batch_id)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|m| m.reason == MovementReason::Receipt));
    assert_eq!(history.iter().map(|m| m.delta).sum::<i32>(), 100);
    ledger.assert_reconciles(batch_id).await;

    let late = ledger
        .services
        .reorders
        .receive_reorder(ledger.store_id, reorder.reorder.id, receipt(item_id, 1))
        .await;
    assert_matches!(late, Err(ServiceError::InvalidTransition { .. }));
}

#[tokio::test]
async fn receipt_tops_up_an_existing_lot() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Gabapentin 300mg").await;
    let existing = ledger
        .services
        .inventory
        .create_batch(
            ledger.store_id,
            NewBatch {
                batch_number: Some("LOT-A1".into()),
                ..NewBatch::new(med, 5)
            },
        )
        .await
        .unwrap();

    let reorder = draft(&ledger, med, 10).await;
    let outcome = ledger
        .services
        .reorders
        .receive_reorder(
            ledger.store_id,
            reorder.reorder.id,
            receipt(reorder.items[0].id, 10),
        )
        .await
        .unwrap();

    assert_eq!(outcome.batches_touched, vec![existing.id]);
    let batch = ledger.reload(existing.id).await;
    assert_eq!((batch.qty_received, batch.qty_available), (15, 15));
    assert_eq!(batch.version, 1);
    ledger.assert_reconciles(existing.id).await;

    let lots = inventory_batch::Entity::find()
        .filter(inventory_batch::Column::MedicineId.eq(med))
        .all(&*ledger.db)
        .await
        .unwrap();
    assert_eq!(lots.len(), 1);
}

#[tokio::test]
async fn top_up_restates_the_lot_details_it_carries() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Valsartan 80mg").await;
    let existing = ledger
        .services
        .inventory
        .create_batch(
            ledger.store_id,
            NewBatch {
                batch_number: Some("LOT-A1".into()),
                location: Some("Shelf 4".into()),
                ..NewBatch::new(med, 5)
            },
        )
        .await
        .unwrap();
    assert_eq!(existing.expiry_date, None);

    let reorder = draft(&ledger, med, 10).await;
    let line = ReceivedLine {
        expiry_date: Some(date(2028, 1, 31)),
        purchase_price: Some(dec!(3.25)),
        mrp: Some(dec!(5.00)),
        ..ReceivedLine::new(reorder.items[0].id, 10)
    };
    let outcome = ledger
        .services
        .reorders
        .receive_reorder(
            ledger.store_id,
            reorder.reorder.id,
            ReceiveReorder::new(vec![line]),
        )
        .await
        .unwrap();
    assert_eq!(outcome.batches_touched, vec![existing.id]);

    let batch = ledger.reload(existing.id).await;
    assert_eq!(batch.expiry_date, Some(date(2028, 1, 31)));
    assert_eq!(batch.purchase_price, Some(dec!(3.25)));
    assert_eq!(batch.mrp, Some(dec!(5.00)));
    assert_eq!(batch.location.as_deref(), Some("Shelf 4"));
    assert_eq!((batch.qty_received, batch.qty_available), (15, 15));
    assert_eq!(batch.version, 1);
    ledger.assert_reconciles(existing.id).await;
}

#[tokio::test]
async fn top_up_without_details_keeps_the_stored_ones() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Rosuvastatin 10mg").await;
    let existing = ledger
        .services
        .inventory
        .create_batch(
            ledger.store_id,
            NewBatch {
                batch_number: Some("LOT-A1".into()),
                expiry_date: Some(date(2027, 5, 31)),
                mrp: Some(dec!(9.00)),
                ..NewBatch::new(med, 5)
            },
        )
        .await
        .unwrap();

    let reorder = draft(&ledger, med, 4).await;
    ledger
        .services
        .reorders
        .receive_reorder(
            ledger.store_id,
            reorder.reorder.id,
            ReceiveReorder::new(vec![ReceivedLine::new(reorder.items[0].id, 4)]),
        )
        .await
        .unwrap();

    let batch = ledger.reload(existing.id).await;
    assert_eq!(batch.expiry_date, Some(date(2027, 5, 31)));
    assert_eq!(batch.mrp, Some(dec!(9.00)));
    assert_eq!(batch.qty_available, 9);
}

#[tokio::test]
async fn receipt_without_a_lot_number_opens_a_new_batch() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Doxycycline 100mg").await;
    let reorder = ledger
        .services
        .reorders
        .create_reorder(
            ledger.store_id,
            CreateReorder::new(vec![ReorderLine::new(med, 20)]),
        )
        .await
        .unwrap();

    let outcome = ledger
        .services
        .reorders
        .receive_reorder(
            ledger.store_id,
            reorder.reorder.id,
            receipt(reorder.items[0].id, 20),
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, ReorderStatus::Received);
    let batch = ledger.reload(outcome.batches_touched[0]).await;
    assert_eq!(batch.batch_number, None);
    assert_eq!(batch.expiry_date, Some(date(2028, 1, 31)));
    assert_eq!(batch.qty_available, 20);
}

#[tokio::test]
async fn illegal_status_moves_are_rejected() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Allopurinol 100mg").await;
    let reorder = draft(&ledger, med, 10).await;
    let id = reorder.reorder.id;

    let skip = ledger
        .services
        .reorders
        .update_reorder_status(ledger.store_id, id, ReorderStatus::Received)
        .await;
    assert_matches!(
        skip,
        Err(ServiceError::InvalidTransition { entity: "reorder", ref from, ref to })
            if from == "DRAFT" && to == "RECEIVED"
    );

    let sent = ledger
        .services
        .reorders
        .update_reorder_status(ledger.store_id, id, ReorderStatus::Sent)
        .await
        .unwrap();
    assert_eq!(sent.reorder.status, ReorderStatus::Sent);
    assert!(sent.reorder.sent_at.is_some());

    let back = ledger
        .services
        .reorders
        .update_reorder_status(ledger.store_id, id, ReorderStatus::Draft)
        .await;
    assert_matches!(back, Err(ServiceError::InvalidTransition { .. }));

    ledger
        .services
        .reorders
        .update_reorder_status(ledger.store_id, id, ReorderStatus::Cancelled)
        .await
        .unwrap();

    let receive = ledger
        .services
        .reorders
        .receive_reorder(ledger.store_id, id, receipt(reorder.items[0].id, 10))
        .await;
    assert_matches!(receive, Err(ServiceError::InvalidTransition { .. }));

    let revive = ledger
        .services
        .reorders
        .update_reorder_status(ledger.store_id, id, ReorderStatus::Sent)
        .await;
    assert_matches!(revive, Err(ServiceError::InvalidTransition { .. }));
}

#[tokio::test]
async fn items_are_editable_only_while_draft() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Esomeprazole 20mg").await;
    let other = ledger.medicine("Domperidone 10mg").await;
    let reorder = draft(&ledger, med, 10).await;
    let id = reorder.reorder.id;

    let replaced = ledger
        .services
        .reorders
        .replace_reorder_items(
            ledger.store_id,
            id,
            vec![
                ReorderLine {
                    price: Some(dec!(4.00)),
                    ..ReorderLine::new(med, 5)
                },
                ReorderLine {
                    price: Some(dec!(1.50)),
                    ..ReorderLine::new(other, 10)
                },
            ],
        )
        .await
        .unwrap();
    assert_eq!(replaced.items.len(), 2);
    assert_eq!(replaced.total_ordered(), 15);
    assert_eq!(replaced.reorder.total_value, dec!(35.00));

    ledger
        .services
        .reorders
        .update_reorder_status(ledger.store_id, id, ReorderStatus::Sent)
        .await
        .unwrap();

    let locked = ledger
        .services
        .reorders
        .replace_reorder_items(ledger.store_id, id, vec![ReorderLine::new(med, 1)])
        .await;
    assert_matches!(
        locked,
        Err(ServiceError::InvalidTransition { entity: "reorder items", .. })
    );
    let unchanged = ledger
        .services
        .reorders
        .get_reorder(ledger.store_id, id)
        .await
        .unwrap();
    assert_eq!(unchanged.items.len(), 2);
}

#[tokio::test]
async fn auto_send_creates_a_sent_reorder() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Sertraline 50mg").await;

    let reorder = ledger
        .services
        .reorders
        .create_reorder(
            ledger.store_id,
            CreateReorder {
                auto_send: true,
                note: Some("weekly top-up".into()),
                ..CreateReorder::new(vec![ReorderLine::new(med, 30)])
            },
        )
        .await
        .unwrap();

    assert_eq!(reorder.reorder.status, ReorderStatus::Sent);
    assert!(reorder.reorder.sent_at.is_some());
    assert_eq!(reorder.reorder.total_value, dec!(0));
}

#[tokio::test]
async fn unknown_item_rolls_back_the_receipt() {
    let ledger = TestLedger::new().await;
    let med = ledger.medicine("Tamsulosin 0.4mg").await;
    let reorder = draft(&ledger, med, 10).await;

    let request = ReceiveReorder::new(vec![
        ReceivedLine::new(reorder.items[0].id, 4),
        ReceivedLine::new(Uuid::new_v4(), 1),
    ]);
    let result = ledger
        .services
        .reorders
        .receive_reorder(ledger.store_id, reorder.reorder.id, request)
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));

    let after = ledger
        .services
        .reorders
        .get_reorder(ledger.store_id, reorder.reorder.id)
        .await
        .unwrap();
    assert_eq!(after.reorder.status, ReorderStatus::Draft);
    assert_eq!(after.total_received(), 0);
    let batches = inventory_batch::Entity::find()
        .filter(inventory_batch::Column::MedicineId.eq(med))
        .all(&*ledger.db)
        .await
        .unwrap();
    assert!(batches.is_empty());
}

#[tokio::test]
async fn reorder_for_an_unknown_medicine_is_refused() {
    let ledger = TestLedger::new().await;
    let foreign = ledger.medicine_in(Uuid::new_v4(), "Digoxin 0.25mg").await;

    let result = ledger
        .services
        .reorders
        .create_reorder(
            ledger.store_id,
            CreateReorder::new(vec![ReorderLine::new(foreign, 5)]),
        )
        .await;
    assert_matches!(result, Err(ServiceError::MedicineNotFound(id)) if id == foreign);
}
