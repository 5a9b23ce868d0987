use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Audit events emitted after a unit of work commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    BatchCreated {
        store_id: Uuid,
        batch_id: Uuid,
        medicine_id: Uuid,
        qty: i32,
    },
    BatchAdjusted {
        store_id: Uuid,
        batch_id: Uuid,
        old_available: i32,
        new_available: i32,
    },
    MovementsRecorded {
        store_id: Uuid,
        reason: String,
        movement_ids: Vec<Uuid>,
    },
    SaleCreated {
        store_id: Uuid,
        sale_id: Uuid,
        movements: usize,
    },
    SalePaid {
        store_id: Uuid,
        sale_id: Uuid,
    },
    ReservationCreated {
        store_id: Uuid,
        reservation_id: Uuid,
    },
    ReservationConfirmed {
        store_id: Uuid,
        reservation_id: Uuid,
    },
    ReservationCancelled {
        store_id: Uuid,
        reservation_id: Uuid,
    },
    ReservationConsumed {
        store_id: Uuid,
        reservation_id: Uuid,
        sale_id: Uuid,
    },
    ReorderCreated {
        store_id: Uuid,
        reorder_id: Uuid,
    },
    ReorderItemsReplaced {
        store_id: Uuid,
        reorder_id: Uuid,
    },
    ReorderStatusChanged {
        store_id: Uuid,
        reorder_id: Uuid,
        old_status: String,
        new_status: String,
    },
    ReorderReceived {
        store_id: Uuid,
        reorder_id: Uuid,
        batches_touched: Vec<Uuid>,
    },
}

impl Event {
    pub fn store_id(&self) -> Uuid {
        match self {
            Event::BatchCreated { store_id, .. }
            | Event::BatchAdjusted { store_id, .. }
            | Event::MovementsRecorded { store_id, .. }
            | Event::SaleCreated { store_id, .. }
            | Event::SalePaid { store_id, .. }
            | Event::ReservationCreated { store_id, .. }
            | Event::ReservationConfirmed { store_id, .. }
            | Event::ReservationCancelled { store_id, .. }
            | Event::ReservationConsumed { store_id, .. }
            | Event::ReorderCreated { store_id, .. }
            | Event::ReorderItemsReplaced { store_id, .. }
            | Event::ReorderStatusChanged { store_id, .. }
            | Event::ReorderReceived { store_id, .. } => *store_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end for [`process_events`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Fire-and-forget. A full or closed channel never fails the caller's
    /// already-committed work; the event is dropped with a warning.
    pub fn emit(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            metrics::counter!("rx_ledger.events.dropped", 1);
            warn!(error = %e, "Dropping audit event");
        }
    }
}

/// Drains the channel, writing each event to the activity log.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        let store_id = event.store_id();
        match serde_json::to_string(&event) {
            Ok(payload) => info!(store_id = %store_id, event = %payload, "activity"),
            Err(e) => warn!(store_id = %store_id, error = %e, "Unserializable event: {:?}", event),
        }
    }

    info!("Event channel closed; event processing loop stopped");
}
