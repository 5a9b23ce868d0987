pub mod inventory_batch;
pub mod medicine;
pub mod reorder;
pub mod reorder_item;
pub mod reservation;
pub mod reservation_item;
pub mod sale;
pub mod sale_item;
pub mod stock_movement;

pub use stock_movement::MovementReason;
