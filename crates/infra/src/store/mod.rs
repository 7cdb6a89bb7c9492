//! Persistence seams.
//!
//! Each store is a trait with an in-memory implementation for tests/dev.
//! Writes are single-row read-modify-write operations; the only conditional
//! writes are the ones the ledger and reservation engine rely on for their
//! invariants (batch decrement, reservation insert, versioned update).

mod batches;
mod consumers;
mod items;
mod purchase_orders;
mod reservations;
mod transactions;

pub use batches::{BatchStore, InMemoryBatchStore};
pub use consumers::{Consumer, ConsumerStore, InMemoryConsumerStore};
pub use items::{InMemoryStockItemStore, StockItemStore};
pub use purchase_orders::{InMemoryPurchaseOrderLines, PurchaseOrderLines};
pub use reservations::{InMemoryReservationStore, ReservationStore};
pub use transactions::{InMemoryTransactionLog, TransactionLog};

use forgestock_core::Entity;

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Pair a row with its entity id for keyed storage.
fn keyed<E: Entity>(row: E) -> (E::Id, E) {
    (row.id().clone(), row)
}
