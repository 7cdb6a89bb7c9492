//! Inventory domain module (batch-tracked stock).
//!
//! This crate contains business rules for batches and allocation, implemented
//! purely as deterministic domain logic (no IO, no storage, no clocks beyond the
//! timestamps callers pass in).

pub mod allocation;
pub mod batch;
pub mod change;
pub mod item;
pub mod transaction;

pub use allocation::{Allocation, AllocationStrategy, allocate_from_batch, plan_allocation};
pub use batch::{Batch, BatchId, Certificate, LegacyPurchaseRef, NewBatch, Provenance};
pub use change::{BatchMovement, InventoryChange};
pub use item::StockItem;
pub use transaction::{StockTransaction, TransactionId, TransactionKind};
