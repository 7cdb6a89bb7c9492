//! `forgestock-core`: domain building blocks.
//!
//! This crate contains **pure domain** primitives shared by the stock ledger and
//! the purchase-order reservation engine (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult, ensure_positive};
pub use id::{PurchaseOrderId, PurchaseOrderLineId, StockItemId, UserId, WarehouseId};
