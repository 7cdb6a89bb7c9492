//! Purchasing domain module (read-only view of purchase order lines).
//!
//! Purchase orders are owned by an external system. This crate only models the
//! fields the reservation engine reads: how much was ordered, at what price, and
//! whether the order has reached a delivered-like state.

pub mod order;

pub use order::{PurchaseOrderLine, PurchaseOrderStatus};
