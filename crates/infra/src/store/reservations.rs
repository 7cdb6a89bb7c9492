use std::collections::HashMap;
use std::sync::RwLock;

use forgestock_core::{AggregateRoot, ExpectedVersion, PurchaseOrderId, PurchaseOrderLineId};
use forgestock_reservations::{ConsumerId, PoReservation, ReservationId, ReservationStatus};

use super::StoreResult;
use crate::error::StoreError;

/// Reservation rows, versioned for optimistic writes.
pub trait ReservationStore: Send + Sync {
    /// Insert `reservation` iff the reserved total on its PO line, including
    /// this one, stays within `limit`.
    ///
    /// The check and the insert happen under one lock, so concurrent callers
    /// cannot jointly over-claim a line.
    fn insert_within_limit(&self, reservation: PoReservation, limit: i64) -> StoreResult<()>;

    fn get(&self, id: ReservationId) -> StoreResult<Option<PoReservation>>;

    /// Write `reservation` if the stored row is still at `reservation.version()`.
    ///
    /// Returns the stored revision (version bumped by one). A stale write fails
    /// with [`StoreError::Conflict`]; a deleted row with [`StoreError::NotFound`].
    fn update(&self, reservation: PoReservation) -> StoreResult<PoReservation>;

    /// Remove the row if it is still at `expected`. Missing rows are `Ok(None)`.
    fn delete(&self, id: ReservationId, expected: ExpectedVersion) -> StoreResult<Option<PoReservation>>;

    fn list_all(&self) -> StoreResult<Vec<PoReservation>>;

    fn list_for_line(
        &self,
        order_id: PurchaseOrderId,
        line_id: PurchaseOrderLineId,
    ) -> StoreResult<Vec<PoReservation>>;

    fn list_for_purchase_order(&self, order_id: PurchaseOrderId) -> StoreResult<Vec<PoReservation>>;

    fn list_for_consumer(&self, consumer_id: ConsumerId) -> StoreResult<Vec<PoReservation>>;

    fn list_by_status(&self, status: ReservationStatus) -> StoreResult<Vec<PoReservation>>;
}

#[derive(Debug, Default)]
pub struct InMemoryReservationStore {
    rows: RwLock<HashMap<ReservationId, PoReservation>>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn select(&self, mut keep: impl FnMut(&PoReservation) -> bool) -> StoreResult<Vec<PoReservation>> {
        let rows = self.rows.read().map_err(|_| StoreError::poisoned())?;
        let mut out: Vec<PoReservation> = rows.values().filter(|r| keep(r)).cloned().collect();
        out.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().as_uuid().cmp(b.id().as_uuid()))
        });
        Ok(out)
    }
}

impl ReservationStore for InMemoryReservationStore {
    fn insert_within_limit(&self, reservation: PoReservation, limit: i64) -> StoreResult<()> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;
        if rows.contains_key(reservation.id()) {
            return Err(StoreError::Conflict(format!(
                "reservation {} already exists",
                reservation.id()
            )));
        }

        let already: i64 = rows
            .values()
            .filter(|r| r.is_for_line(reservation.purchase_order_id(), reservation.line_id()))
            .map(|r| r.reserved_quantity())
            .sum();
        if already + reservation.reserved_quantity() > limit {
            return Err(StoreError::LimitExceeded {
                available: (limit - already).max(0),
            });
        }

        rows.insert(*reservation.id(), reservation);
        Ok(())
    }

    fn get(&self, id: ReservationId) -> StoreResult<Option<PoReservation>> {
        let rows = self.rows.read().map_err(|_| StoreError::poisoned())?;
        Ok(rows.get(&id).cloned())
    }

    fn update(&self, reservation: PoReservation) -> StoreResult<PoReservation> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;
        let id = *reservation.id();
        let current = rows
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("reservation {id}")))?;

        let expected = ExpectedVersion::of(&reservation);
        if !expected.matches(current.version()) {
            return Err(StoreError::Conflict(format!(
                "reservation {id}: expected {expected}, found version {}",
                current.version()
            )));
        }

        let stored = reservation.into_next_version();
        rows.insert(id, stored.clone());
        Ok(stored)
    }

    fn delete(&self, id: ReservationId, expected: ExpectedVersion) -> StoreResult<Option<PoReservation>> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;
        let Some(current) = rows.get(&id) else {
            return Ok(None);
        };
        if !expected.matches(current.version()) {
            return Err(StoreError::Conflict(format!(
                "reservation {id}: expected {expected}, found version {}",
                current.version()
            )));
        }
        Ok(rows.remove(&id))
    }

    fn list_all(&self) -> StoreResult<Vec<PoReservation>> {
        self.select(|_| true)
    }

    fn list_for_line(
        &self,
        order_id: PurchaseOrderId,
        line_id: PurchaseOrderLineId,
    ) -> StoreResult<Vec<PoReservation>> {
        self.select(|r| r.is_for_line(order_id, line_id))
    }

    fn list_for_purchase_order(&self, order_id: PurchaseOrderId) -> StoreResult<Vec<PoReservation>> {
        self.select(|r| r.purchase_order_id() == order_id)
    }

    fn list_for_consumer(&self, consumer_id: ConsumerId) -> StoreResult<Vec<PoReservation>> {
        self.select(|r| r.consumer_id() == consumer_id)
    }

    fn list_by_status(&self, status: ReservationStatus) -> StoreResult<Vec<PoReservation>> {
        self.select(|r| r.status() == status)
    }
}
