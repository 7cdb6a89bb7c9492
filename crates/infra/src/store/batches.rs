use std::collections::HashMap;
use std::sync::RwLock;

use forgestock_core::{PurchaseOrderId, StockItemId, WarehouseId};
use forgestock_inventory::{Batch, BatchId};

use super::StoreResult;
use crate::error::StoreError;

/// Authoritative batch rows.
pub trait BatchStore: Send + Sync {
    fn insert(&self, batch: Batch) -> StoreResult<()>;

    fn get(&self, id: BatchId) -> StoreResult<Option<Batch>>;

    /// Batches of an item, optionally restricted to one warehouse.
    fn list_for_item(
        &self,
        item_id: StockItemId,
        warehouse_id: Option<WarehouseId>,
    ) -> StoreResult<Vec<Batch>>;

    /// Batches received against a purchase order under either provenance schema.
    fn list_for_purchase_order(&self, order_id: PurchaseOrderId) -> StoreResult<Vec<Batch>>;

    /// Subtract `quantity` iff the row still holds at least that much.
    ///
    /// Returns the quantity after the decrement. Refuses with
    /// [`StoreError::InsufficientQuantity`] and leaves the row untouched otherwise.
    fn decrement(&self, id: BatchId, quantity: i64) -> StoreResult<i64>;

    /// Add `quantity` to the row. Returns the quantity after the increment.
    ///
    /// Refuses with [`StoreError::LimitExceeded`] (carrying the remaining
    /// headroom) when the row cannot take that much more.
    fn increment(&self, id: BatchId, quantity: i64) -> StoreResult<i64>;

    fn remove(&self, id: BatchId) -> StoreResult<Option<Batch>>;
}

#[derive(Debug, Default)]
pub struct InMemoryBatchStore {
    rows: RwLock<HashMap<BatchId, Batch>>,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn select(&self, mut keep: impl FnMut(&Batch) -> bool) -> StoreResult<Vec<Batch>> {
        let rows = self.rows.read().map_err(|_| StoreError::poisoned())?;
        let mut out: Vec<Batch> = rows.values().filter(|b| keep(b)).cloned().collect();
        // HashMap order is arbitrary; keep listings stable for callers.
        out.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

impl BatchStore for InMemoryBatchStore {
    fn insert(&self, batch: Batch) -> StoreResult<()> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;
        let (id, batch) = super::keyed(batch);
        if rows.contains_key(&id) {
            return Err(StoreError::Conflict(format!("batch {id} already exists")));
        }
        rows.insert(id, batch);
        Ok(())
    }

    fn get(&self, id: BatchId) -> StoreResult<Option<Batch>> {
        let rows = self.rows.read().map_err(|_| StoreError::poisoned())?;
        Ok(rows.get(&id).cloned())
    }

    fn list_for_item(
        &self,
        item_id: StockItemId,
        warehouse_id: Option<WarehouseId>,
    ) -> StoreResult<Vec<Batch>> {
        self.select(|b| b.item_id == item_id && warehouse_id.is_none_or(|w| b.warehouse_id == w))
    }

    fn list_for_purchase_order(&self, order_id: PurchaseOrderId) -> StoreResult<Vec<Batch>> {
        self.select(|b| b.references_purchase_order(order_id))
    }

    fn decrement(&self, id: BatchId, quantity: i64) -> StoreResult<i64> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;
        let batch = rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {id}")))?;

        let available = batch.quantity;
        batch
            .deplete(quantity)
            .map_err(|_| StoreError::InsufficientQuantity { available })?;
        Ok(batch.quantity)
    }

    fn increment(&self, id: BatchId, quantity: i64) -> StoreResult<i64> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;
        let batch = rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {id}")))?;
        let available = batch.headroom();
        batch
            .replenish(quantity)
            .map_err(|_| StoreError::LimitExceeded { available })?;
        Ok(batch.quantity)
    }

    fn remove(&self, id: BatchId) -> StoreResult<Option<Batch>> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;
        Ok(rows.remove(&id))
    }
}
