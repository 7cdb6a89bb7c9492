use std::collections::HashMap;
use std::sync::RwLock;

use forgestock_core::StockItemId;
use forgestock_inventory::StockItem;

use super::StoreResult;
use crate::error::StoreError;

/// Stock items and their cached totals.
pub trait StockItemStore: Send + Sync {
    fn insert(&self, item: StockItem) -> StoreResult<()>;

    fn get(&self, id: StockItemId) -> StoreResult<Option<StockItem>>;

    /// Overwrite the cached total (last writer wins).
    fn set_quantity(&self, id: StockItemId, quantity: i64) -> StoreResult<()>;

    fn list_ids(&self) -> StoreResult<Vec<StockItemId>>;
}

#[derive(Debug, Default)]
pub struct InMemoryStockItemStore {
    rows: RwLock<HashMap<StockItemId, StockItem>>,
}

impl InMemoryStockItemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StockItemStore for InMemoryStockItemStore {
    fn insert(&self, item: StockItem) -> StoreResult<()> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;
        let (id, item) = super::keyed(item);
        rows.insert(id, item);
        Ok(())
    }

    fn get(&self, id: StockItemId) -> StoreResult<Option<StockItem>> {
        let rows = self.rows.read().map_err(|_| StoreError::poisoned())?;
        Ok(rows.get(&id).cloned())
    }

    fn set_quantity(&self, id: StockItemId, quantity: i64) -> StoreResult<()> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;
        let item = rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("stock item {id}")))?;
        item.quantity = quantity;
        Ok(())
    }

    fn list_ids(&self) -> StoreResult<Vec<StockItemId>> {
        let rows = self.rows.read().map_err(|_| StoreError::poisoned())?;
        Ok(rows.keys().copied().collect())
    }
}
