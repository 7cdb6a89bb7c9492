use std::sync::RwLock;

use forgestock_core::StockItemId;
use forgestock_inventory::StockTransaction;

use super::StoreResult;
use crate::error::StoreError;

/// Append-only audit log of ledger operations.
pub trait TransactionLog: Send + Sync {
    fn append(&self, tx: StockTransaction) -> StoreResult<()>;

    /// Entries for an item in append order.
    fn list_for_item(&self, item_id: StockItemId) -> StoreResult<Vec<StockTransaction>>;
}

#[derive(Debug, Default)]
pub struct InMemoryTransactionLog {
    entries: RwLock<Vec<StockTransaction>>,
}

impl InMemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionLog for InMemoryTransactionLog {
    fn append(&self, tx: StockTransaction) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::poisoned())?;
        entries.push(tx);
        Ok(())
    }

    fn list_for_item(&self, item_id: StockItemId) -> StoreResult<Vec<StockTransaction>> {
        let entries = self.entries.read().map_err(|_| StoreError::poisoned())?;
        Ok(entries.iter().filter(|t| t.item_id == item_id).cloned().collect())
    }
}
