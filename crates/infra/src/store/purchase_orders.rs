use std::collections::HashMap;
use std::sync::RwLock;

use forgestock_core::{PurchaseOrderId, PurchaseOrderLineId};
use forgestock_purchasing::PurchaseOrderLine;

use super::StoreResult;
use crate::error::StoreError;

/// Read-only view of purchase order lines owned by the purchasing system.
pub trait PurchaseOrderLines: Send + Sync {
    fn line(
        &self,
        order_id: PurchaseOrderId,
        line_id: PurchaseOrderLineId,
    ) -> StoreResult<Option<PurchaseOrderLine>>;
}

/// In-memory stand-in for the purchasing system.
#[derive(Debug, Default)]
pub struct InMemoryPurchaseOrderLines {
    rows: RwLock<HashMap<(PurchaseOrderId, PurchaseOrderLineId), PurchaseOrderLine>>,
}

impl InMemoryPurchaseOrderLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, line: PurchaseOrderLine) -> StoreResult<()> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;
        rows.insert((line.purchase_order_id, line.id), line);
        Ok(())
    }
}

impl PurchaseOrderLines for InMemoryPurchaseOrderLines {
    fn line(
        &self,
        order_id: PurchaseOrderId,
        line_id: PurchaseOrderLineId,
    ) -> StoreResult<Option<PurchaseOrderLine>> {
        let rows = self.rows.read().map_err(|_| StoreError::poisoned())?;
        Ok(rows.get(&(order_id, line_id)).cloned())
    }
}
