use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgestock_core::{StockItemId, WarehouseId};
use forgestock_events::Event;

use crate::batch::BatchId;
use crate::transaction::{TransactionId, TransactionKind};

/// Signed quantity change applied to one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMovement {
    pub batch_id: BatchId,
    pub delta: i64,
    pub quantity_after: i64,
}

/// Description of what a ledger operation changed.
///
/// Returned from every receive/issue and handed to injected observers, so
/// dependent caches (reservation snapshots) know which batches to re-read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryChange {
    pub transaction_id: TransactionId,
    pub kind: TransactionKind,
    pub item_id: StockItemId,
    /// Absent for operations that drew from every warehouse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse_id: Option<WarehouseId>,
    pub movements: Vec<BatchMovement>,
    /// Item total after reconciliation.
    pub item_quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

impl InventoryChange {
    pub fn touches(&self, batch_id: BatchId) -> bool {
        self.movements.iter().any(|m| m.batch_id == batch_id)
    }

    pub fn net_delta(&self) -> i64 {
        self.movements.iter().map(|m| m.delta).sum()
    }
}

impl Event for InventoryChange {
    fn event_type(&self) -> &'static str {
        match self.kind {
            TransactionKind::Receive => "inventory.batch.received",
            TransactionKind::Issue => "inventory.batch.issued",
            TransactionKind::Reversal => "inventory.batch.reversed",
        }
    }

    fn subject(&self) -> String {
        self.item_id.to_string()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
