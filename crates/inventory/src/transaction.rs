use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use forgestock_core::{StockItemId, UserId, WarehouseId};

use crate::allocation::Allocation;

/// Stock transaction identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

forgestock_core::impl_uuid_newtype!(TransactionId, "TransactionId");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Receive,
    Issue,
    /// Compensates an issue whose batch decrements could not all be applied.
    Reversal,
}

/// Append-only audit record of a ledger operation.
///
/// Never mutated and never read back to derive current stock; batches are
/// authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockTransaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub item_id: StockItemId,
    /// Absent for operations that drew from every warehouse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse_id: Option<WarehouseId>,
    pub quantity: i64,
    /// Cached item total before the operation.
    pub previous_quantity: i64,
    pub allocations: Vec<Allocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverses: Option<TransactionId>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}
