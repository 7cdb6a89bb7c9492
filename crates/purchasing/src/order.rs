use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use forgestock_core::{Entity, PurchaseOrderId, PurchaseOrderLineId, StockItemId};

/// Purchase order status lifecycle as reported by the purchasing system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Ordered,
    Confirmed,
    PartiallyDelivered,
    Delivered,
    Completed,
    Cancelled,
}

impl PurchaseOrderStatus {
    /// Goods have (at least partly) arrived; outstanding reservations should be
    /// synchronized and their owners notified.
    pub fn is_delivered_like(self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::PartiallyDelivered
                | PurchaseOrderStatus::Delivered
                | PurchaseOrderStatus::Completed
        )
    }
}

/// One ordered item within a purchase order.
///
/// Source of truth for reservable quantity. Quantities are whole units; the unit
/// price is in the smallest unit of `currency` (e.g. cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderLine {
    pub id: PurchaseOrderLineId,
    pub purchase_order_id: PurchaseOrderId,
    pub material_id: StockItemId,
    pub material_name: String,
    pub quantity: i64,
    pub unit_price: u64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_delivery_date: Option<NaiveDate>,
    pub supplier: String,
    pub status: PurchaseOrderStatus,
}

impl PurchaseOrderLine {
    /// Quantity still claimable after `already_reserved` units are spoken for.
    ///
    /// Never negative: a line that is already over-claimed (e.g. its quantity
    /// was reduced upstream) has nothing left.
    pub fn remaining_after(&self, already_reserved: i64) -> i64 {
        (self.quantity - already_reserved).max(0)
    }
}

impl Entity for PurchaseOrderLine {
    type Id = PurchaseOrderLineId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
