use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use forgestock_core::{
    DomainError, DomainResult, Entity, PurchaseOrderId, PurchaseOrderLineId, StockItemId, UserId,
    WarehouseId, ensure_positive,
};

/// Batch identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

forgestock_core::impl_uuid_newtype!(BatchId, "BatchId");

/// Where a batch came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    /// Goods received against a purchase order (current schema).
    Purchase {
        order_id: PurchaseOrderId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line_id: Option<PurchaseOrderLineId>,
    },
    /// Output of a production run.
    Production { reference: String },
    /// Manual stock entry (opening balance, correction, found stock).
    Manual {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
}

impl Provenance {
    pub fn purchase_line(&self) -> Option<(PurchaseOrderId, Option<PurchaseOrderLineId>)> {
        match self {
            Provenance::Purchase { order_id, line_id } => Some((*order_id, *line_id)),
            _ => None,
        }
    }
}

/// Purchase reference in the older batch schema.
///
/// Batches written before the current provenance shape carried the order and
/// line ids as free-form strings next to the batch rather than inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyPurchaseRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_id: Option<String>,
}

impl LegacyPurchaseRef {
    fn same_id(stored: Option<&String>, id: &impl ToString) -> bool {
        stored.is_some_and(|s| s.trim().eq_ignore_ascii_case(&id.to_string()))
    }

    pub fn refers_to_order(&self, order_id: PurchaseOrderId) -> bool {
        Self::same_id(self.order_id.as_ref(), &order_id)
    }

    pub fn refers_to_line(&self, order_id: PurchaseOrderId, line_id: PurchaseOrderLineId) -> bool {
        self.refers_to_order(order_id) && Self::same_id(self.line_id.as_ref(), &line_id)
    }
}

/// Quality certificate attached to a batch (e.g. mill certificate, CoA).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_on: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
}

/// Input for creating a batch on receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBatch {
    pub item_id: StockItemId,
    pub warehouse_id: WarehouseId,
    pub batch_number: Option<String>,
    pub quantity: i64,
    pub unit_price: u64,
    pub received_at: DateTime<Utc>,
    pub expiry_date: Option<NaiveDate>,
    pub provenance: Provenance,
    pub legacy_purchase: Option<LegacyPurchaseRef>,
    pub certificate: Option<Certificate>,
    pub received_by: UserId,
}

/// A quantity of one stock item received at one time into one warehouse.
///
/// `quantity` only changes through receipt merges and issues and never goes
/// negative; `initial_quantity` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: BatchId,
    pub item_id: StockItemId,
    pub warehouse_id: WarehouseId,
    pub batch_number: String,
    pub quantity: i64,
    pub initial_quantity: i64,
    pub unit_price: u64,
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_purchase: Option<LegacyPurchaseRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,
    pub received_by: UserId,
}

impl Batch {
    /// Build a freshly received batch.
    pub fn received(new: NewBatch) -> DomainResult<Self> {
        ensure_positive("quantity", new.quantity)?;

        let id = BatchId::new();
        let batch_number = match new.batch_number {
            Some(n) if n.trim().is_empty() => {
                return Err(DomainError::validation("batch number cannot be blank"));
            }
            Some(n) => n.trim().to_string(),
            None => default_batch_number(id, new.received_at),
        };

        Ok(Self {
            id,
            item_id: new.item_id,
            warehouse_id: new.warehouse_id,
            batch_number,
            quantity: new.quantity,
            initial_quantity: new.quantity,
            unit_price: new.unit_price,
            received_at: new.received_at,
            expiry_date: new.expiry_date,
            provenance: new.provenance,
            legacy_purchase: new.legacy_purchase,
            certificate: new.certificate,
            received_by: new.received_by,
        })
    }

    /// Current-schema match on both purchase order and line.
    pub fn is_from_purchase_line(
        &self,
        order_id: PurchaseOrderId,
        line_id: PurchaseOrderLineId,
    ) -> bool {
        matches!(
            self.provenance.purchase_line(),
            Some((o, Some(l))) if o == order_id && l == line_id
        )
    }

    /// Older-schema match on both purchase order and line.
    pub fn is_from_legacy_purchase_line(
        &self,
        order_id: PurchaseOrderId,
        line_id: PurchaseOrderLineId,
    ) -> bool {
        self.legacy_purchase
            .as_ref()
            .is_some_and(|r| r.refers_to_line(order_id, line_id))
    }

    /// The batch was received against `order_id` under either schema.
    pub fn references_purchase_order(&self, order_id: PurchaseOrderId) -> bool {
        let current = matches!(self.provenance.purchase_line(), Some((o, _)) if o == order_id);
        current
            || self
                .legacy_purchase
                .as_ref()
                .is_some_and(|r| r.refers_to_order(order_id))
    }

    /// Whether a receipt with this provenance may be merged into this batch.
    ///
    /// Only purchase receipts for the same line, item and warehouse merge.
    pub fn accepts_merge(
        &self,
        item_id: StockItemId,
        warehouse_id: WarehouseId,
        provenance: &Provenance,
    ) -> bool {
        if self.item_id != item_id || self.warehouse_id != warehouse_id {
            return false;
        }
        match provenance.purchase_line() {
            Some((order_id, Some(line_id))) => self.is_from_purchase_line(order_id, line_id),
            _ => false,
        }
    }

    /// Remove `quantity` units; refuses to go negative. Returns the previous quantity.
    pub fn deplete(&mut self, quantity: i64) -> DomainResult<i64> {
        ensure_positive("quantity", quantity)?;
        if self.quantity < quantity {
            return Err(DomainError::validation(format!(
                "batch {} holds {} but {} was requested",
                self.batch_number, self.quantity, quantity
            )));
        }
        let previous = self.quantity;
        self.quantity -= quantity;
        Ok(previous)
    }

    /// Add `quantity` units (receipt merge or compensation). Returns the previous quantity.
    ///
    /// Refused without change when the result would not fit in an `i64`.
    pub fn replenish(&mut self, quantity: i64) -> DomainResult<i64> {
        ensure_positive("quantity", quantity)?;
        let previous = self.quantity;
        self.quantity = previous.checked_add(quantity).ok_or_else(|| {
            DomainError::validation(format!(
                "batch {} holds {previous}; adding {quantity} exceeds the maximum quantity",
                self.batch_number
            ))
        })?;
        Ok(previous)
    }

    /// Units that can still be added before `replenish` refuses.
    pub fn headroom(&self) -> i64 {
        i64::MAX - self.quantity.max(0)
    }
}

impl Entity for Batch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn default_batch_number(id: BatchId, received_at: DateTime<Utc>) -> String {
    let short = id.to_string();
    let tail = &short[short.len() - 6..];
    format!("B-{}-{}", received_at.format("%Y%m%d"), tail.to_uppercase())
}
