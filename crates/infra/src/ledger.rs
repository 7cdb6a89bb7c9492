//! Batch ledger: receive and issue stock against batch rows.
//!
//! Every operation runs validate → append transaction → mutate batches →
//! recalculate the item total. The steps are not one atomic unit; a crash
//! between them leaves a stale cached total that [`BatchLedger::recalculate`]
//! heals. Batch decrements are conditional, so concurrent issues can never
//! drive a batch negative.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use forgestock_core::{DomainError, PurchaseOrderId, StockItemId, UserId, WarehouseId, ensure_positive};
use forgestock_inventory::{
    Allocation, AllocationStrategy, Batch, BatchId, BatchMovement, Certificate, InventoryChange,
    LegacyPurchaseRef, NewBatch, Provenance, StockItem, StockTransaction, TransactionId,
    TransactionKind, allocate_from_batch, plan_allocation,
};

use crate::error::{ServiceError, ServiceResult, StoreError};
use crate::observer::InventoryObserver;
use crate::store::{BatchStore, StockItemStore, TransactionLog};

/// Receipt details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveMeta {
    /// Required; a receipt without a warehouse is rejected.
    pub warehouse_id: Option<WarehouseId>,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub unit_price: u64,
    pub provenance: Provenance,
    pub legacy_purchase: Option<LegacyPurchaseRef>,
    pub certificate: Option<Certificate>,
    /// Add to an existing batch of the same PO line instead of opening a new one.
    pub merge_with_existing: bool,
    pub reference: Option<String>,
    pub actor: UserId,
    pub received_at: DateTime<Utc>,
}

impl ReceiveMeta {
    /// Manual receipt into `warehouse_id` at zero cost, now.
    pub fn new(warehouse_id: WarehouseId, actor: UserId) -> Self {
        Self {
            warehouse_id: Some(warehouse_id),
            batch_number: None,
            expiry_date: None,
            unit_price: 0,
            provenance: Provenance::Manual { note: None },
            legacy_purchase: None,
            certificate: None,
            merge_with_existing: false,
            reference: None,
            actor,
            received_at: Utc::now(),
        }
    }
}

/// Issue details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueMeta {
    /// Required for [`BatchLedger::issue`]; optional scope for
    /// [`BatchLedger::issue_fifo`].
    pub warehouse_id: Option<WarehouseId>,
    /// Deplete exactly this batch instead of allocating FEFO.
    pub batch_id: Option<BatchId>,
    pub reference: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl IssueMeta {
    pub fn new(warehouse_id: WarehouseId, actor: UserId) -> Self {
        Self {
            warehouse_id: Some(warehouse_id),
            batch_id: None,
            reference: None,
            actor,
            occurred_at: Utc::now(),
        }
    }

    pub fn from_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

pub struct BatchLedger {
    items: Arc<dyn StockItemStore>,
    batches: Arc<dyn BatchStore>,
    log: Arc<dyn TransactionLog>,
    observers: Vec<Arc<dyn InventoryObserver>>,
}

impl BatchLedger {
    pub fn new(
        items: Arc<dyn StockItemStore>,
        batches: Arc<dyn BatchStore>,
        log: Arc<dyn TransactionLog>,
    ) -> Self {
        Self {
            items,
            batches,
            log,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn InventoryObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Receive `quantity` units of an item.
    ///
    /// Opens a new batch, or merges into the existing batch of the same PO line
    /// when `meta.merge_with_existing` is set and one exists.
    pub fn receive(
        &self,
        item_id: StockItemId,
        quantity: i64,
        meta: ReceiveMeta,
    ) -> ServiceResult<InventoryChange> {
        ensure_positive("quantity", quantity)?;
        let warehouse_id = meta
            .warehouse_id
            .ok_or_else(|| DomainError::validation("warehouse is required for a receipt"))?;
        let item = self.require_item(item_id)?;

        let existing = self.batches.list_for_item(item_id, None)?;
        let on_hand = item.total_of(&existing)?;
        if on_hand.checked_add(quantity).is_none() {
            return Err(DomainError::validation(format!(
                "receiving {quantity} would push item {item_id} past the maximum quantity (on hand {on_hand})"
            ))
            .into());
        }

        let merge_target = if meta.merge_with_existing {
            existing
                .into_iter()
                .find(|b| b.accepts_merge(item_id, warehouse_id, &meta.provenance))
        } else {
            None
        };

        let tx_id = TransactionId::new();
        let movement = match merge_target {
            Some(existing) => {
                self.append(
                    tx_id,
                    TransactionKind::Receive,
                    &item,
                    Some(warehouse_id),
                    quantity,
                    vec![Allocation {
                        batch_id: existing.id,
                        quantity,
                    }],
                    meta.reference,
                    None,
                    meta.actor,
                    meta.received_at,
                )?;
                let after = self.batches.increment(existing.id, quantity)?;
                info!(item = %item_id, batch = %existing.id, quantity, "merged receipt into existing batch");
                BatchMovement {
                    batch_id: existing.id,
                    delta: quantity,
                    quantity_after: after,
                }
            }
            None => {
                let batch = Batch::received(NewBatch {
                    item_id,
                    warehouse_id,
                    batch_number: meta.batch_number,
                    quantity,
                    unit_price: meta.unit_price,
                    received_at: meta.received_at,
                    expiry_date: meta.expiry_date,
                    provenance: meta.provenance,
                    legacy_purchase: meta.legacy_purchase,
                    certificate: meta.certificate,
                    received_by: meta.actor,
                })?;
                self.append(
                    tx_id,
                    TransactionKind::Receive,
                    &item,
                    Some(warehouse_id),
                    quantity,
                    vec![Allocation {
                        batch_id: batch.id,
                        quantity,
                    }],
                    meta.reference,
                    None,
                    meta.actor,
                    meta.received_at,
                )?;
                let movement = BatchMovement {
                    batch_id: batch.id,
                    delta: quantity,
                    quantity_after: batch.quantity,
                };
                info!(item = %item_id, batch = %batch.id, batch_number = %batch.batch_number, quantity, "received new batch");
                self.batches.insert(batch)?;
                movement
            }
        };

        self.finish(
            tx_id,
            TransactionKind::Receive,
            item_id,
            Some(warehouse_id),
            vec![movement],
            meta.received_at,
        )
    }

    /// Issue `quantity` units from one warehouse.
    ///
    /// With `meta.batch_id` the named batch is depleted; otherwise batches are
    /// consumed FEFO. All-or-nothing: a shortfall mutates no batch.
    pub fn issue(
        &self,
        item_id: StockItemId,
        quantity: i64,
        meta: IssueMeta,
    ) -> ServiceResult<InventoryChange> {
        ensure_positive("quantity", quantity)?;
        let warehouse_id = meta
            .warehouse_id
            .ok_or_else(|| DomainError::validation("warehouse is required for an issue"))?;
        let item = self.require_item(item_id)?;

        let plan = match meta.batch_id {
            Some(batch_id) => {
                let batch = self.batches.get(batch_id)?.ok_or_else(|| {
                    DomainError::validation(format!("unknown batch {batch_id}"))
                })?;
                if batch.item_id != item_id || batch.warehouse_id != warehouse_id {
                    return Err(DomainError::validation(format!(
                        "batch {} does not hold item {item_id} in warehouse {warehouse_id}",
                        batch.batch_number
                    ))
                    .into());
                }
                vec![allocate_from_batch(&batch, quantity)?]
            }
            None => {
                let batches = self.batches.list_for_item(item_id, Some(warehouse_id))?;
                plan_allocation(&batches, quantity, AllocationStrategy::Fefo)?
            }
        };

        self.apply_issue(&item, Some(warehouse_id), quantity, plan, meta)
    }

    /// Issue `quantity` units oldest-receipt-first, optionally from one warehouse.
    ///
    /// Same all-or-nothing contract as [`BatchLedger::issue`]; `meta.batch_id`
    /// is ignored.
    pub fn issue_fifo(
        &self,
        item_id: StockItemId,
        quantity: i64,
        meta: IssueMeta,
    ) -> ServiceResult<InventoryChange> {
        ensure_positive("quantity", quantity)?;
        let item = self.require_item(item_id)?;

        let batches = self.batches.list_for_item(item_id, meta.warehouse_id)?;
        let plan = plan_allocation(&batches, quantity, AllocationStrategy::Fifo)?;

        let warehouse_id = meta.warehouse_id;
        self.apply_issue(
            &item,
            warehouse_id,
            quantity,
            plan,
            IssueMeta {
                batch_id: None,
                ..meta
            },
        )
    }

    /// Overwrite the item's cached total with the sum of its batches.
    pub fn recalculate(&self, item_id: StockItemId) -> ServiceResult<i64> {
        let mut item = self.require_item(item_id)?;
        let batches = self.batches.list_for_item(item_id, None)?;
        let cached = item.quantity;
        let total = item.reconcile(&batches)?;

        if total != cached {
            debug!(item = %item_id, cached, total, "item total drifted; reconciling");
        }
        self.items.set_quantity(item_id, total)?;
        Ok(total)
    }

    /// Recalculate every item. Returns how many items were reconciled.
    pub fn recalculate_all(&self) -> ServiceResult<usize> {
        let ids = self.items.list_ids()?;
        for id in &ids {
            self.recalculate(*id)?;
        }
        Ok(ids.len())
    }

    /// Archive an exhausted batch.
    pub fn remove_empty_batch(&self, batch_id: BatchId) -> ServiceResult<Batch> {
        let batch = self
            .batches
            .get(batch_id)?
            .ok_or_else(|| DomainError::validation(format!("unknown batch {batch_id}")))?;
        if batch.quantity != 0 {
            return Err(DomainError::invalid_state(format!(
                "batch {} still holds {}",
                batch.batch_number, batch.quantity
            ))
            .into());
        }
        self.batches.remove(batch_id)?;
        info!(item = %batch.item_id, batch = %batch_id, "removed empty batch");
        Ok(batch)
    }

    pub fn batch(&self, batch_id: BatchId) -> ServiceResult<Option<Batch>> {
        Ok(self.batches.get(batch_id)?)
    }

    pub fn batches_for_item(
        &self,
        item_id: StockItemId,
        warehouse_id: Option<WarehouseId>,
    ) -> ServiceResult<Vec<Batch>> {
        Ok(self.batches.list_for_item(item_id, warehouse_id)?)
    }

    pub fn batches_for_purchase_order(&self, order_id: PurchaseOrderId) -> ServiceResult<Vec<Batch>> {
        Ok(self.batches.list_for_purchase_order(order_id)?)
    }

    pub fn item(&self, item_id: StockItemId) -> ServiceResult<Option<StockItem>> {
        Ok(self.items.get(item_id)?)
    }

    pub fn transactions_for_item(&self, item_id: StockItemId) -> ServiceResult<Vec<StockTransaction>> {
        Ok(self.log.list_for_item(item_id)?)
    }

    fn require_item(&self, item_id: StockItemId) -> ServiceResult<StockItem> {
        self.items
            .get(item_id)?
            .ok_or_else(|| DomainError::validation(format!("unknown stock item {item_id}")).into())
    }

    fn apply_issue(
        &self,
        item: &StockItem,
        warehouse_id: Option<WarehouseId>,
        quantity: i64,
        plan: Vec<Allocation>,
        meta: IssueMeta,
    ) -> ServiceResult<InventoryChange> {
        let tx_id = TransactionId::new();
        self.append(
            tx_id,
            TransactionKind::Issue,
            item,
            warehouse_id,
            quantity,
            plan.clone(),
            meta.reference,
            None,
            meta.actor,
            meta.occurred_at,
        )?;

        let mut movements = Vec::with_capacity(plan.len());
        for step in &plan {
            match self.batches.decrement(step.batch_id, step.quantity) {
                Ok(after) => {
                    debug!(item = %item.id, batch = %step.batch_id, quantity = step.quantity, remaining = after, "batch depleted");
                    movements.push(BatchMovement {
                        batch_id: step.batch_id,
                        delta: -step.quantity,
                        quantity_after: after,
                    });
                }
                Err(e) => {
                    warn!(item = %item.id, batch = %step.batch_id, error = ?e, "batch decrement refused; reversing issue");
                    self.reverse(tx_id, item, warehouse_id, &movements, meta.actor);
                    return Err(self.lost_race(item.id, warehouse_id, quantity, meta.batch_id, e));
                }
            }
        }

        info!(item = %item.id, quantity, batches = movements.len(), "issued stock");
        self.finish(
            tx_id,
            TransactionKind::Issue,
            item.id,
            warehouse_id,
            movements,
            meta.occurred_at,
        )
    }

    /// Put back decrements already applied by a failed issue and record the
    /// compensation in the audit log.
    fn reverse(
        &self,
        issue_id: TransactionId,
        item: &StockItem,
        warehouse_id: Option<WarehouseId>,
        applied: &[BatchMovement],
        actor: UserId,
    ) {
        if applied.is_empty() {
            return;
        }

        let mut restored = Vec::with_capacity(applied.len());
        for m in applied {
            match self.batches.increment(m.batch_id, -m.delta) {
                Ok(_) => restored.push(Allocation {
                    batch_id: m.batch_id,
                    quantity: -m.delta,
                }),
                Err(e) => {
                    warn!(item = %item.id, batch = %m.batch_id, error = ?e, "failed to restore batch after aborted issue")
                }
            }
        }

        let quantity = restored.iter().map(|a| a.quantity).sum();
        if let Err(e) = self.append(
            TransactionId::new(),
            TransactionKind::Reversal,
            item,
            warehouse_id,
            quantity,
            restored,
            None,
            Some(issue_id),
            actor,
            Utc::now(),
        ) {
            warn!(item = %item.id, transaction = %issue_id, error = ?e, "failed to log reversal");
        }
    }

    fn lost_race(
        &self,
        item_id: StockItemId,
        warehouse_id: Option<WarehouseId>,
        requested: i64,
        explicit_batch: Option<BatchId>,
        error: StoreError,
    ) -> ServiceError {
        match error {
            StoreError::InsufficientQuantity { available } if explicit_batch.is_some() => {
                DomainError::validation(format!(
                    "batch holds {available} but {requested} was requested"
                ))
                .into()
            }
            StoreError::InsufficientQuantity { .. } => {
                let available = self
                    .batches
                    .list_for_item(item_id, warehouse_id)
                    .map(|bs| bs.iter().map(|b| b.quantity).sum())
                    .unwrap_or(0);
                DomainError::insufficient_stock(requested, available).into()
            }
            other => other.into(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn append(
        &self,
        id: TransactionId,
        kind: TransactionKind,
        item: &StockItem,
        warehouse_id: Option<WarehouseId>,
        quantity: i64,
        allocations: Vec<Allocation>,
        reference: Option<String>,
        reverses: Option<TransactionId>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    ) -> ServiceResult<()> {
        self.log.append(StockTransaction {
            id,
            kind,
            item_id: item.id,
            warehouse_id,
            quantity,
            previous_quantity: item.quantity,
            allocations,
            reference,
            reverses,
            actor,
            occurred_at,
        })?;
        Ok(())
    }

    fn finish(
        &self,
        transaction_id: TransactionId,
        kind: TransactionKind,
        item_id: StockItemId,
        warehouse_id: Option<WarehouseId>,
        movements: Vec<BatchMovement>,
        occurred_at: DateTime<Utc>,
    ) -> ServiceResult<InventoryChange> {
        let item_quantity = self.recalculate(item_id)?;
        let change = InventoryChange {
            transaction_id,
            kind,
            item_id,
            warehouse_id,
            movements,
            item_quantity,
            occurred_at,
        };

        for observer in &self.observers {
            observer.on_change(&change);
        }
        Ok(change)
    }
}
