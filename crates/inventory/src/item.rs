use serde::{Deserialize, Serialize};

use forgestock_core::{DomainError, DomainResult, Entity, StockItemId};

use crate::batch::Batch;

/// A stock item with a cached aggregate quantity.
///
/// `quantity` is a projection of the item's batches. It may drift between
/// writes and is overwritten by [`StockItem::reconcile`]; batches stay
/// authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockItem {
    pub id: StockItemId,
    pub name: String,
    pub unit: String,
    pub quantity: i64,
}

impl StockItem {
    pub fn new(id: StockItemId, name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            unit: unit.into(),
            quantity: 0,
        }
    }

    /// Sum of the given batches' quantities that belong to this item.
    ///
    /// Fails when the sum does not fit in an `i64`.
    pub fn total_of<'a>(&self, batches: impl IntoIterator<Item = &'a Batch>) -> DomainResult<i64> {
        batches
            .into_iter()
            .filter(|b| b.item_id == self.id)
            .try_fold(0i64, |total, b| total.checked_add(b.quantity))
            .ok_or_else(|| {
                DomainError::invariant(format!("total quantity of item {} overflows", self.id))
            })
    }

    /// Overwrite the cached total from the batches; returns the new total.
    /// On overflow the cached total is left as it was.
    pub fn reconcile<'a>(
        &mut self,
        batches: impl IntoIterator<Item = &'a Batch>,
    ) -> DomainResult<i64> {
        self.quantity = self.total_of(batches)?;
        Ok(self.quantity)
    }
}

impl Entity for StockItem {
    type Id = StockItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
