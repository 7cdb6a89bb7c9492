//! Batch selection for issues.
//!
//! Pure functions: given the candidate batches, decide which ones to draw from
//! and how much. Nothing is mutated here; the caller applies the plan.

use core::cmp::Ordering;

use serde::{Deserialize, Serialize};

use forgestock_core::{DomainError, DomainResult, ensure_positive};

use crate::batch::{Batch, BatchId};

/// Order in which batches are consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStrategy {
    /// Oldest receipt first.
    Fifo,
    /// Soonest expiry first; undated batches last, oldest receipt first among them.
    Fefo,
}

/// One step of an allocation plan: take `quantity` from `batch_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub batch_id: BatchId,
    pub quantity: i64,
}

fn fifo_order(a: &Batch, b: &Batch) -> Ordering {
    a.received_at
        .cmp(&b.received_at)
        .then_with(|| a.id.cmp(&b.id))
}

fn fefo_order(a: &Batch, b: &Batch) -> Ordering {
    match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| fifo_order(a, b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => fifo_order(a, b),
    }
}

impl AllocationStrategy {
    pub fn compare(self, a: &Batch, b: &Batch) -> Ordering {
        match self {
            AllocationStrategy::Fifo => fifo_order(a, b),
            AllocationStrategy::Fefo => fefo_order(a, b),
        }
    }
}

/// Plan an all-or-nothing issue of `quantity` across `batches`.
///
/// Empty batches are skipped. If the non-empty batches together hold less than
/// `quantity`, nothing is planned and `InsufficientStock` reports the shortfall.
pub fn plan_allocation(
    batches: &[Batch],
    quantity: i64,
    strategy: AllocationStrategy,
) -> DomainResult<Vec<Allocation>> {
    ensure_positive("quantity", quantity)?;

    let mut candidates: Vec<&Batch> = batches.iter().filter(|b| b.quantity > 0).collect();
    let available: i64 = candidates.iter().map(|b| b.quantity).sum();
    if available < quantity {
        return Err(DomainError::insufficient_stock(quantity, available));
    }

    candidates.sort_by(|a, b| strategy.compare(a, b));

    let mut remaining = quantity;
    let mut plan = Vec::new();
    for batch in candidates {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(batch.quantity);
        plan.push(Allocation {
            batch_id: batch.id,
            quantity: take,
        });
        remaining -= take;
    }

    Ok(plan)
}

/// Plan an issue against one explicitly chosen batch.
pub fn allocate_from_batch(batch: &Batch, quantity: i64) -> DomainResult<Allocation> {
    ensure_positive("quantity", quantity)?;
    if batch.quantity < quantity {
        return Err(DomainError::validation(format!(
            "batch {} holds {} but {} was requested",
            batch.batch_number, batch.quantity, quantity
        )));
    }
    Ok(Allocation {
        batch_id: batch.id,
        quantity,
    })
}
