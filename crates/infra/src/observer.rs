//! Injected listeners for ledger changes.
//!
//! The ledger calls every registered observer after a receive/issue has been
//! applied and the item total reconciled. Observers must not block and must
//! not fail the ledger operation; they log their own problems.

use std::sync::Mutex;

use tracing::warn;

use forgestock_events::{Event, EventBus};
use forgestock_inventory::InventoryChange;

pub trait InventoryObserver: Send + Sync {
    fn on_change(&self, change: &InventoryChange);
}

/// Publishes every change to an [`EventBus`].
#[derive(Debug)]
pub struct BusObserver<B> {
    bus: B,
}

impl<B> BusObserver<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B> InventoryObserver for BusObserver<B>
where
    B: EventBus<InventoryChange>,
{
    fn on_change(&self, change: &InventoryChange) {
        if let Err(e) = self.bus.publish(change.clone()) {
            warn!(
                event = change.event_type(),
                subject = %change.subject(),
                transaction = %change.transaction_id,
                error = ?e,
                "failed to publish inventory change"
            );
        }
    }
}

/// Keeps every change it sees (tests/dev).
#[derive(Debug, Default)]
pub struct RecordingObserver {
    seen: Mutex<Vec<InventoryChange>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> Vec<InventoryChange> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl InventoryObserver for RecordingObserver {
    fn on_change(&self, change: &InventoryChange) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(change.clone());
        }
    }
}
