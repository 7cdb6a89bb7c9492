//! Outbound "your purchased goods arrived" notifications.
//!
//! Delivery of the message itself (mail, push, in-app) belongs to another
//! system; the engine only decides when to call it and never waits on or
//! fails because of it.

use std::sync::Mutex;

use anyhow::anyhow;
use serde::Serialize;

use forgestock_core::PurchaseOrderId;
use forgestock_purchasing::PurchaseOrderStatus;
use forgestock_reservations::{ConsumerId, ReservationId};

/// What a delivery notification says.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryNotice {
    pub purchase_order_id: PurchaseOrderId,
    pub status: PurchaseOrderStatus,
    pub consumers: Vec<ConsumerId>,
    pub reservations: Vec<ReservationId>,
}

pub trait DeliveryNotifier: Send + Sync {
    fn notify(&self, notice: &DeliveryNotice) -> anyhow::Result<()>;
}

/// Collects notices in memory (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryDeliveryNotifier {
    sent: Mutex<Vec<DeliveryNotice>>,
    fail: bool,
}

impl InMemoryDeliveryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every call fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<DeliveryNotice> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl DeliveryNotifier for InMemoryDeliveryNotifier {
    fn notify(&self, notice: &DeliveryNotice) -> anyhow::Result<()> {
        if self.fail {
            return Err(anyhow!(
                "notification channel unavailable for purchase order {}",
                notice.purchase_order_id
            ));
        }
        self.sent
            .lock()
            .map_err(|_| anyhow!("notifier lock poisoned"))?
            .push(notice.clone());
        Ok(())
    }
}
