//! Infrastructure layer: stores, the batch ledger, the reservation engine and
//! its background refresher.

pub mod config;
pub mod delivery_sync;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod observer;
pub mod refresher;
pub mod store;

mod retry;

pub use config::EngineConfig;
pub use delivery_sync::{DeliveredLine, DeliverySynchronizer, SyncReport};
pub use engine::{CreateReservation, ReservationEngine};
pub use error::{ServiceError, ServiceResult, StoreError};
pub use ledger::{BatchLedger, IssueMeta, ReceiveMeta};
pub use notify::{DeliveryNotice, DeliveryNotifier, InMemoryDeliveryNotifier};
pub use observer::{BusObserver, InventoryObserver, RecordingObserver};
pub use refresher::{
    QuantityRefresher, RefreshReport, RefreshRunner, RefreshRunnerHandle, RefreshTrigger,
};

#[cfg(test)]
mod integration_tests;
