use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use forgestock_reservations::{ConsumerId, ReservationId};

use super::StoreResult;
use crate::error::StoreError;

/// The task (job, work order) that owns reservations.
///
/// Holds back-references only; reservations are stored on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consumer {
    pub id: ConsumerId,
    #[serde(default)]
    pub reservation_ids: Vec<ReservationId>,
}

impl Consumer {
    pub fn new(id: ConsumerId) -> Self {
        Self {
            id,
            reservation_ids: Vec::new(),
        }
    }
}

pub trait ConsumerStore: Send + Sync {
    fn insert(&self, consumer: Consumer) -> StoreResult<()>;

    fn get(&self, id: ConsumerId) -> StoreResult<Option<Consumer>>;

    /// Append `reservation_id` to the consumer's claim list (no-op if present).
    fn add_claim(&self, id: ConsumerId, reservation_id: ReservationId) -> StoreResult<()>;

    /// Remove `reservation_id` from the claim list (no-op if absent).
    fn remove_claim(&self, id: ConsumerId, reservation_id: ReservationId) -> StoreResult<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryConsumerStore {
    rows: RwLock<HashMap<ConsumerId, Consumer>>,
}

impl InMemoryConsumerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConsumerStore for InMemoryConsumerStore {
    fn insert(&self, consumer: Consumer) -> StoreResult<()> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;
        rows.insert(consumer.id, consumer);
        Ok(())
    }

    fn get(&self, id: ConsumerId) -> StoreResult<Option<Consumer>> {
        let rows = self.rows.read().map_err(|_| StoreError::poisoned())?;
        Ok(rows.get(&id).cloned())
    }

    fn add_claim(&self, id: ConsumerId, reservation_id: ReservationId) -> StoreResult<()> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;
        let consumer = rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("consumer {id}")))?;
        if !consumer.reservation_ids.contains(&reservation_id) {
            consumer.reservation_ids.push(reservation_id);
        }
        Ok(())
    }

    fn remove_claim(&self, id: ConsumerId, reservation_id: ReservationId) -> StoreResult<()> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;
        let consumer = rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("consumer {id}")))?;
        consumer.reservation_ids.retain(|r| *r != reservation_id);
        Ok(())
    }
}
