//! Reservation engine: claims on PO lines, their cancellation, and their
//! conversion into ledger bookings.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use forgestock_core::{
    DomainError, ExpectedVersion, PurchaseOrderId, PurchaseOrderLineId, UserId,
    ensure_positive,
};
use forgestock_inventory::BatchId;
use forgestock_purchasing::PurchaseOrderStatus;
use forgestock_reservations::{
    ConsumerId, ConversionBooking, NewReservation, PoReservation, ReservationId,
    ReservationStats,
};

use crate::config::EngineConfig;
use crate::delivery_sync::{DeliveredLine, DeliverySynchronizer, SyncReport};
use crate::error::{ServiceError, ServiceResult, StoreError};
use crate::ledger::{BatchLedger, IssueMeta};
use crate::notify::{DeliveryNotice, DeliveryNotifier};
use crate::refresher::{QuantityRefresher, RefreshReport};
use crate::retry::{Modified, modify_reservation};
use crate::store::{ConsumerStore, PurchaseOrderLines, ReservationStore};

/// Request to claim quantity on a PO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservation {
    pub consumer_id: ConsumerId,
    pub purchase_order_id: PurchaseOrderId,
    pub line_id: PurchaseOrderLineId,
    pub quantity: i64,
    pub actor: UserId,
}

pub struct ReservationEngine {
    ledger: Arc<BatchLedger>,
    reservations: Arc<dyn ReservationStore>,
    consumers: Arc<dyn ConsumerStore>,
    lines: Arc<dyn PurchaseOrderLines>,
    sync: DeliverySynchronizer,
    refresher: Arc<QuantityRefresher>,
    notifier: Option<Arc<dyn DeliveryNotifier>>,
    config: EngineConfig,
}

impl ReservationEngine {
    pub fn new(
        ledger: Arc<BatchLedger>,
        reservations: Arc<dyn ReservationStore>,
        consumers: Arc<dyn ConsumerStore>,
        lines: Arc<dyn PurchaseOrderLines>,
        config: EngineConfig,
    ) -> Self {
        let sync = DeliverySynchronizer::new(
            ledger.clone(),
            reservations.clone(),
            lines.clone(),
            config.update_attempts,
        );
        let refresher = Arc::new(QuantityRefresher::new(
            ledger.clone(),
            reservations.clone(),
            config.update_attempts,
        ));

        Self {
            ledger,
            reservations,
            consumers,
            lines,
            sync,
            refresher,
            notifier: None,
            config,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn DeliveryNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Shared refresher, for [`crate::RefreshRunner::spawn`].
    pub fn refresher(&self) -> Arc<QuantityRefresher> {
        self.refresher.clone()
    }

    pub fn ledger(&self) -> &BatchLedger {
        &self.ledger
    }

    /// Claim `quantity` units of a PO line for a consumer.
    ///
    /// Fails with `OverReservation` when the line's existing reservations plus
    /// this one would exceed the ordered quantity; claiming exactly what is
    /// left succeeds.
    pub fn create_reservation(&self, request: CreateReservation) -> ServiceResult<PoReservation> {
        ensure_positive("quantity", request.quantity)?;

        if self.consumers.get(request.consumer_id)?.is_none() {
            return Err(
                DomainError::validation(format!("unknown consumer {}", request.consumer_id)).into(),
            );
        }
        let line = self
            .lines
            .line(request.purchase_order_id, request.line_id)?
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "unknown line {} on purchase order {}",
                    request.line_id, request.purchase_order_id
                ))
            })?;

        let already: i64 = self
            .reservations
            .list_for_line(request.purchase_order_id, request.line_id)?
            .iter()
            .map(|r| r.reserved_quantity())
            .sum();
        let available = line.remaining_after(already);
        if request.quantity > available {
            return Err(DomainError::over_reservation(request.quantity, available).into());
        }

        let reservation = PoReservation::create(NewReservation {
            consumer_id: request.consumer_id,
            purchase_order_id: request.purchase_order_id,
            line_id: request.line_id,
            material_id: line.material_id,
            material_name: line.material_name.clone(),
            quantity: request.quantity,
            requested_by: request.actor,
            requested_at: Utc::now(),
        })?;
        let id = reservation.id_typed();

        match self
            .reservations
            .insert_within_limit(reservation.clone(), line.quantity)
        {
            Ok(()) => {}
            Err(StoreError::LimitExceeded { available }) => {
                return Err(DomainError::over_reservation(request.quantity, available).into());
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.consumers.add_claim(request.consumer_id, id) {
            if let Err(undo) = self.reservations.delete(id, ExpectedVersion::Any) {
                warn!(reservation = %id, error = ?undo, "failed to remove reservation after claim-list write failed");
            }
            return Err(e.into());
        }

        info!(
            reservation = %id,
            consumer = %request.consumer_id,
            order = %request.purchase_order_id,
            line = %request.line_id,
            quantity = request.quantity,
            actor = %request.actor,
            "reservation created"
        );

        if self.config.auto_sync_on_create {
            if let Err(e) = self.sync.synchronize_consumer(request.consumer_id) {
                warn!(consumer = %request.consumer_id, error = ?e, "auto-sync after reservation failed");
            }
        }

        Ok(self.reservations.get(id).ok().flatten().unwrap_or(reservation))
    }

    /// Remove a reservation that has not been fully converted.
    ///
    /// Has no ledger effect. Returns the removed reservation.
    pub fn cancel_reservation(
        &self,
        id: ReservationId,
        actor: UserId,
    ) -> ServiceResult<PoReservation> {
        let reservation = self.require(id)?;
        reservation.ensure_cancellable()?;

        self.reservations
            .delete(id, ExpectedVersion::of(&reservation))?;

        if let Err(e) = self.consumers.remove_claim(reservation.consumer_id(), id) {
            warn!(reservation = %id, consumer = %reservation.consumer_id(), error = ?e, "failed to remove claim from consumer");
        }

        info!(reservation = %id, actor = %actor, "reservation cancelled");
        Ok(reservation)
    }

    /// Book `quantity` units of a delivered reservation against one of its
    /// linked batches.
    ///
    /// The quantity is first claimed on the reservation row with a versioned
    /// write, so concurrent conversions of the same reservation cannot both
    /// book. A failed booking releases the claim. The ledger booking and the
    /// reservation update are separate writes: if the update still fails
    /// after retrying, the booking and the claim stay and the error is
    /// [`ServiceError::ConversionStateLag`]; finish it with
    /// [`ReservationEngine::complete_conversion`].
    pub fn convert_to_standard(
        &self,
        id: ReservationId,
        batch_id: BatchId,
        quantity: i64,
        actor: UserId,
    ) -> ServiceResult<PoReservation> {
        let claimed = modify_reservation(
            self.reservations.as_ref(),
            id,
            self.config.update_attempts,
            |r| r.claim_conversion(batch_id, quantity, Utc::now()).map(|()| true),
        )?;
        if !matches!(claimed, Modified::Written(_)) {
            return Err(DomainError::validation(format!("unknown reservation {id}")).into());
        }

        let booking = match self.book(id, batch_id, quantity, actor) {
            Ok(booking) => booking,
            Err(e) => {
                self.release_claim(id, quantity);
                return Err(e);
            }
        };

        self.complete_conversion(booking)
            .map_err(|source| ServiceError::ConversionStateLag {
                booking,
                source: Box::new(source),
            })
    }

    /// Apply a committed booking to its reservation. Safe to call repeatedly:
    /// a booking already applied leaves the reservation unchanged.
    pub fn complete_conversion(&self, booking: ConversionBooking) -> ServiceResult<PoReservation> {
        let id = booking.reservation_id;
        let outcome = modify_reservation(
            self.reservations.as_ref(),
            id,
            self.config.update_attempts,
            |r| r.apply_conversion(&booking, Utc::now()),
        )?;

        match outcome {
            Modified::Written(stored) => {
                info!(
                    reservation = %id,
                    batch = %booking.batch_id,
                    quantity = booking.quantity,
                    converted = stored.converted_quantity(),
                    status = ?stored.status(),
                    "reservation converted"
                );
                Ok(stored)
            }
            Modified::Unchanged(current) => Ok(current),
            Modified::Gone => Err(StoreError::NotFound(format!("reservation {id}")).into()),
        }
    }

    pub fn synchronize_on_delivery(
        &self,
        order_id: PurchaseOrderId,
        lines: &[DeliveredLine],
    ) -> ServiceResult<SyncReport> {
        self.sync.synchronize_on_delivery(order_id, lines)
    }

    pub fn synchronize_consumer(&self, consumer_id: ConsumerId) -> ServiceResult<SyncReport> {
        self.sync.synchronize_consumer(consumer_id)
    }

    pub fn refresh_linked_batches(&self, batch_id: Option<BatchId>) -> ServiceResult<RefreshReport> {
        self.refresher.refresh_linked_batches(batch_id)
    }

    /// React to a purchase order status change reported by purchasing.
    ///
    /// Delivered-like statuses synchronize the whole order; if outstanding
    /// reservations remain, their owners are notified. Notification failures
    /// are logged only. Returns `None` for other statuses.
    pub fn handle_purchase_order_status(
        &self,
        order_id: PurchaseOrderId,
        status: PurchaseOrderStatus,
    ) -> ServiceResult<Option<SyncReport>> {
        if !status.is_delivered_like() {
            return Ok(None);
        }

        let report = self.synchronize_on_delivery(order_id, &[])?;

        let outstanding: Vec<PoReservation> = self
            .reservations
            .list_for_purchase_order(order_id)?
            .into_iter()
            .filter(|r| r.is_outstanding())
            .collect();

        let notifier = match &self.notifier {
            Some(n) if !outstanding.is_empty() => n,
            _ => return Ok(Some(report)),
        };

        let mut consumers: Vec<ConsumerId> = Vec::new();
        for r in &outstanding {
            if !consumers.contains(&r.consumer_id()) {
                consumers.push(r.consumer_id());
            }
        }
        let notice = DeliveryNotice {
            purchase_order_id: order_id,
            status,
            consumers,
            reservations: outstanding.iter().map(|r| r.id_typed()).collect(),
        };
        if let Err(e) = notifier.notify(&notice) {
            warn!(order = %order_id, error = ?e, "delivery notification failed");
        }

        Ok(Some(report))
    }

    pub fn get_reservation(&self, id: ReservationId) -> ServiceResult<Option<PoReservation>> {
        Ok(self.reservations.get(id)?)
    }

    pub fn get_reservations_for_consumer(
        &self,
        consumer_id: ConsumerId,
    ) -> ServiceResult<Vec<PoReservation>> {
        Ok(self.reservations.list_for_consumer(consumer_id)?)
    }

    /// Counts and quantity sums, over one consumer or over everything.
    pub fn get_reservation_stats(
        &self,
        consumer_id: Option<ConsumerId>,
    ) -> ServiceResult<ReservationStats> {
        let reservations = match consumer_id {
            Some(c) => self.reservations.list_for_consumer(c)?,
            None => self.reservations.list_all()?,
        };
        Ok(ReservationStats::from_reservations(&reservations))
    }

    fn book(
        &self,
        id: ReservationId,
        batch_id: BatchId,
        quantity: i64,
        actor: UserId,
    ) -> ServiceResult<ConversionBooking> {
        let batch = self.ledger.batch(batch_id)?.ok_or_else(|| {
            DomainError::validation(format!("linked batch {batch_id} no longer exists"))
        })?;

        let change = self.ledger.issue(
            batch.item_id,
            quantity,
            IssueMeta::new(batch.warehouse_id, actor)
                .from_batch(batch_id)
                .with_reference(format!("reservation {id}")),
        )?;
        let batch_quantity_after = change
            .movements
            .iter()
            .find(|m| m.batch_id == batch_id)
            .map(|m| m.quantity_after)
            .unwrap_or(batch.quantity - quantity);

        Ok(ConversionBooking {
            reservation_id: id,
            transaction_id: change.transaction_id,
            batch_id,
            quantity,
            batch_quantity_after,
            booked_by: actor,
            booked_at: change.occurred_at,
        })
    }

    fn release_claim(&self, id: ReservationId, quantity: i64) {
        let released = modify_reservation(
            self.reservations.as_ref(),
            id,
            self.config.update_attempts,
            |r| Ok(r.release_conversion(quantity, Utc::now())),
        );
        if let Err(e) = released {
            warn!(reservation = %id, quantity, error = ?e, "failed to release conversion claim");
        }
    }

    fn require(&self, id: ReservationId) -> ServiceResult<PoReservation> {
        self.reservations
            .get(id)?
            .ok_or_else(|| DomainError::validation(format!("unknown reservation {id}")).into())
    }
}
