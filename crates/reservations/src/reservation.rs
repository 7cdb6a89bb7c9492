use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use forgestock_core::{
    AggregateRoot, DomainError, DomainResult, PurchaseOrderId, PurchaseOrderLineId, StockItemId,
    UserId, WarehouseId, ensure_positive,
};
use forgestock_inventory::{Batch, BatchId, TransactionId};

/// Reservation identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(Uuid);

forgestock_core::impl_uuid_newtype!(ReservationId, "ReservationId");

/// Identifier of the consumer (task) that owns a reservation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(Uuid);

forgestock_core::impl_uuid_newtype!(ConsumerId, "ConsumerId");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Delivered,
    Converted,
}

/// Cached view of a batch a delivered reservation draws from.
///
/// Derived from the ledger and refreshed periodically; never authoritative.
/// Optional fields are left out of the stored shape when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedBatch {
    pub batch_id: BatchId,
    pub batch_number: String,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
}

impl LinkedBatch {
    pub fn snapshot(batch: &Batch) -> Self {
        Self {
            batch_id: batch.id,
            batch_number: batch.batch_number.clone(),
            warehouse_id: batch.warehouse_id,
            quantity: batch.quantity,
            unit_price: (batch.unit_price > 0).then_some(batch.unit_price),
            expiry_date: batch.expiry_date,
        }
    }
}

/// Outcome of re-reading one linked batch from the ledger.
#[derive(Debug, Clone)]
pub enum LinkRead {
    Found(Batch),
    /// The batch no longer exists; the link is dropped.
    Missing,
    /// The read failed; the cached link is kept as is.
    Failed,
}

/// A ledger booking made on behalf of a reservation.
///
/// Keyed by the ledger transaction id so applying it to the reservation is
/// idempotent and can be retried after a failed state write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionBooking {
    pub reservation_id: ReservationId,
    pub transaction_id: TransactionId,
    pub batch_id: BatchId,
    pub quantity: i64,
    /// Batch quantity right after the booking.
    pub batch_quantity_after: i64,
    pub booked_by: UserId,
    pub booked_at: DateTime<Utc>,
}

/// Input for claiming quantity on a purchase order line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub consumer_id: ConsumerId,
    pub purchase_order_id: PurchaseOrderId,
    pub line_id: PurchaseOrderLineId,
    pub material_id: StockItemId,
    pub material_name: String,
    pub quantity: i64,
    pub requested_by: UserId,
    pub requested_at: DateTime<Utc>,
}

/// Aggregate root: PoReservation.
///
/// Invariants (held after every transition):
/// - `0 <= converted_quantity <= delivered_quantity`
/// - a conversion claim never exceeds what was convertible when it was taken

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoReservation {
    id: ReservationId,
    consumer_id: ConsumerId,
    purchase_order_id: PurchaseOrderId,
    line_id: PurchaseOrderLineId,
    material_id: StockItemId,
    material_name: String,
    reserved_quantity: i64,
    delivered_quantity: i64,
    converted_quantity: i64,
    /// Claimed by conversions whose ledger booking has not been applied yet.
    #[serde(default, skip_serializing_if = "is_zero")]
    pending_conversion: i64,
    status: ReservationStatus,
    linked_batches: Vec<LinkedBatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    applied_bookings: Vec<TransactionId>,
    created_by: UserId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delivered_at: Option<DateTime<Utc>>,
    version: u64,
}

impl PoReservation {
    /// Build a pending reservation. Claim limits are checked by the caller,
    /// which knows the other reservations on the line.
    pub fn create(new: NewReservation) -> DomainResult<Self> {
        ensure_positive("quantity", new.quantity)?;

        Ok(Self {
            id: ReservationId::new(),
            consumer_id: new.consumer_id,
            purchase_order_id: new.purchase_order_id,
            line_id: new.line_id,
            material_id: new.material_id,
            material_name: new.material_name,
            reserved_quantity: new.quantity,
            delivered_quantity: 0,
            converted_quantity: 0,
            pending_conversion: 0,
            status: ReservationStatus::Pending,
            linked_batches: Vec::new(),
            applied_bookings: Vec::new(),
            created_by: new.requested_by,
            created_at: new.requested_at,
            updated_at: new.requested_at,
            delivered_at: None,
            version: 0,
        })
    }

    pub fn id_typed(&self) -> ReservationId {
        self.id
    }

    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer_id
    }

    pub fn purchase_order_id(&self) -> PurchaseOrderId {
        self.purchase_order_id
    }

    pub fn line_id(&self) -> PurchaseOrderLineId {
        self.line_id
    }

    pub fn material_id(&self) -> StockItemId {
        self.material_id
    }

    pub fn material_name(&self) -> &str {
        &self.material_name
    }

    pub fn reserved_quantity(&self) -> i64 {
        self.reserved_quantity
    }

    pub fn delivered_quantity(&self) -> i64 {
        self.delivered_quantity
    }

    pub fn converted_quantity(&self) -> i64 {
        self.converted_quantity
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn linked_batches(&self) -> &[LinkedBatch] {
        &self.linked_batches
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    /// Pending or delivered: still counts as an open claim on the line.
    pub fn is_outstanding(&self) -> bool {
        self.status != ReservationStatus::Converted
    }

    pub fn is_for_line(&self, order_id: PurchaseOrderId, line_id: PurchaseOrderLineId) -> bool {
        self.purchase_order_id == order_id && self.line_id == line_id
    }

    pub fn references_batch(&self, batch_id: BatchId) -> bool {
        self.linked_batches.iter().any(|l| l.batch_id == batch_id)
    }

    pub fn has_applied(&self, transaction_id: TransactionId) -> bool {
        self.applied_bookings.contains(&transaction_id)
    }

    pub fn pending_conversion(&self) -> i64 {
        self.pending_conversion
    }

    /// Quantity that may still be claimed for conversion into ledger bookings.
    pub fn convertible_quantity(&self) -> i64 {
        (self.delivered_quantity.min(self.reserved_quantity)
            - self.converted_quantity
            - self.pending_conversion)
            .max(0)
    }

    /// Copy of this reservation as the next stored revision.
    pub fn into_next_version(mut self) -> Self {
        self.version += 1;
        self
    }

    fn linked_total(&self) -> i64 {
        self.linked_batches.iter().map(|l| l.quantity).sum()
    }

    /// Link delivered batches and mark the reservation delivered.
    ///
    /// `supplied` overrides the delivered amount when the caller knows it (e.g.
    /// from a goods receipt); otherwise it is what was already converted plus
    /// what the linked batches still hold. Returns `false` when nothing changed.
    pub fn record_delivery(
        &mut self,
        links: Vec<LinkedBatch>,
        supplied: Option<i64>,
        at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        if self.status == ReservationStatus::Converted {
            return Err(DomainError::invalid_state(
                "converted reservations no longer track deliveries",
            ));
        }
        if let Some(q) = supplied {
            if q < 0 {
                return Err(DomainError::validation(format!(
                    "delivered quantity cannot be negative (got {q})"
                )));
            }
        }

        let linked_total: i64 = links.iter().map(|l| l.quantity).sum();
        let delivered = match supplied {
            Some(q) => q.max(self.converted_quantity),
            None => self.converted_quantity + linked_total,
        };

        if self.status == ReservationStatus::Delivered
            && self.delivered_quantity == delivered
            && self.linked_batches == links
        {
            return Ok(false);
        }

        self.linked_batches = links;
        self.delivered_quantity = delivered;
        self.status = ReservationStatus::Delivered;
        self.delivered_at.get_or_insert(at);
        self.updated_at = at;
        Ok(true)
    }

    /// Re-read every linked batch and rebuild the cached snapshot.
    ///
    /// Missing batches are dropped, failed reads keep their cached link.
    /// Returns `false` (and leaves the reservation untouched) when the ledger
    /// has not changed since the last refresh.
    pub fn refresh_links(
        &mut self,
        mut read: impl FnMut(BatchId) -> LinkRead,
        at: DateTime<Utc>,
    ) -> bool {
        if self.status != ReservationStatus::Delivered {
            return false;
        }

        let mut links = Vec::with_capacity(self.linked_batches.len());
        for link in &self.linked_batches {
            match read(link.batch_id) {
                LinkRead::Found(batch) => links.push(LinkedBatch::snapshot(&batch)),
                LinkRead::Missing => {}
                LinkRead::Failed => links.push(link.clone()),
            }
        }

        let linked_total: i64 = links.iter().map(|l| l.quantity).sum();
        let delivered = self.converted_quantity + linked_total;
        if links == self.linked_batches && delivered == self.delivered_quantity {
            return false;
        }

        self.linked_batches = links;
        self.delivered_quantity = delivered;
        self.updated_at = at;
        true
    }

    /// Validate a conversion request before anything is booked in the ledger.
    pub fn check_conversion(&self, batch_id: BatchId, quantity: i64) -> DomainResult<&LinkedBatch> {
        if self.status != ReservationStatus::Delivered {
            return Err(DomainError::invalid_state(format!(
                "only delivered reservations can be converted (status: {:?})",
                self.status
            )));
        }
        ensure_positive("quantity", quantity)?;

        let link = self
            .linked_batches
            .iter()
            .find(|l| l.batch_id == batch_id)
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "batch {batch_id} is not linked to reservation {}",
                    self.id
                ))
            })?;

        let convertible = self.convertible_quantity();
        if quantity > convertible {
            return Err(DomainError::validation(format!(
                "cannot convert {quantity}: only {convertible} remains convertible"
            )));
        }

        Ok(link)
    }

    /// Hold `quantity` for a conversion about to be booked in the ledger.
    ///
    /// The claim counts against [`PoReservation::convertible_quantity`] until
    /// the booking is applied or the claim is released, so two conversions
    /// racing on one reservation cannot both book.
    pub fn claim_conversion(
        &mut self,
        batch_id: BatchId,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.check_conversion(batch_id, quantity)?;
        self.pending_conversion += quantity;
        self.updated_at = at;
        Ok(())
    }

    /// Give back a claim whose booking never happened. Returns `false` when
    /// nothing was held.
    pub fn release_conversion(&mut self, quantity: i64, at: DateTime<Utc>) -> bool {
        if self.pending_conversion == 0 || quantity <= 0 {
            return false;
        }
        self.pending_conversion = (self.pending_conversion - quantity).max(0);
        self.updated_at = at;
        true
    }

    /// Record a ledger booking against this reservation.
    ///
    /// Idempotent per booking: re-applying the same transaction returns
    /// `Ok(false)`. Flips to `converted` once the full reserved quantity is
    /// covered.
    pub fn apply_conversion(
        &mut self,
        booking: &ConversionBooking,
        at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        if booking.reservation_id != self.id {
            return Err(DomainError::invariant("booking belongs to another reservation"));
        }
        if self.has_applied(booking.transaction_id) {
            return Ok(false);
        }
        if self.status != ReservationStatus::Delivered {
            return Err(DomainError::invalid_state(format!(
                "cannot apply a conversion to a {:?} reservation",
                self.status
            )));
        }
        ensure_positive("quantity", booking.quantity)?;

        let converted = self.converted_quantity + booking.quantity;
        if converted > self.reserved_quantity {
            return Err(DomainError::invariant(format!(
                "conversion of {} would exceed reserved quantity {} (already converted {})",
                booking.quantity, self.reserved_quantity, self.converted_quantity
            )));
        }

        if let Some(link) = self
            .linked_batches
            .iter_mut()
            .find(|l| l.batch_id == booking.batch_id)
        {
            link.quantity = booking.batch_quantity_after.max(0);
        }

        self.converted_quantity = converted;
        self.pending_conversion = (self.pending_conversion - booking.quantity).max(0);
        self.delivered_quantity = self.converted_quantity + self.linked_total();
        self.applied_bookings.push(booking.transaction_id);
        if self.converted_quantity >= self.reserved_quantity {
            self.status = ReservationStatus::Converted;
        }
        self.updated_at = at;
        Ok(true)
    }

    /// Cancellation removes the reservation; it is refused once converted
    /// and while a conversion is in flight.
    pub fn ensure_cancellable(&self) -> DomainResult<()> {
        if self.status == ReservationStatus::Converted {
            return Err(DomainError::invalid_state(format!(
                "reservation {} is converted and cannot be cancelled",
                self.id
            )));
        }
        if self.pending_conversion > 0 {
            return Err(DomainError::invalid_state(format!(
                "reservation {} has {} units being converted",
                self.id, self.pending_conversion
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for PoReservation {
    type Id = ReservationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn is_zero(quantity: &i64) -> bool {
    *quantity == 0
}
