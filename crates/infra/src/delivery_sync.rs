//! Links delivered batches to outstanding reservations.
//!
//! A reservation is marked delivered once one of the matcher strategies finds
//! batches for its PO line. Nothing matching is not an error: the reservation
//! stays pending until a later delivery event or consumer sync finds them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use forgestock_core::{DomainError, PurchaseOrderId, PurchaseOrderLineId, StockItemId};
use forgestock_reservations::{
    ConsumerId, LinkedBatch, MatchCandidate, MatchStrategy, PoReservation, ReservationId,
    find_matching_batches,
};

use crate::error::ServiceResult;
use crate::ledger::BatchLedger;
use crate::retry::{Modified, modify_reservation};
use crate::store::{PurchaseOrderLines, ReservationStore};

/// A delivered PO line, optionally with the quantity the goods receipt reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredLine {
    pub line_id: PurchaseOrderLineId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_quantity: Option<i64>,
}

impl DeliveredLine {
    pub fn new(line_id: PurchaseOrderLineId) -> Self {
        Self {
            line_id,
            delivered_quantity: None,
        }
    }

    pub fn with_quantity(line_id: PurchaseOrderLineId, quantity: i64) -> Self {
        Self {
            line_id,
            delivered_quantity: Some(quantity),
        }
    }
}

/// Summary of one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub examined: usize,
    /// Reservations written as delivered (newly or with new links).
    pub delivered: Vec<(ReservationId, MatchStrategy)>,
    /// Reservations for which no strategy found a batch.
    pub unmatched: Vec<ReservationId>,
    pub failed: Vec<ReservationId>,
    /// Lines whose delivered batches hold more than was ordered.
    pub over_delivered: Vec<PurchaseOrderLineId>,
}

impl SyncReport {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    fn absorb(&mut self, other: SyncReport) {
        self.examined += other.examined;
        self.delivered.extend(other.delivered);
        self.unmatched.extend(other.unmatched);
        self.failed.extend(other.failed);
        self.over_delivered.extend(other.over_delivered);
    }
}

pub struct DeliverySynchronizer {
    ledger: Arc<BatchLedger>,
    reservations: Arc<dyn ReservationStore>,
    lines: Arc<dyn PurchaseOrderLines>,
    update_attempts: u32,
}

impl DeliverySynchronizer {
    pub fn new(
        ledger: Arc<BatchLedger>,
        reservations: Arc<dyn ReservationStore>,
        lines: Arc<dyn PurchaseOrderLines>,
        update_attempts: u32,
    ) -> Self {
        Self {
            ledger,
            reservations,
            lines,
            update_attempts,
        }
    }

    /// Synchronize the outstanding reservations of `order_id`.
    ///
    /// With an empty `lines` slice every line of the order is considered.
    pub fn synchronize_on_delivery(
        &self,
        order_id: PurchaseOrderId,
        lines: &[DeliveredLine],
    ) -> ServiceResult<SyncReport> {
        for line in lines {
            if let Some(q) = line.delivered_quantity {
                if q < 0 {
                    return Err(DomainError::validation(format!(
                        "delivered quantity for line {} cannot be negative (got {q})",
                        line.line_id
                    ))
                    .into());
                }
            }
        }

        let supplied: HashMap<PurchaseOrderLineId, Option<i64>> = lines
            .iter()
            .map(|l| (l.line_id, l.delivered_quantity))
            .collect();

        let targets: Vec<PoReservation> = self
            .reservations
            .list_for_purchase_order(order_id)?
            .into_iter()
            .filter(|r| r.is_outstanding())
            .filter(|r| supplied.is_empty() || supplied.contains_key(&r.line_id()))
            .collect();

        let candidates = self.candidates_for(order_id)?;
        let mut report = SyncReport::default();
        let mut checked_lines = HashSet::new();
        for reservation in &targets {
            let quantity = supplied.get(&reservation.line_id()).copied().flatten();
            self.sync_one(reservation, quantity, &candidates, &mut checked_lines, &mut report);
        }

        info!(
            order = %order_id,
            examined = report.examined,
            delivered = report.delivered.len(),
            unmatched = report.unmatched.len(),
            failed = report.failed.len(),
            "delivery synchronization finished"
        );
        Ok(report)
    }

    /// Synchronize every outstanding reservation a consumer holds.
    pub fn synchronize_consumer(&self, consumer_id: ConsumerId) -> ServiceResult<SyncReport> {
        let mut by_order: HashMap<PurchaseOrderId, Vec<PoReservation>> = HashMap::new();
        for r in self.reservations.list_for_consumer(consumer_id)? {
            if r.is_outstanding() {
                by_order.entry(r.purchase_order_id()).or_default().push(r);
            }
        }

        let mut report = SyncReport::default();
        for (order_id, reservations) in by_order {
            let candidates = self.candidates_for(order_id)?;
            let mut part = SyncReport::default();
            let mut checked_lines = HashSet::new();
            for reservation in &reservations {
                self.sync_one(reservation, None, &candidates, &mut checked_lines, &mut part);
            }
            report.absorb(part);
        }

        debug!(consumer = %consumer_id, examined = report.examined, delivered = report.delivered.len(), "consumer synchronization finished");
        Ok(report)
    }

    fn candidates_for(&self, order_id: PurchaseOrderId) -> ServiceResult<Vec<MatchCandidate>> {
        let batches = self.ledger.batches_for_purchase_order(order_id)?;

        let mut names: HashMap<StockItemId, Option<String>> = HashMap::new();
        let mut candidates = Vec::with_capacity(batches.len());
        for batch in batches {
            let name = match names.get(&batch.item_id) {
                Some(n) => n.clone(),
                None => {
                    let n = match self.ledger.item(batch.item_id) {
                        Ok(item) => item.map(|i| i.name),
                        Err(e) => {
                            warn!(item = %batch.item_id, error = ?e, "item lookup failed; name matching disabled for it");
                            None
                        }
                    };
                    names.insert(batch.item_id, n.clone());
                    n
                }
            };
            candidates.push(MatchCandidate::new(batch, name));
        }
        Ok(candidates)
    }

    fn sync_one(
        &self,
        reservation: &PoReservation,
        supplied: Option<i64>,
        candidates: &[MatchCandidate],
        checked_lines: &mut HashSet<PurchaseOrderLineId>,
        report: &mut SyncReport,
    ) {
        let id = reservation.id_typed();
        report.examined += 1;

        let Some((strategy, batches)) = find_matching_batches(reservation, candidates) else {
            debug!(reservation = %id, line = %reservation.line_id(), "no delivered batches match yet");
            report.unmatched.push(id);
            return;
        };
        let links: Vec<LinkedBatch> = batches.iter().map(LinkedBatch::snapshot).collect();

        let outcome = modify_reservation(self.reservations.as_ref(), id, self.update_attempts, |r| {
            if !r.is_outstanding() {
                return Ok(false);
            }
            r.record_delivery(links.clone(), supplied, Utc::now())
        });

        match outcome {
            Ok(Modified::Written(stored)) => {
                if stored.delivered_quantity() > stored.reserved_quantity() {
                    debug!(
                        reservation = %id,
                        reserved = stored.reserved_quantity(),
                        delivered = stored.delivered_quantity(),
                        "linked batches hold more than this reservation claims"
                    );
                }
                if checked_lines.insert(stored.line_id()) && self.exceeds_order(&stored) {
                    report.over_delivered.push(stored.line_id());
                }
                info!(
                    reservation = %id,
                    strategy = strategy.as_str(),
                    batches = stored.linked_batches().len(),
                    delivered = stored.delivered_quantity(),
                    "reservation marked delivered"
                );
                report.delivered.push((id, strategy));
            }
            Ok(Modified::Unchanged(_)) | Ok(Modified::Gone) => {}
            Err(e) => {
                warn!(reservation = %id, error = ?e, "failed to record delivery");
                report.failed.push(id);
            }
        }
    }

    /// Whether the batches delivered against the reservation's line hold more
    /// than the line ordered. Every reservation on a line links the same
    /// batches, so this is checked once per line.
    fn exceeds_order(&self, reservation: &PoReservation) -> bool {
        let (order_id, line_id) = (reservation.purchase_order_id(), reservation.line_id());
        let line = match self.lines.line(order_id, line_id) {
            Ok(Some(line)) => line,
            Ok(None) => return false,
            Err(e) => {
                debug!(order = %order_id, line = %line_id, error = ?e, "line lookup failed; over-delivery not checked");
                return false;
            }
        };

        let delivered = reservation.delivered_quantity();
        if delivered <= line.quantity {
            return false;
        }
        warn!(
            order = %order_id,
            line = %line_id,
            ordered = line.quantity,
            delivered,
            "supplier delivered more than the line ordered"
        );
        true
    }
}
