//! End-to-end tests across the ledger, the reservation engine and the stores.
//!
//! Tests: PO line → reservation → receipt → delivery sync → refresh → conversion
//!
//! Verifies:
//! - Claim limits hold per PO line, including under concurrent requests
//! - Delivered batches are linked through every matcher strategy
//! - Conversion books against the ledger and is safe to complete twice
//! - Concurrent issues never drive a batch negative

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::{Duration, Instant};

    use forgestock_core::{
        DomainError, ExpectedVersion, PurchaseOrderId, PurchaseOrderLineId, StockItemId, UserId,
        WarehouseId,
    };
    use forgestock_inventory::{BatchId, LegacyPurchaseRef, Provenance, StockItem};
    use forgestock_purchasing::{PurchaseOrderLine, PurchaseOrderStatus};
    use forgestock_reservations::{
        ConsumerId, MatchStrategy, PoReservation, ReservationId, ReservationStatus,
    };

    use crate::config::EngineConfig;
    use crate::delivery_sync::DeliveredLine;
    use crate::engine::{CreateReservation, ReservationEngine};
    use crate::error::{ServiceError, StoreError};
    use crate::ledger::{BatchLedger, IssueMeta, ReceiveMeta};
    use crate::notify::InMemoryDeliveryNotifier;
    use crate::observer::InventoryObserver;
    use crate::refresher::RefreshRunner;
    use crate::store::{
        Consumer, ConsumerStore, InMemoryBatchStore, InMemoryConsumerStore,
        InMemoryPurchaseOrderLines, InMemoryReservationStore, InMemoryStockItemStore,
        InMemoryTransactionLog, ReservationStore, StockItemStore, StoreResult,
    };

    /// Reservation store whose updates can be switched off, optionally after
    /// letting a few more through.
    #[derive(Default)]
    struct FlakyReservationStore {
        inner: InMemoryReservationStore,
        fail_updates: AtomicBool,
        let_through: AtomicU32,
    }

    impl ReservationStore for FlakyReservationStore {
        fn insert_within_limit(&self, reservation: PoReservation, limit: i64) -> StoreResult<()> {
            self.inner.insert_within_limit(reservation, limit)
        }

        fn get(&self, id: ReservationId) -> StoreResult<Option<PoReservation>> {
            self.inner.get(id)
        }

        fn update(&self, reservation: PoReservation) -> StoreResult<PoReservation> {
            let passes = self
                .let_through
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if self.fail_updates.load(Ordering::SeqCst) && !passes {
                return Err(StoreError::Unavailable("reservation table offline".to_string()));
            }
            self.inner.update(reservation)
        }

        fn delete(
            &self,
            id: ReservationId,
            expected: ExpectedVersion,
        ) -> StoreResult<Option<PoReservation>> {
            self.inner.delete(id, expected)
        }

        fn list_all(&self) -> StoreResult<Vec<PoReservation>> {
            self.inner.list_all()
        }

        fn list_for_line(
            &self,
            order_id: PurchaseOrderId,
            line_id: PurchaseOrderLineId,
        ) -> StoreResult<Vec<PoReservation>> {
            self.inner.list_for_line(order_id, line_id)
        }

        fn list_for_purchase_order(
            &self,
            order_id: PurchaseOrderId,
        ) -> StoreResult<Vec<PoReservation>> {
            self.inner.list_for_purchase_order(order_id)
        }

        fn list_for_consumer(&self, consumer_id: ConsumerId) -> StoreResult<Vec<PoReservation>> {
            self.inner.list_for_consumer(consumer_id)
        }

        fn list_by_status(&self, status: ReservationStatus) -> StoreResult<Vec<PoReservation>> {
            self.inner.list_by_status(status)
        }
    }

    struct Harness {
        engine: ReservationEngine,
        ledger: Arc<BatchLedger>,
        items: Arc<InMemoryStockItemStore>,
        lines: Arc<InMemoryPurchaseOrderLines>,
        consumers: Arc<InMemoryConsumerStore>,
        warehouse: WarehouseId,
        actor: UserId,
    }

    fn test_actor() -> UserId {
        UserId::new()
    }

    fn setup() -> Harness {
        setup_with(EngineConfig::default(), Arc::new(InMemoryReservationStore::new()))
    }

    fn setup_with(config: EngineConfig, reservations: Arc<dyn ReservationStore>) -> Harness {
        let items = Arc::new(InMemoryStockItemStore::new());
        let ledger = Arc::new(BatchLedger::new(
            items.clone(),
            Arc::new(InMemoryBatchStore::new()),
            Arc::new(InMemoryTransactionLog::new()),
        ));
        let lines = Arc::new(InMemoryPurchaseOrderLines::new());
        let consumers = Arc::new(InMemoryConsumerStore::new());
        let engine = ReservationEngine::new(
            ledger.clone(),
            reservations,
            consumers.clone(),
            lines.clone(),
            config,
        );

        Harness {
            engine,
            ledger,
            items,
            lines,
            consumers,
            warehouse: WarehouseId::new(),
            actor: test_actor(),
        }
    }

    fn test_line(h: &Harness, name: &str, quantity: i64) -> PurchaseOrderLine {
        let material_id = StockItemId::new();
        h.items.insert(StockItem::new(material_id, name, "pcs")).unwrap();

        let line = PurchaseOrderLine {
            id: PurchaseOrderLineId::new(),
            purchase_order_id: PurchaseOrderId::new(),
            material_id,
            material_name: name.to_string(),
            quantity,
            unit_price: 1_250,
            currency: "EUR".to_string(),
            expected_delivery_date: None,
            supplier: "Nordic Fasteners AB".to_string(),
            status: PurchaseOrderStatus::Ordered,
        };
        h.lines.upsert(line.clone()).unwrap();
        line
    }

    fn test_consumer(h: &Harness) -> ConsumerId {
        let id = ConsumerId::new();
        h.consumers.insert(Consumer::new(id)).unwrap();
        id
    }

    fn reserve(
        h: &Harness,
        consumer: ConsumerId,
        line: &PurchaseOrderLine,
        quantity: i64,
    ) -> Result<PoReservation, ServiceError> {
        h.engine.create_reservation(CreateReservation {
            consumer_id: consumer,
            purchase_order_id: line.purchase_order_id,
            line_id: line.id,
            quantity,
            actor: h.actor,
        })
    }

    fn receive_against(h: &Harness, line: &PurchaseOrderLine, quantity: i64) -> BatchId {
        h.ledger
            .receive(
                line.material_id,
                quantity,
                ReceiveMeta {
                    unit_price: line.unit_price,
                    provenance: Provenance::Purchase {
                        order_id: line.purchase_order_id,
                        line_id: Some(line.id),
                    },
                    ..ReceiveMeta::new(h.warehouse, h.actor)
                },
            )
            .unwrap()
            .movements[0]
            .batch_id
    }

    fn no_auto_sync() -> EngineConfig {
        EngineConfig::default().with_auto_sync_on_create(false)
    }

    #[test]
    fn claims_on_a_line_never_exceed_its_quantity() {
        let h = setup();
        let line = test_line(&h, "Hex bolt M8", 100);
        let consumer = test_consumer(&h);

        reserve(&h, consumer, &line, 60).unwrap();

        let err = reserve(&h, consumer, &line, 50).unwrap_err();
        assert_eq!(
            err.domain(),
            Some(&DomainError::OverReservation {
                requested: 50,
                available: 40
            })
        );

        let last = reserve(&h, consumer, &line, 40).unwrap();
        assert_eq!(last.status(), ReservationStatus::Pending);

        let err = reserve(&h, consumer, &line, 1).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::OverReservation { .. })));

        let claims = h.consumers.get(consumer).unwrap().unwrap().reservation_ids;
        assert_eq!(claims.len(), 2);
        assert!(claims.contains(&last.id_typed()));
    }

    #[test]
    fn creation_rejects_bad_requests() {
        let h = setup();
        let line = test_line(&h, "Washer", 10);
        let consumer = test_consumer(&h);

        let err = reserve(&h, consumer, &line, 0).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));

        let err = reserve(&h, ConsumerId::new(), &line, 1).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));

        let unknown_line = PurchaseOrderLine {
            id: PurchaseOrderLineId::new(),
            ..line.clone()
        };
        let err = reserve(&h, consumer, &unknown_line, 1).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));
    }

    #[test]
    fn delivery_links_batches_received_against_the_line() {
        let h = setup_with(no_auto_sync(), Arc::new(InMemoryReservationStore::new()));
        let line = test_line(&h, "Copper wire", 50);
        let consumer = test_consumer(&h);
        let reservation = reserve(&h, consumer, &line, 30).unwrap();

        // Nothing received yet: stays pending, not an error.
        let report = h
            .engine
            .synchronize_on_delivery(line.purchase_order_id, &[])
            .unwrap();
        assert_eq!(report.unmatched, vec![reservation.id_typed()]);

        let batch = receive_against(&h, &line, 30);
        let report = h
            .engine
            .synchronize_on_delivery(line.purchase_order_id, &[DeliveredLine::new(line.id)])
            .unwrap();
        assert_eq!(
            report.delivered,
            vec![(reservation.id_typed(), MatchStrategy::ExactId)]
        );

        let stored = h.engine.get_reservation(reservation.id_typed()).unwrap().unwrap();
        assert_eq!(stored.status(), ReservationStatus::Delivered);
        assert_eq!(stored.delivered_quantity(), 30);
        assert_eq!(stored.linked_batches().len(), 1);
        assert_eq!(stored.linked_batches()[0].batch_id, batch);
        assert_eq!(stored.linked_batches()[0].unit_price, Some(1_250));
        assert!(stored.delivered_at().is_some());
    }

    #[test]
    fn over_delivery_is_judged_against_the_ordered_line() {
        let h = setup_with(no_auto_sync(), Arc::new(InMemoryReservationStore::new()));

        // Two claims sharing an exactly-delivered line: each links all 100
        // units, yet nothing was over-delivered.
        let exact = test_line(&h, "Steel rod", 100);
        reserve(&h, test_consumer(&h), &exact, 60).unwrap();
        reserve(&h, test_consumer(&h), &exact, 40).unwrap();
        receive_against(&h, &exact, 100);
        let report = h
            .engine
            .synchronize_on_delivery(exact.purchase_order_id, &[])
            .unwrap();
        assert_eq!(report.delivered_count(), 2);
        assert!(report.over_delivered.is_empty());

        let excess = test_line(&h, "Steel plate", 100);
        reserve(&h, test_consumer(&h), &excess, 60).unwrap();
        reserve(&h, test_consumer(&h), &excess, 40).unwrap();
        receive_against(&h, &excess, 120);
        let report = h
            .engine
            .synchronize_on_delivery(excess.purchase_order_id, &[])
            .unwrap();
        assert_eq!(report.delivered_count(), 2);
        assert_eq!(report.over_delivered, vec![excess.id]);
    }

    #[test]
    fn supplied_delivered_quantity_overrides_the_batch_sum() {
        let h = setup_with(no_auto_sync(), Arc::new(InMemoryReservationStore::new()));
        let line = test_line(&h, "Copper wire", 50);
        let reservation = reserve(&h, test_consumer(&h), &line, 30).unwrap();
        receive_against(&h, &line, 30);

        h.engine
            .synchronize_on_delivery(
                line.purchase_order_id,
                &[DeliveredLine::with_quantity(line.id, 25)],
            )
            .unwrap();
        let stored = h.engine.get_reservation(reservation.id_typed()).unwrap().unwrap();
        assert_eq!(stored.delivered_quantity(), 25);

        let err = h
            .engine
            .synchronize_on_delivery(
                line.purchase_order_id,
                &[DeliveredLine::with_quantity(line.id, -1)],
            )
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));
    }

    #[test]
    fn creation_auto_syncs_when_goods_already_arrived() {
        let h = setup();
        let line = test_line(&h, "Cable tie", 40);
        receive_against(&h, &line, 40);

        let reservation = reserve(&h, test_consumer(&h), &line, 15).unwrap();
        assert_eq!(reservation.status(), ReservationStatus::Delivered);
        assert_eq!(reservation.delivered_quantity(), 40);
    }

    #[test]
    fn legacy_and_heuristic_matches_are_fallbacks() {
        let h = setup_with(no_auto_sync(), Arc::new(InMemoryReservationStore::new()));
        let legacy_line = test_line(&h, "Gasket", 10);
        let legacy = reserve(&h, test_consumer(&h), &legacy_line, 5).unwrap();
        h.ledger
            .receive(
                legacy_line.material_id,
                10,
                ReceiveMeta {
                    legacy_purchase: Some(LegacyPurchaseRef {
                        order_id: Some(legacy_line.purchase_order_id.to_string().to_uppercase()),
                        line_id: Some(legacy_line.id.to_string()),
                    }),
                    ..ReceiveMeta::new(h.warehouse, h.actor)
                },
            )
            .unwrap();

        let report = h
            .engine
            .synchronize_on_delivery(legacy_line.purchase_order_id, &[])
            .unwrap();
        assert_eq!(
            report.delivered,
            vec![(legacy.id_typed(), MatchStrategy::LegacyField)]
        );

        // Same order, no line id on the batch, item registered under another id
        // with the same name.
        let named_line = test_line(&h, "O-ring 20mm", 10);
        let named = reserve(&h, test_consumer(&h), &named_line, 4).unwrap();
        let other_item = StockItemId::new();
        h.items
            .insert(StockItem::new(other_item, "o-ring 20MM ", "pcs"))
            .unwrap();
        h.ledger
            .receive(
                other_item,
                6,
                ReceiveMeta {
                    provenance: Provenance::Purchase {
                        order_id: named_line.purchase_order_id,
                        line_id: None,
                    },
                    ..ReceiveMeta::new(h.warehouse, h.actor)
                },
            )
            .unwrap();

        let report = h
            .engine
            .synchronize_on_delivery(named_line.purchase_order_id, &[])
            .unwrap();
        assert_eq!(
            report.delivered,
            vec![(named.id_typed(), MatchStrategy::HeuristicName)]
        );
    }

    #[test]
    fn full_conversion_books_stock_and_blocks_cancellation() {
        let h = setup();
        let line = test_line(&h, "Steel plate", 20);
        let batch = receive_against(&h, &line, 20);
        let reservation = reserve(&h, test_consumer(&h), &line, 20).unwrap();
        assert_eq!(reservation.delivered_quantity(), 20);

        let converted = h
            .engine
            .convert_to_standard(reservation.id_typed(), batch, 20, h.actor)
            .unwrap();
        assert_eq!(converted.status(), ReservationStatus::Converted);
        assert_eq!(converted.converted_quantity(), 20);
        assert!(converted.converted_quantity() <= converted.delivered_quantity());

        assert_eq!(h.ledger.batch(batch).unwrap().unwrap().quantity, 0);
        assert_eq!(h.ledger.item(line.material_id).unwrap().unwrap().quantity, 0);

        let err = h
            .engine
            .cancel_reservation(reservation.id_typed(), h.actor)
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::InvalidState(_))));
    }

    #[test]
    fn partial_conversions_repeat_until_reserved_is_covered() {
        let h = setup();
        let line = test_line(&h, "Steel plate", 20);
        let batch = receive_against(&h, &line, 20);
        let id = reserve(&h, test_consumer(&h), &line, 12).unwrap().id_typed();

        let first = h.engine.convert_to_standard(id, batch, 5, h.actor).unwrap();
        assert_eq!(first.status(), ReservationStatus::Delivered);
        assert_eq!(first.converted_quantity(), 5);
        assert_eq!(first.delivered_quantity(), 20);
        assert_eq!(first.convertible_quantity(), 7);

        let err = h.engine.convert_to_standard(id, batch, 8, h.actor).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));

        let err = h
            .engine
            .convert_to_standard(id, BatchId::new(), 1, h.actor)
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));

        let done = h.engine.convert_to_standard(id, batch, 7, h.actor).unwrap();
        assert_eq!(done.status(), ReservationStatus::Converted);
        assert_eq!(h.ledger.batch(batch).unwrap().unwrap().quantity, 8);
    }

    #[test]
    fn pending_reservations_cannot_be_converted() {
        let h = setup_with(no_auto_sync(), Arc::new(InMemoryReservationStore::new()));
        let line = test_line(&h, "Rivet", 10);
        let batch = receive_against(&h, &line, 10);
        let id = reserve(&h, test_consumer(&h), &line, 10).unwrap().id_typed();

        let err = h.engine.convert_to_standard(id, batch, 1, h.actor).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::InvalidState(_))));
        assert_eq!(h.ledger.batch(batch).unwrap().unwrap().quantity, 10);
    }

    #[test]
    fn cancellation_removes_claim_without_touching_stock() {
        let h = setup();
        let line = test_line(&h, "Rivet", 10);
        let batch = receive_against(&h, &line, 10);
        let consumer = test_consumer(&h);
        let id = reserve(&h, consumer, &line, 6).unwrap().id_typed();

        h.engine.cancel_reservation(id, h.actor).unwrap();

        assert!(h.engine.get_reservation(id).unwrap().is_none());
        assert!(h.consumers.get(consumer).unwrap().unwrap().reservation_ids.is_empty());
        assert_eq!(h.ledger.batch(batch).unwrap().unwrap().quantity, 10);

        // The freed quantity can be claimed again.
        reserve(&h, consumer, &line, 10).unwrap();

        let err = h.engine.cancel_reservation(id, h.actor).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));
    }

    #[test]
    fn refresh_follows_the_ledger_and_is_idempotent() {
        let h = setup();
        let line = test_line(&h, "Sealant", 30);
        let batch = receive_against(&h, &line, 30);
        let id = reserve(&h, test_consumer(&h), &line, 10).unwrap().id_typed();

        // Stock leaves the batch outside the reservation engine.
        h.ledger
            .issue(line.material_id, 12, IssueMeta::new(h.warehouse, h.actor))
            .unwrap();

        let first = h.engine.refresh_linked_batches(None).unwrap();
        assert_eq!(first.examined, 1);
        assert_eq!(first.updated, 1);
        let after_first = h.engine.get_reservation(id).unwrap().unwrap();
        assert_eq!(after_first.linked_batches()[0].quantity, 18);
        assert_eq!(after_first.delivered_quantity(), 18);

        let second = h.engine.refresh_linked_batches(None).unwrap();
        assert_eq!(second.updated, 0);
        let after_second = h.engine.get_reservation(id).unwrap().unwrap();
        assert_eq!(after_second, after_first);

        // Scoped to an unrelated batch: nothing examined.
        let scoped = h.engine.refresh_linked_batches(Some(BatchId::new())).unwrap();
        assert_eq!(scoped.examined, 0);
        let scoped = h.engine.refresh_linked_batches(Some(batch)).unwrap();
        assert_eq!(scoped.examined, 1);
    }

    #[test]
    fn refresh_drops_links_to_removed_batches() {
        let h = setup();
        let line = test_line(&h, "Sealant", 30);
        let batch = receive_against(&h, &line, 30);
        let id = reserve(&h, test_consumer(&h), &line, 10).unwrap().id_typed();

        h.engine.convert_to_standard(id, batch, 4, h.actor).unwrap();
        h.ledger
            .issue(line.material_id, 26, IssueMeta::new(h.warehouse, h.actor))
            .unwrap();
        h.ledger.remove_empty_batch(batch).unwrap();

        let report = h.engine.refresh_linked_batches(None).unwrap();
        assert_eq!(report.dropped_links, 1);

        let stored = h.engine.get_reservation(id).unwrap().unwrap();
        assert!(stored.linked_batches().is_empty());
        assert_eq!(stored.converted_quantity(), 4);
        assert_eq!(stored.delivered_quantity(), 4);
        assert_eq!(stored.convertible_quantity(), 0);
    }

    #[test]
    fn failed_state_write_reports_lag_and_completion_is_idempotent() {
        let store = Arc::new(FlakyReservationStore::default());
        let h = setup_with(EngineConfig::default(), store.clone());
        let line = test_line(&h, "Bearing 6204", 8);
        let batch = receive_against(&h, &line, 8);
        let id = reserve(&h, test_consumer(&h), &line, 8).unwrap().id_typed();

        // The conversion claim is written; the write after the booking is not.
        store.let_through.store(1, Ordering::SeqCst);
        store.fail_updates.store(true, Ordering::SeqCst);
        let err = h.engine.convert_to_standard(id, batch, 3, h.actor).unwrap_err();
        let booking = match err {
            ServiceError::ConversionStateLag { booking, .. } => booking,
            other => panic!("expected ConversionStateLag, got {other:?}"),
        };

        // The booking stands; the reservation has not caught up yet.
        assert_eq!(h.ledger.batch(batch).unwrap().unwrap().quantity, 5);
        let lagging = h.engine.get_reservation(id).unwrap().unwrap();
        assert_eq!(lagging.converted_quantity(), 0);
        assert_eq!(lagging.pending_conversion(), 3);
        assert_eq!(lagging.convertible_quantity(), 5);

        store.fail_updates.store(false, Ordering::SeqCst);
        let err = h.engine.cancel_reservation(id, h.actor).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::InvalidState(_))));

        let completed = h.engine.complete_conversion(booking).unwrap();
        assert_eq!(completed.converted_quantity(), 3);
        assert_eq!(completed.pending_conversion(), 0);
        assert_eq!(completed.linked_batches()[0].quantity, 5);

        let again = h.engine.complete_conversion(booking).unwrap();
        assert_eq!(again, completed);
        assert_eq!(h.ledger.batch(batch).unwrap().unwrap().quantity, 5);
    }

    #[test]
    fn delivered_status_notifies_owners_of_outstanding_reservations() {
        let notifier = Arc::new(InMemoryDeliveryNotifier::new());
        let mut h = setup_with(no_auto_sync(), Arc::new(InMemoryReservationStore::new()));
        h.engine = h.engine.with_notifier(notifier.clone());

        let line = test_line(&h, "Fuse 10A", 20);
        let (a, b) = (test_consumer(&h), test_consumer(&h));
        reserve(&h, a, &line, 5).unwrap();
        reserve(&h, b, &line, 5).unwrap();
        receive_against(&h, &line, 20);

        let skipped = h
            .engine
            .handle_purchase_order_status(line.purchase_order_id, PurchaseOrderStatus::Confirmed)
            .unwrap();
        assert!(skipped.is_none());
        assert!(notifier.sent().is_empty());

        let report = h
            .engine
            .handle_purchase_order_status(line.purchase_order_id, PurchaseOrderStatus::Delivered)
            .unwrap()
            .unwrap();
        assert_eq!(report.delivered_count(), 2);

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].consumers, vec![a, b]);
        assert_eq!(sent[0].reservations.len(), 2);
    }

    #[test]
    fn notifier_failure_does_not_fail_the_status_change() {
        let mut h = setup_with(no_auto_sync(), Arc::new(InMemoryReservationStore::new()));
        h.engine = h
            .engine
            .with_notifier(Arc::new(InMemoryDeliveryNotifier::failing()));
        let line = test_line(&h, "Fuse 10A", 20);
        reserve(&h, test_consumer(&h), &line, 5).unwrap();

        let report = h
            .engine
            .handle_purchase_order_status(
                line.purchase_order_id,
                PurchaseOrderStatus::PartiallyDelivered,
            )
            .unwrap();
        assert!(report.is_some());
    }

    #[test]
    fn stats_by_consumer_and_overall() {
        let h = setup();
        let line = test_line(&h, "Drill bit 6mm", 30);
        let batch = receive_against(&h, &line, 10);
        let (a, b) = (test_consumer(&h), test_consumer(&h));
        let done = reserve(&h, a, &line, 4).unwrap().id_typed();
        reserve(&h, a, &line, 6).unwrap();
        reserve(&h, b, &line, 5).unwrap();
        h.engine.convert_to_standard(done, batch, 4, h.actor).unwrap();

        let for_a = h.engine.get_reservation_stats(Some(a)).unwrap();
        assert_eq!(for_a.total, 2);
        assert_eq!(for_a.converted, 1);
        assert_eq!(for_a.reserved_quantity, 10);
        assert_eq!(for_a.converted_quantity, 4);
        assert_eq!(for_a.open_quantity(), 6);

        let all = h.engine.get_reservation_stats(None).unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(h.engine.get_reservations_for_consumer(b).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_issues_from_one_batch_never_oversell() {
        let h = setup();
        let item = StockItemId::new();
        h.items.insert(StockItem::new(item, "Nitrile glove", "box")).unwrap();
        let batch = h
            .ledger
            .receive(item, 100, ReceiveMeta::new(h.warehouse, h.actor))
            .unwrap()
            .movements[0]
            .batch_id;

        let threads = 10;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let ledger = h.ledger.clone();
                let barrier = barrier.clone();
                let (warehouse, actor) = (h.warehouse, h.actor);
                thread::spawn(move || {
                    barrier.wait();
                    ledger
                        .issue(item, 15, IssueMeta::new(warehouse, actor).from_batch(batch))
                        .is_ok()
                })
            })
            .collect();
        let succeeded = handles
            .into_iter()
            .map(|j| j.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(succeeded, 6);
        assert_eq!(h.ledger.batch(batch).unwrap().unwrap().quantity, 10);
        assert_eq!(h.ledger.recalculate(item).unwrap(), 10);
    }

    #[test]
    fn concurrent_conversions_book_a_reservation_only_once() {
        for _ in 0..25 {
            let h = Arc::new(setup());
            // Supplier over-delivered: 30 units arrived for a claim of 10.
            let line = test_line(&h, "Pressure gauge", 10);
            let batch = receive_against(&h, &line, 30);
            let id = reserve(&h, test_consumer(&h), &line, 10).unwrap().id_typed();

            let threads = 4;
            let barrier = Arc::new(Barrier::new(threads));
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let h = h.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        h.engine.convert_to_standard(id, batch, 10, h.actor).is_ok()
                    })
                })
                .collect();
            let succeeded = handles
                .into_iter()
                .map(|j| j.join().unwrap())
                .filter(|ok| *ok)
                .count();

            assert_eq!(succeeded, 1);
            assert_eq!(h.ledger.batch(batch).unwrap().unwrap().quantity, 20);
            let r = h.engine.get_reservation(id).unwrap().unwrap();
            assert_eq!(r.converted_quantity(), 10);
            assert_eq!(r.pending_conversion(), 0);
            assert_eq!(r.status(), ReservationStatus::Converted);
        }
    }

    #[test]
    fn failed_booking_releases_the_conversion_claim() {
        let h = setup();
        let line = test_line(&h, "Shaft seal", 10);
        let batch = receive_against(&h, &line, 10);
        let id = reserve(&h, test_consumer(&h), &line, 10).unwrap().id_typed();

        // Someone else empties the batch between delivery and conversion.
        h.ledger
            .issue(
                line.material_id,
                10,
                IssueMeta::new(h.warehouse, h.actor).from_batch(batch),
            )
            .unwrap();

        assert!(h.engine.convert_to_standard(id, batch, 4, h.actor).is_err());
        let r = h.engine.get_reservation(id).unwrap().unwrap();
        assert_eq!(r.pending_conversion(), 0);
        assert_eq!(r.converted_quantity(), 0);
        h.engine.cancel_reservation(id, h.actor).unwrap();
    }

    #[test]
    fn concurrent_reservations_respect_the_line_limit() {
        let h = Arc::new(setup_with(
            no_auto_sync(),
            Arc::new(InMemoryReservationStore::new()),
        ));
        let line = test_line(&h, "Cable gland", 100);
        let consumer = test_consumer(&h);

        let threads = 10;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let h = h.clone();
                let line = line.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    reserve(&h, consumer, &line, 15).is_ok()
                })
            })
            .collect();
        let succeeded = handles
            .into_iter()
            .map(|j| j.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(succeeded, 6);
        let stats = h.engine.get_reservation_stats(Some(consumer)).unwrap();
        assert_eq!(stats.reserved_quantity, 90);
    }

    #[test]
    fn refresh_runner_picks_up_triggers() {
        forgestock_observability::init();
        let h = setup();
        let line = test_line(&h, "Thermal paste", 10);
        receive_against(&h, &line, 10);
        let id = reserve(&h, test_consumer(&h), &line, 10).unwrap().id_typed();

        let runner = RefreshRunner {
            interval: Duration::from_secs(3600),
            max_retries: 1,
            base_backoff: Duration::from_millis(10),
        };
        let handle = runner
            .spawn("quantity-refresher-test", h.engine.refresher())
            .unwrap();

        let change = h
            .ledger
            .issue(line.material_id, 3, IssueMeta::new(h.warehouse, h.actor))
            .unwrap();
        handle.observer().on_change(&change);

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut linked = 10;
        while Instant::now() < deadline {
            linked = h.engine.get_reservation(id).unwrap().unwrap().linked_batches()[0].quantity;
            if linked == 7 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        handle.shutdown();

        assert_eq!(linked, 7);
    }
}
