//! Keeps the linked-batch snapshots of delivered reservations current.
//!
//! `linked_batches` is a cache of ledger state. A refresh pass re-reads every
//! linked batch, drops links to batches that no longer exist, and rewrites only
//! the reservations whose snapshot actually changed, so repeated passes over an
//! unchanged ledger write nothing.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use forgestock_inventory::{BatchId, InventoryChange};
use forgestock_reservations::{LinkRead, ReservationStatus};

use crate::config::EngineConfig;
use crate::error::ServiceResult;
use crate::ledger::BatchLedger;
use crate::observer::InventoryObserver;
use crate::retry::{Modified, modify_reservation};
use crate::store::ReservationStore;

/// Summary of one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub examined: usize,
    pub updated: usize,
    pub dropped_links: usize,
    pub read_failures: usize,
    pub write_failures: usize,
}

impl RefreshReport {
    /// Every read and write in the pass succeeded.
    pub fn is_clean(&self) -> bool {
        self.read_failures == 0 && self.write_failures == 0
    }
}

pub struct QuantityRefresher {
    ledger: Arc<BatchLedger>,
    reservations: Arc<dyn ReservationStore>,
    update_attempts: u32,
}

impl QuantityRefresher {
    pub fn new(
        ledger: Arc<BatchLedger>,
        reservations: Arc<dyn ReservationStore>,
        update_attempts: u32,
    ) -> Self {
        Self {
            ledger,
            reservations,
            update_attempts,
        }
    }

    /// Refresh delivered reservations, optionally only those linking `batch_id`.
    ///
    /// Individual read and write failures are logged and counted; the pass
    /// carries on with the next reservation.
    pub fn refresh_linked_batches(&self, batch_id: Option<BatchId>) -> ServiceResult<RefreshReport> {
        let targets = self
            .reservations
            .list_by_status(ReservationStatus::Delivered)?
            .into_iter()
            .filter(|r| batch_id.is_none_or(|b| r.references_batch(b)));

        let mut report = RefreshReport::default();
        for reservation in targets {
            let id = reservation.id_typed();
            report.examined += 1;

            let mut reads_failed = 0;
            let mut dropped = 0;
            let outcome = modify_reservation(self.reservations.as_ref(), id, self.update_attempts, |r| {
                reads_failed = 0;
                dropped = 0;
                let changed = r.refresh_links(
                    |linked| match self.ledger.batch(linked) {
                        Ok(Some(batch)) => LinkRead::Found(batch),
                        Ok(None) => {
                            dropped += 1;
                            LinkRead::Missing
                        }
                        Err(e) => {
                            warn!(reservation = %id, batch = %linked, error = ?e, "linked batch read failed; keeping cached snapshot");
                            reads_failed += 1;
                            LinkRead::Failed
                        }
                    },
                    Utc::now(),
                );
                Ok(changed)
            });

            report.read_failures += reads_failed;
            match outcome {
                Ok(Modified::Written(stored)) => {
                    report.updated += 1;
                    report.dropped_links += dropped;
                    debug!(reservation = %id, delivered = stored.delivered_quantity(), links = stored.linked_batches().len(), "linked batches refreshed");
                }
                Ok(Modified::Unchanged(_)) | Ok(Modified::Gone) => {}
                Err(e) => {
                    warn!(reservation = %id, error = ?e, "failed to store refreshed links");
                    report.write_failures += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Background schedule for [`QuantityRefresher`].
#[derive(Debug, Clone)]
pub struct RefreshRunner {
    pub interval: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RefreshRunner {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl RefreshRunner {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            interval: config.refresh_interval,
            max_retries: config.refresh_max_retries,
            base_backoff: config.refresh_base_backoff,
        }
    }

    /// Start the runner thread. It refreshes once right away, then every
    /// `interval`, and whenever triggered. A failed or partial pass is retried
    /// with bounded exponential backoff and never stops the runner.
    pub fn spawn(
        &self,
        name: &str,
        refresher: Arc<QuantityRefresher>,
    ) -> io::Result<RefreshRunnerHandle> {
        let (wake_tx, wake_rx) = mpsc::sync_channel::<()>(1);
        let stop = Arc::new(AtomicBool::new(false));

        let cfg = self.clone();
        let thread_name = name.to_string();
        let loop_stop = stop.clone();
        let join = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run(&thread_name, cfg, refresher, wake_rx, loop_stop))?;

        Ok(RefreshRunnerHandle {
            trigger: RefreshTrigger { wake: wake_tx },
            stop,
            join: Some(join),
        })
    }
}

/// Cloneable "refresh soon" hook; coalesces bursts into one pass.
///
/// Registered as an [`InventoryObserver`] it refreshes after every ledger
/// change that touched a batch.
#[derive(Debug, Clone)]
pub struct RefreshTrigger {
    wake: mpsc::SyncSender<()>,
}

impl RefreshTrigger {
    pub fn trigger(&self) {
        // A full slot already means a pass is pending.
        let _ = self.wake.try_send(());
    }
}

impl InventoryObserver for RefreshTrigger {
    fn on_change(&self, change: &InventoryChange) {
        if !change.movements.is_empty() {
            self.trigger();
        }
    }
}

#[derive(Debug)]
pub struct RefreshRunnerHandle {
    trigger: RefreshTrigger,
    stop: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

impl RefreshRunnerHandle {
    pub fn trigger(&self) {
        self.trigger.trigger();
    }

    pub fn observer(&self) -> RefreshTrigger {
        self.trigger.clone()
    }

    /// Stop the runner and wait for an in-flight pass to finish.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Release);
        self.trigger.trigger();
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

fn run(
    name: &str,
    cfg: RefreshRunner,
    refresher: Arc<QuantityRefresher>,
    wake_rx: mpsc::Receiver<()>,
    stop: Arc<AtomicBool>,
) {
    info!(runner = name, interval_secs = cfg.interval.as_secs(), "quantity refresher started");

    let mut next_tick = Instant::now() + cfg.interval;
    let mut retry_at: Option<Instant> = None;
    let mut pending = true;
    let mut failures: u32 = 0;

    while !stop.load(Ordering::Acquire) {
        if pending {
            pending = false;
            let failed = match refresher.refresh_linked_batches(None) {
                Ok(report) if report.is_clean() => {
                    debug!(runner = name, examined = report.examined, updated = report.updated, "refresh pass finished");
                    false
                }
                Ok(report) => {
                    warn!(runner = name, read_failures = report.read_failures, write_failures = report.write_failures, "refresh pass was partial");
                    true
                }
                Err(e) => {
                    warn!(runner = name, error = ?e, "refresh pass failed");
                    true
                }
            };

            if failed {
                failures += 1;
                if failures <= cfg.max_retries {
                    retry_at = Some(Instant::now() + backoff(cfg.base_backoff, failures));
                } else {
                    warn!(runner = name, failures, "giving up until the next scheduled pass");
                    failures = 0;
                    retry_at = None;
                }
            } else {
                failures = 0;
                retry_at = None;
            }
        }

        let wake_at = retry_at.map_or(next_tick, |r| r.min(next_tick));
        match wake_rx.recv_timeout(wake_at.saturating_duration_since(Instant::now())) {
            Ok(()) => pending = true,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        if retry_at.is_some_and(|r| now >= r) {
            retry_at = None;
            pending = true;
        }
        if now >= next_tick {
            pending = true;
            while next_tick <= now {
                next_tick += cfg.interval;
            }
        }
    }

    info!(runner = name, "quantity refresher stopped");
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(10);
    base.saturating_mul(factor).min(Duration::from_secs(10))
}
