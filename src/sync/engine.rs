//! Sync orchestration.
//!
//! `SyncEngine` wires the submitter, poller and reconciler to an injected
//! [`OrderStore`] and [`TrackingProvider`]. Carrier sub-batches run
//! concurrently up to `max_concurrent_tasks`; a failing sub-batch is
//! reported in the summary and never aborts its siblings.
//!
//! Merges are serialized per order: a sub-batch takes the locks of every
//! order it matched (in id order), re-reads the stored copies and saves the
//! results before releasing them. Idle lock entries are dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::carrier;
use crate::config::SyncConfig;
use crate::error::{StoreError, SyncError};
use crate::provider::{RemoteTrackingRecord, TrackingProvider};
use crate::store::OrderStore;
use crate::sync::poller::TaskPoller;
use crate::sync::reconciler::{MergeOutcome, Reconciler, RecordMatch};
use crate::sync::submitter::{plan_batches, SubBatch, TaskSubmitter};
use crate::types::{Order, OrderId};

/// One failed unit of work in a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    /// Order id or carrier sub-batch the failure is scoped to
    pub context: String,
    pub message: String,
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Sub-batches that completed and merged
    pub success_count: usize,
    /// Failed sub-batches plus orders without a carrier
    pub error_count: usize,
    pub errors: Vec<SyncFailure>,
    /// Orders whose status, warning or timeline changed
    pub orders_updated: usize,
    /// Records skipped as unmatched or ambiguous
    pub records_skipped: usize,
}

impl SyncSummary {
    pub fn is_success(&self) -> bool {
        self.error_count == 0
    }

    fn record_failure(&mut self, context: impl Into<String>, message: impl Into<String>) {
        self.error_count += 1;
        self.errors.push(SyncFailure {
            context: context.into(),
            message: message.into(),
        });
    }
}

/// Per sub-batch merge tally.
#[derive(Debug, Default, Clone, Copy)]
struct MergeTally {
    updated: usize,
    skipped: usize,
}

/// Tracking synchronization service.
///
/// Cheap to clone; clones share the store, provider and per-order locks.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn OrderStore>,
    submitter: TaskSubmitter,
    poller: TaskPoller,
    reconciler: Reconciler,
    config: SyncConfig,
    order_locks: Arc<DashMap<OrderId, Arc<Mutex<()>>>>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn OrderStore>, provider: Arc<dyn TrackingProvider>, config: SyncConfig) -> Self {
        Self {
            store,
            submitter: TaskSubmitter::new(provider.clone()),
            poller: TaskPoller::new(provider, config.poll.clone()),
            reconciler: Reconciler::from_config(&config),
            config,
            order_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Recognize, submit, poll and merge a single order.
    ///
    /// The order is saved first if the store does not know it yet, and the
    /// stored copy is returned after the merge.
    ///
    /// # Errors
    /// `Recognition` when no carrier applies; otherwise whichever stage failed.
    #[instrument(skip(self, order, cancel), fields(order_id = %order.id))]
    pub async fn sync_one(&self, order: &Order, cancel: &CancellationToken) -> Result<Order, SyncError> {
        let carrier = carrier::resolve(order.carrier_code.as_deref(), &order.tracking_number)?;

        match self.store.get(&order.id).await {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => self.store.save(order).await?,
            Err(e) => return Err(e.into()),
        }

        let plan = plan_batches(std::slice::from_ref(order), &self.config);
        let batch = plan.batches.into_iter().next().ok_or_else(|| {
            SyncError::Recognition(carrier::RecognitionError::UnknownCarrier(carrier.code.to_string()))
        })?;

        self.run_sub_batch(&batch, cancel).await?;
        Ok(self.store.get(&order.id).await?)
    }

    /// Sync `orders` grouped by carrier, isolating failures per sub-batch.
    #[instrument(skip(self, orders, cancel), fields(orders = orders.len()))]
    pub async fn sync_batch(&self, orders: &[Order], cancel: &CancellationToken) -> SyncSummary {
        let mut summary = SyncSummary::default();
        let plan = plan_batches(orders, &self.config);

        for (order, e) in &plan.unrecognized {
            summary.record_failure(format!("order {}", order.id), e.to_string());
        }

        info!(
            sub_batches = plan.batches.len(),
            unrecognized = plan.unrecognized.len(),
            "Starting batch sync"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_tasks.max(1)));
        let mut join_set: JoinSet<(String, Result<MergeTally, SyncError>)> = JoinSet::new();

        for batch in plan.batches {
            let engine = self.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let context = batch.label();
                let permit = tokio::select! {
                    _ = cancel.cancelled() => return (context, Err(SyncError::Cancelled)),
                    permit = semaphore.acquire_owned() => permit,
                };
                let _permit = match permit {
                    Ok(p) => p,
                    Err(e) => {
                        let err = SyncError::PollFailed {
                            task: context.clone(),
                            message: format!("worker pool closed: {}", e),
                        };
                        return (context, Err(err));
                    }
                };
                let result = engine.run_sub_batch(&batch, &cancel).await;
                (context, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(tally))) => {
                    summary.success_count += 1;
                    summary.orders_updated += tally.updated;
                    summary.records_skipped += tally.skipped;
                }
                Ok((context, Err(e))) => {
                    warn!(context = %context, error = %e, "Sub-batch failed");
                    summary.record_failure(context, e.to_string());
                }
                Err(e) => {
                    error!(error = %e, "Sub-batch worker panicked");
                    summary.record_failure("sub-batch worker", e.to_string());
                }
            }
        }

        info!(
            succeeded = summary.success_count,
            failed = summary.error_count,
            updated = summary.orders_updated,
            skipped = summary.records_skipped,
            "Batch sync finished"
        );
        summary
    }

    /// Sync every non-archived order in the store.
    ///
    /// # Errors
    /// Only a failure to list orders is returned; per-group failures land in
    /// the summary.
    pub async fn sync_all(&self, cancel: &CancellationToken) -> Result<SyncSummary, SyncError> {
        let orders = self.store.list_active().await?;
        info!(orders = orders.len(), "Syncing all active orders");
        Ok(self.sync_batch(&orders, cancel).await)
    }

    async fn run_sub_batch(&self, batch: &SubBatch, cancel: &CancellationToken) -> Result<MergeTally, SyncError> {
        let mut task = self.submitter.submit(batch).await?;
        self.poller.run(&mut task, cancel).await?;
        self.merge_records(batch, &task.records).await
    }

    /// Merge one task's records onto the orders of its sub-batch.
    ///
    /// Matching runs over every planned order of the carrier, so a tracking
    /// number shared by orders in different chunks stays ambiguous. Matched
    /// orders are locked in id order, merged and saved in one store call.
    async fn merge_records(&self, batch: &SubBatch, records: &[RemoteTrackingRecord]) -> Result<MergeTally, SyncError> {
        let mut tally = MergeTally::default();
        let mut matched: BTreeMap<OrderId, Vec<&RemoteTrackingRecord>> = BTreeMap::new();

        for record in records {
            match self.reconciler.match_record(record, &batch.candidates) {
                RecordMatch::Unique(id) => matched.entry(id).or_default().push(record),
                RecordMatch::NoMatch | RecordMatch::Ambiguous(_) => {
                    // Logs and counts the skip
                    let _ = self.reconciler.merge(record, &batch.candidates, Utc::now());
                    tally.skipped += 1;
                }
            }
        }
        if matched.is_empty() {
            return Ok(tally);
        }

        let locks: Vec<Arc<Mutex<()>>> = matched.keys().map(|id| self.order_lock(id)).collect();
        let merged = {
            let mut guards = Vec::with_capacity(locks.len());
            for lock in &locks {
                guards.push(lock.lock().await);
            }
            self.merge_locked(batch, &matched, &mut tally).await
        };
        drop(locks);
        for id in matched.keys() {
            self.release_order_lock(id);
        }

        merged.map(|()| tally)
    }

    /// Re-read, merge and save matched orders. Caller holds their locks.
    async fn merge_locked(
        &self,
        batch: &SubBatch,
        matched: &BTreeMap<OrderId, Vec<&RemoteTrackingRecord>>,
        tally: &mut MergeTally,
    ) -> Result<(), SyncError> {
        let mut to_save = Vec::with_capacity(matched.len());

        for (id, records) in matched {
            let mut current = match self.store.get(id).await {
                Ok(order) => order,
                Err(StoreError::NotFound(_)) => {
                    warn!(order_id = %id, "Order disappeared before merge, skipping");
                    tally.skipped += records.len();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let mut dirty = false;
            for record in records {
                let (outcome, updated) = self
                    .reconciler
                    .merge(record, std::slice::from_ref(&current), Utc::now());
                match updated {
                    Some(mut updated) => {
                        if updated.carrier_code.is_none() {
                            updated.carrier_code = Some(batch.carrier.code.to_string());
                        }
                        if matches!(outcome, MergeOutcome::Applied(_)) {
                            tally.updated += 1;
                        }
                        current = updated;
                        dirty = true;
                    }
                    None => tally.skipped += 1,
                }
            }
            if dirty {
                to_save.push(current);
            }
        }

        self.store.save_many(&to_save).await?;
        Ok(())
    }

    fn order_lock(&self, id: &OrderId) -> Arc<Mutex<()>> {
        self.order_locks.entry(id.clone()).or_default().clone()
    }

    /// Drop the lock entry once no merge holds or waits on it.
    fn release_order_lock(&self, id: &OrderId) {
        self.order_locks
            .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
