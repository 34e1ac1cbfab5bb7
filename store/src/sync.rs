//! Sync coordinator: orchestrates push and pull per collection.
//!
//! One cycle per trigger: drain the write-ahead queue, batch-upload pending
//! records (progress 0–50), then pull paginated remote deltas and merge
//! them (progress 50–100). Each collection's outcome is isolated; a shared
//! cancellation token is polled before every request.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use dashmap::DashMap;
use satchel_engine::{
    ConflictRecord, ConflictResolver, EntitySyncState, OutboxEntry, OutboxOp, Record, Resolution,
    SyncStatus, VectorClock,
};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db;
use crate::error::{Result, StoreError};
use crate::events::{Bus, ChangeEvent, ChangeKind};
use crate::outbox::Outbox;
use crate::remote::RemoteApi;
use crate::store::LocalStore;
use crate::time::SharedClock;

/// Options for one sync cycle.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Ignore per-collection watermarks and pull from the beginning
    pub full_sync: bool,
    /// Collections to sync; `None` means every known collection
    pub collections: Option<Vec<String>>,
    /// Records per upload batch and per pull page
    pub batch_size: usize,
    /// Cooperative cancellation signal, polled before each request
    pub cancel: CancellationToken,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            full_sync: false,
            collections: None,
            batch_size: 50,
            cancel: CancellationToken::new(),
        }
    }
}

/// Result for one collection within a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionOutcome {
    /// Records acknowledged during the push phase
    pub pushed: usize,
    /// Remote items merged during the pull phase
    pub pulled: usize,
    /// Why the collection's cycle ended early, if it did
    pub error: Option<String>,
}

/// Result of a `sync` call.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// True when another cycle held the lock and this call did nothing
    pub skipped: bool,
    /// Per-collection outcomes, isolated from one another
    pub outcomes: HashMap<String, CollectionOutcome>,
}

/// Snapshot of every collection's sync state, sent to observers on each
/// mutation.
pub type StateSnapshot = HashMap<String, EntitySyncState>;

struct PullOutcome {
    merged: usize,
    cursor: Option<u64>,
}

/// Orchestrates synchronization for all collections.
pub struct SyncCoordinator {
    store: Arc<LocalStore>,
    outbox: Arc<Outbox>,
    remote: Arc<dyn RemoteApi>,
    resolver: ConflictResolver,
    clock: SharedClock,
    online: watch::Receiver<bool>,
    states: DashMap<String, EntitySyncState>,
    observers: Bus<StateSnapshot>,
    conflicts: StdMutex<Vec<ConflictRecord>>,
    current_cancel: StdMutex<Option<CancellationToken>>,
    flight: Mutex<()>,
}

impl SyncCoordinator {
    /// Assemble a coordinator from its parts.
    pub fn new(
        store: Arc<LocalStore>,
        outbox: Arc<Outbox>,
        remote: Arc<dyn RemoteApi>,
        resolver: ConflictResolver,
        clock: SharedClock,
        online: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            outbox,
            remote,
            resolver,
            clock,
            online,
            states: DashMap::new(),
            observers: Bus::new(),
            conflicts: StdMutex::new(Vec::new()),
            current_cancel: StdMutex::new(None),
            flight: Mutex::new(()),
        }
    }

    /// Snapshot of every collection's sync state.
    pub fn states(&self) -> StateSnapshot {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// One collection's sync state (default idle if never synced).
    pub fn state(&self, collection: &str) -> EntitySyncState {
        self.states
            .get(collection)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Observe state-map snapshots; a snapshot is delivered on every
    /// mutation.
    pub fn subscribe(&self) -> (String, mpsc::UnboundedReceiver<StateSnapshot>) {
        self.observers.subscribe(None)
    }

    /// Remove a state observer.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Divergences settled (or flagged) so far, for inspection.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.lock().unwrap().clone()
    }

    /// Cancel the in-flight cycle, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.current_cancel.lock().unwrap().as_ref() {
            token.cancel();
        }
    }

    fn update_state(&self, collection: &str, mutate: impl FnOnce(&mut EntitySyncState)) {
        {
            let mut entry = self.states.entry(collection.to_string()).or_default();
            mutate(entry.value_mut());
        }
        let snapshot = self.states();
        self.observers.publish(None, &snapshot);
    }

    /// Run one sync cycle.
    ///
    /// Process-wide single-flight: a call while a cycle is in progress is a
    /// no-op (`report.skipped`). A cancelled collection stops the cycle;
    /// any other failure is isolated to its collection.
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncReport> {
        let Ok(_guard) = self.flight.try_lock() else {
            tracing::debug!("sync already in progress");
            return Ok(SyncReport {
                skipped: true,
                ..Default::default()
            });
        };
        *self.current_cancel.lock().unwrap() = Some(options.cancel.clone());

        // Drain the queue first so deletions and retried writes go out
        // ahead of the batch upload.
        if let Err(err) = self.outbox.drain().await {
            tracing::warn!(error = %err, "queue drain before sync failed");
        }

        let collections = match &options.collections {
            Some(explicit) => explicit.clone(),
            None => self.discover_collections().await?,
        };

        let mut report = SyncReport::default();
        for collection in collections {
            match self.sync_collection(&collection, &options).await {
                Ok(outcome) => {
                    report.outcomes.insert(collection, outcome);
                }
                Err(StoreError::SyncCancelled) => {
                    let reason = StoreError::SyncCancelled.to_string();
                    self.update_state(&collection, |state| state.fail(reason.as_str()));
                    tracing::info!(collection = %collection, "sync cancelled");
                    report.outcomes.insert(
                        collection,
                        CollectionOutcome {
                            error: Some(reason),
                            ..Default::default()
                        },
                    );
                    // Stop issuing requests; merged items stay committed.
                    break;
                }
                Err(err) => {
                    let reason = err.to_string();
                    self.update_state(&collection, |state| state.fail(reason.as_str()));
                    tracing::warn!(collection = %collection, error = %reason, "collection sync failed");
                    report.outcomes.insert(
                        collection,
                        CollectionOutcome {
                            error: Some(reason),
                            ..Default::default()
                        },
                    );
                }
            }
        }

        *self.current_cancel.lock().unwrap() = None;
        Ok(report)
    }

    /// Collections with local data or queued work, plus those with an
    /// explicit merge policy.
    async fn discover_collections(&self) -> Result<Vec<String>> {
        let mut collections: BTreeSet<String> = db::distinct_collections(self.store.pool())
            .await?
            .into_iter()
            .collect();
        for collection in self.resolver.table().collections() {
            collections.insert(collection.clone());
        }
        Ok(collections.into_iter().collect())
    }

    async fn sync_collection(
        &self,
        collection: &str,
        options: &SyncOptions,
    ) -> Result<CollectionOutcome> {
        let pool = self.store.pool();
        let pending = self.pending_items(collection).await?;
        self.update_state(collection, |state| state.begin(pending));

        let pushed = self.push_phase(collection, options).await?;
        let pull = self.pull_phase(collection, options).await?;

        // Advance the delta watermark with server-observed time, never the
        // local wall clock, so skewed clocks cannot skip changes.
        if let Some(cursor) = pull.cursor {
            let previous = db::last_sync_at(pool, collection).await?.unwrap_or(0);
            if cursor > previous {
                db::set_last_sync_at(pool, collection, cursor).await?;
            }
        }

        let now = self.clock.now_millis();
        let remaining = self.pending_items(collection).await?;
        self.update_state(collection, |state| {
            state.items_pending = remaining;
            state.complete(now);
        });

        Ok(CollectionOutcome {
            pushed,
            pulled: pull.merged,
            error: None,
        })
    }

    /// Local items still owed to the remote: pending records plus queued
    /// tombstones (a deletion's only trace is its entry).
    async fn pending_items(&self, collection: &str) -> Result<u64> {
        let pool = self.store.pool();
        let pending_records = db::pending_count(pool, collection).await? as u64;
        let tombstones =
            db::outbox_count(pool, Some(collection), Some(OutboxOp::Delete)).await? as u64;
        Ok(pending_records + tombstones)
    }

    /// Push phase: batch-upload pending records. Contributes 0–50 %.
    async fn push_phase(&self, collection: &str, options: &SyncOptions) -> Result<usize> {
        let pool = self.store.pool();
        let stored = db::pending_records(pool, collection).await?;
        let mut records = Vec::with_capacity(stored.len());
        for row in stored {
            records.push(row.into_record().map_err(StoreError::StorageUnavailable)?);
        }

        if records.is_empty() {
            self.update_state(collection, |state| state.set_progress(50));
            return Ok(0);
        }

        let batch_size = options.batch_size.max(1);
        let total_batches = records.len().div_ceil(batch_size);
        let mut pushed = 0;

        for (index, batch) in records.chunks(batch_size).enumerate() {
            if options.cancel.is_cancelled() {
                return Err(StoreError::SyncCancelled);
            }

            match self.remote.push_batch(collection, batch).await {
                Ok(ack) => {
                    let accepted: Vec<String> = batch
                        .iter()
                        .filter(|record| ack.accepted.contains(&record.id))
                        .map(|record| record.id.clone())
                        .collect();

                    db::mark_synced(pool, collection, &accepted).await?;
                    for id in &accepted {
                        db::remove_entries_for_record(pool, collection, id).await?;
                        self.store.cache().invalidate(collection, id);
                    }
                    for rejected in &ack.rejected {
                        tracing::warn!(
                            collection = %collection,
                            id = %rejected.id,
                            reason = %rejected.reason,
                            "batch item rejected"
                        );
                    }

                    pushed += accepted.len();
                    let progress = (((index + 1) * 50) / total_batches) as u8;
                    let count = accepted.len() as u64;
                    self.update_state(collection, |state| {
                        state.items_synced += count;
                        state.items_pending = state.items_pending.saturating_sub(count);
                        state.set_progress(progress);
                    });
                }
                Err(err) => {
                    // Failed batches stay pending; the queue's backoff
                    // handles resubmission.
                    tracing::warn!(collection = %collection, error = %err, "batch upload failed");
                    break;
                }
            }
        }

        Ok(pushed)
    }

    /// Pull phase: paginated delta fetch and per-item merge. Contributes
    /// 50–100 %.
    async fn pull_phase(&self, collection: &str, options: &SyncOptions) -> Result<PullOutcome> {
        self.update_state(collection, |state| state.set_progress(50));

        let pool = self.store.pool();
        let since = if options.full_sync {
            0
        } else {
            db::last_sync_at(pool, collection).await?.unwrap_or(0)
        };

        let mut cursor = since;
        let mut watermark = None;
        let mut merged = 0;
        let mut pages = 0u8;

        loop {
            if options.cancel.is_cancelled() {
                return Err(StoreError::SyncCancelled);
            }

            let page = self
                .remote
                .changes(collection, cursor, options.batch_size.max(1))
                .await?;
            pages += 1;

            for item in &page.items {
                self.merge_remote(collection, item).await?;
                merged += 1;
                if item.last_modified > cursor {
                    cursor = item.last_modified;
                    watermark = Some(cursor);
                }
            }

            let fetched = page.items.len() as u64;
            let progress = 50 + (pages.saturating_mul(15)).min(45);
            self.update_state(collection, |state| {
                state.items_synced += fetched;
                state.set_progress(progress);
            });

            // An empty page ends the loop even if the server claims more.
            if !page.has_more || page.items.is_empty() {
                break;
            }
        }

        Ok(PullOutcome {
            merged,
            cursor: watermark,
        })
    }

    /// Merge one remote item, in its own transaction: partial pull progress
    /// is never rolled back.
    async fn merge_remote(&self, collection: &str, item: &Record) -> Result<()> {
        let now = self.clock.now_millis();
        let pool = self.store.pool();

        let mut tx = pool.begin().await?;
        let existing = db::get_record(&mut *tx, collection, &item.id).await?;
        let mut to_publish: Vec<Record> = Vec::new();

        let outcome = match existing {
            None => {
                let mut record = item.clone();
                record.collection = collection.to_string();
                record.mark_synced();
                record
            }
            Some(stored) => {
                let local = stored
                    .into_record()
                    .map_err(StoreError::StorageUnavailable)?;

                if local.is_pending() {
                    match self.resolver.resolve(&local, item) {
                        Ok(resolved) => {
                            if resolved.conflict.is_none() && resolved.record == local {
                                // Local copy dominates: the remote item is
                                // stale and the pending write stays queued.
                                return Ok(());
                            }
                            if let Some(conflict) = &resolved.conflict {
                                tracing::info!(
                                    collection = %collection,
                                    id = %item.id,
                                    resolution = ?conflict.resolution,
                                    "concurrent edit resolved"
                                );
                                self.conflicts.lock().unwrap().push(conflict.clone());
                            }
                            if let Some(sibling) = resolved.sibling {
                                db::upsert_record(&mut *tx, &sibling).await?;
                                let entry = OutboxEntry::upsert(
                                    uuid::Uuid::new_v4().to_string(),
                                    collection,
                                    &sibling.id,
                                    sibling.payload.clone(),
                                    now,
                                );
                                db::insert_entry(&mut *tx, &entry).await?;
                                to_publish.push(sibling);
                            }

                            let mut record = resolved.record;
                            record.mark_synced();
                            record
                        }
                        Err(engine_err) => {
                            // Unresolved: keep the local copy, flag it, and
                            // record the pair instead of dropping it.
                            let mut flagged = local.clone();
                            flagged.sync_status = SyncStatus::Conflict;
                            db::upsert_record(&mut *tx, &flagged).await?;
                            tx.commit().await?;

                            self.conflicts.lock().unwrap().push(ConflictRecord {
                                collection: collection.to_string(),
                                entity_id: item.id.clone(),
                                local,
                                remote: item.clone(),
                                resolution: Resolution::Local,
                            });
                            tracing::warn!(
                                collection = %collection,
                                id = %item.id,
                                error = %engine_err,
                                "conflict left unresolved"
                            );
                            self.store.cache().invalidate(collection, &item.id);
                            return Ok(());
                        }
                    }
                } else {
                    // Clean local copy: the remote change simply overwrites.
                    // Clock counters only ever grow in the stored row.
                    let mut record = item.clone();
                    record.collection = collection.to_string();
                    record.vector_clock =
                        VectorClock::merged(&local.vector_clock, &item.vector_clock);
                    record.mark_synced();
                    record
                }
            }
        };

        db::upsert_record(&mut *tx, &outcome).await?;
        tx.commit().await?;

        to_publish.push(outcome);
        for record in to_publish {
            self.store.cache().insert(record.clone());
            self.store.changes().publish(
                Some(collection),
                &ChangeEvent {
                    collection: collection.to_string(),
                    record_id: record.id.clone(),
                    kind: ChangeKind::Upserted,
                    record: Some(record),
                },
            );
        }

        Ok(())
    }

    /// Background loop: a recurring timer syncs when online, and the
    /// offline→online transition triggers one immediate sync independent of
    /// the timer. Skips silently while offline or already syncing.
    pub fn spawn_auto_sync(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let coordinator = self;
        tokio::spawn(async move {
            let mut online = coordinator.online.clone();
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; swallow it so startup does
            // not race the health probe.
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {
                        if !*online.borrow() {
                            continue;
                        }
                        if let Err(err) = coordinator.sync(SyncOptions::default()).await {
                            tracing::warn!(error = %err, "auto-sync failed");
                        }
                    }
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if *online.borrow_and_update() {
                            tracing::info!("connectivity restored, syncing immediately");
                            if let Err(err) = coordinator.sync(SyncOptions::default()).await {
                                tracing::warn!(error = %err, "reconnect sync failed");
                            }
                        }
                    }
                }
            }
        })
    }
}
