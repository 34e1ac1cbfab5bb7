//! The write-ahead queue drain.
//!
//! Queued mutations are applied to the remote in enqueue order per
//! collection. A failing entry backs off exponentially and, once its
//! budget is spent, moves to the dead-letter table so one poisoned entry
//! cannot stall its collection forever.

use std::collections::HashSet;
use std::sync::Arc;

use satchel_engine::{OutboxEntry, OutboxOp, RetryPolicy};
use tokio::sync::Mutex;

use crate::cache::ReadCache;
use crate::db::{self, Pool};
use crate::error::{Result, StoreError};
use crate::remote::RemoteApi;
use crate::time::SharedClock;

/// What a drain pass accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries whose delivery was attempted
    pub attempted: usize,
    /// Entries acknowledged and removed
    pub delivered: usize,
    /// Entries rescheduled with backoff
    pub rescheduled: usize,
    /// Entries moved to the dead-letter table
    pub dead_lettered: usize,
    /// True when another drain held the lock and this call did nothing
    pub skipped: bool,
}

/// Durable queue of unacknowledged mutations.
pub struct Outbox {
    pool: Pool,
    remote: Arc<dyn RemoteApi>,
    cache: Arc<ReadCache>,
    clock: SharedClock,
    retry: RetryPolicy,
    drain_lock: Mutex<()>,
}

impl Outbox {
    /// Assemble the outbox from its parts.
    pub fn new(
        pool: Pool,
        remote: Arc<dyn RemoteApi>,
        cache: Arc<ReadCache>,
        clock: SharedClock,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            remote,
            cache,
            clock,
            retry,
            drain_lock: Mutex::new(()),
        }
    }

    /// Durably append an entry.
    pub async fn enqueue(&self, entry: &OutboxEntry) -> Result<()> {
        db::insert_entry(&self.pool, entry).await?;
        Ok(())
    }

    /// Queued entries, optionally for one collection.
    pub async fn pending_count(&self, collection: Option<&str>) -> Result<u64> {
        Ok(db::outbox_count(&self.pool, collection, None).await? as u64)
    }

    /// Entries that exhausted their retry budget.
    pub async fn dead_letter_count(&self) -> Result<u64> {
        Ok(db::dead_letter_count(&self.pool).await? as u64)
    }

    /// Dead-lettered entries for inspection.
    pub async fn dead_letters(&self) -> Result<Vec<db::DeadLetter>> {
        Ok(db::dead_letters(&self.pool).await?)
    }

    /// Drain due entries: single-flight, FIFO per collection.
    ///
    /// A failing entry stalls the rest of its collection until its next
    /// scheduled attempt, preserving order; other collections keep going.
    pub async fn drain(&self) -> Result<DrainReport> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            tracing::debug!("drain already in flight");
            return Ok(DrainReport {
                skipped: true,
                ..Default::default()
            });
        };

        let now = self.clock.now_millis();
        let mut report = DrainReport::default();
        let mut stalled: HashSet<String> = HashSet::new();

        for stored in db::all_entries(&self.pool).await? {
            let mut entry = stored
                .into_entry()
                .map_err(StoreError::StorageUnavailable)?;

            if stalled.contains(&entry.collection) {
                continue;
            }
            if !entry.is_due(now) {
                // Order within the collection must hold, so entries behind
                // a scheduled one wait too.
                stalled.insert(entry.collection.clone());
                continue;
            }

            report.attempted += 1;
            match self.apply(&entry).await {
                Ok(()) => {
                    db::remove_entry(&self.pool, &entry.id).await?;
                    report.delivered += 1;
                }
                Err(err) => {
                    let failures = entry.attempt_count + 1;
                    entry.record_failure(err.to_string(), self.retry.delay_ms(failures), now);

                    if self.retry.exhausted(entry.attempt_count) {
                        let exhausted = StoreError::MaxRetriesExceeded {
                            entry_id: entry.id.clone(),
                            attempts: entry.attempt_count,
                        };
                        tracing::warn!(
                            collection = %entry.collection,
                            record = %entry.record_id,
                            error = %exhausted,
                            cause = %err,
                            "outbox entry dead-lettered"
                        );
                        db::move_to_dead_letter(&self.pool, &entry, now).await?;
                        report.dead_lettered += 1;
                    } else {
                        tracing::debug!(
                            collection = %entry.collection,
                            record = %entry.record_id,
                            attempt = entry.attempt_count,
                            error = %err,
                            "outbox delivery failed, rescheduled"
                        );
                        db::update_attempt(&self.pool, &entry).await?;
                        report.rescheduled += 1;
                        stalled.insert(entry.collection.clone());
                    }
                }
            }
        }

        if report.delivered > 0 || report.dead_lettered > 0 {
            tracing::info!(
                delivered = report.delivered,
                rescheduled = report.rescheduled,
                dead_lettered = report.dead_lettered,
                "outbox drain complete"
            );
        }

        Ok(report)
    }

    async fn apply(&self, entry: &OutboxEntry) -> Result<()> {
        match entry.operation {
            OutboxOp::Delete => self.remote.delete(&entry.collection, &entry.record_id).await,
            OutboxOp::Upsert => {
                // Deliver the record's current state; the enqueue-time
                // snapshot only matters if the row has vanished since.
                let Some(stored) =
                    db::get_record(&self.pool, &entry.collection, &entry.record_id).await?
                else {
                    // Deleted locally after enqueue; the tombstone entry
                    // behind this one carries the removal.
                    return Ok(());
                };
                let record = stored
                    .into_record()
                    .map_err(StoreError::StorageUnavailable)?;

                let ack = self
                    .remote
                    .push_batch(&entry.collection, std::slice::from_ref(&record))
                    .await?;

                if ack.accepted.iter().any(|id| id == &entry.record_id) {
                    db::mark_synced(
                        &self.pool,
                        &entry.collection,
                        std::slice::from_ref(&entry.record_id),
                    )
                    .await?;
                    self.cache.invalidate(&entry.collection, &entry.record_id);
                    Ok(())
                } else {
                    let reason = ack
                        .rejected
                        .iter()
                        .find(|item| item.id == entry.record_id)
                        .map(|item| item.reason.clone())
                        .unwrap_or_else(|| "not acknowledged".to_string());
                    Err(StoreError::Network(reason))
                }
            }
        }
    }
}
