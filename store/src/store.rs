//! The durable local store.
//!
//! Every write commits locally first, inside a SQLite transaction that
//! also queues the outbox entry, so no write can be lost. Only then does it
//! try an optimistic remote push. Reads go through a TTL cache; change
//! events fan out over the bus.

use std::sync::Arc;

use satchel_engine::{DeviceId, OutboxEntry, Record};
use tokio::sync::watch;

use crate::cache::ReadCache;
use crate::db::{self, Pool};
use crate::error::{Result, StoreError};
use crate::events::{ChangeBus, ChangeEvent, ChangeKind};
use crate::remote::RemoteApi;
use crate::time::SharedClock;

/// Parameters for a point-in-time index scan.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Lower bound on `last_modified` (inclusive)
    pub modified_since: Option<u64>,
    /// Upper bound on `last_modified` (inclusive)
    pub modified_until: Option<u64>,
    /// Maximum rows returned
    pub limit: Option<u32>,
}

/// Durable, indexed, transactional storage per logical collection.
///
/// Constructed explicitly and shared by handle; consumers that only need
/// opaque key-value access use `put`/`get`/`subscribe` and nothing else.
pub struct LocalStore {
    pool: Pool,
    device_id: DeviceId,
    cache: Arc<ReadCache>,
    changes: Arc<ChangeBus>,
    clock: SharedClock,
    remote: Arc<dyn RemoteApi>,
    online: watch::Receiver<bool>,
}

impl LocalStore {
    /// Assemble a store from its parts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: Pool,
        device_id: DeviceId,
        cache: Arc<ReadCache>,
        changes: Arc<ChangeBus>,
        clock: SharedClock,
        remote: Arc<dyn RemoteApi>,
        online: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            device_id,
            cache,
            changes,
            clock,
            remote,
            online,
        }
    }

    /// This device's persistent identity.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub(crate) fn pool(&self) -> &Pool {
        &self.pool
    }

    pub(crate) fn cache(&self) -> &ReadCache {
        &self.cache
    }

    pub(crate) fn changes(&self) -> &ChangeBus {
        &self.changes
    }

    /// Subscribe to change events, optionally for one collection.
    pub fn subscribe(
        &self,
        collection: Option<&str>,
    ) -> (String, tokio::sync::mpsc::UnboundedReceiver<ChangeEvent>) {
        self.changes.subscribe(collection)
    }

    /// Remove a change subscription.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.changes.unsubscribe(id)
    }

    /// Write a record.
    ///
    /// The record and its outbox entry commit in one transaction; the
    /// function returns once that commit is durable. A supervised
    /// optimistic push then runs: on acknowledgment the record comes back
    /// `synced` and its queue entry is dropped, otherwise the entry stays
    /// queued for the drain.
    pub async fn put(
        &self,
        collection: &str,
        id: &str,
        payload: serde_json::Value,
    ) -> Result<Record> {
        let now = self.clock.now_millis();

        let mut tx = self.pool.begin().await?;
        let record = Self::next_version(
            db::get_record(&mut *tx, collection, id).await?,
            collection,
            id,
            payload,
            &self.device_id,
            now,
        )?;
        db::upsert_record(&mut *tx, &record).await?;

        let entry = OutboxEntry::upsert(
            uuid::Uuid::new_v4().to_string(),
            collection,
            id,
            record.payload.clone(),
            now,
        );
        db::insert_entry(&mut *tx, &entry).await?;
        tx.commit().await?;

        self.cache.insert(record.clone());
        self.changes.publish(
            Some(collection),
            &ChangeEvent {
                collection: collection.to_string(),
                record_id: id.to_string(),
                kind: ChangeKind::Upserted,
                record: Some(record.clone()),
            },
        );

        Ok(self.optimistic_push(record).await)
    }

    /// Phase two of a write: a spawned push whose outcome is awaited, never
    /// a fire-and-forget. Any failure leaves the queued entry in place.
    async fn optimistic_push(&self, record: Record) -> Record {
        let online = *self.online.borrow();
        if !online {
            return record;
        }

        let remote = Arc::clone(&self.remote);
        let collection = record.collection.clone();
        let pushed = record.clone();
        let attempt =
            tokio::spawn(
                async move { remote.push_batch(&collection, std::slice::from_ref(&pushed)).await },
            );

        match attempt.await {
            Ok(Ok(ack)) if ack.accepted.iter().any(|id| id == &record.id) => {
                let confirmed = self.confirm_push(record.clone()).await;
                match confirmed {
                    Ok(record) => record,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to record push acknowledgment");
                        record
                    }
                }
            }
            Ok(Ok(_)) | Ok(Err(_)) => {
                tracing::debug!(
                    collection = %record.collection,
                    id = %record.id,
                    "optimistic push not acknowledged, write stays queued"
                );
                record
            }
            Err(join_error) => {
                tracing::warn!(error = %join_error, "optimistic push task failed");
                record
            }
        }
    }

    async fn confirm_push(&self, mut record: Record) -> Result<Record> {
        db::remove_entries_for_record(&self.pool, &record.collection, &record.id).await?;
        db::mark_synced(&self.pool, &record.collection, std::slice::from_ref(&record.id)).await?;
        record.mark_synced();
        self.cache.insert(record.clone());
        Ok(record)
    }

    /// Read a record: fresh cache hit, or read-through from storage.
    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        if let Some(hit) = self.cache.get(collection, id) {
            return Ok(Some(hit));
        }

        match db::get_record(&self.pool, collection, id).await? {
            Some(stored) => {
                let record = stored
                    .into_record()
                    .map_err(StoreError::StorageUnavailable)?;
                self.cache.insert(record.clone());
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Delete a record.
    ///
    /// The row is removed and a tombstone entry queued in one transaction;
    /// deletions are never optimistic-only, the remote learns of them
    /// through the queue. Returns whether a local row existed.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let now = self.clock.now_millis();

        let mut tx = self.pool.begin().await?;
        let removed = db::delete_record(&mut *tx, collection, id).await? > 0;
        let entry = OutboxEntry::delete(uuid::Uuid::new_v4().to_string(), collection, id, now);
        db::insert_entry(&mut *tx, &entry).await?;
        tx.commit().await?;

        self.cache.invalidate(collection, id);
        self.changes.publish(
            Some(collection),
            &ChangeEvent {
                collection: collection.to_string(),
                record_id: id.to_string(),
                kind: ChangeKind::Deleted,
                record: None,
            },
        );

        Ok(removed)
    }

    /// Point-in-time snapshot of a collection via the last-modified index.
    /// Not a live view; subscribe for updates.
    pub async fn query(&self, collection: &str, query: Query) -> Result<Vec<Record>> {
        let stored = db::query_modified(
            &self.pool,
            collection,
            query.modified_since.map(|v| v as i64),
            query.modified_until.map(|v| v as i64),
            query.limit.map(|v| v as i64),
        )
        .await?;

        stored
            .into_iter()
            .map(|row| row.into_record().map_err(StoreError::StorageUnavailable))
            .collect()
    }

    /// Open a scoped multi-write transaction.
    ///
    /// Writes made through the guard are all-or-nothing: dropping the guard
    /// without `commit` rolls every one of them back. Cache updates and
    /// change events apply only after the commit.
    pub async fn transaction(&self) -> Result<StoreTransaction<'_>> {
        Ok(StoreTransaction {
            store: self,
            tx: self.pool.begin().await?,
            staged: Vec::new(),
        })
    }

    fn next_version(
        existing: Option<db::StoredRecord>,
        collection: &str,
        id: &str,
        payload: serde_json::Value,
        device: &str,
        now: u64,
    ) -> Result<Record> {
        match existing {
            Some(stored) => {
                let mut record = stored
                    .into_record()
                    .map_err(StoreError::StorageUnavailable)?;
                record.apply_local(payload, device, now);
                Ok(record)
            }
            None => Ok(Record::new_local(id, collection, payload, device, now)),
        }
    }
}

/// Scoped transaction over the store.
///
/// Writes stage their cache/event effects; `commit` makes the writes
/// durable and then flushes the staged effects. Dropping without commit
/// rolls the database back and discards the staged effects.
pub struct StoreTransaction<'a> {
    store: &'a LocalStore,
    tx: sqlx::Transaction<'static, sqlx::Sqlite>,
    staged: Vec<ChangeEvent>,
}

impl StoreTransaction<'_> {
    /// Write a record inside the transaction.
    ///
    /// The write reaches the remote through the outbox on the next drain;
    /// batched writes skip the per-put optimistic push.
    pub async fn put(
        &mut self,
        collection: &str,
        id: &str,
        payload: serde_json::Value,
    ) -> Result<Record> {
        let now = self.store.clock.now_millis();

        let record = LocalStore::next_version(
            db::get_record(&mut *self.tx, collection, id).await?,
            collection,
            id,
            payload,
            &self.store.device_id,
            now,
        )?;
        db::upsert_record(&mut *self.tx, &record).await?;

        let entry = OutboxEntry::upsert(
            uuid::Uuid::new_v4().to_string(),
            collection,
            id,
            record.payload.clone(),
            now,
        );
        db::insert_entry(&mut *self.tx, &entry).await?;

        self.staged.push(ChangeEvent {
            collection: collection.to_string(),
            record_id: id.to_string(),
            kind: ChangeKind::Upserted,
            record: Some(record.clone()),
        });

        Ok(record)
    }

    /// Delete a record inside the transaction, queueing its tombstone.
    pub async fn delete(&mut self, collection: &str, id: &str) -> Result<bool> {
        let now = self.store.clock.now_millis();

        let removed = db::delete_record(&mut *self.tx, collection, id).await? > 0;
        let entry = OutboxEntry::delete(uuid::Uuid::new_v4().to_string(), collection, id, now);
        db::insert_entry(&mut *self.tx, &entry).await?;

        self.staged.push(ChangeEvent {
            collection: collection.to_string(),
            record_id: id.to_string(),
            kind: ChangeKind::Deleted,
            record: None,
        });

        Ok(removed)
    }

    /// Read a record as seen inside the transaction.
    pub async fn get(&mut self, collection: &str, id: &str) -> Result<Option<Record>> {
        match db::get_record(&mut *self.tx, collection, id).await? {
            Some(stored) => Ok(Some(
                stored
                    .into_record()
                    .map_err(StoreError::StorageUnavailable)?,
            )),
            None => Ok(None),
        }
    }

    /// Commit every staged write, then flush cache updates and events.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;

        for event in self.staged {
            match event.kind {
                ChangeKind::Upserted => {
                    if let Some(record) = &event.record {
                        self.store.cache.insert(record.clone());
                    }
                }
                ChangeKind::Deleted => {
                    self.store.cache.invalidate(&event.collection, &event.record_id);
                }
            }
            self.store.changes.publish(Some(event.collection.as_str()), &event);
        }

        Ok(())
    }
}
