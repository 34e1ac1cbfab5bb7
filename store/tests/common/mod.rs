//! Shared test fixtures: a scripted in-memory remote, a manual clock, and
//! a fully wired store over a temp-file database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use satchel_engine::{ConflictResolver, PolicyTable, Record, SyncStatus, VectorClock};
use satchel_store::{
    db, BatchAck, ChangeBus, ChangePage, ConnectivityMonitor, LocalStore, ManualClock, Outbox,
    ReadCache, RemoteApi, Result, StoreError, SyncCoordinator,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Scripted stand-in for the remote sync API.
#[derive(Default)]
pub struct FakeRemote {
    pub healthy: AtomicBool,
    /// Fail every endpoint, as if the network were down.
    pub fail_all: AtomicBool,
    /// Fail batch uploads only.
    pub fail_pushes: AtomicBool,
    /// Fail remote deletions only.
    pub fail_deletes: AtomicBool,
    /// Collections whose change feed fails.
    pub fail_changes_for: Mutex<HashSet<String>>,
    pub push_calls: AtomicU32,
    pub changes_calls: AtomicU32,
    /// Records received through batch uploads.
    pub pushed: Mutex<Vec<Record>>,
    /// (collection, id) pairs deleted remotely.
    pub deleted: Mutex<Vec<(String, String)>>,
    /// Scripted change pages per collection, served front-first.
    pub pages: Mutex<HashMap<String, Vec<ChangePage>>>,
    /// Cancel this token once `changes` has served the given call count.
    pub cancel_after_page: Mutex<Option<(u32, CancellationToken)>>,
    /// When set, `changes` blocks until notified.
    pub block_changes: Mutex<Option<Arc<Notify>>>,
    /// When set, `push_batch` blocks until notified.
    pub block_pushes: Mutex<Option<Arc<Notify>>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        let remote = Self::default();
        remote.healthy.store(true, Ordering::SeqCst);
        Arc::new(remote)
    }

    pub fn queue_page(&self, collection: &str, page: ChangePage) {
        self.pages
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push(page);
    }

    fn network_down(&self) -> bool {
        self.fail_all.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn changes(&self, collection: &str, _since: u64, _limit: usize) -> Result<ChangePage> {
        let gate = self.block_changes.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let call = self.changes_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.network_down() {
            return Err(StoreError::Network("connection refused".into()));
        }
        if self.fail_changes_for.lock().unwrap().contains(collection) {
            return Err(StoreError::Network("change feed unavailable".into()));
        }

        let page = {
            let mut pages = self.pages.lock().unwrap();
            match pages.get_mut(collection) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => ChangePage::default(),
            }
        };

        if let Some((after, token)) = self.cancel_after_page.lock().unwrap().as_ref() {
            if call >= *after {
                token.cancel();
            }
        }

        Ok(page)
    }

    async fn push_batch(&self, _collection: &str, records: &[Record]) -> Result<BatchAck> {
        let gate = self.block_pushes.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.push_calls.fetch_add(1, Ordering::SeqCst);
        if self.network_down() || self.fail_pushes.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout);
        }

        let mut pushed = self.pushed.lock().unwrap();
        let mut accepted = Vec::new();
        for record in records {
            pushed.push(record.clone());
            accepted.push(record.id.clone());
        }

        Ok(BatchAck {
            accepted,
            rejected: vec![],
        })
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        if self.network_down() || self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout);
        }
        self.deleted
            .lock()
            .unwrap()
            .push((collection.to_string(), id.to_string()));
        Ok(())
    }

    async fn health(&self) -> bool {
        !self.network_down() && self.healthy.load(Ordering::SeqCst)
    }
}

/// A fully wired store over a throwaway database. Background tasks are not
/// spawned; tests drive drains and sync cycles explicitly.
pub struct Harness {
    // Held for its Drop: removes the database directory.
    _dir: tempfile::TempDir,
    pub clock: Arc<ManualClock>,
    pub remote: Arc<FakeRemote>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub store: Arc<LocalStore>,
    pub outbox: Arc<Outbox>,
    pub coordinator: Arc<SyncCoordinator>,
    pub pool: db::Pool,
}

pub const DEVICE: &str = "local-device";

pub async fn harness() -> Harness {
    harness_with(PolicyTable::new()).await
}

pub async fn harness_with(policies: PolicyTable) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("satchel-test.db").display());

    let pool = db::create_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    db::set_meta(&pool, "device_id", DEVICE).await.unwrap();
    let device_id = db::device_id(&pool).await.unwrap();
    assert_eq!(device_id, DEVICE);

    let clock = Arc::new(ManualClock::new(1_000_000));
    let remote = FakeRemote::new();
    let connectivity = Arc::new(ConnectivityMonitor::new(false));
    let cache = Arc::new(ReadCache::new(
        std::time::Duration::from_secs(60),
        clock.clone(),
    ));
    let changes = ChangeBus::new_shared();

    let store = Arc::new(LocalStore::new(
        pool.clone(),
        device_id,
        Arc::clone(&cache),
        changes,
        clock.clone(),
        remote.clone(),
        connectivity.watch(),
    ));
    let outbox = Arc::new(Outbox::new(
        pool.clone(),
        remote.clone(),
        cache,
        clock.clone(),
        satchel_engine::RetryPolicy::default(),
    ));
    let coordinator = Arc::new(SyncCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&outbox),
        remote.clone(),
        ConflictResolver::new(policies),
        clock.clone(),
        connectivity.watch(),
    ));

    Harness {
        _dir: dir,
        clock,
        remote,
        connectivity,
        store,
        outbox,
        coordinator,
        pool,
    }
}

/// A record as the remote would serve it.
pub fn remote_record(
    collection: &str,
    id: &str,
    payload: serde_json::Value,
    counter: u64,
    modified: u64,
) -> Record {
    Record {
        id: id.to_string(),
        collection: collection.to_string(),
        payload,
        version: counter,
        origin_device: "server".to_string(),
        last_modified: modified,
        vector_clock: VectorClock::with_counter("server", counter),
        sync_status: SyncStatus::Synced,
        base_payload: None,
    }
}
