//! # Satchel Store
//!
//! Durable offline-first storage with background synchronization.
//!
//! The store commits every mutation locally first, so writes survive with
//! or without a network, and reconciles with the remote source of truth
//! later: a durable outbox drains with retry/backoff, a sync coordinator
//! pushes pending batches and pulls paginated deltas, and divergent edits
//! are settled deterministically by `satchel-engine`'s per-collection
//! merge policies.
//!
//! ## Quick start
//!
//! ```no_run
//! use satchel_store::{Satchel, StoreConfig};
//! use serde_json::json;
//!
//! # async fn demo() -> satchel_store::Result<()> {
//! let satchel = Satchel::open(StoreConfig {
//!     database_url: "sqlite://app.db".into(),
//!     remote_base_url: "https://sync.example.com".into(),
//!     ..StoreConfig::default()
//! })
//! .await?;
//!
//! // Local write; propagates in the background.
//! satchel.store.put("orders", "o-1", json!({"total": 12})).await?;
//!
//! // Observe per-collection sync progress.
//! let (id, mut states) = satchel.coordinator.subscribe();
//! # satchel.coordinator.unsubscribe(&id);
//! # Ok(())
//! # }
//! ```
//!
//! Consumers that only need opaque key-value access (the print subsystem,
//! for one) use [`LocalStore::put`]/[`LocalStore::get`]/
//! [`LocalStore::subscribe`] and ignore the rest.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod events;
pub mod outbox;
pub mod remote;
pub mod store;
pub mod sync;
pub mod tasks;
pub mod time;

pub use cache::ReadCache;
pub use config::{ConfigError, StoreConfig};
pub use connectivity::ConnectivityMonitor;
pub use error::{Result, StoreError};
pub use events::{Bus, ChangeBus, ChangeEvent, ChangeKind};
pub use outbox::{DrainReport, Outbox};
pub use remote::{BatchAck, ChangePage, HttpRemote, RejectedItem, RemoteApi};
pub use store::{LocalStore, Query, StoreTransaction};
pub use sync::{CollectionOutcome, StateSnapshot, SyncCoordinator, SyncOptions, SyncReport};
pub use time::{Clock, ManualClock, SharedClock, SystemClock};

use std::sync::Arc;

use satchel_engine::ConflictResolver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The assembled store: local storage, outbox, coordinator, and their
/// background tasks, shared by handle.
pub struct Satchel {
    /// Durable local storage
    pub store: Arc<LocalStore>,
    /// The write-ahead queue
    pub outbox: Arc<Outbox>,
    /// Push/pull orchestration and observable sync state
    pub coordinator: Arc<SyncCoordinator>,
    /// Online flag and health probing
    pub connectivity: Arc<ConnectivityMonitor>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Satchel {
    /// Open the store against the real HTTP remote and wall clock.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let remote = Arc::new(HttpRemote::new(
            &config.remote_base_url,
            config.request_timeout,
        )?);
        Self::open_with(config, remote, Arc::new(SystemClock)).await
    }

    /// Open the store with explicit remote and clock implementations.
    ///
    /// Tests substitute an in-memory remote and a manual clock here.
    pub async fn open_with(
        config: StoreConfig,
        remote: Arc<dyn RemoteApi>,
        clock: SharedClock,
    ) -> Result<Self> {
        let pool = db::create_pool(&config.database_url).await?;
        db::run_migrations(&pool)
            .await
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        let device_id = db::device_id(&pool).await?;
        tracing::info!(device = %device_id, "satchel store opened");

        let connectivity = Arc::new(ConnectivityMonitor::new(false));
        let cache = Arc::new(ReadCache::new(config.cache_ttl, Arc::clone(&clock)));
        let changes = ChangeBus::new_shared();

        let store = Arc::new(LocalStore::new(
            pool.clone(),
            device_id,
            Arc::clone(&cache),
            changes,
            Arc::clone(&clock),
            Arc::clone(&remote),
            connectivity.watch(),
        ));
        let outbox = Arc::new(Outbox::new(
            pool,
            Arc::clone(&remote),
            Arc::clone(&cache),
            Arc::clone(&clock),
            config.retry,
        ));
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&outbox),
            Arc::clone(&remote),
            ConflictResolver::new(config.policies.clone()),
            clock,
            connectivity.watch(),
        ));

        let shutdown = CancellationToken::new();
        let mut background = Vec::new();

        // Liveness probe drives the online flag.
        {
            let connectivity = Arc::clone(&connectivity);
            let remote = Arc::clone(&remote);
            background.push(tasks::spawn_periodic(
                "health-probe",
                config.health_probe_interval,
                shutdown.child_token(),
                move || {
                    let connectivity = Arc::clone(&connectivity);
                    let remote = Arc::clone(&remote);
                    async move {
                        connectivity.probe(remote.as_ref()).await;
                    }
                },
            ));
        }

        background.push(
            Arc::clone(&coordinator).spawn_auto_sync(config.auto_sync_interval, shutdown.child_token()),
        );

        // TTL eviction for entries reads have not already purged.
        {
            let cache = Arc::clone(&cache);
            background.push(tasks::spawn_periodic(
                "cache-eviction",
                config.cache_ttl,
                shutdown.child_token(),
                move || {
                    let cache = Arc::clone(&cache);
                    async move {
                        let evicted = cache.evict_expired();
                        if evicted > 0 {
                            tracing::debug!(evicted, "cache entries expired");
                        }
                    }
                },
            ));
        }

        // Outbox sweep retries due entries; dead letters are surfaced, not
        // retried.
        {
            let outbox = Arc::clone(&outbox);
            background.push(tasks::spawn_periodic(
                "outbox-sweep",
                config.sweep_interval,
                shutdown.child_token(),
                move || {
                    let outbox = Arc::clone(&outbox);
                    async move {
                        if let Err(err) = outbox.drain().await {
                            tracing::warn!(error = %err, "outbox sweep failed");
                        }
                        if let Ok(count) = outbox.dead_letter_count().await {
                            if count > 0 {
                                tracing::warn!(entries = count, "dead-letter entries await inspection");
                            }
                        }
                    }
                },
            ));
        }

        Ok(Self {
            store,
            outbox,
            coordinator,
            connectivity,
            shutdown,
            tasks: background,
        })
    }

    /// Stop the background tasks and wait for them to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
