//! Configuration for the store and sync engine.

use satchel_engine::{PolicyTable, RetryPolicy};
use std::env;
use std::time::Duration;

/// Store configuration.
///
/// Embedding applications usually build this directly; [`from_env`]
/// supports environment-driven deployments.
///
/// [`from_env`]: StoreConfig::from_env
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLite database URL (e.g. `sqlite://satchel.db`)
    pub database_url: String,
    /// Base URL of the remote sync API
    pub remote_base_url: String,
    /// Records per upload batch and per pull page
    pub batch_size: usize,
    /// Read-cache entry lifetime
    pub cache_ttl: Duration,
    /// Interval between background sync cycles
    pub auto_sync_interval: Duration,
    /// Interval between liveness probes
    pub health_probe_interval: Duration,
    /// Interval between outbox sweeps
    pub sweep_interval: Duration,
    /// Per-request timeout on the remote client
    pub request_timeout: Duration,
    /// Outbox retry budget and backoff schedule
    pub retry: RetryPolicy,
    /// Per-collection merge policies
    pub policies: PolicyTable,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://satchel.db".to_string(),
            remote_base_url: "http://localhost:3000".to_string(),
            batch_size: 50,
            cache_ttl: Duration::from_secs(60),
            auto_sync_interval: Duration::from_secs(30),
            health_probe_interval: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            policies: PolicyTable::default(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// `SATCHEL_DATABASE_URL` and `SATCHEL_REMOTE_URL` are required; the
    /// numeric knobs fall back to their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("SATCHEL_DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;
        let remote_base_url =
            env::var("SATCHEL_REMOTE_URL").map_err(|_| ConfigError::MissingRemoteUrl)?;

        let mut config = Self {
            database_url,
            remote_base_url,
            ..Self::default()
        };

        if let Ok(batch) = env::var("SATCHEL_BATCH_SIZE") {
            config.batch_size = batch.parse().map_err(|_| ConfigError::InvalidBatchSize)?;
        }
        if let Ok(secs) = env::var("SATCHEL_AUTO_SYNC_SECS") {
            let secs: u64 = secs.parse().map_err(|_| ConfigError::InvalidInterval)?;
            config.auto_sync_interval = Duration::from_secs(secs);
        }
        if let Ok(secs) = env::var("SATCHEL_CACHE_TTL_SECS") {
            let secs: u64 = secs.parse().map_err(|_| ConfigError::InvalidInterval)?;
            config.cache_ttl = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SATCHEL_DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("SATCHEL_REMOTE_URL environment variable is required")]
    MissingRemoteUrl,

    #[error("Invalid SATCHEL_BATCH_SIZE value")]
    InvalidBatchSize,

    #[error("Invalid interval value")]
    InvalidInterval,
}
