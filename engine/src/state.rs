//! Per-collection synchronization state.
//!
//! One `EntitySyncState` exists per collection, mutated only by the sync
//! coordinator and handed to observers as part of a snapshot map.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Phase of a collection's sync cycle: `idle → syncing → {success, error}`,
/// and the next cycle always starts again from `idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
}

/// Observable sync progress for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySyncState {
    /// Current phase of the cycle
    pub status: SyncPhase,
    /// Completion time of the last successful cycle (milliseconds)
    pub last_sync_at: Option<Timestamp>,
    /// Error that ended the last failed cycle
    pub last_error: Option<String>,
    /// Items pushed or merged during the current/last cycle
    pub items_synced: u64,
    /// Local items still awaiting acknowledgment
    pub items_pending: u64,
    /// Cycle progress; push contributes 0–50, pull 50–100
    pub progress_percent: u8,
}

impl EntitySyncState {
    /// Enter `syncing`: counters reset, pending count refreshed.
    pub fn begin(&mut self, items_pending: u64) {
        self.status = SyncPhase::Syncing;
        self.items_synced = 0;
        self.items_pending = items_pending;
        self.progress_percent = 0;
        self.last_error = None;
    }

    /// Update progress, clamped to 100.
    pub fn set_progress(&mut self, percent: u8) {
        self.progress_percent = percent.min(100);
    }

    /// Finish the cycle successfully.
    pub fn complete(&mut self, now: Timestamp) {
        self.status = SyncPhase::Success;
        self.last_sync_at = Some(now);
        self.progress_percent = 100;
    }

    /// Finish the cycle with an error (cancellation included).
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = SyncPhase::Error;
        self.last_error = Some(error.into());
    }
}
