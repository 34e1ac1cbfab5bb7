//! Record types for storing data.

use crate::{CollectionName, DeviceId, RecordId, Timestamp, VectorClock, Version};
use serde::{Deserialize, Serialize};

/// Synchronization state of a single record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Mutated locally, not yet acknowledged by the remote
    #[default]
    Pending,
    /// Remote has acknowledged this exact version
    Synced,
    /// Divergence the merge policy could not resolve; held for inspection
    Conflict,
}

impl SyncStatus {
    /// Stable string form, used for the persisted column.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
        }
    }

    /// Parse the persisted column form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "synced" => Some(SyncStatus::Synced),
            "conflict" => Some(SyncStatus::Conflict),
            _ => None,
        }
    }
}

/// A data record in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique identifier within its collection
    pub id: RecordId,
    /// Collection this record belongs to
    pub collection: CollectionName,
    /// The actual data payload (opaque JSON value)
    pub payload: serde_json::Value,
    /// Version number, incremented on each mutation
    pub version: Version,
    /// Device that created the record
    pub origin_device: DeviceId,
    /// Wall-clock time of the last mutation (milliseconds, advisory only)
    pub last_modified: Timestamp,
    /// Per-device mutation counters
    pub vector_clock: VectorClock,
    /// Whether the remote has acknowledged this version
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// Payload as of the last acknowledged sync. Baseline for the
    /// numeric-delta merge; never sent over the wire.
    #[serde(skip)]
    pub base_payload: Option<serde_json::Value>,
}

impl Record {
    /// Create a record for a fresh local write.
    pub fn new_local(
        id: impl Into<RecordId>,
        collection: impl Into<CollectionName>,
        payload: serde_json::Value,
        device: impl Into<DeviceId>,
        now: Timestamp,
    ) -> Self {
        let device = device.into();
        let mut vector_clock = VectorClock::new();
        vector_clock.increment(device.clone());

        Self {
            id: id.into(),
            collection: collection.into(),
            payload,
            version: 1,
            origin_device: device,
            last_modified: now,
            vector_clock,
            sync_status: SyncStatus::Pending,
            base_payload: None,
        }
    }

    /// Apply a local mutation: replace the payload, bump the version, and
    /// tick this device's clock entry. The record becomes `pending` again.
    pub fn apply_local(&mut self, payload: serde_json::Value, device: &str, now: Timestamp) {
        self.payload = payload;
        self.version += 1;
        self.vector_clock.increment(device.to_string());
        self.last_modified = now;
        self.sync_status = SyncStatus::Pending;
    }

    /// Mark this exact version as acknowledged by the remote and snapshot
    /// the payload as the new merge baseline.
    pub fn mark_synced(&mut self) {
        self.sync_status = SyncStatus::Synced;
        self.base_payload = Some(self.payload.clone());
    }

    /// True when the record has local changes awaiting acknowledgment.
    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }
}
