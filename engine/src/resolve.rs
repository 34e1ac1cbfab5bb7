//! Conflict resolution between local and remote record versions.
//!
//! This is the core of determinism. Causal dominance is decided by the
//! vector clocks; genuine divergence falls through to the collection's
//! merge policy. The same `(collection, local, remote)` inputs always yield
//! the same output, independent of call order, so retried merges never
//! oscillate.

use crate::{
    clock::ClockOrdering, error::Result, CollectionName, Error, MergePolicy, PolicyTable, Record,
    RecordId, SyncStatus, VectorClock,
};
use serde::{Deserialize, Serialize};

/// Which side a resolution kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Local version kept
    Local,
    /// Remote version kept
    Remote,
    /// A new merged version was produced
    Merged,
}

/// A resolved divergence, kept for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    /// Collection of the conflicting record
    pub collection: CollectionName,
    /// Id of the conflicting record
    pub entity_id: RecordId,
    /// The local version at resolution time
    pub local: Record,
    /// The remote version at resolution time
    pub remote: Record,
    /// How the conflict was settled
    pub resolution: Resolution,
}

/// Outcome of resolving a local/remote pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// The record to store under the original id
    pub record: Record,
    /// Extra record produced by append-preserving merges; stored under a
    /// derived id and pushed like any other local write
    pub sibling: Option<Record>,
    /// Present when the clocks were concurrent and a policy decided
    pub conflict: Option<ConflictRecord>,
}

impl Resolved {
    fn clean(record: Record) -> Self {
        Self {
            record,
            sibling: None,
            conflict: None,
        }
    }
}

/// Resolves divergent record versions using a per-collection policy table.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    table: PolicyTable,
}

impl ConflictResolver {
    /// Create a resolver over the given policy table.
    pub fn new(table: PolicyTable) -> Self {
        Self { table }
    }

    /// The policy table in use.
    pub fn table(&self) -> &PolicyTable {
        &self.table
    }

    /// Resolve a local/remote pair.
    ///
    /// `Ahead` keeps local outright, `Behind` keeps remote outright;
    /// `Concurrent` applies the collection's merge policy. Winners of a
    /// concurrent resolution carry the pointwise-max clock so no device
    /// counter ever regresses in the stored record.
    pub fn resolve(&self, local: &Record, remote: &Record) -> Result<Resolved> {
        match local.vector_clock.compare(&remote.vector_clock) {
            ClockOrdering::Ahead => Ok(Resolved::clean(local.clone())),
            ClockOrdering::Behind => Ok(Resolved::clean(remote.clone())),
            ClockOrdering::Concurrent => self.resolve_concurrent(local, remote),
        }
    }

    fn resolve_concurrent(&self, local: &Record, remote: &Record) -> Result<Resolved> {
        match self.table.policy_for(&local.collection) {
            MergePolicy::RemoteWins => Ok(self.keep(remote, local, remote, Resolution::Remote)),
            MergePolicy::LastWriteWins => {
                let local_key = (local.last_modified, local.origin_device.as_str());
                let remote_key = (remote.last_modified, remote.origin_device.as_str());
                if local_key >= remote_key {
                    Ok(self.keep(local, local, remote, Resolution::Local))
                } else {
                    Ok(self.keep(remote, local, remote, Resolution::Remote))
                }
            }
            MergePolicy::NumericDelta { field } => self.merge_numeric(local, remote, field),
            MergePolicy::KeepBoth => Ok(self.keep_both(local, remote)),
        }
    }

    /// Keep one side of a concurrent pair, with clock/version floors so the
    /// stored result never regresses.
    fn keep(
        &self,
        winner: &Record,
        local: &Record,
        remote: &Record,
        resolution: Resolution,
    ) -> Resolved {
        let mut record = winner.clone();
        record.vector_clock = VectorClock::merged(&local.vector_clock, &remote.vector_clock);
        record.version = local.version.max(remote.version);

        Resolved {
            record,
            sibling: None,
            conflict: Some(ConflictRecord {
                collection: local.collection.clone(),
                entity_id: local.id.clone(),
                local: local.clone(),
                remote: remote.clone(),
                resolution,
            }),
        }
    }

    /// Numeric-delta merge: apply the local delta since the last sync onto
    /// the remote baseline. A record that has never synced contributes its
    /// full value (baseline zero), so concurrently created counters sum.
    fn merge_numeric(&self, local: &Record, remote: &Record, field: &str) -> Result<Resolved> {
        let local_value = integer_field(local, field)?;
        let remote_value = integer_field(remote, field)?;
        let base_value = local
            .base_payload
            .as_ref()
            .and_then(|base| base.get(field))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0);

        let merged_value = remote_value + (local_value - base_value);

        let mut payload = remote.payload.clone();
        match payload.as_object_mut() {
            Some(object) => {
                object.insert(field.to_string(), serde_json::Value::from(merged_value));
            }
            None => {
                return Err(unresolvable(local, "payload is not a JSON object"));
            }
        }

        let record = Record {
            id: local.id.clone(),
            collection: local.collection.clone(),
            payload,
            version: local.version.max(remote.version) + 1,
            origin_device: local.origin_device.clone(),
            last_modified: local.last_modified.max(remote.last_modified),
            vector_clock: VectorClock::merged(&local.vector_clock, &remote.vector_clock),
            sync_status: SyncStatus::Pending,
            base_payload: None,
        };

        Ok(Resolved {
            record,
            sibling: None,
            conflict: Some(ConflictRecord {
                collection: local.collection.clone(),
                entity_id: local.id.clone(),
                local: local.clone(),
                remote: remote.clone(),
                resolution: Resolution::Merged,
            }),
        })
    }

    /// Append-preserving merge: remote keeps the id, the local copy
    /// survives under `{id}~{device}` and is pushed like a fresh write.
    fn keep_both(&self, local: &Record, remote: &Record) -> Resolved {
        let mut resolved = self.keep(remote, local, remote, Resolution::Merged);

        let mut sibling = local.clone();
        sibling.id = format!("{}~{}", local.id, local.origin_device);
        sibling.sync_status = SyncStatus::Pending;
        sibling.base_payload = None;
        resolved.sibling = Some(sibling);

        resolved
    }
}

fn integer_field(record: &Record, field: &str) -> Result<i64> {
    record
        .payload
        .get(field)
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| unresolvable(record, &format!("field '{field}' is not an integer")))
}

fn unresolvable(record: &Record, reason: &str) -> Error {
    Error::UnresolvableConflict {
        collection: record.collection.clone(),
        id: record.id.clone(),
        reason: reason.to_string(),
    }
}
