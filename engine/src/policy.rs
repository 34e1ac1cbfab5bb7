//! Per-collection merge policies.
//!
//! When two versions of a record genuinely diverge, the winning shape is a
//! property of the collection, not of the record: catalog data is
//! remote-authoritative, inventory counters merge numerically, log-style
//! records keep both copies. The table maps collections to policies with a
//! universal last-write-wins fallback.

use crate::CollectionName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How concurrent versions of a record are reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MergePolicy {
    /// The remote copy is authoritative (reference/catalog data).
    RemoteWins,
    /// Merge a numeric field by applying the local delta since the last
    /// sync onto the remote baseline (inventory counters).
    NumericDelta { field: String },
    /// Append-preserving: the remote copy keeps the id, the local copy
    /// survives under a derived distinct id (immutable log-style records).
    KeepBoth,
    /// Later wall-clock write wins, device id as tiebreak. The universal
    /// fallback.
    LastWriteWins,
}

/// Collection-to-policy table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTable {
    policies: HashMap<CollectionName, MergePolicy>,
    fallback: MergePolicy,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            policies: HashMap::new(),
            fallback: MergePolicy::LastWriteWins,
        }
    }
}

impl PolicyTable {
    /// Empty table: every collection falls back to last-write-wins.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a policy for a collection (builder style).
    pub fn with_collection(
        mut self,
        collection: impl Into<CollectionName>,
        policy: MergePolicy,
    ) -> Self {
        self.policies.insert(collection.into(), policy);
        self
    }

    /// Replace the fallback policy.
    pub fn with_fallback(mut self, policy: MergePolicy) -> Self {
        self.fallback = policy;
        self
    }

    /// The policy for a collection, or the fallback if none is registered.
    pub fn policy_for(&self, collection: &str) -> &MergePolicy {
        self.policies.get(collection).unwrap_or(&self.fallback)
    }

    /// Collections with an explicit policy entry.
    pub fn collections(&self) -> impl Iterator<Item = &CollectionName> {
        self.policies.keys()
    }
}
