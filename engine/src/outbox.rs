//! Outbox entry types.
//!
//! A mutation that is not yet acknowledged by the remote is described by an
//! [`OutboxEntry`]. The IO layer persists entries and drains them; the types
//! here are plain serializable data plus the due/reschedule bookkeeping.

use crate::{CollectionName, RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// The remote effect an outbox entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxOp {
    /// Create-or-replace the record on the remote
    Upsert,
    /// Propagate a local deletion (tombstone)
    Delete,
}

impl OutboxOp {
    /// Stable string form, used for the persisted column.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxOp::Upsert => "upsert",
            OutboxOp::Delete => "delete",
        }
    }

    /// Parse the persisted column form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upsert" => Some(OutboxOp::Upsert),
            "delete" => Some(OutboxOp::Delete),
            _ => None,
        }
    }
}

/// A durable not-yet-acknowledged mutation.
///
/// Entries are drained in enqueue order per collection and removed only on
/// confirmed remote acknowledgment or after exhausting the retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    /// Unique entry id
    pub id: String,
    /// Collection of the affected record
    pub collection: CollectionName,
    /// The affected record
    pub record_id: RecordId,
    /// What to do on the remote
    pub operation: OutboxOp,
    /// Payload snapshot at enqueue time; `None` for deletions
    pub payload: Option<serde_json::Value>,
    /// When the entry was enqueued (milliseconds)
    pub enqueued_at: Timestamp,
    /// Failed delivery attempts so far
    pub attempt_count: u32,
    /// Earliest time the next attempt may run (backoff schedule)
    pub not_before: Timestamp,
    /// Error from the most recent failed attempt
    pub last_error: Option<String>,
}

impl OutboxEntry {
    /// Entry for an upsert, carrying a payload snapshot.
    pub fn upsert(
        id: impl Into<String>,
        collection: impl Into<CollectionName>,
        record_id: impl Into<RecordId>,
        payload: serde_json::Value,
        now: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            record_id: record_id.into(),
            operation: OutboxOp::Upsert,
            payload: Some(payload),
            enqueued_at: now,
            attempt_count: 0,
            not_before: 0,
            last_error: None,
        }
    }

    /// Entry for a deletion tombstone.
    pub fn delete(
        id: impl Into<String>,
        collection: impl Into<CollectionName>,
        record_id: impl Into<RecordId>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            record_id: record_id.into(),
            operation: OutboxOp::Delete,
            payload: None,
            enqueued_at: now,
            attempt_count: 0,
            not_before: 0,
            last_error: None,
        }
    }

    /// True when the backoff schedule allows another attempt.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.not_before <= now
    }

    /// Register a failed attempt: bump the count, remember the error, and
    /// push `not_before` out by the given delay.
    pub fn record_failure(&mut self, error: impl Into<String>, delay_ms: u64, now: Timestamp) {
        self.attempt_count += 1;
        self.last_error = Some(error.into());
        self.not_before = now + delay_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upsert_entry_carries_snapshot() {
        let entry = OutboxEntry::upsert("e-1", "orders", "o-1", json!({"total": 12}), 1000);
        assert_eq!(entry.operation, OutboxOp::Upsert);
        assert_eq!(entry.payload, Some(json!({"total": 12})));
        assert_eq!(entry.attempt_count, 0);
        assert!(entry.is_due(0));
    }

    #[test]
    fn delete_entry_has_no_payload() {
        let entry = OutboxEntry::delete("e-2", "orders", "o-1", 1000);
        assert_eq!(entry.operation, OutboxOp::Delete);
        assert!(entry.payload.is_none());
    }

    #[test]
    fn failure_pushes_schedule_out() {
        let mut entry = OutboxEntry::delete("e-1", "orders", "o-1", 1000);
        entry.record_failure("connection refused", 2000, 5000);

        assert_eq!(entry.attempt_count, 1);
        assert_eq!(entry.last_error.as_deref(), Some("connection refused"));
        assert!(!entry.is_due(6999));
        assert!(entry.is_due(7000));
    }

    #[test]
    fn op_column_roundtrip() {
        for op in [OutboxOp::Upsert, OutboxOp::Delete] {
            assert_eq!(OutboxOp::parse(op.as_str()), Some(op));
        }
        assert_eq!(OutboxOp::parse("replace"), None);
    }
}
