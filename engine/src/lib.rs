//! # Satchel Engine
//!
//! The deterministic core of the Satchel offline-first store.
//!
//! This crate holds the logic that must behave identically on every device:
//! vector clocks, record bookkeeping, conflict resolution, and the retry
//! policy. It has no knowledge of storage, networking, or time; the IO
//! layer (`satchel-store`) feeds it timestamps and persists its outputs.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches files, sockets, or wall clocks
//! - **Deterministic**: the same inputs always produce the same outputs
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! Data lives in [`Record`]s: an opaque JSON payload plus the bookkeeping
//! that makes multi-device reconciliation possible: a version counter, the
//! originating device, a [`VectorClock`], and a [`SyncStatus`].
//!
//! ### Vector clocks
//!
//! A [`VectorClock`] maps each device to a mutation counter. Comparing two
//! clocks tells whether one record causally dominates the other or whether
//! the two genuinely diverged ([`ClockOrdering::Concurrent`]).
//!
//! ### Conflict resolution
//!
//! The [`ConflictResolver`] resolves divergence with a per-collection
//! [`MergePolicy`] from a [`PolicyTable`]: remote-authoritative data,
//! numeric-delta counters, append-preserving logs, and last-write-wins as
//! the universal fallback. Resolution is a pure function of
//! `(collection, local, remote)`, so retried merges never oscillate.
//!
//! ### Outbox entries
//!
//! Local mutations awaiting remote acknowledgment are described by
//! [`OutboxEntry`] values. The engine defines their shape and the
//! [`RetryPolicy`] backoff table; durability and draining belong to the IO
//! layer.

pub mod clock;
pub mod error;
pub mod outbox;
pub mod policy;
pub mod record;
pub mod resolve;
pub mod retry;
pub mod state;

// Re-export main types at crate root
pub use clock::{ClockOrdering, VectorClock};
pub use error::Error;
pub use outbox::{OutboxEntry, OutboxOp};
pub use policy::{MergePolicy, PolicyTable};
pub use record::{Record, SyncStatus};
pub use resolve::{ConflictRecord, ConflictResolver, Resolution, Resolved};
pub use retry::RetryPolicy;
pub use state::{EntitySyncState, SyncPhase};

/// Type aliases for clarity
pub type RecordId = String;
pub type CollectionName = String;
pub type DeviceId = String;
pub type Version = u64;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
