//! Error types for the Satchel engine.

use crate::{CollectionName, RecordId};
use thiserror::Error;

/// All possible errors from the Satchel engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The collection's merge policy could not produce a result for this
    /// pair of records. The IO layer records these for inspection instead
    /// of dropping them.
    #[error("unresolvable conflict on {collection}/{id}: {reason}")]
    UnresolvableConflict {
        collection: CollectionName,
        id: RecordId,
        reason: String,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
