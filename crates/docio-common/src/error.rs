//! Error types for docio
//!
//! This module defines the common error type used throughout the shard node.
//! The type is `Clone` because cleanup notifications broadcast one terminal
//! status to every observer.

use thiserror::Error;

/// Common result type for docio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for docio
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A requested range intersects chunks that are live, in use by running
    /// queries, or being migrated in.
    #[error("range overlap conflict: {0}")]
    RangeOverlapConflict(String),

    /// Pending work was abandoned because the collection was dropped, became
    /// unsharded, or its manager was torn down. Observers treat this as
    /// "abandoned, not failed".
    #[error("interrupted due to shard state change: {0}")]
    Interrupted(String),

    /// Metadata snapshot failed validation.
    #[error("invalid collection metadata: {0}")]
    InvalidMetadata(String),

    /// A key range failed validation.
    #[error("invalid key range: {0}")]
    InvalidRange(String),

    /// The underlying document store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Create a range overlap conflict error
    pub fn range_overlap(msg: impl Into<String>) -> Self {
        Self::RangeOverlapConflict(msg.into())
    }

    /// Create an interruption error
    pub fn interrupted(msg: impl Into<String>) -> Self {
        Self::Interrupted(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Check if this is a range overlap conflict
    #[must_use]
    pub fn is_overlap_conflict(&self) -> bool {
        matches!(self, Self::RangeOverlapConflict(_))
    }

    /// Check if this marks abandoned (not failed) work
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(Error::range_overlap("x").is_overlap_conflict());
        assert!(Error::interrupted("x").is_interrupted());
        assert!(!Error::storage("x").is_interrupted());
        assert!(!Error::storage("x").is_overlap_conflict());
    }

    #[test]
    fn test_error_display() {
        let err = Error::range_overlap("overlaps a live shard chunk");
        assert_eq!(
            err.to_string(),
            "range overlap conflict: overlaps a live shard chunk"
        );
    }
}
