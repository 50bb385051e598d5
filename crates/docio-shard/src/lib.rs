//! docio Shard - Per-collection shard metadata management
//!
//! This crate implements the shard-node metadata layer for a single sharded
//! collection:
//! - Versioned, immutable chunk-ownership snapshots
//! - Reader pinning: queries hold a snapshot for their whole lifetime while
//!   refreshes install newer snapshots underneath them
//! - Tracking of ranges being migrated in (pending, not yet queryable)
//! - Deferred deletion of orphaned ranges, gated on the last reader that
//!   could still observe them

pub mod deleter;
pub mod executor;
pub mod manager;
pub mod metadata;

#[cfg(test)]
mod testutil;

// Re-exports
pub use deleter::{CleanupNotification, Deletion, DocumentStore, RangeDeleter};
pub use executor::{Task, TaskExecutor, ThreadSpawnExecutor};
pub use manager::{MetadataDiagnostics, MetadataManager, ScopedMetadata};
pub use metadata::CollectionMetadata;
