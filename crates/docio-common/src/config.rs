//! Configuration types for docio
//!
//! This module defines configuration structures used across components.

use serde::{Deserialize, Serialize};

/// Configuration for the orphan-range cleanup pipeline
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Maximum documents deleted per cleanup batch
    pub max_deleted_per_batch: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_deleted_per_batch: 128,
        }
    }
}

impl CleanupConfig {
    /// The effective batch size, clamped to at least one document.
    ///
    /// Read once per scheduled batch so a reconfigured value takes effect on
    /// the next batch.
    #[must_use]
    pub fn batch_limit(&self) -> usize {
        self.max_deleted_per_batch.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CleanupConfig::default();
        assert_eq!(config.max_deleted_per_batch, 128);
        assert_eq!(config.batch_limit(), 128);
    }

    #[test]
    fn test_batch_limit_clamped() {
        let config = CleanupConfig {
            max_deleted_per_batch: 0,
        };
        assert_eq!(config.batch_limit(), 1);
    }
}
