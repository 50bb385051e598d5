//! docio Common - Shared types and utilities
//!
//! This crate provides the types, error definitions, configuration, and
//! synchronization utilities shared across docio shard-node components.

pub mod config;
pub mod error;
pub mod notify;
pub mod types;

pub use config::CleanupConfig;
pub use error::{Error, Result};
pub use notify::Notification;
pub use types::*;
