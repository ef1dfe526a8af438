//! Path-tree tracker with change notifications
//!
//! This crate provides:
//! - The persisted path tree (entries + per-entry properties) and its schema
//! - Reconciliation of provider hints against stored state
//! - An ordered event sink that fans committed batches out to subscribers

pub mod entry;
mod reconcile;
pub mod schema;
pub mod sink;
pub mod tracker;

// Re-exports
pub use entry::{Property, TrackedEntry, ROOT_ID};
pub use sink::{EventSink, SinkError, Subscription};
pub use tracker::Tracker;

use fstrack_core::PathError;
use fstrack_store::StoreError;
use thiserror::Error;

/// Errors raised by tracker operations
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("invalid configuration: {0:#}")]
    Config(#[source] anyhow::Error),
    #[error("the root entry must be a directory")]
    RootNotDirectory,
    #[error("not a directory: {0}")]
    NotADirectory(String),
    /// Stored state contradicts the tree invariants
    #[error("tracked state is inconsistent: {0}")]
    Inconsistent(String),
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;
