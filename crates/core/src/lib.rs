//! fstrack core - primitives shared by the store and the tracker
//!
//! This crate provides:
//! - A bounded, lazily-populated resource pool with cancellation on dispose
//! - Path normalization and LIKE-pattern escaping for the path tree
//! - Boundary types exchanged with file providers and subscribers
//! - Tracker configuration loaded from TOML

pub mod config;
pub mod path;
pub mod pool;
pub mod types;

// Re-export main types for convenience
pub use config::{DatabaseConfig, EventsConfig, TrackerConfig};
pub use path::PathError;
pub use pool::{PoolError, PooledItem, ResourceFactory, ResourcePool};
pub use types::{
    Dirent, FileEvent, FileEventKind, FileHandle, FileStats, FileType, PropertyFeature,
};

/// Common result type used throughout fstrack-core
pub type Result<T> = anyhow::Result<T>;
