//! Pooled SQLite connections and transactions
//!
//! This crate provides:
//! - A connection provider abstraction with per-mode open flags
//! - `Database`: a single-writer pool and a concurrent reader pool
//! - `Transaction`: query / mutation / create modes with a terminal state machine
//! - Named statement caching on top of SQLite's prepared statement cache
//! - Compensating actions for non-transactional side effects

pub mod connection;
pub mod database;
pub mod transaction;

// Re-exports
pub use connection::{ConnectionProvider, DbConnection, FileConnectionProvider, OpenMode};
pub use database::Database;
pub use transaction::{StatementCache, Transaction, TransactionMode, TransactionState};

use fstrack_core::PoolError;
use thiserror::Error;

/// Errors raised by the connection/transaction layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("failed to open database connection: {0:#}")]
    Open(#[source] anyhow::Error),
    /// Any operation on a committed or rolled back transaction
    #[error("transaction is already {0}")]
    Finished(TransactionState),
    #[error("side effects are not allowed in query transactions")]
    SideEffectInQuery,
    #[error("statement cache has been disposed")]
    Disposed,
    #[error("side effect failed: {0:#}")]
    SideEffect(#[source] anyhow::Error),
    #[error("schema migration failed: {0}")]
    Migration(String),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
