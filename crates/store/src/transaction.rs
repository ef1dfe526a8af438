//! Transactions over pooled connections
//!
//! A [`Transaction`] is `Active` until it is committed or rolled back; both
//! states are terminal and every later operation fails with
//! [`StoreError::Finished`]. Dropping an active transaction rolls it back
//! before its connection goes back to the pool.

use crate::connection::DbConnection;
use crate::{Result, StoreError};
use ahash::AHashMap;
use fstrack_core::PooledItem;
use rusqlite::{OptionalExtension, Params, Row};
use std::fmt;
use std::ops::{Deref, DerefMut};
use tracing::{error, warn};

/// Kind of transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionMode {
    /// Read-only, read pool, `BEGIN DEFERRED`
    Query,
    /// Read-write, write pool, `BEGIN IMMEDIATE`
    Mutation,
    /// Schema setup on an isolated read-write-create connection
    Create,
}

impl TransactionMode {
    fn begin_sql(self) -> &'static str {
        match self {
            TransactionMode::Query => "BEGIN DEFERRED",
            TransactionMode::Mutation | TransactionMode::Create => "BEGIN IMMEDIATE",
        }
    }
}

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Active => write!(f, "active"),
            TransactionState::Committed => write!(f, "committed"),
            TransactionState::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// Statement SQL keyed by logical command name
///
/// The generator for a name runs once; later lookups return the same text, so
/// the connection's prepared statement cache hands back the already compiled
/// statement and only parameters are re-bound.
#[derive(Debug, Default)]
pub struct StatementCache {
    statements: AHashMap<&'static str, String>,
    disposed: bool,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// SQL for `name`, generating it on first use
    pub fn get_or_insert_with(
        &mut self,
        name: &'static str,
        generate: impl FnOnce() -> String,
    ) -> Result<&str> {
        if self.disposed {
            return Err(StoreError::Disposed);
        }
        Ok(self.statements.entry(name).or_insert_with(generate))
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn dispose(&mut self) {
        self.statements.clear();
        self.disposed = true;
    }
}

type Compensation = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Connection owned by a transaction
pub(crate) enum ConnectionHandle {
    Pooled(PooledItem<DbConnection>),
    /// Create mode runs on its own connection but holds a writer slot, so it
    /// is serialized with mutations
    Isolated {
        conn: DbConnection,
        _writer_slot: PooledItem<DbConnection>,
    },
}

impl Deref for ConnectionHandle {
    type Target = DbConnection;

    fn deref(&self) -> &DbConnection {
        match self {
            ConnectionHandle::Pooled(conn) => conn,
            ConnectionHandle::Isolated { conn, .. } => conn,
        }
    }
}

impl DerefMut for ConnectionHandle {
    fn deref_mut(&mut self) -> &mut DbConnection {
        match self {
            ConnectionHandle::Pooled(conn) => conn,
            ConnectionHandle::Isolated { conn, .. } => conn,
        }
    }
}

/// A single logical unit of work on one connection
pub struct Transaction {
    conn: ConnectionHandle,
    mode: TransactionMode,
    state: TransactionState,
    statements: StatementCache,
    compensations: Vec<Compensation>,
}

impl Transaction {
    /// Begin a transaction on `conn`
    pub(crate) fn begin(conn: ConnectionHandle, mode: TransactionMode) -> Result<Self> {
        conn.inner().execute_batch(mode.begin_sql())?;
        Ok(Self {
            conn,
            mode,
            state: TransactionState::Active,
            statements: StatementCache::new(),
            compensations: Vec::new(),
        })
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            state => Err(StoreError::Finished(state)),
        }
    }

    /// Execute the named statement, returning the number of changed rows
    pub fn execute<P: Params>(
        &mut self,
        name: &'static str,
        sql: impl FnOnce() -> String,
        params: P,
    ) -> Result<usize> {
        self.ensure_active()?;
        let sql = self.statements.get_or_insert_with(name, sql)?;
        let mut stmt = self.conn.inner().prepare_cached(sql)?;
        Ok(stmt.execute(params)?)
    }

    /// Run the named query and map its first row, if any
    pub fn query_row<P, T, F>(
        &mut self,
        name: &'static str,
        sql: impl FnOnce() -> String,
        params: P,
        f: F,
    ) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.ensure_active()?;
        let sql = self.statements.get_or_insert_with(name, sql)?;
        let mut stmt = self.conn.inner().prepare_cached(sql)?;
        Ok(stmt.query_row(params, f).optional()?)
    }

    /// Run the named query and map every row
    pub fn query_map<P, T, F>(
        &mut self,
        name: &'static str,
        sql: impl FnOnce() -> String,
        params: P,
        f: F,
    ) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.ensure_active()?;
        let sql = self.statements.get_or_insert_with(name, sql)?;
        let mut stmt = self.conn.inner().prepare_cached(sql)?;
        let rows = stmt.query_map(params, f)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Rowid of the last successful insert on this connection
    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.inner().last_insert_rowid()
    }

    /// Run raw SQL without caching (schema setup)
    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.ensure_active()?;
        self.conn.inner().execute_batch(sql)?;
        Ok(())
    }

    /// Run `effect` now and remember `compensation` to undo it on rollback
    ///
    /// Compensations run in reverse registration order. A failing effect
    /// registers nothing.
    pub fn run_side_effect<R, E, C>(&mut self, effect: E, compensation: C) -> Result<R>
    where
        E: FnOnce() -> anyhow::Result<R>,
        C: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.ensure_active()?;
        if self.mode == TransactionMode::Query {
            return Err(StoreError::SideEffectInQuery);
        }
        let value = effect().map_err(StoreError::SideEffect)?;
        self.compensations.push(Box::new(compensation));
        Ok(value)
    }

    /// Number of registered compensations
    pub fn pending_compensations(&self) -> usize {
        self.compensations.len()
    }

    /// Commit; on failure the transaction is rolled back and the error returned
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        if let Err(e) = self.conn.inner().execute_batch("COMMIT") {
            if let Err(rollback_err) = self.rollback() {
                error!("rollback after failed commit also failed: {}", rollback_err);
            }
            return Err(e.into());
        }
        self.state = TransactionState::Committed;
        self.compensations.clear();
        self.statements.dispose();
        Ok(())
    }

    /// Roll back the store transaction and run every compensation, newest first
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TransactionState::RolledBack;
        self.statements.dispose();

        let result = self.conn.reset();

        while let Some(compensation) = self.compensations.pop() {
            if let Err(e) = compensation() {
                warn!("compensation failed during rollback: {:#}", e);
            }
        }

        Ok(result?)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            if let Err(e) = self.rollback() {
                error!("rollback of abandoned {:?} transaction failed: {}", self.mode, e);
            }
        }
    }
}
