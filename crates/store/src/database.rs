//! Pooled database handle
//!
//! Writers share a pool of `write_pool_size` connections (1 by default, which
//! serializes every mutation at acquisition time). Readers share a separate
//! pool and never wait on the writer pool.

use crate::connection::{ConnectionProvider, DbConnection, FileConnectionProvider, OpenMode};
use crate::transaction::{ConnectionHandle, Transaction, TransactionMode};
use crate::StoreError;
use fstrack_core::{DatabaseConfig, ResourceFactory, ResourcePool};
use std::sync::Arc;
use tracing::debug;

/// Database with separate reader and writer connection pools
pub struct Database {
    provider: Arc<dyn ConnectionProvider>,
    statement_cache_capacity: usize,
    write_pool: Arc<ResourcePool<DbConnection>>,
    read_pool: Arc<ResourcePool<DbConnection>>,
}

impl Database {
    /// Build a database over `provider`; connections are opened lazily
    pub fn new(provider: Arc<dyn ConnectionProvider>, config: &DatabaseConfig) -> Self {
        let cache = config.statement_cache_capacity;
        let write_pool = build_pool(&provider, OpenMode::ReadWrite, config.write_pool_size, cache);
        let read_pool = build_pool(&provider, OpenMode::ReadOnly, config.read_pool_size, cache);
        Self {
            provider,
            statement_cache_capacity: cache,
            write_pool,
            read_pool,
        }
    }

    /// Database backed by the file at `config.path`
    pub fn open(config: &DatabaseConfig) -> Self {
        let provider =
            FileConnectionProvider::new(&config.path).with_busy_timeout(config.busy_timeout());
        Self::new(Arc::new(provider), config)
    }

    /// Begin a read-only transaction on a reader connection
    pub fn begin_query(&self) -> Result<Transaction, StoreError> {
        let conn = self.read_pool.acquire_scoped()?;
        Transaction::begin(ConnectionHandle::Pooled(conn), TransactionMode::Query)
    }

    /// Begin a write transaction, waiting for the writer connection if needed
    pub fn begin_mutation(&self) -> Result<Transaction, StoreError> {
        let conn = self.write_pool.acquire_scoped()?;
        Transaction::begin(ConnectionHandle::Pooled(conn), TransactionMode::Mutation)
    }

    /// Begin a schema transaction on a fresh connection that may create the file
    ///
    /// The connection is opened first so the file exists before the writer
    /// pool opens its own; a writer slot is then held until the transaction
    /// ends.
    pub fn begin_create(&self) -> Result<Transaction, StoreError> {
        let conn = DbConnection::open(
            self.provider.as_ref(),
            OpenMode::ReadWriteCreate,
            self.statement_cache_capacity,
        )
        .map_err(StoreError::Open)?;
        let writer_slot = self.write_pool.acquire_scoped()?;
        Transaction::begin(
            ConnectionHandle::Isolated { conn, _writer_slot: writer_slot },
            TransactionMode::Create,
        )
    }

    /// Run `f` in a query transaction and commit
    pub fn query<T, E>(&self, f: impl FnOnce(&mut Transaction) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        run_and_commit(self.begin_query()?, f)
    }

    /// Run `f` in a mutation transaction and commit; an error rolls back
    pub fn mutate<T, E>(&self, f: impl FnOnce(&mut Transaction) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        run_and_commit(self.begin_mutation()?, f)
    }

    /// Run `f` in a create transaction and commit
    pub fn create<T, E>(&self, f: impl FnOnce(&mut Transaction) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        run_and_commit(self.begin_create()?, f)
    }

    /// Reader connections opened so far
    pub fn read_connections(&self) -> usize {
        self.read_pool.created()
    }

    /// Writer connections opened so far
    pub fn write_connections(&self) -> usize {
        self.write_pool.created()
    }

    /// Dispose both pools; blocked callers fail with a cancellation error
    pub fn dispose(&self) {
        self.write_pool.dispose();
        self.read_pool.dispose();
        debug!("database pools disposed");
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn build_pool(
    provider: &Arc<dyn ConnectionProvider>,
    mode: OpenMode,
    size: usize,
    statement_cache_capacity: usize,
) -> Arc<ResourcePool<DbConnection>> {
    let provider = Arc::clone(provider);
    let factory = ResourceFactory::sync(move || {
        DbConnection::open(provider.as_ref(), mode, statement_cache_capacity)
    });
    let pool = ResourcePool::new(size, factory)
        .with_before_return(|conn: &mut DbConnection| Ok(conn.reset()?));
    Arc::new(pool)
}

fn run_and_commit<T, E>(
    mut tx: Transaction,
    f: impl FnOnce(&mut Transaction) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<StoreError>,
{
    let value = f(&mut tx)?;
    tx.commit()?;
    Ok(value)
}
