//! Connection providers

use anyhow::Context;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How a connection is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// Reader connection, rejects writes
    ReadOnly,
    /// Writer connection on an existing database
    ReadWrite,
    /// Writer connection that may create the database file
    ReadWriteCreate,
}

impl OpenMode {
    pub fn is_read_only(self) -> bool {
        matches!(self, OpenMode::ReadOnly)
    }
}

/// Source of new SQLite connections
pub trait ConnectionProvider: Send + Sync {
    /// Open a fresh connection in the given mode
    fn open(&self, mode: OpenMode) -> anyhow::Result<Connection>;
}

/// Opens connections to a database file
#[derive(Debug, Clone)]
pub struct FileConnectionProvider {
    path: PathBuf,
    busy_timeout: Duration,
}

impl FileConnectionProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConnectionProvider for FileConnectionProvider {
    fn open(&self, mode: OpenMode) -> anyhow::Result<Connection> {
        // Readers are opened read-write and pinned with query_only: a WAL
        // reader may have to create the -shm file itself.
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if mode == OpenMode::ReadWriteCreate {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let conn = Connection::open_with_flags(&self.path, flags)
            .with_context(|| format!("Failed to open {} ({:?})", self.path.display(), mode))?;

        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        // Path prefix matching relies on LIKE comparing bytes exactly
        conn.pragma_update(None, "case_sensitive_like", true)?;
        if mode.is_read_only() {
            conn.pragma_update(None, "query_only", true)?;
        }
        Ok(conn)
    }
}

/// A pooled connection and the mode it was opened with
pub struct DbConnection {
    conn: Connection,
    mode: OpenMode,
}

impl DbConnection {
    /// Open a connection through `provider`
    pub fn open(
        provider: &dyn ConnectionProvider,
        mode: OpenMode,
        statement_cache_capacity: usize,
    ) -> anyhow::Result<Self> {
        let conn = provider.open(mode)?;
        conn.set_prepared_statement_cache_capacity(statement_cache_capacity);
        Ok(Self { conn, mode })
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn inner(&self) -> &Connection {
        &self.conn
    }

    /// Roll back a transaction left open by a dropped handle
    pub fn reset(&mut self) -> rusqlite::Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_only_connection_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let provider = FileConnectionProvider::new(dir.path().join("db.sqlite"));

        let writer = provider.open(OpenMode::ReadWriteCreate).unwrap();
        writer.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();

        let reader = provider.open(OpenMode::ReadOnly).unwrap();
        let count: i64 = reader
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(reader.execute("INSERT INTO t (x) VALUES (1)", []).is_err());
    }

    #[test]
    fn test_read_write_requires_existing_file() {
        let dir = TempDir::new().unwrap();
        let provider = FileConnectionProvider::new(dir.path().join("missing.sqlite"));
        assert!(provider.open(OpenMode::ReadWrite).is_err());
        assert!(provider.open(OpenMode::ReadWriteCreate).is_ok());
    }

    #[test]
    fn test_reset_rolls_back_open_transaction() {
        let dir = TempDir::new().unwrap();
        let provider = FileConnectionProvider::new(dir.path().join("db.sqlite"));
        let mut conn = DbConnection::open(&provider, OpenMode::ReadWriteCreate, 8).unwrap();
        conn.inner().execute_batch("BEGIN IMMEDIATE").unwrap();
        assert!(!conn.inner().is_autocommit());
        conn.reset().unwrap();
        assert!(conn.inner().is_autocommit());
    }
}
