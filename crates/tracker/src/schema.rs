//! Tracker schema creation and verification

use crate::Result;
use fstrack_store::{Database, StoreError, Transaction};
use tracing::{debug, info};

/// Current schema version, stored in `meta`
pub const SCHEMA_VERSION: &str = "1";

const CREATE_SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS entries (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        path           TEXT    NOT NULL UNIQUE,
        parent         INTEGER NULL,
        is_directory   INTEGER NOT NULL,
        identifier_tag TEXT    NULL,
        content_tag    TEXT    NULL
    );

    CREATE INDEX IF NOT EXISTS idx_entries_parent ON entries (parent);

    CREATE TABLE IF NOT EXISTS entry_properties (
        id      INTEGER PRIMARY KEY AUTOINCREMENT,
        target  INTEGER NOT NULL REFERENCES entries (id) ON DELETE CASCADE,
        key     TEXT    NOT NULL,
        value   BLOB    NOT NULL,
        feature INTEGER NULL,
        UNIQUE (target, key)
    );

    INSERT OR IGNORE INTO entries (id, path, parent, is_directory)
        VALUES (0, '/', NULL, 1);
";

/// Create the schema on a fresh database or verify an existing one
pub fn initialize(db: &Database) -> Result<()> {
    db.create(|tx| {
        match stored_version(tx)? {
            None => {
                tx.execute_batch(CREATE_SCHEMA_SQL)?;
                tx.execute(
                    "set_schema_version",
                    || "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)".to_string(),
                    [SCHEMA_VERSION],
                )?;
                info!(version = SCHEMA_VERSION, "created tracker schema");
            }
            Some(version) if version == SCHEMA_VERSION => {
                debug!(version = %version, "tracker schema up to date");
            }
            Some(version) => {
                return Err(StoreError::Migration(format!(
                    "unsupported schema version {version}, expected {SCHEMA_VERSION}"
                ))
                .into());
            }
        }
        Ok(())
    })
}

fn stored_version(tx: &mut Transaction) -> Result<Option<String>> {
    let has_meta = tx
        .query_row(
            "has_meta_table",
            || "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'meta'".to_string(),
            [],
            |_| Ok(()),
        )?
        .is_some();
    if !has_meta {
        return Ok(None);
    }

    Ok(tx.query_row(
        "get_schema_version",
        || "SELECT value FROM meta WHERE key = 'schema_version'".to_string(),
        [],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fstrack_core::DatabaseConfig;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Database {
        Database::open(&DatabaseConfig {
            path: dir.path().join("tracker.db"),
            ..DatabaseConfig::default()
        })
    }

    #[test]
    fn test_initialize_creates_root() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        initialize(&db).unwrap();

        let root: Option<(i64, Option<i64>, bool)> = db
            .query(|tx| {
                tx.query_row(
                    "root",
                    || "SELECT id, parent, is_directory FROM entries WHERE path = '/'".to_string(),
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
            })
            .unwrap();
        assert_eq!(root, Some((0, None, true)));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        initialize(&open(&dir)).unwrap();
        initialize(&open(&dir)).unwrap();
    }

    #[test]
    fn test_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        initialize(&db).unwrap();
        db.mutate(|tx| {
            tx.execute(
                "bump_version",
                || "UPDATE meta SET value = '99' WHERE key = 'schema_version'".to_string(),
                [],
            )
        })
        .unwrap();

        let err = initialize(&db).unwrap_err();
        assert!(err.to_string().contains("unsupported schema version 99"));
    }
}
