//! Stored rows of the path tree and the statements that touch them

use crate::Result;
use fstrack_core::{path, FileEvent, FileHandle, PropertyFeature};
use fstrack_store::Transaction;
use rusqlite::Row;

/// Id of the root entry (`/`), which is never deleted
pub const ROOT_ID: i64 = 0;

/// One tracked path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEntry {
    pub id: i64,
    pub path: String,
    /// `None` only for the root
    pub parent: Option<i64>,
    pub is_directory: bool,
    /// `None` for placeholder directories that were never observed
    pub identifier_tag: Option<String>,
    pub content_tag: Option<String>,
}

impl TrackedEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            path: row.get(1)?,
            parent: row.get(2)?,
            is_directory: row.get(3)?,
            identifier_tag: row.get(4)?,
            content_tag: row.get(5)?,
        })
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_ID
    }

    /// Created only to hold a deeper path
    pub fn is_placeholder(&self) -> bool {
        self.identifier_tag.is_none()
    }

    pub fn handle(&self) -> Option<FileHandle> {
        self.identifier_tag.clone().map(FileHandle::from)
    }
}

/// One key/value pair attached to an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub id: i64,
    pub target: i64,
    pub key: String,
    pub value: Vec<u8>,
    pub feature: PropertyFeature,
}

impl Property {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let feature: Option<u32> = row.get(4)?;
        Ok(Self {
            id: row.get(0)?,
            target: row.get(1)?,
            key: row.get(2)?,
            value: row.get(3)?,
            feature: PropertyFeature::from_bits(feature.unwrap_or_default()),
        })
    }
}

const ENTRY_COLUMNS: &str = "id, path, parent, is_directory, identifier_tag, content_tag";

pub(crate) fn find_by_path(tx: &mut Transaction, path: &str) -> Result<Option<TrackedEntry>> {
    Ok(tx.query_row(
        "entry_by_path",
        || format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE path = ?1"),
        [path],
        TrackedEntry::from_row,
    )?)
}

pub(crate) fn children_of(tx: &mut Transaction, parent: i64) -> Result<Vec<TrackedEntry>> {
    Ok(tx.query_map(
        "entries_by_parent",
        || format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE parent = ?1 ORDER BY path"),
        [parent],
        TrackedEntry::from_row,
    )?)
}

pub(crate) fn insert(
    tx: &mut Transaction,
    path: &str,
    parent: i64,
    is_directory: bool,
    identifier_tag: Option<&str>,
    content_tag: Option<&str>,
) -> Result<i64> {
    tx.execute(
        "insert_entry",
        || {
            "INSERT INTO entries (path, parent, is_directory, identifier_tag, content_tag)
             VALUES (?1, ?2, ?3, ?4, ?5)"
                .to_string()
        },
        rusqlite::params![path, parent, is_directory, identifier_tag, content_tag],
    )?;
    Ok(tx.last_insert_rowid())
}

pub(crate) fn set_tags(
    tx: &mut Transaction,
    id: i64,
    identifier_tag: Option<&str>,
    content_tag: Option<&str>,
) -> Result<()> {
    tx.execute(
        "update_entry_tags",
        || "UPDATE entries SET identifier_tag = ?2, content_tag = ?3 WHERE id = ?1".to_string(),
        rusqlite::params![id, identifier_tag, content_tag],
    )?;
    Ok(())
}

pub(crate) fn set_content_tag(tx: &mut Transaction, id: i64, content_tag: &str) -> Result<()> {
    tx.execute(
        "update_entry_content_tag",
        || "UPDATE entries SET content_tag = ?2 WHERE id = ?1".to_string(),
        rusqlite::params![id, content_tag],
    )?;
    Ok(())
}

/// Delete `entry` and every entry below it, reporting observed ones as deleted
///
/// The root row itself survives: only its descendants go and its tags are
/// cleared.
pub(crate) fn delete_subtree(
    tx: &mut Transaction,
    entry: &TrackedEntry,
    events: &mut Vec<FileEvent>,
) -> Result<()> {
    let mut deleted = tx.query_map(
        "delete_descendants",
        || {
            "DELETE FROM entries WHERE path LIKE ?1 ESCAPE '\\'
             RETURNING identifier_tag, path"
                .to_string()
        },
        [path::descendants_pattern(&entry.path)],
        deleted_row,
    )?;

    if entry.is_root() {
        // The root row survives, so its properties do not cascade
        tx.execute(
            "delete_entry_properties",
            || "DELETE FROM entry_properties WHERE target = ?1".to_string(),
            [entry.id],
        )?;
        if let Some(tag) = &entry.identifier_tag {
            deleted.push((Some(tag.clone()), entry.path.clone()));
            set_tags(tx, entry.id, None, None)?;
        }
    } else {
        deleted.extend(tx.query_map(
            "delete_entry",
            || "DELETE FROM entries WHERE path = ?1 RETURNING identifier_tag, path".to_string(),
            [entry.path.as_str()],
            deleted_row,
        )?);
    }

    events.extend(deleted.into_iter().filter_map(|(tag, path)| {
        tag.map(|tag| FileEvent::deleted(FileHandle::from(tag), path))
    }));
    Ok(())
}

fn deleted_row(row: &Row<'_>) -> rusqlite::Result<(Option<String>, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

pub(crate) fn properties_of(tx: &mut Transaction, target: i64) -> Result<Vec<Property>> {
    Ok(tx.query_map(
        "properties_by_target",
        || {
            "SELECT id, target, key, value, feature FROM entry_properties
             WHERE target = ?1 ORDER BY key"
                .to_string()
        },
        [target],
        Property::from_row,
    )?)
}

pub(crate) fn get_property(tx: &mut Transaction, target: i64, key: &str) -> Result<Option<Vec<u8>>> {
    Ok(tx.query_row(
        "get_property",
        || "SELECT value FROM entry_properties WHERE target = ?1 AND key = ?2".to_string(),
        rusqlite::params![target, key],
        |row| row.get(0),
    )?)
}

pub(crate) fn set_property(
    tx: &mut Transaction,
    target: i64,
    key: &str,
    value: &[u8],
    feature: PropertyFeature,
) -> Result<()> {
    tx.execute(
        "set_property",
        || {
            "INSERT INTO entry_properties (target, key, value, feature) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (target, key) DO UPDATE SET value = excluded.value, feature = excluded.feature"
                .to_string()
        },
        rusqlite::params![target, key, value, feature.bits()],
    )?;
    Ok(())
}

pub(crate) fn remove_property(tx: &mut Transaction, target: i64, key: &str) -> Result<bool> {
    let removed = tx.execute(
        "remove_property",
        || "DELETE FROM entry_properties WHERE target = ?1 AND key = ?2".to_string(),
        rusqlite::params![target, key],
    )?;
    Ok(removed > 0)
}

/// Drop properties flagged to die with the entry's current content
pub(crate) fn remove_auto_delete_properties(tx: &mut Transaction, target: i64) -> Result<usize> {
    Ok(tx.execute(
        "remove_auto_delete_properties",
        || "DELETE FROM entry_properties WHERE target = ?1 AND (IFNULL(feature, 0) & ?2) != 0".to_string(),
        rusqlite::params![target, PropertyFeature::AUTO_DELETE_WHEN_FILE_UPDATE.bits()],
    )?)
}
