//! Reconciliation of observed entries against the stored path tree
//!
//! Per-entry rules, given an observed `(path, handle, stats)`:
//!
//! 1. no stored row: materialize ancestors, insert, `Created`
//! 2. directory flag differs: delete subtree, insert, `Deleted` + `Created`
//! 3. stored row is a placeholder: set tags in place, `Created`
//! 4. identifier differs: delete subtree, insert, `Deleted` + `Created`
//! 5. content tag differs: update in place, drop auto-delete properties, `Changed`
//! 6. otherwise nothing
//!
//! Every function appends to `events`; the caller emits them after commit.

use crate::entry::{self, TrackedEntry};
use crate::{Result, TrackerError};
use ahash::{AHashMap, AHashSet};
use fstrack_core::{path, Dirent, FileEvent, FileHandle, FileStats};
use fstrack_store::Transaction;
use tracing::debug;

/// Apply the per-entry rules to `path`, returning the entry id
pub(crate) fn reconcile_entry(
    tx: &mut Transaction,
    path: &str,
    handle: &FileHandle,
    stats: &FileStats,
    events: &mut Vec<FileEvent>,
) -> Result<i64> {
    match entry::find_by_path(tx, path)? {
        None => materialize(tx, path, handle, stats, events),
        Some(stored) => reconcile_existing(tx, &stored, handle, stats, events),
    }
}

/// Rules 2-6 for a row known to exist
pub(crate) fn reconcile_existing(
    tx: &mut Transaction,
    stored: &TrackedEntry,
    handle: &FileHandle,
    stats: &FileStats,
    events: &mut Vec<FileEvent>,
) -> Result<i64> {
    if stored.is_directory != stats.is_directory() {
        if stored.is_root() {
            return Err(TrackerError::RootNotDirectory);
        }
        debug!(path = %stored.path, "entry type changed");
        return replace(tx, stored, handle, stats, events);
    }

    match stored.identifier_tag.as_deref() {
        None => {
            debug!(path = %stored.path, "placeholder observed");
            entry::set_tags(tx, stored.id, Some(handle.as_str()), Some(&stats.content_tag))?;
            events.push(FileEvent::created(handle.clone(), stored.path.as_str()));
            Ok(stored.id)
        }
        Some(identifier) if identifier != handle.as_str() => {
            debug!(path = %stored.path, "entry identity changed");
            replace(tx, stored, handle, stats, events)
        }
        Some(_) if stored.content_tag.as_deref() != Some(stats.content_tag.as_str()) => {
            entry::set_content_tag(tx, stored.id, &stats.content_tag)?;
            let dropped = entry::remove_auto_delete_properties(tx, stored.id)?;
            debug!(path = %stored.path, dropped, "entry content changed");
            events.push(FileEvent::changed(handle.clone(), stored.path.as_str()));
            Ok(stored.id)
        }
        Some(_) => Ok(stored.id),
    }
}

/// Reconcile a full listing of the directory `dir_id` at `dir_path`
///
/// Removed children are deleted before added ones are inserted so a child
/// that changed identity never collides with its old row.
pub(crate) fn reconcile_children(
    tx: &mut Transaction,
    dir_id: i64,
    dir_path: &str,
    contents: &[Dirent],
    events: &mut Vec<FileEvent>,
) -> Result<()> {
    let stored = entry::children_of(tx, dir_id)?;

    let mut observed_paths = AHashSet::with_capacity(contents.len());
    let mut observed = Vec::with_capacity(contents.len());
    for dirent in contents {
        path::validate_name(&dirent.name)?;
        let child_path = path::join(dir_path, &dirent.name);
        if observed_paths.insert(child_path.clone()) {
            observed.push((child_path, dirent));
        }
    }

    let stored_by_path: AHashMap<&str, &TrackedEntry> =
        stored.iter().map(|e| (e.path.as_str(), e)).collect();

    for removed in stored.iter().filter(|e| !observed_paths.contains(&e.path)) {
        entry::delete_subtree(tx, removed, events)?;
    }

    for (child_path, dirent) in &observed {
        if stored_by_path.contains_key(child_path.as_str()) {
            continue;
        }
        entry::insert(
            tx,
            child_path,
            dir_id,
            dirent.stats.is_directory(),
            Some(dirent.handle.as_str()),
            Some(&dirent.stats.content_tag),
        )?;
        events.push(FileEvent::created(dirent.handle.clone(), child_path.as_str()));
    }

    for (child_path, dirent) in &observed {
        if let Some(kept) = stored_by_path.get(child_path.as_str()) {
            reconcile_existing(tx, kept, &dirent.handle, &dirent.stats, events)?;
        }
    }

    debug!(
        path = dir_path,
        stored = stored.len(),
        observed = observed.len(),
        "directory reconciled"
    );
    Ok(())
}

/// Delete `stored` with its subtree and insert the observed entry in its place
fn replace(
    tx: &mut Transaction,
    stored: &TrackedEntry,
    handle: &FileHandle,
    stats: &FileStats,
    events: &mut Vec<FileEvent>,
) -> Result<i64> {
    entry::delete_subtree(tx, stored, events)?;

    if stored.is_root() {
        entry::set_tags(tx, stored.id, Some(handle.as_str()), Some(&stats.content_tag))?;
        events.push(FileEvent::created(handle.clone(), stored.path.as_str()));
        return Ok(stored.id);
    }

    let parent = stored
        .parent
        .ok_or_else(|| TrackerError::Inconsistent(format!("{} has no parent", stored.path)))?;
    insert_observed(tx, &stored.path, parent, handle, stats, events)
}

/// Rule 1: create missing ancestors, then the entry itself
fn materialize(
    tx: &mut Transaction,
    path: &str,
    handle: &FileHandle,
    stats: &FileStats,
    events: &mut Vec<FileEvent>,
) -> Result<i64> {
    let parent = ensure_ancestors(tx, path, events)?;
    insert_observed(tx, path, parent, handle, stats, events)
}

fn insert_observed(
    tx: &mut Transaction,
    path: &str,
    parent: i64,
    handle: &FileHandle,
    stats: &FileStats,
    events: &mut Vec<FileEvent>,
) -> Result<i64> {
    let id = entry::insert(
        tx,
        path,
        parent,
        stats.is_directory(),
        Some(handle.as_str()),
        Some(&stats.content_tag),
    )?;
    events.push(FileEvent::created(handle.clone(), path));
    Ok(id)
}

/// Make sure every ancestor of `path` exists as a directory, returning the
/// parent's id
///
/// Walks up from the deepest ancestor to the first stored row. A non-directory
/// found there is deleted with its subtree and replaced by a placeholder;
/// every missing ancestor below it becomes a placeholder directory.
fn ensure_ancestors(
    tx: &mut Transaction,
    path: &str,
    events: &mut Vec<FileEvent>,
) -> Result<i64> {
    let ancestors = path::ancestors(path);

    let mut found = None;
    for (depth, ancestor) in ancestors.iter().enumerate().rev() {
        if let Some(stored) = entry::find_by_path(tx, ancestor)? {
            found = Some((depth, stored));
            break;
        }
    }
    let (depth, existing) =
        found.ok_or_else(|| TrackerError::Inconsistent("root entry is missing".to_string()))?;

    let mut parent = if existing.is_directory {
        existing.id
    } else {
        debug!(path = %existing.path, "file blocks ancestor path");
        let grandparent = existing.parent.ok_or_else(|| {
            TrackerError::Inconsistent(format!("{} has no parent", existing.path))
        })?;
        entry::delete_subtree(tx, &existing, events)?;
        entry::insert(tx, &existing.path, grandparent, true, None, None)?
    };

    for ancestor in &ancestors[depth + 1..] {
        parent = entry::insert(tx, ancestor, parent, true, None, None)?;
    }
    Ok(parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use fstrack_core::{DatabaseConfig, FileEventKind};
    use fstrack_store::Database;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&DatabaseConfig {
            path: dir.path().join("tracker.db"),
            ..DatabaseConfig::default()
        });
        schema::initialize(&db).unwrap();
        (dir, db)
    }

    fn summary(events: &[FileEvent]) -> Vec<(FileEventKind, &str)> {
        let mut out: Vec<_> = events.iter().map(|e| (e.kind, e.path.as_str())).collect();
        out.sort();
        out
    }

    #[test]
    fn test_file_blocking_ancestor_is_replaced_by_placeholder() {
        let (_dir, db) = setup();
        db.mutate(|tx| -> Result<()> {
            let mut events = Vec::new();
            reconcile_entry(tx, "/a", &FileHandle::from("a"), &FileStats::file("1"), &mut events)?;
            events.clear();

            reconcile_entry(
                tx,
                "/a/b/c",
                &FileHandle::from("c"),
                &FileStats::file("1"),
                &mut events,
            )?;
            assert_eq!(
                summary(&events),
                vec![(FileEventKind::Created, "/a/b/c"), (FileEventKind::Deleted, "/a")]
            );

            let a = entry::find_by_path(tx, "/a")?.unwrap();
            assert!(a.is_directory);
            assert!(a.is_placeholder());
            let b = entry::find_by_path(tx, "/a/b")?.unwrap();
            assert_eq!(b.parent, Some(a.id));
            assert!(b.is_placeholder());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_placeholder_materializes_once() {
        let (_dir, db) = setup();
        db.mutate(|tx| -> Result<()> {
            let mut events = Vec::new();
            let handle = FileHandle::from("x");
            reconcile_entry(tx, "/p/x", &handle, &FileStats::file("1"), &mut events)?;
            events.clear();

            let p = FileHandle::from("p");
            let stats = FileStats::directory("1");
            reconcile_entry(tx, "/p", &p, &stats, &mut events)?;
            reconcile_entry(tx, "/p", &p, &stats, &mut events)?;
            assert_eq!(summary(&events), vec![(FileEventKind::Created, "/p")]);

            // the child survives materialization of its parent
            assert!(entry::find_by_path(tx, "/p/x")?.is_some());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_children_identity_change_at_same_path() {
        let (_dir, db) = setup();
        db.mutate(|tx| -> Result<()> {
            let mut events = Vec::new();
            let dir = reconcile_entry(
                tx,
                "/d",
                &FileHandle::from("d"),
                &FileStats::directory("1"),
                &mut events,
            )?;
            let listing = [
                Dirent::new("same", "s", FileStats::file("1")),
                Dirent::new("swap", "old", FileStats::file("1")),
                Dirent::new("gone", "g", FileStats::file("1")),
            ];
            reconcile_children(tx, dir, "/d", &listing, &mut events)?;
            events.clear();

            let listing = [
                Dirent::new("same", "s", FileStats::file("1")),
                Dirent::new("swap", "new", FileStats::file("1")),
                Dirent::new("fresh", "f", FileStats::file("1")),
            ];
            reconcile_children(tx, dir, "/d", &listing, &mut events)?;
            assert_eq!(
                summary(&events),
                vec![
                    (FileEventKind::Created, "/d/fresh"),
                    (FileEventKind::Created, "/d/swap"),
                    (FileEventKind::Deleted, "/d/gone"),
                    (FileEventKind::Deleted, "/d/swap"),
                ]
            );

            let swap = entry::find_by_path(tx, "/d/swap")?.unwrap();
            assert_eq!(swap.identifier_tag.as_deref(), Some("new"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_duplicate_names_are_reconciled_once() {
        let (_dir, db) = setup();
        db.mutate(|tx| -> Result<()> {
            let mut events = Vec::new();
            let listing = [
                Dirent::new("x", "1", FileStats::file("1")),
                Dirent::new("x", "2", FileStats::file("1")),
            ];
            reconcile_children(tx, entry::ROOT_ID, "/", &listing, &mut events)?;
            assert_eq!(summary(&events), vec![(FileEventKind::Created, "/x")]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_invalid_child_name_is_rejected() {
        let (_dir, db) = setup();
        let err = db
            .mutate(|tx| {
                let listing = [Dirent::new("..", "1", FileStats::file("1"))];
                reconcile_children(tx, entry::ROOT_ID, "/", &listing, &mut Vec::new())
            })
            .unwrap_err();
        assert!(matches!(err, TrackerError::Path(_)));
    }
}
