//! Transactional tracker facade
//!
//! Every mutating call runs in one Mutation transaction. Events collected
//! while it runs are emitted as a single batch after commit; a rolled-back
//! call emits nothing.

use crate::entry::{self, Property, TrackedEntry};
use crate::reconcile;
use crate::schema;
use crate::sink::{EventSink, Subscription};
use crate::{Result, TrackerError};
use fstrack_core::{path, Dirent, FileEvent, FileHandle, FileStats, PropertyFeature, TrackerConfig};
use fstrack_store::{Database, Transaction};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Persistent path tree fed by provider hints
pub struct Tracker {
    db: Database,
    sink: EventSink,
}

impl Tracker {
    /// Open (or create) the tracker database described by `config`
    pub fn open(config: &TrackerConfig) -> Result<Self> {
        config.validate().map_err(TrackerError::Config)?;

        let db = Database::open(&config.database);
        schema::initialize(&db)?;
        let sink = EventSink::new(&config.events)?;

        info!(path = %config.database.path.display(), "tracker opened");
        Ok(Self::with_parts(db, sink))
    }

    /// Assemble a tracker from an initialized database and a running sink
    pub fn with_parts(db: Database, sink: EventSink) -> Self {
        Self { db, sink }
    }

    /// Record a single observation, returning the entry id
    pub fn hint_file(&self, path: &str, handle: &FileHandle, stats: &FileStats) -> Result<i64> {
        let path = path::normalize(path)?;
        self.mutate(|tx, events| reconcile::reconcile_entry(tx, &path, handle, stats, events))
    }

    /// Record a directory and the full listing of its immediate children
    pub fn hint_directory(
        &self,
        path: &str,
        handle: &FileHandle,
        stats: &FileStats,
        contents: &[Dirent],
    ) -> Result<i64> {
        let path = path::normalize(path)?;
        if !stats.is_directory() {
            return Err(TrackerError::NotADirectory(path));
        }

        self.mutate(|tx, events| {
            let id = reconcile::reconcile_entry(tx, &path, handle, stats, events)?;
            reconcile::reconcile_children(tx, id, &path, contents, events)?;
            Ok(id)
        })
    }

    /// Remove the entry at `path` and its subtree if it still carries `handle`
    ///
    /// Returns `false` when nothing is stored there or the stored entry has
    /// already been superseded.
    pub fn hint_deleted(&self, path: &str, handle: &FileHandle) -> Result<bool> {
        let path = path::normalize(path)?;
        self.mutate(|tx, events| {
            let Some(stored) = entry::find_by_path(tx, &path)? else {
                return Ok(false);
            };
            if stored.identifier_tag.as_deref() != Some(handle.as_str()) {
                debug!(path = %path, "ignoring deletion of superseded entry");
                return Ok(false);
            }
            entry::delete_subtree(tx, &stored, events)?;
            Ok(true)
        })
    }

    /// Attach `value` under `key` to the entry, reconciling it first
    pub fn set_property(
        &self,
        path: &str,
        handle: &FileHandle,
        stats: &FileStats,
        key: &str,
        value: &[u8],
        feature: PropertyFeature,
    ) -> Result<()> {
        let path = path::normalize(path)?;
        self.mutate(|tx, events| {
            let id = reconcile::reconcile_entry(tx, &path, handle, stats, events)?;
            entry::set_property(tx, id, key, value, feature)?;
            events.push(FileEvent::property_updated(handle.clone(), path.as_str()));
            Ok(())
        })
    }

    /// Read a property; the entry is reconciled first, so this may write
    pub fn get_property(
        &self,
        path: &str,
        handle: &FileHandle,
        stats: &FileStats,
        key: &str,
    ) -> Result<Option<Vec<u8>>> {
        let path = path::normalize(path)?;
        self.mutate(|tx, events| {
            let id = reconcile::reconcile_entry(tx, &path, handle, stats, events)?;
            entry::get_property(tx, id, key)
        })
    }

    /// Remove a property, returning whether it existed
    pub fn remove_property(
        &self,
        path: &str,
        handle: &FileHandle,
        stats: &FileStats,
        key: &str,
    ) -> Result<bool> {
        let path = path::normalize(path)?;
        self.mutate(|tx, events| {
            let id = reconcile::reconcile_entry(tx, &path, handle, stats, events)?;
            let removed = entry::remove_property(tx, id, key)?;
            if removed {
                events.push(FileEvent::property_updated(handle.clone(), path.as_str()));
            }
            Ok(removed)
        })
    }

    /// Stored entry at `path`, without reconciliation
    pub fn entry(&self, path: &str) -> Result<Option<TrackedEntry>> {
        let path = path::normalize(path)?;
        self.db.query(|tx| entry::find_by_path(tx, &path))
    }

    /// Stored children of the entry at `path`, ordered by path
    pub fn children(&self, path: &str) -> Result<Vec<TrackedEntry>> {
        let path = path::normalize(path)?;
        self.db.query(|tx| match entry::find_by_path(tx, &path)? {
            Some(parent) => entry::children_of(tx, parent.id),
            None => Ok(Vec::new()),
        })
    }

    /// All stored properties of the entry at `path`, ordered by key
    pub fn properties(&self, path: &str) -> Result<Vec<Property>> {
        let path = path::normalize(path)?;
        self.db.query(|tx| match entry::find_by_path(tx, &path)? {
            Some(target) => entry::properties_of(tx, target.id),
            None => Ok(Vec::new()),
        })
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[FileEvent]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.sink.subscribe(listener)
    }

    pub fn subscribe_async<F, Fut>(&self, listener: F) -> Subscription
    where
        F: Fn(Arc<[FileEvent]>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.sink.subscribe_async(listener)
    }

    /// Block until every batch emitted so far has reached the listeners
    pub fn wait_for_events(&self) {
        self.sink.wait_complete();
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Drain pending events and close the connection pools
    pub fn shutdown(&self) {
        self.sink.shutdown();
        self.db.dispose();
        info!("tracker shut down");
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Transaction, &mut Vec<FileEvent>) -> Result<T>,
    ) -> Result<T> {
        let mut events = Vec::new();
        let value = self.db.mutate(|tx| f(tx, &mut events))?;
        self.publish(events);
        Ok(value)
    }

    fn publish(&self, events: Vec<FileEvent>) {
        if events.is_empty() {
            return;
        }
        let count = events.len();
        if let Err(e) = self.sink.emit(events) {
            warn!(count, "dropped event batch: {}", e);
        }
    }
}
