//! Shared fixtures for tracker integration tests

use fstrack_core::{FileEvent, FileEventKind, FileHandle, FileStats, TrackerConfig};
use fstrack_tracker::{Subscription, Tracker};
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

/// A tracker on a fresh on-disk database, recording every dispatched event
pub struct TestTracker {
    pub tracker: Tracker,
    events: Arc<Mutex<Vec<FileEvent>>>,
    _subscription: Subscription,
    _dir: TempDir,
}

impl TestTracker {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let config = TrackerConfig::with_database_path(dir.path().join("tracker.db"));
        Self::with_config(dir, config)
    }

    pub fn with_config(dir: TempDir, config: TrackerConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let tracker = Tracker::open(&config).expect("open tracker");
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscription = tracker.subscribe(move |batch| {
            sink.lock().extend_from_slice(batch);
            Ok(())
        });

        Self {
            tracker,
            events,
            _subscription: subscription,
            _dir: dir,
        }
    }

    /// Events dispatched since the last call, sorted for order-free comparison
    pub fn take_events(&self) -> Vec<(FileEventKind, String)> {
        self.tracker.wait_for_events();
        let mut events: Vec<_> = self
            .events
            .lock()
            .drain(..)
            .map(|e| (e.kind, e.path))
            .collect();
        events.sort();
        events
    }
}

/// Handle with the given identifier tag
pub fn handle(identifier: &str) -> FileHandle {
    FileHandle::from(identifier)
}

pub fn file(content: &str) -> FileStats {
    FileStats::file(content)
}

pub fn dir(content: &str) -> FileStats {
    FileStats::directory(content)
}

pub fn created(path: &str) -> (FileEventKind, String) {
    (FileEventKind::Created, path.to_string())
}

pub fn changed(path: &str) -> (FileEventKind, String) {
    (FileEventKind::Changed, path.to_string())
}

pub fn deleted(path: &str) -> (FileEventKind, String) {
    (FileEventKind::Deleted, path.to_string())
}

pub fn property_updated(path: &str) -> (FileEventKind, String) {
    (FileEventKind::PropertyUpdated, path.to_string())
}
