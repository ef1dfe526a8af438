//! Hint path benchmarks for fstrack-tracker

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fstrack_core::{Dirent, FileHandle, FileStats, TrackerConfig};
use fstrack_tracker::Tracker;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

fn open_tracker() -> (TempDir, Tracker) {
    let dir = TempDir::new().unwrap();
    let config = TrackerConfig::with_database_path(dir.path().join("tracker.db"));
    let tracker = Tracker::open(&config).unwrap();
    (dir, tracker)
}

fn listing(size: usize, generation: u64) -> Vec<Dirent> {
    (0..size)
        .map(|i| {
            Dirent::new(
                format!("file{i:05}"),
                format!("id-{i}"),
                FileStats::file(format!("{generation}")),
            )
        })
        .collect()
}

fn bench_hint_file(c: &mut Criterion) {
    let (_dir, tracker) = open_tracker();
    let handle = FileHandle::from("bench");
    let stats = FileStats::file("1");
    tracker.hint_file("/bench/file", &handle, &stats).unwrap();

    c.bench_function("hint_file_unchanged", |b| {
        b.iter(|| black_box(tracker.hint_file("/bench/file", &handle, &stats).unwrap()));
    });

    let counter = AtomicU64::new(0);
    c.bench_function("hint_file_content_change", |b| {
        b.iter(|| {
            let tag = counter.fetch_add(1, Ordering::Relaxed).to_string();
            black_box(
                tracker
                    .hint_file("/bench/file", &handle, &FileStats::file(tag))
                    .unwrap(),
            )
        });
    });

    let counter = AtomicU64::new(0);
    c.bench_function("hint_file_deep_create", |b| {
        b.iter(|| {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            let path = format!("/deep/{n}/a/b/c/d/file");
            black_box(
                tracker
                    .hint_file(&path, &FileHandle::from(path.as_str()), &stats)
                    .unwrap(),
            )
        });
    });

    tracker.wait_for_events();
}

fn bench_hint_directory(c: &mut Criterion) {
    let mut group = c.benchmark_group("hint_directory");

    for size in [10usize, 100, 1000] {
        let (_dir, tracker) = open_tracker();
        let handle = FileHandle::from("dir");
        let stats = FileStats::directory("1");
        let unchanged = listing(size, 0);
        tracker
            .hint_directory("/dir", &handle, &stats, &unchanged)
            .unwrap();

        group.bench_with_input(BenchmarkId::new("unchanged", size), &unchanged, |b, contents| {
            b.iter(|| black_box(tracker.hint_directory("/dir", &handle, &stats, contents).unwrap()));
        });

        let generation = AtomicU64::new(1);
        group.bench_function(BenchmarkId::new("all_changed", size), |b| {
            b.iter(|| {
                let contents = listing(size, generation.fetch_add(1, Ordering::Relaxed));
                black_box(tracker.hint_directory("/dir", &handle, &stats, &contents).unwrap())
            });
        });

        tracker.wait_for_events();
    }

    group.finish();
}

criterion_group!(benches, bench_hint_file, bench_hint_directory);
criterion_main!(benches);
