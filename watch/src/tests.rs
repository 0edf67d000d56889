// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashSet;
use std::fs::create_dir;
use std::path::{Path, PathBuf};
use std::time::Duration;

use task_executor::Executor;
use testutil::{append_to_existing_file, make_file};

use crate::{PathEvent, PathEventKind, RecursiveDirectoryWatcher, WatchError};

fn watcher_on(root: &Path) -> RecursiveDirectoryWatcher {
    RecursiveDirectoryWatcher::new(Executor::new(), root.to_owned())
        .expect("Couldn't create the watcher")
}

///
/// Collects batches until `predicate` is satisfied by everything seen so far, panicking if that
/// takes longer than a few seconds.
///
async fn collect_until(
    watcher: &RecursiveDirectoryWatcher,
    predicate: impl Fn(&[PathEvent]) -> bool,
) -> Vec<PathEvent> {
    let mut seen: Vec<PathEvent> = Vec::new();
    for _ in 0..100 {
        if predicate(&seen) {
            return seen;
        }
        let batch = tokio::time::timeout(Duration::from_secs(5), watcher.next_batch())
            .await
            .expect("Timed out waiting for a notification batch")
            .expect("Want an event batch");
        seen.extend(batch);
    }
    panic!("Didn't observe the expected events; saw {seen:?}");
}

fn added_paths(events: &[PathEvent]) -> HashSet<PathBuf> {
    events
        .iter()
        .filter(|event| event.kind == PathEventKind::Add)
        .map(|event| event.path.clone())
        .collect()
}

#[tokio::test]
async fn initial_scan_synthesizes_adds() {
    let root = tempfile::TempDir::new().unwrap();
    make_file(&root.path().join("a"), b"contents", 0o600);
    create_dir(root.path().join("sub")).unwrap();
    make_file(&root.path().join("sub/b"), b"contents", 0o600);

    let watcher = watcher_on(root.path());
    let events = collect_until(&watcher, |seen| {
        let added = added_paths(seen);
        ["a", "sub", "sub/b"]
            .iter()
            .all(|path| added.contains(Path::new(path)))
    })
    .await;

    let directory_flag = |events: &[PathEvent], path: &str| {
        events
            .iter()
            .find(|event| event.path == Path::new(path) && event.kind == PathEventKind::Add)
            .map(|event| event.is_directory)
    };
    assert_eq!(Some(false), directory_flag(&events, "a"));
    assert_eq!(Some(true), directory_flag(&events, "sub"));
    assert_eq!(Some(false), directory_flag(&events, "sub/b"));
}

#[tokio::test]
async fn empty_root_scans_quietly() {
    let root = tempfile::TempDir::new().unwrap();
    let watcher = watcher_on(root.path());

    // Nothing exists yet, so nothing is delivered until something happens.
    make_file(&root.path().join("late"), b"contents", 0o600);
    collect_until(&watcher, |seen| {
        added_paths(seen).contains(Path::new("late"))
    })
    .await;
}

#[tokio::test]
async fn live_file_creation_is_observed() {
    let root = tempfile::TempDir::new().unwrap();
    make_file(&root.path().join("existing"), b"contents", 0o600);
    let watcher = watcher_on(root.path());
    collect_until(&watcher, |seen| {
        added_paths(seen).contains(Path::new("existing"))
    })
    .await;

    make_file(&root.path().join("created"), b"contents", 0o600);
    collect_until(&watcher, |seen| {
        added_paths(seen).contains(Path::new("created"))
    })
    .await;
}

#[tokio::test]
async fn live_change_is_observed() {
    let root = tempfile::TempDir::new().unwrap();
    let file_path = root.path().join("watch_me.txt");
    make_file(&file_path, b"contents", 0o600);
    let watcher = watcher_on(root.path());
    collect_until(&watcher, |seen| {
        added_paths(seen).contains(Path::new("watch_me.txt"))
    })
    .await;

    append_to_existing_file(&file_path, b"stnetnoc");
    collect_until(&watcher, |seen| {
        seen.iter().any(|event| {
            event.path == Path::new("watch_me.txt")
                && matches!(
                    event.kind,
                    PathEventKind::ChangeContent | PathEventKind::ChangeContentOrMetadata
                )
        })
    })
    .await;
}

#[tokio::test]
async fn new_subdirectory_is_watched_recursively() {
    let root = tempfile::TempDir::new().unwrap();
    let watcher = watcher_on(root.path());

    create_dir(root.path().join("later")).unwrap();
    collect_until(&watcher, |seen| {
        added_paths(seen).contains(Path::new("later"))
    })
    .await;

    // The new directory's watch and scan were installed by the live event, so content created
    // inside it is observed too.
    make_file(&root.path().join("later/inner"), b"contents", 0o600);
    collect_until(&watcher, |seen| {
        added_paths(seen).contains(Path::new("later/inner"))
    })
    .await;
}

#[tokio::test]
async fn removal_is_observed() {
    let root = tempfile::TempDir::new().unwrap();
    let file_path = root.path().join("doomed");
    make_file(&file_path, b"contents", 0o600);
    let watcher = watcher_on(root.path());
    collect_until(&watcher, |seen| {
        added_paths(seen).contains(Path::new("doomed"))
    })
    .await;

    std::fs::remove_file(&file_path).unwrap();
    collect_until(&watcher, |seen| {
        seen.iter().any(|event| {
            event.path == Path::new("doomed") && event.kind == PathEventKind::Remove
        })
    })
    .await;
}

#[tokio::test]
async fn shutdown_cancels_a_parked_receiver() {
    let root = tempfile::TempDir::new().unwrap();
    let watcher = watcher_on(root.path());

    let (batch, _) = tokio::join!(watcher.next_batch(), async {
        // Give the receiver time to park before shutting the coordinator down.
        tokio::time::sleep(Duration::from_millis(100)).await;
        watcher.shutdown();
    });
    assert_eq!(Err(WatchError::Cancelled), batch);
}

#[tokio::test]
async fn next_batch_after_shutdown_is_cancelled() {
    let root = tempfile::TempDir::new().unwrap();
    let watcher = watcher_on(root.path());
    watcher.shutdown();
    // The coordinator may still be draining; once it is gone every receive cancels.
    for _ in 0..100 {
        if watcher.next_batch().await == Err(WatchError::Cancelled) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Want Cancelled after shutdown");
}

#[tokio::test]
async fn missing_root_is_an_error() {
    let root = tempfile::TempDir::new().unwrap();
    RecursiveDirectoryWatcher::new(Executor::new(), root.path().join("nope"))
        .expect_err("Want err");
}
