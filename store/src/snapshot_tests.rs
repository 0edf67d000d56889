// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fs::create_dir;

use fs::{ContentType, DirectoryListing};
use hashing::{Digest, EMPTY_FINGERPRINT, EMPTY_LISTING_FINGERPRINT};
use task_executor::Executor;
use testutil::make_file;

use crate::{Location, scan_directory, scan_directory_sync};

#[test]
fn empty_directory() {
    let root = tempfile::TempDir::new().unwrap();
    let snapshot = scan_directory_sync(root.path()).unwrap();

    assert_eq!(ContentType::json_v1(), snapshot.root.content_type);
    assert_eq!(
        Digest::Sha256(EMPTY_LISTING_FINGERPRINT),
        snapshot.root.digest
    );

    let locations = snapshot
        .repository
        .find(&snapshot.root.digest.to_unknown())
        .unwrap();
    match &locations[0] {
        Location::InMemory { content } => assert_eq!(&b"{}"[..], content),
        other => panic!("Want the serialized listing in memory, got {other:?}"),
    }
}

#[test]
fn single_file() {
    let root = tempfile::TempDir::new().unwrap();
    make_file(&root.path().join("a.txt"), b"hello", 0o600);

    let snapshot = scan_directory_sync(root.path()).unwrap();

    let blob_digest = Digest::of_bytes(b"hello");
    assert_eq!(
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
        blob_digest.to_hex()
    );
    let locations = snapshot.repository.find(&blob_digest.to_unknown()).unwrap();
    match &locations[0] {
        Location::OnDisk { path, size } => {
            assert_eq!(root.path().join("a.txt"), *path);
            assert_eq!(5, *size);
        }
        other => panic!("Want an on-disk location, got {other:?}"),
    }

    let listing = listing_of(&snapshot);
    let (name, reference) = listing.entries().next().unwrap();
    assert_eq!("a.txt", name);
    assert_eq!(ContentType::blob(), reference.content_type);
    assert_eq!(blob_digest, reference.digest);
}

#[test]
fn zero_byte_file() {
    let root = tempfile::TempDir::new().unwrap();
    make_file(&root.path().join("empty"), b"", 0o600);

    let snapshot = scan_directory_sync(root.path()).unwrap();
    let locations = snapshot
        .repository
        .find(&Digest::Sha256(EMPTY_FINGERPRINT).to_unknown())
        .unwrap();
    assert_eq!(0, locations[0].size());
}

#[test]
fn nested_directories() {
    let root = tempfile::TempDir::new().unwrap();
    make_file(&root.path().join("a"), b"outer", 0o600);
    create_dir(root.path().join("sub")).unwrap();
    make_file(&root.path().join("sub/b"), b"inner", 0o600);

    let snapshot = scan_directory_sync(root.path()).unwrap();

    let root_listing = listing_of(&snapshot);
    assert_eq!(2, root_listing.len());
    let sub_reference = root_listing
        .entries()
        .find(|(name, _)| *name == "sub")
        .map(|(_, reference)| reference.clone())
        .unwrap();
    assert_eq!(ContentType::json_v1(), sub_reference.content_type);

    // The sub-repository was merged up: both the inner blob and the inner listing resolve.
    assert!(snapshot
        .repository
        .find(&Digest::of_bytes(b"inner").to_unknown())
        .is_some());
    assert!(snapshot
        .repository
        .find(&sub_reference.digest.to_unknown())
        .is_some());
}

#[test]
fn scans_are_deterministic() {
    let root = tempfile::TempDir::new().unwrap();
    make_file(&root.path().join("a"), b"x", 0o600);
    make_file(&root.path().join("b"), b"y", 0o600);
    create_dir(root.path().join("sub")).unwrap();
    make_file(&root.path().join("sub/c"), b"z", 0o600);

    let first = scan_directory_sync(root.path()).unwrap();
    let second = scan_directory_sync(root.path()).unwrap();
    assert_eq!(first.root, second.root);
    assert_eq!(
        serialized_listing_bytes(&first),
        serialized_listing_bytes(&second)
    );
}

#[test]
fn non_regular_entries_are_ignored() {
    let root = tempfile::TempDir::new().unwrap();
    make_file(&root.path().join("a"), b"hello", 0o600);
    #[cfg(unix)]
    std::os::unix::fs::symlink("a", root.path().join("link")).unwrap();

    let snapshot = scan_directory_sync(root.path()).unwrap();
    let listing = listing_of(&snapshot);
    assert_eq!(1, listing.len());
}

#[test]
fn missing_root_propagates() {
    let root = tempfile::TempDir::new().unwrap();
    scan_directory_sync(&root.path().join("does-not-exist")).expect_err("Want err");
}

#[tokio::test]
async fn scan_on_the_blocking_pool() {
    let root = tempfile::TempDir::new().unwrap();
    make_file(&root.path().join("a.txt"), b"hello", 0o600);

    let executor = Executor::new();
    let snapshot = scan_directory(&executor, root.path().to_owned())
        .await
        .unwrap();
    assert!(snapshot
        .repository
        .find(&Digest::of_bytes(b"hello").to_unknown())
        .is_some());
}

fn serialized_listing_bytes(snapshot: &crate::Snapshot) -> bytes::Bytes {
    let locations = snapshot
        .repository
        .find(&snapshot.root.digest.to_unknown())
        .unwrap();
    match &locations[0] {
        Location::InMemory { content } => content.clone(),
        other => panic!("Want the serialized listing in memory, got {other:?}"),
    }
}

fn listing_of(snapshot: &crate::Snapshot) -> DirectoryListing {
    DirectoryListing::deserialize_json(&serialized_listing_bytes(snapshot)).unwrap()
}
