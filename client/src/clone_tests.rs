// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::fs::create_dir;
use std::net::{Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use hashing::{Digest, UnknownDigest};
use server::Server;
use store::scan_directory_sync;
use task_executor::Executor;
use testutil::make_file;

use fs::{ContentType, DirectoryListing, TypedReference};

use crate::{
    CloneError, HttpStorageReader, LinearFile, LocalDirectory, ServiceError, StorageReader,
    clone_directory,
};

async fn serve(root: &std::path::Path) -> (Server, HttpStorageReader, TypedReference) {
    let snapshot = scan_directory_sync(root).unwrap();
    let root_reference = snapshot.root.clone();
    let server = Server::new(Executor::new(), 0, snapshot).await.unwrap();
    let reader = HttpStorageReader::new(SocketAddr::from((Ipv4Addr::LOCALHOST, server.port())))
        .unwrap();
    (server, reader, root_reference)
}

#[tokio::test]
async fn clone_reconstructs_the_tree() {
    let source = tempfile::TempDir::new().unwrap();
    make_file(&source.path().join("a.txt"), b"hello", 0o600);
    create_dir(source.path().join("d")).unwrap();
    make_file(&source.path().join("d/f"), b"x", 0o600);
    let (_server, reader, root_reference) = serve(source.path()).await;

    let destination = tempfile::TempDir::new().unwrap();
    clone_directory(
        &reader,
        &root_reference.digest.to_unknown(),
        &LocalDirectory::new(destination.path().to_owned()),
    )
    .await
    .unwrap();

    assert_eq!(
        b"hello".to_vec(),
        std::fs::read(destination.path().join("a.txt")).unwrap()
    );
    assert_eq!(
        b"x".to_vec(),
        std::fs::read(destination.path().join("d/f")).unwrap()
    );

    // Clone inverts scan: rescanning the clone reproduces the source's root digest.
    let rescanned = scan_directory_sync(destination.path()).unwrap();
    assert_eq!(root_reference, rescanned.root);
}

#[tokio::test]
async fn clone_of_an_empty_tree() {
    let source = tempfile::TempDir::new().unwrap();
    let (_server, reader, root_reference) = serve(source.path()).await;

    let destination = tempfile::TempDir::new().unwrap();
    let clone_root = destination.path().join("fresh");
    clone_directory(
        &reader,
        &root_reference.digest.to_unknown(),
        &LocalDirectory::new(clone_root.clone()),
    )
    .await
    .unwrap();

    // The destination was created, and is empty.
    assert_eq!(0, clone_root.read_dir().unwrap().count());
}

#[tokio::test]
async fn clone_creates_missing_destination_parents() {
    let source = tempfile::TempDir::new().unwrap();
    make_file(&source.path().join("a"), b"hello", 0o600);
    let (_server, reader, root_reference) = serve(source.path()).await;

    let destination = tempfile::TempDir::new().unwrap();
    let nested = destination.path().join("x/y/z");
    clone_directory(
        &reader,
        &root_reference.digest.to_unknown(),
        &LocalDirectory::new(nested.clone()),
    )
    .await
    .unwrap();
    assert_eq!(b"hello".to_vec(), std::fs::read(nested.join("a")).unwrap());
}

///
/// An in-memory StorageReader for driving the clone error paths. `announced_sizes` lets a test
/// lie about an object's size relative to what its stream will actually produce.
///
struct StubReader {
    objects: HashMap<UnknownDigest, Bytes>,
    announced_sizes: HashMap<UnknownDigest, u64>,
}

impl StubReader {
    fn new() -> StubReader {
        StubReader {
            objects: HashMap::new(),
            announced_sizes: HashMap::new(),
        }
    }

    fn insert(&mut self, content: &[u8]) -> UnknownDigest {
        let digest = Digest::of_bytes(content).to_unknown();
        self.objects
            .insert(digest.clone(), Bytes::copy_from_slice(content));
        digest
    }
}

#[async_trait]
impl StorageReader for StubReader {
    async fn open(&self, digest: &UnknownDigest) -> Result<LinearFile, ServiceError> {
        let bytes = self
            .objects
            .get(digest)
            .cloned()
            .ok_or(ServiceError::FileNotFound)?;
        let size = self
            .announced_sizes
            .get(digest)
            .copied()
            .unwrap_or(bytes.len() as u64);
        Ok(LinearFile {
            size,
            content: futures::stream::iter(vec![Ok(bytes)]).boxed(),
        })
    }

    async fn size(&self, digest: &UnknownDigest) -> Result<u64, ServiceError> {
        let bytes = self
            .objects
            .get(digest)
            .ok_or(ServiceError::FileNotFound)?;
        Ok(self
            .announced_sizes
            .get(digest)
            .copied()
            .unwrap_or(bytes.len() as u64))
    }
}

fn single_entry_listing(name: &str, reference: TypedReference) -> Vec<u8> {
    let mut listing = DirectoryListing::new();
    listing.insert(name.to_owned(), reference).unwrap();
    listing.serialize_json()
}

#[tokio::test]
async fn unknown_entry_type_aborts_the_clone() {
    let mut reader = StubReader::new();
    let blob_digest = reader.insert(b"payload");
    let blob_digest = Digest::from_algorithm("SHA256", blob_digest.as_bytes()).unwrap();
    let listing = single_entry_listing(
        "entry",
        TypedReference::new(ContentType::new("symlink_v2"), blob_digest),
    );
    let root = reader.insert(&listing);

    let destination = tempfile::TempDir::new().unwrap();
    match clone_directory(
        &reader,
        &root,
        &LocalDirectory::new(destination.path().to_owned()),
    )
    .await
    {
        Err(CloneError::UnknownEntryType(entry_type)) => assert_eq!("symlink_v2", entry_type),
        other => panic!("Want UnknownEntryType, got {other:?}"),
    }
}

#[tokio::test]
async fn over_long_content_aborts_the_clone() {
    let mut reader = StubReader::new();
    let blob_digest = reader.insert(b"five!");
    // The object announces a single byte but streams five.
    reader.announced_sizes.insert(blob_digest.clone(), 1);
    let blob_digest = Digest::from_algorithm("SHA256", blob_digest.as_bytes()).unwrap();
    let listing = single_entry_listing("entry", TypedReference::blob(blob_digest));
    let root = reader.insert(&listing);

    let destination = tempfile::TempDir::new().unwrap();
    match clone_directory(
        &reader,
        &root,
        &LocalDirectory::new(destination.path().to_owned()),
    )
    .await
    {
        Err(CloneError::ReceivedTooMuch { expected: 1, received: 5 }) => {}
        other => panic!("Want ReceivedTooMuch, got {other:?}"),
    }
}

#[tokio::test]
async fn short_content_aborts_the_clone() {
    let mut reader = StubReader::new();
    let blob_digest = reader.insert(b"five!");
    // The object announces ten bytes but the stream ends after five.
    reader.announced_sizes.insert(blob_digest.clone(), 10);
    let blob_digest = Digest::from_algorithm("SHA256", blob_digest.as_bytes()).unwrap();
    let listing = single_entry_listing("entry", TypedReference::blob(blob_digest));
    let root = reader.insert(&listing);

    let destination = tempfile::TempDir::new().unwrap();
    match clone_directory(
        &reader,
        &root,
        &LocalDirectory::new(destination.path().to_owned()),
    )
    .await
    {
        Err(CloneError::TruncatedContent { expected: 10, received: 5 }) => {}
        other => panic!("Want TruncatedContent, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_blob_aborts_the_clone() {
    let mut reader = StubReader::new();
    let absent = Digest::of_bytes(b"never stored");
    let listing = single_entry_listing("entry", TypedReference::blob(absent));
    let root = reader.insert(&listing);

    let destination = tempfile::TempDir::new().unwrap();
    match clone_directory(
        &reader,
        &root,
        &LocalDirectory::new(destination.path().to_owned()),
    )
    .await
    {
        Err(CloneError::Service(ServiceError::FileNotFound)) => {}
        other => panic!("Want FileNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn unparseable_root_listing_aborts_the_clone() {
    let mut reader = StubReader::new();
    let root = reader.insert(b"this is not json");

    let destination = tempfile::TempDir::new().unwrap();
    match clone_directory(
        &reader,
        &root,
        &LocalDirectory::new(destination.path().to_owned()),
    )
    .await
    {
        Err(CloneError::Listing(_)) => {}
        other => panic!("Want a listing error, got {other:?}"),
    }
}
