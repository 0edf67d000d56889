// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::{BoxFuture, FutureExt};
use hashing::UnknownDigest;
use log::debug;
use tokio::io::AsyncWriteExt;

use fs::{ContentType, DirectoryListing, ListingError};

use crate::{LinearFile, ServiceError, StorageReader};

#[derive(Debug)]
pub enum CloneError {
    Service(ServiceError),
    Listing(ListingError),
    /// A listing entry had a content type this client cannot materialize.
    UnknownEntryType(String),
    /// A content stream produced more bytes than the announced size.
    ReceivedTooMuch { expected: u64, received: u64 },
    /// A content stream ended before the announced size was reached.
    TruncatedContent { expected: u64, received: u64 },
    Io(String),
}

impl fmt::Display for CloneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloneError::Service(e) => write!(f, "{e}"),
            CloneError::Listing(e) => write!(f, "{e}"),
            CloneError::UnknownEntryType(entry_type) => {
                write!(f, "unknown directory entry type: {entry_type}")
            }
            CloneError::ReceivedTooMuch { expected, received } => write!(
                f,
                "received {received} bytes of content for an object of {expected} bytes"
            ),
            CloneError::TruncatedContent { expected, received } => write!(
                f,
                "content ended after {received} of {expected} bytes"
            ),
            CloneError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CloneError {}

impl From<ServiceError> for CloneError {
    fn from(e: ServiceError) -> Self {
        CloneError::Service(e)
    }
}

impl From<ListingError> for CloneError {
    fn from(e: ListingError) -> Self {
        CloneError::Listing(e)
    }
}

impl From<io::Error> for CloneError {
    fn from(e: io::Error) -> Self {
        CloneError::Io(e.to_string())
    }
}

///
/// A file being written into a clone destination.
///
#[async_trait]
pub trait WriteableFile: Send {
    async fn write_all(&mut self, chunk: &[u8]) -> Result<(), io::Error>;

    /// Must be called once after the last write; buffered content is not otherwise durable.
    async fn flush(&mut self) -> Result<(), io::Error>;
}

///
/// Write access to one directory of a clone destination. Capability-style: a manipulator can
/// reach its own subtree and nothing above it.
///
#[async_trait]
pub trait DirectoryManipulator: Send + Sync {
    /// Creates the directory (and any missing parents) if it does not exist yet.
    async fn require_exists(&self) -> Result<(), io::Error>;

    fn subdirectory(&self, name: &str) -> Box<dyn DirectoryManipulator>;

    async fn create_regular_file(&self, name: &str) -> Result<Box<dyn WriteableFile>, io::Error>;
}

/// A DirectoryManipulator rooted at a local filesystem path.
pub struct LocalDirectory {
    root: PathBuf,
}

impl LocalDirectory {
    pub fn new(root: PathBuf) -> LocalDirectory {
        LocalDirectory { root }
    }
}

#[async_trait]
impl DirectoryManipulator for LocalDirectory {
    async fn require_exists(&self) -> Result<(), io::Error> {
        tokio::fs::create_dir_all(&self.root).await
    }

    fn subdirectory(&self, name: &str) -> Box<dyn DirectoryManipulator> {
        Box::new(LocalDirectory::new(self.root.join(name)))
    }

    async fn create_regular_file(&self, name: &str) -> Result<Box<dyn WriteableFile>, io::Error> {
        let file = tokio::fs::File::create(self.root.join(name)).await?;
        Ok(Box::new(LocalFile { file }))
    }
}

struct LocalFile {
    file: tokio::fs::File,
}

#[async_trait]
impl WriteableFile for LocalFile {
    async fn write_all(&mut self, chunk: &[u8]) -> Result<(), io::Error> {
        self.file.write_all(chunk).await
    }

    async fn flush(&mut self) -> Result<(), io::Error> {
        self.file.flush().await
    }
}

///
/// Materializes the tree referenced by `root` (which must reference a `json_v1` listing) into
/// `destination`: every `blob` becomes a regular file, every `json_v1` a directory.
///
/// The clone is depth-first and sequential, entries in listing order. On error the partially
/// written tree is left in place; a retry should use a fresh destination. Digests are not
/// re-verified after writing.
///
pub async fn clone_directory(
    reader: &dyn StorageReader,
    root: &UnknownDigest,
    destination: &dyn DirectoryManipulator,
) -> Result<(), CloneError> {
    clone_recursively(reader, root.clone(), destination).await
}

fn clone_recursively<'a>(
    reader: &'a dyn StorageReader,
    listing_digest: UnknownDigest,
    destination: &'a dyn DirectoryManipulator,
) -> BoxFuture<'a, Result<(), CloneError>> {
    async move {
        destination.require_exists().await?;

        let listing_file = reader.open(&listing_digest).await?;
        let serialized = read_fully(listing_file).await?;
        let listing = DirectoryListing::deserialize_json(&serialized)?;
        debug!("Cloning listing {listing_digest} with {} entries", listing.len());

        for (name, reference) in listing.entries() {
            if reference.content_type == ContentType::blob() {
                clone_regular_file(reader, name, reference.digest.to_unknown(), destination)
                    .await?;
            } else if reference.content_type == ContentType::json_v1() {
                let subdirectory = destination.subdirectory(name);
                clone_recursively(reader, reference.digest.to_unknown(), &*subdirectory).await?;
            } else {
                return Err(CloneError::UnknownEntryType(
                    reference.content_type.to_string(),
                ));
            }
        }
        Ok(())
    }
    .boxed()
}

async fn clone_regular_file(
    reader: &dyn StorageReader,
    name: &str,
    digest: UnknownDigest,
    destination: &dyn DirectoryManipulator,
) -> Result<(), CloneError> {
    let remote_file = reader.open(&digest).await?;
    let mut local_file = destination.create_regular_file(name).await?;

    let expected = remote_file.size;
    let mut received: u64 = 0;
    let mut content = remote_file.content;
    while let Some(chunk) = content.next().await {
        let chunk = chunk?;
        received += chunk.len() as u64;
        if received > expected {
            return Err(CloneError::ReceivedTooMuch { expected, received });
        }
        local_file.write_all(&chunk).await?;
    }
    if received < expected {
        return Err(CloneError::TruncatedContent { expected, received });
    }
    local_file.flush().await?;
    Ok(())
}

/// Collects a linear file into memory, holding it to exactly its announced size.
async fn read_fully(file: LinearFile) -> Result<Vec<u8>, CloneError> {
    let expected = file.size;
    let mut bytes = Vec::new();
    let mut content = file.content;
    while let Some(chunk) = content.next().await {
        let chunk = chunk?;
        if bytes.len() as u64 + chunk.len() as u64 > expected {
            return Err(CloneError::ReceivedTooMuch {
                expected,
                received: bytes.len() as u64 + chunk.len() as u64,
            });
        }
        bytes.extend_from_slice(&chunk);
    }
    if (bytes.len() as u64) < expected {
        return Err(CloneError::TruncatedContent {
            expected,
            received: bytes.len() as u64,
        });
    }
    Ok(bytes)
}
