// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

pub mod clone;
#[cfg(test)]
mod clone_tests;
mod http_storage_reader;

pub use crate::clone::{
    CloneError, DirectoryManipulator, LocalDirectory, WriteableFile, clone_directory,
};
pub use crate::http_storage_reader::HttpStorageReader;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use hashing::UnknownDigest;

///
/// A one-shot, forward-only reader: the object's total size and a single-consumer stream of its
/// byte chunks. The stream yields at most `size` bytes; a consumer observing fewer has hit a
/// short read.
///
pub struct LinearFile {
    pub size: u64,
    pub content: BoxStream<'static, Result<Bytes, ServiceError>>,
}

/// How a storage service call fails, from the caller's point of view.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ServiceError {
    /// The service has no object with the requested digest.
    FileNotFound,
    /// The service answered something this protocol cannot interpret.
    MalformedResponse(String),
    /// Connecting to or talking to the service failed.
    Transport(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::FileNotFound => write!(f, "file not found"),
            ServiceError::MalformedResponse(e) => write!(f, "malformed response: {e}"),
            ServiceError::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for ServiceError {}

///
/// Read access to a content-addressed object store.
///
#[async_trait]
pub trait StorageReader: Send + Sync {
    /// Opens the object for streaming.
    async fn open(&self, digest: &UnknownDigest) -> Result<LinearFile, ServiceError>;

    /// The object's size in bytes, without opening its content.
    async fn size(&self, digest: &UnknownDigest) -> Result<u64, ServiceError>;
}
