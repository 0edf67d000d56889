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

mod snapshot;
pub use crate::snapshot::{Snapshot, scan_directory, scan_directory_sync};

#[cfg(test)]
mod snapshot_tests;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;

use hashing::UnknownDigest;

///
/// Where a copy of an object's bytes can be read from.
///
/// A filesystem location records the size observed when the file was hashed, so that a reader can
/// detect the file having changed underneath the store. In-memory buffers are owned by the store.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Location {
    OnDisk { path: PathBuf, size: u64 },
    InMemory { content: Bytes },
}

impl Location {
    pub fn size(&self) -> u64 {
        match self {
            Location::OnDisk { size, .. } => *size,
            Location::InMemory { content } => content.len() as u64,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::OnDisk { path, .. } => write!(f, "{}", path.display()),
            Location::InMemory { .. } => write!(f, ":memory:"),
        }
    }
}

///
/// The object store: maps a digest to the locations its bytes can be read from.
///
/// Every key is the SHA-256 of the bytes at each of its locations; that invariant is maintained
/// by construction (the scanner only inserts what it has just hashed). Multiple locations per
/// digest let a reader fall back between replicas.
///
#[derive(Clone, Debug, Default)]
pub struct FileRepository {
    available: HashMap<UnknownDigest, Vec<Location>>,
}

impl FileRepository {
    pub fn new() -> FileRepository {
        FileRepository {
            available: HashMap::new(),
        }
    }

    /// All locations recorded for the digest, in insertion order. O(1) average.
    pub fn find(&self, digest: &UnknownDigest) -> Option<&[Location]> {
        self.available.get(digest).map(|locations| &locations[..])
    }

    ///
    /// Records a location for a digest, appending to any already known. Recording a location
    /// equal to one already present is a no-op.
    ///
    pub fn insert(&mut self, digest: UnknownDigest, location: Location) {
        let locations = self.available.entry(digest).or_default();
        if !locations.contains(&location) {
            locations.push(location);
        }
    }

    /// Moves every (digest, location) pair out of `other` into `self`.
    pub fn merge(&mut self, other: FileRepository) {
        for (digest, locations) in other.available {
            for location in locations {
                self.insert(digest.clone(), location);
            }
        }
    }

    /// The number of distinct digests.
    pub fn len(&self) -> usize {
        self.available.len()
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }
}
