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

pub mod directory;

pub use crate::directory::{DirectoryListing, ListingError};

use std::fmt;

use hashing::Digest;

///
/// A short ASCII tag describing how the bytes of a referenced object are to be interpreted.
///
/// Only `blob` and `json_v1` are produced here, but unrecognized tags must survive a decode so
/// that a consumer can reject them itself (rather than the codec rejecting a listing that merely
/// mentions a type introduced after this build).
///
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ContentType(String);

impl ContentType {
    /// Raw, uninterpreted bytes: a regular file.
    pub fn blob() -> ContentType {
        ContentType("blob".to_owned())
    }

    /// A directory listing in its canonical JSON serialization.
    pub fn json_v1() -> ContentType {
        ContentType("json_v1".to_owned())
    }

    pub fn new<S: Into<String>>(tag: S) -> ContentType {
        ContentType(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

///
/// A (content type, digest) pair: points to exactly one object, and says how to read it.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TypedReference {
    pub content_type: ContentType,
    pub digest: Digest,
}

impl TypedReference {
    pub fn new(content_type: ContentType, digest: Digest) -> TypedReference {
        TypedReference {
            content_type,
            digest,
        }
    }

    pub fn blob(digest: Digest) -> TypedReference {
        TypedReference::new(ContentType::blob(), digest)
    }

    pub fn json_v1(digest: Digest) -> TypedReference {
        TypedReference::new(ContentType::json_v1(), digest)
    }
}

impl fmt::Display for TypedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.content_type, self.digest)
    }
}
