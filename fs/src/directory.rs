// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;

use hashing::Digest;

use crate::{ContentType, TypedReference};

///
/// An ordered mapping from entry name to typed reference: the in-memory form of a directory.
///
/// The map is ordered by byte-wise name comparison so that the canonical serialization (and
/// therefore the listing's own digest) is a deterministic function of its entries.
///
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DirectoryListing {
    entries: BTreeMap<String, TypedReference>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ListingError {
    /// The serialized form could not be decoded. The offset is a byte position into the input
    /// where the problem was detected (0 when no more precise position is known).
    Malformed { offset: usize, reason: String },
}

impl fmt::Display for ListingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingError::Malformed { offset, reason } => {
                write!(f, "malformed listing at byte {offset}: {reason}")
            }
        }
    }
}

impl std::error::Error for ListingError {}

/// One listing entry as it appears on the wire. Field order is part of the canonical form.
#[derive(Deserialize, Serialize)]
struct WireEntry {
    #[serde(rename = "type")]
    entry_type: String,
    content: String,
    hash: String,
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("entry names must not be empty".to_owned());
    }
    if name.contains('/') || name.contains('\0') {
        return Err(format!("invalid entry name: {name:?}"));
    }
    Ok(())
}

impl DirectoryListing {
    pub fn new() -> DirectoryListing {
        DirectoryListing {
            entries: BTreeMap::new(),
        }
    }

    ///
    /// Adds an entry. Names must be non-empty, must not contain `/` or NUL, and may be mapped at
    /// most once.
    ///
    pub fn insert(&mut self, name: String, reference: TypedReference) -> Result<(), String> {
        validate_name(&name)?;
        if self.entries.contains_key(&name) {
            return Err(format!("duplicate entry name: {name:?}"));
        }
        self.entries.insert(name, reference);
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &TypedReference)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    ///
    /// The canonical serialization: pretty-printed JSON with four-space indentation and no
    /// trailing newline, entries in map order, each entry an object with `type`, `content`
    /// (lowercase hex) and `hash` members in that order. An empty listing is exactly `{}`.
    ///
    /// The layout is load-bearing: the listing's digest is the digest of these bytes, so any
    /// other pretty-print choice would give the same tree a different identity.
    ///
    pub fn serialize_json(&self) -> Vec<u8> {
        let mut serialized = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut serialized, formatter);
        self.serialize(&mut serializer)
            .expect("writing JSON to a Vec cannot fail");
        serialized
    }

    pub fn deserialize_json(serialized: &[u8]) -> Result<DirectoryListing, ListingError> {
        let wire: BTreeMap<String, WireEntry> =
            serde_json::from_slice(serialized).map_err(|e| ListingError::Malformed {
                offset: offset_of(serialized, e.line(), e.column()),
                reason: e.to_string(),
            })?;

        let mut listing = DirectoryListing::new();
        let malformed = |reason: String| ListingError::Malformed { offset: 0, reason };
        for (name, entry) in wire {
            validate_name(&name).map_err(malformed)?;
            let content_bytes = hashing::UnknownDigest::from_hex_segment(&entry.content)
                .ok_or_else(|| malformed(format!("entry {name:?}: content is not valid hex")))?;
            let digest = Digest::from_algorithm(&entry.hash, content_bytes.as_bytes())
                .map_err(|e| malformed(format!("entry {name:?}: {e}")))?;
            listing
                .entries
                .insert(name, TypedReference::new(ContentType::new(entry.entry_type), digest));
        }
        Ok(listing)
    }
}

impl Serialize for DirectoryListing {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, reference) in &self.entries {
            map.serialize_entry(
                name,
                &WireEntry {
                    entry_type: reference.content_type.as_str().to_owned(),
                    content: reference.digest.to_hex(),
                    hash: reference.digest.algorithm_name().to_owned(),
                },
            )?;
        }
        map.end()
    }
}

/// Converts serde_json's 1-based line/column error position to a byte offset into the input.
fn offset_of(input: &[u8], line: usize, column: usize) -> usize {
    if line == 0 {
        return 0;
    }
    let mut offset = 0;
    let mut lines_to_skip = line - 1;
    while lines_to_skip > 0 {
        match input[offset..].iter().position(|&b| b == b'\n') {
            Some(newline) => offset += newline + 1,
            None => break,
        }
        lines_to_skip -= 1;
    }
    (offset + column.saturating_sub(1)).min(input.len())
}
