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

pub mod hex_codec;

use std::fmt;
use std::io::{self, Write};

use digest::consts::U32;
use generic_array::GenericArray;
use sha2::{Digest as Sha256Digest, Sha256};

/// The SHA-256 of zero bytes of input.
pub const EMPTY_FINGERPRINT: Fingerprint = Fingerprint([
    0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9, 0x24,
    0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52, 0xb8, 0x55,
]);

/// The SHA-256 of the two bytes `{}`: the canonical serialization of an empty
/// directory listing.
pub const EMPTY_LISTING_FINGERPRINT: Fingerprint = Fingerprint([
    0x44, 0x13, 0x6f, 0xa3, 0x55, 0xb3, 0x67, 0x8a, 0x11, 0x46, 0xad, 0x16, 0xf7, 0xe8, 0x64, 0x9e,
    0x94, 0xfb, 0x4f, 0xc2, 0x1f, 0xe7, 0x7e, 0x83, 0x10, 0xc0, 0x60, 0xf6, 0x1c, 0xaa, 0xff, 0x8a,
]);

pub const FINGERPRINT_SIZE: usize = 32;

pub const SHA256_ALGORITHM_NAME: &str = "SHA256";

///
/// A 32 byte SHA-256 value. Equality, ordering and hashing are all byte-wise.
///
#[derive(Clone, Copy, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Fingerprint(pub [u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    pub fn from_bytes(bytes: GenericArray<u8, U32>) -> Fingerprint {
        Fingerprint(bytes.into())
    }

    ///
    /// Parses exactly `2 * FINGERPRINT_SIZE` hex digits: anything shorter, longer, or containing
    /// a non-hex character is an error.
    ///
    pub fn from_hex_string(hex_string: &str) -> Result<Fingerprint, String> {
        <[u8; FINGERPRINT_SIZE] as hex::FromHex>::from_hex(hex_string)
            .map(Fingerprint)
            .map_err(|e| format!("{e:?}"))
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }

    #[allow(clippy::wrong_self_convention)]
    pub fn to_hex(&self) -> String {
        hex_codec::encode_hex(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint<{}>", self.to_hex())
    }
}

impl AsRef<[u8]> for Fingerprint {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

///
/// A digest tagged with the hash algorithm that produced it. SHA-256 is currently the only
/// algorithm, but the wire protocol carries the algorithm name, so parsing and the listing codec
/// go through this type rather than assuming a width.
///
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Digest {
    Sha256(Fingerprint),
}

impl Digest {
    pub fn of_bytes(bytes: &[u8]) -> Digest {
        let mut hasher = Sha256::default();
        hasher.update(bytes);
        Digest::Sha256(Fingerprint::from_bytes(hasher.finalize()))
    }

    pub fn algorithm_name(&self) -> &'static str {
        match self {
            Digest::Sha256(_) => SHA256_ALGORITHM_NAME,
        }
    }

    ///
    /// Reconstructs a Digest from an algorithm name (as it appears on the wire) and raw digest
    /// bytes of the width that algorithm requires.
    ///
    pub fn from_algorithm(algorithm_name: &str, bytes: &[u8]) -> Result<Digest, String> {
        match algorithm_name {
            SHA256_ALGORITHM_NAME => {
                if bytes.len() != FINGERPRINT_SIZE {
                    return Err(format!(
                        "A {SHA256_ALGORITHM_NAME} digest must be {FINGERPRINT_SIZE} bytes; got {}",
                        bytes.len()
                    ));
                }
                let mut fingerprint = [0; FINGERPRINT_SIZE];
                fingerprint.copy_from_slice(bytes);
                Ok(Digest::Sha256(Fingerprint(fingerprint)))
            }
            other => Err(format!("Unrecognized hash algorithm: {other}")),
        }
    }

    pub fn to_unknown(&self) -> UnknownDigest {
        match self {
            Digest::Sha256(fingerprint) => UnknownDigest::new(fingerprint.as_bytes().to_vec()),
        }
    }

    #[allow(clippy::wrong_self_convention)]
    pub fn to_hex(&self) -> String {
        match self {
            Digest::Sha256(fingerprint) => fingerprint.to_hex(),
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

///
/// A digest as it appears in a request path, before any hash algorithm has been associated with
/// it: an arbitrary-width byte string. Object store keys are UnknownDigests so that lookups do
/// not need to know which algorithm produced a key.
///
#[derive(Clone, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct UnknownDigest(Vec<u8>);

impl UnknownDigest {
    pub fn new(bytes: Vec<u8>) -> UnknownDigest {
        UnknownDigest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[allow(clippy::wrong_self_convention)]
    pub fn to_hex(&self) -> String {
        hex_codec::encode_hex(&self.0)
    }

    ///
    /// Parses a whole path segment as hex. The entire segment must decode: a trailing odd nibble
    /// or any non-hex character yields None.
    ///
    pub fn from_hex_segment(segment: &str) -> Option<UnknownDigest> {
        let (bytes, consumed) = hex_codec::decode_hex_prefix(segment);
        if consumed == segment.len() {
            Some(UnknownDigest(bytes))
        } else {
            None
        }
    }
}

impl fmt::Display for UnknownDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for UnknownDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnknownDigest<{}>", self.to_hex())
    }
}

///
/// A Write instance that fingerprints all data that passes through it, counting bytes.
///
pub struct WriterHasher<T> {
    hasher: Sha256,
    byte_count: u64,
    inner: T,
}

impl<T> WriterHasher<T> {
    pub fn new(inner: T) -> WriterHasher<T> {
        WriterHasher {
            hasher: Sha256::default(),
            byte_count: 0,
            inner: inner,
        }
    }

    ///
    /// Returns the fingerprint of the stream and the number of bytes hashed, and gives the
    /// wrapped writer back.
    ///
    pub fn finish(self) -> ((Fingerprint, u64), T) {
        (
            (
                Fingerprint::from_bytes(self.hasher.finalize()),
                self.byte_count,
            ),
            self.inner,
        )
    }
}

impl<W: Write> Write for WriterHasher<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        // Hash the bytes that were successfully written.
        self.hasher.update(&buf[0..written]);
        self.byte_count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

///
/// Copy the data from reader to writer and hash the bytes in one pass. Pass `io::sink()` as the
/// writer to hash without copying the data anywhere.
///
pub fn sync_copy_and_hash<R: ?Sized, W: ?Sized>(
    reader: &mut R,
    writer: &mut W,
) -> io::Result<(Fingerprint, u64)>
where
    R: io::Read,
    W: io::Write,
{
    let mut hasher = WriterHasher::new(writer);
    let _ = io::copy(reader, &mut hasher)?;
    Ok(hasher.finish().0)
}



#[cfg(test)]
mod hasher_tests;
