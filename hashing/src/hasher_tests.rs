// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::io;

use crate::{Digest, EMPTY_FINGERPRINT, WriterHasher, sync_copy_and_hash};

#[test]
fn hashes_while_writing() {
    let mut hasher = WriterHasher::new(Vec::new());
    io::copy(&mut io::Cursor::new(b"hello"), &mut hasher).unwrap();
    let ((fingerprint, byte_count), written) = hasher.finish();
    assert_eq!(Digest::Sha256(fingerprint), Digest::of_bytes(b"hello"));
    assert_eq!(5, byte_count);
    assert_eq!(b"hello".to_vec(), written);
}

#[test]
fn empty_input() {
    let ((fingerprint, byte_count), _) = WriterHasher::new(io::sink()).finish();
    assert_eq!(EMPTY_FINGERPRINT, fingerprint);
    assert_eq!(0, byte_count);
}

#[test]
fn copy_and_hash() {
    let input = vec![0xab; 100 * 1024];
    let mut output = Vec::new();
    let (fingerprint, byte_count) =
        sync_copy_and_hash(&mut io::Cursor::new(&input), &mut output).unwrap();
    assert_eq!(Digest::Sha256(fingerprint), Digest::of_bytes(&input));
    assert_eq!(input.len() as u64, byte_count);
    assert_eq!(input, output);
}

#[test]
fn hash_without_copying() {
    let (fingerprint, byte_count) =
        sync_copy_and_hash(&mut io::Cursor::new(b"hello"), &mut io::sink()).unwrap();
    assert_eq!(Digest::Sha256(fingerprint), Digest::of_bytes(b"hello"));
    assert_eq!(5, byte_count);
}
