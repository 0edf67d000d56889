// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use fs::{DirectoryListing, TypedReference};
use hashing::Digest;
use task_executor::Executor;

use crate::{FileRepository, Location};

///
/// The result of scanning a directory tree: the repository of every object the tree contains,
/// and the typed reference to the root listing.
///
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub repository: FileRepository,
    pub root: TypedReference,
}

///
/// Scans the tree rooted at `root` on the blocking I/O pool.
///
pub async fn scan_directory(executor: &Executor, root: PathBuf) -> Result<Snapshot, io::Error> {
    executor
        .spawn_blocking(
            move || scan_directory_sync(&root),
            |e| {
                Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("Synchronous scan failed: {e}"),
                ))
            },
        )
        .await
}

///
/// Walks the tree rooted at `root` bottom-up, hashing every regular file and every directory
/// listing.
///
/// Entries that fail to hash are logged and omitted, so a listing's digest covers exactly the
/// entries that were successfully read. A failure to iterate a directory propagates.
///
pub fn scan_directory_sync(root: &Path) -> Result<Snapshot, io::Error> {
    let mut repository = FileRepository::new();
    let mut listing = DirectoryListing::new();

    for entry in root.read_dir()? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(name) => {
                warn!("Skipping entry with a non-UTF-8 name: {name:?}");
                continue;
            }
        };

        let reference = if file_type.is_file() {
            match hash_file(&entry.path()) {
                Ok((reference, location)) => {
                    debug!("{} {location}", reference.digest);
                    repository.insert(reference.digest.to_unknown(), location);
                    reference
                }
                Err(e) => {
                    warn!("Failed to hash {:?}: {e}", entry.path());
                    continue;
                }
            }
        } else if file_type.is_dir() {
            let sub_snapshot = scan_directory_sync(&entry.path())?;
            repository.merge(sub_snapshot.repository);
            sub_snapshot.root
        } else {
            // Symlinks, sockets, devices: not part of the data model.
            continue;
        };

        listing
            .insert(name, reference)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    }

    let serialized = listing.serialize_json();
    let listing_digest = Digest::of_bytes(&serialized);
    repository.insert(
        listing_digest.to_unknown(),
        Location::InMemory {
            content: serialized.into(),
        },
    );
    Ok(Snapshot {
        repository,
        root: TypedReference::json_v1(listing_digest),
    })
}

fn hash_file(path: &Path) -> Result<(TypedReference, Location), io::Error> {
    let mut file = std::fs::File::open(path)?;
    let (fingerprint, size) = hashing::sync_copy_and_hash(&mut file, &mut io::sink())?;
    Ok((
        TypedReference::blob(Digest::Sha256(fingerprint)),
        Location::OnDisk {
            path: path.to_owned(),
            size,
        },
    ))
}
