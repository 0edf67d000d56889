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

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::exit;

use clap::{Arg, ArgMatches, Command};
use client::{HttpStorageReader, LocalDirectory, StorageReader, clone_directory};
use futures::StreamExt;
use hashing::UnknownDigest;
use log::error;
use tokio::io::AsyncWriteExt;

fn digest_arg() -> Arg {
    Arg::new("digest")
        .long("digest")
        .short('d')
        .required(true)
        .help("The hex digest of the object to fetch.")
}

fn host_arg() -> Arg {
    Arg::new("host")
        .long("host")
        .default_value("127.0.0.1:8080")
        .help("The address of the server to fetch from.")
}

fn mountpoint_arg() -> Arg {
    Arg::new("mountpoint")
        .long("mountpoint")
        .required(true)
        .help("The directory to materialize the tree at.")
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let matches = Command::new("fileclient")
        .about("Retrieves content-addressed objects and directory trees.")
        .subcommand_required(true)
        .subcommand(
            Command::new("get")
                .about("Stream an object's bytes to stdout.")
                .arg(digest_arg())
                .arg(host_arg()),
        )
        .subcommand(
            Command::new("clone")
                .about("Materialize the directory tree behind a digest.")
                .arg(digest_arg())
                .arg(mountpoint_arg())
                .arg(host_arg()),
        )
        .subcommand(
            Command::new("mount")
                .about("Expose the directory tree behind a digest as a read-only filesystem.")
                .arg(digest_arg())
                .arg(mountpoint_arg())
                .arg(host_arg()),
        )
        .try_get_matches()
        .unwrap_or_else(|e| {
            eprintln!("{e}");
            exit(1)
        });

    let result = match matches.subcommand() {
        Some(("get", sub_matches)) => get(sub_matches).await,
        Some(("clone", sub_matches)) => clone(sub_matches).await,
        Some(("mount", _)) => Err(
            "FUSE mounting is not available in this build; use `clone` to materialize the tree \
             instead."
                .to_owned(),
        ),
        _ => unreachable!("A subcommand is required"),
    };

    if let Err(e) = result {
        error!("{e}");
        exit(1);
    }
}

fn parse_digest(matches: &ArgMatches) -> Result<UnknownDigest, String> {
    let hex = matches.get_one::<String>("digest").unwrap();
    let digest = UnknownDigest::from_hex_segment(hex)
        .ok_or_else(|| format!("The digest must be an even number of hex digits: {hex:?}"))?;
    if digest.is_empty() {
        return Err("The digest must not be empty".to_owned());
    }
    Ok(digest)
}

fn reader_for(matches: &ArgMatches) -> Result<HttpStorageReader, String> {
    let host = matches.get_one::<String>("host").unwrap();
    let address: SocketAddr = host
        .parse()
        .map_err(|e| format!("Invalid host {host:?}: {e}"))?;
    HttpStorageReader::new(address)
}

async fn get(matches: &ArgMatches) -> Result<(), String> {
    let digest = parse_digest(matches)?;
    let reader = reader_for(matches)?;

    let file = reader
        .open(&digest)
        .await
        .map_err(|e| format!("Failed to open {digest}: {e}"))?;
    let mut stdout = tokio::io::stdout();
    let mut content = file.content;
    while let Some(chunk) = content.next().await {
        let chunk = chunk.map_err(|e| format!("Failed while streaming {digest}: {e}"))?;
        stdout
            .write_all(&chunk)
            .await
            .map_err(|e| format!("Failed to write to stdout: {e}"))?;
    }
    stdout
        .flush()
        .await
        .map_err(|e| format!("Failed to flush stdout: {e}"))
}

async fn clone(matches: &ArgMatches) -> Result<(), String> {
    let digest = parse_digest(matches)?;
    let reader = reader_for(matches)?;
    let mountpoint = PathBuf::from(matches.get_one::<String>("mountpoint").unwrap());

    clone_directory(&reader, &digest, &LocalDirectory::new(mountpoint))
        .await
        .map_err(|e| format!("Clone of {digest} failed: {e}"))
}
