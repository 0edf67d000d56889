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

use std::path::PathBuf;
use std::process::exit;

use clap::{Arg, Command};
use log::error;
use task_executor::Executor;
use watch::{RecursiveDirectoryWatcher, SingleDirectoryWatcher, WatchError};

#[tokio::main]
async fn main() {
    env_logger::init();

    let matches = Command::new("fileserver")
        .about("Serves a directory tree over HTTP, addressed by content digest.")
        .subcommand_required(true)
        .subcommand(
            Command::new("serve")
                .about("Scan a directory and serve its contents.")
                .arg(Arg::new("path").required(true))
                .arg(
                    Arg::new("port")
                        .long("port")
                        .default_value("8080")
                        .value_parser(clap::value_parser!(u16)),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Stream recursive change notifications for a directory tree.")
                .arg(Arg::new("path").required(true)),
        )
        .subcommand(
            Command::new("watchflat")
                .about("Stream change notifications for a single directory.")
                .arg(Arg::new("path").required(true)),
        )
        .try_get_matches()
        .unwrap_or_else(|e| {
            eprintln!("{e}");
            exit(1)
        });

    let result = match matches.subcommand() {
        Some(("serve", sub_matches)) => {
            let path = PathBuf::from(sub_matches.get_one::<String>("path").unwrap());
            let port = *sub_matches.get_one::<u16>("port").unwrap();
            server::serve(Executor::new(), path, port).await
        }
        Some(("watch", sub_matches)) => {
            let path = PathBuf::from(sub_matches.get_one::<String>("path").unwrap());
            watch_recursively(path).await
        }
        Some(("watchflat", sub_matches)) => {
            let path = PathBuf::from(sub_matches.get_one::<String>("path").unwrap());
            watch_flat(path)
        }
        _ => unreachable!("A subcommand is required"),
    };

    if let Err(e) = result {
        error!("{e}");
        exit(1);
    }
}

async fn watch_recursively(path: PathBuf) -> Result<(), String> {
    let watcher = RecursiveDirectoryWatcher::new(Executor::new(), path)?;
    loop {
        match watcher.next_batch().await {
            Ok(events) => {
                for event in events {
                    print_event(&event);
                }
            }
            Err(WatchError::Cancelled) => return Ok(()),
            Err(e) => return Err(e.to_string()),
        }
    }
}

fn watch_flat(path: PathBuf) -> Result<(), String> {
    let watcher = SingleDirectoryWatcher::new(path)?;
    loop {
        match watcher.next_batch() {
            Ok(events) => {
                for event in events {
                    print_event(&event);
                }
            }
            Err(WatchError::Cancelled) => return Ok(()),
            Err(e) => return Err(e.to_string()),
        }
    }
}

fn print_event(event: &watch::PathEvent) {
    let suffix = if event.is_directory { "/" } else { "" };
    println!("{} {}{suffix}", event.kind, event.path.display());
}
