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

use std::future::Future;

use futures::future::FutureExt;
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};

///
/// A handle to the runtime's scheduler and to its pool of threads reserved for blocking I/O.
///
/// An Executor does not own the runtime: binaries own theirs via `#[tokio::main]`, tests via
/// `#[tokio::test]`, and the owner must outlive every Executor clone.
///
#[derive(Debug, Clone)]
pub struct Executor {
    handle: Handle,
}

impl Executor {
    ///
    /// Creates an Executor for the current tokio Runtime. Panics outside of a runtime context.
    ///
    pub fn new() -> Executor {
        Executor {
            handle: Handle::current(),
        }
    }

    ///
    /// Run a Future as a new task, and return a Future for its output.
    ///
    /// If the task exits abnormally, the given closure is called to recover: usually it converts
    /// the JoinError into the task's error type.
    ///
    /// If the returned Future is dropped, the task still runs to completion.
    ///
    pub fn spawn<O: Send + 'static, F: Future<Output = O> + Send + 'static>(
        &self,
        future: F,
        rescue_join_error: impl FnOnce(JoinError) -> O,
    ) -> impl Future<Output = O> {
        self.native_spawn(future).map(|res| match res {
            Ok(o) => o,
            Err(e) => rescue_join_error(e),
        })
    }

    ///
    /// Run a Future as a new task, and return its JoinHandle.
    ///
    pub fn native_spawn<O: Send + 'static, F: Future<Output = O> + Send + 'static>(
        &self,
        future: F,
    ) -> JoinHandle<O> {
        self.handle.spawn(future)
    }

    ///
    /// Run the given closure on the threads reserved for blocking I/O, which are allowed to be
    /// long-running, and return a Future for its result.
    ///
    pub fn spawn_blocking<F: FnOnce() -> R + Send + 'static, R: Send + 'static>(
        &self,
        f: F,
        rescue_join_error: impl FnOnce(JoinError) -> R,
    ) -> impl Future<Output = R> {
        self.native_spawn_blocking(f).map(|res| match res {
            Ok(o) => o,
            Err(e) => rescue_join_error(e),
        })
    }

    ///
    /// Run the given closure on the threads reserved for blocking I/O, and return a JoinHandle.
    ///
    pub fn native_spawn_blocking<F: FnOnce() -> R + Send + 'static, R: Send + 'static>(
        &self,
        f: F,
    ) -> JoinHandle<R> {
        self.handle.spawn_blocking(f)
    }
}
