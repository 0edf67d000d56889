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

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, trace, warn};
use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use task_executor::Executor;
use tokio::sync::{Semaphore, oneshot};

///
/// A platform-neutral description of one filesystem change, with a path relative to the watched
/// root.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PathEvent {
    pub kind: PathEventKind,
    pub path: PathBuf,
    pub is_directory: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PathEventKind {
    Add,
    Remove,
    ChangeContent,
    ChangeMetadata,
    ChangeContentOrMetadata,
    MoveSelf,
    RemoveSelf,
}

impl fmt::Display for PathEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PathEventKind::Add => "add",
            PathEventKind::Remove => "remove",
            PathEventKind::ChangeContent => "change_content",
            PathEventKind::ChangeMetadata => "change_metadata",
            PathEventKind::ChangeContentOrMetadata => "change_content_or_metadata",
            PathEventKind::MoveSelf => "move_self",
            PathEventKind::RemoveSelf => "remove_self",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WatchError {
    /// The watcher was dropped while a receiver was parked.
    Cancelled,
    /// The platform notification backend reported an error.
    Notify(String),
    /// A scan worker failed to walk its directory.
    Scan(String),
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchError::Cancelled => write!(f, "cancelled"),
            WatchError::Notify(e) => write!(f, "notification backend error: {e}"),
            WatchError::Scan(e) => write!(f, "scan error: {e}"),
        }
    }
}

impl std::error::Error for WatchError {}

/// Notifications are delivered in batches that preserve the order in which the coordinator
/// observed them.
pub type EventBatch = Result<Vec<PathEvent>, WatchError>;

///
/// Watches a directory tree recursively, reporting a causally consistent stream of portable
/// notifications. The stream begins with a synthetic `Add` for every file and directory found by
/// the initial scan; because every directory is watched before its entries are read, an entry can
/// race the scan only into being reported twice, never into being missed.
///
/// All internal state lives on a dedicated coordinator thread; scan workers run on the blocking
/// pool and only ever read the one directory they were handed, posting results back to the
/// coordinator. Dropping the watcher stops all watches and fails a parked receiver with
/// `WatchError::Cancelled`.
///
#[derive(Debug)]
pub struct RecursiveDirectoryWatcher {
    message_sender: Sender<Message>,
}

enum Message {
    Platform(notify::Result<notify::Event>),
    ScanSubdirectory { relative: PathBuf, absolute: PathBuf },
    ScanResult(EventBatch),
    Receive(oneshot::Sender<EventBatch>),
    Shutdown,
}

impl RecursiveDirectoryWatcher {
    pub fn new(executor: Executor, root: PathBuf) -> Result<RecursiveDirectoryWatcher, String> {
        // Notifications carry canonical paths, so the root must be canonicalized up front or
        // events could not be resolved back to relative paths.
        let canonical_root = std::fs::canonicalize(&root)
            .map_err(|e| format!("Could not canonicalize watch root {root:?}: {e}"))?;

        let (message_sender, message_receiver) = crossbeam_channel::unbounded();
        let platform_sender = message_sender.clone();
        let mut watcher: RecommendedWatcher = Watcher::new(
            move |event| {
                if platform_sender.send(Message::Platform(event)).is_err() {
                    // The coordinator shutting down first is ok; remaining platform events are
                    // not deliverable to anyone.
                    debug!("Coordinator has shut down, but the platform watcher is still running.");
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| format!("Failed to begin watching the filesystem: {e}"))?;

        // The root is watched before anything enqueues its scan, so entries created while the
        // initial scan is in flight are observable through the watch.
        watcher
            .watch(&canonical_root, RecursiveMode::NonRecursive)
            .map_err(|e| format!("Failed to watch {canonical_root:?}: {e}"))?;

        let coordinator = Coordinator {
            root: canonical_root.clone(),
            watcher,
            executor,
            message_sender: message_sender.clone(),
            scan_permits: Arc::new(Semaphore::new(num_cpus::get())),
            directories: HashMap::from([(canonical_root.clone(), PathBuf::new())]),
            pending: Pending::Empty,
        };
        thread::Builder::new()
            .name("watch-coordinator".to_owned())
            .spawn(move || coordinator.run(message_receiver))
            .map_err(|e| format!("Failed to spawn the watch coordinator: {e}"))?;

        Ok(RecursiveDirectoryWatcher { message_sender })
    }

    ///
    /// Waits for the next notification batch. Returns a buffered result immediately if one is
    /// waiting; otherwise parks until the coordinator has something to deliver. There may be at
    /// most one parked receiver: a second concurrent call cancels the first.
    ///
    pub async fn next_batch(&self) -> EventBatch {
        let (sender, receiver) = oneshot::channel();
        if self.message_sender.send(Message::Receive(sender)).is_err() {
            return Err(WatchError::Cancelled);
        }
        receiver.await.unwrap_or(Err(WatchError::Cancelled))
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.message_sender.send(Message::Shutdown);
    }
}

impl Drop for RecursiveDirectoryWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Pending {
    Empty,
    Buffered(EventBatch),
    Waiting(oneshot::Sender<EventBatch>),
}

struct Coordinator {
    root: PathBuf,
    watcher: RecommendedWatcher,
    executor: Executor,
    message_sender: Sender<Message>,
    scan_permits: Arc<Semaphore>,
    // Every watched directory, keyed by its canonical absolute path, mapped to its path relative
    // to the root. This is the portable analogue of a watch-descriptor table: notifications are
    // resolved against it, and membership marks a path as a directory we watch.
    directories: HashMap<PathBuf, PathBuf>,
    pending: Pending,
}

impl Coordinator {
    fn run(mut self, message_receiver: Receiver<Message>) {
        self.begin_scan(PathBuf::new(), self.root.clone());

        while let Ok(message) = message_receiver.recv() {
            match message {
                Message::Platform(Ok(event)) => self.handle_platform_event(event),
                Message::Platform(Err(e)) => {
                    if matches!(e.kind, notify::ErrorKind::PathNotFound) {
                        warn!("Path(s) did not exist: {:?}", e.paths);
                    } else {
                        self.deliver(Err(WatchError::Notify(e.to_string())));
                    }
                }
                Message::ScanSubdirectory { relative, absolute } => {
                    self.watch_and_scan(relative, absolute);
                }
                Message::ScanResult(result) => match result {
                    Ok(events) => {
                        if !events.is_empty() {
                            self.deliver(Ok(events));
                        }
                    }
                    Err(e) => self.deliver(Err(e)),
                },
                Message::Receive(receiver) => self.handle_receive(receiver),
                Message::Shutdown => break,
            }
        }

        // Fail a parked receiver rather than leaving it waiting forever; the watcher itself (and
        // with it every platform watch) is dropped with the coordinator.
        if let Pending::Waiting(receiver) = std::mem::replace(&mut self.pending, Pending::Empty) {
            let _ = receiver.send(Err(WatchError::Cancelled));
        }
    }

    fn handle_receive(&mut self, receiver: oneshot::Sender<EventBatch>) {
        match std::mem::replace(&mut self.pending, Pending::Empty) {
            Pending::Empty => self.pending = Pending::Waiting(receiver),
            Pending::Buffered(result) => {
                // A receiver that was dropped while parked must not swallow the result.
                if let Err(result) = receiver.send(result) {
                    self.pending = Pending::Buffered(result);
                }
            }
            Pending::Waiting(previous) => {
                let _ = previous.send(Err(WatchError::Cancelled));
                self.pending = Pending::Waiting(receiver);
            }
        }
    }

    fn deliver(&mut self, result: EventBatch) {
        match std::mem::replace(&mut self.pending, Pending::Empty) {
            Pending::Empty => self.pending = Pending::Buffered(result),
            Pending::Waiting(receiver) => {
                if let Err(result) = receiver.send(result) {
                    self.pending = Pending::Buffered(result);
                }
            }
            Pending::Buffered(buffered) => {
                // Batches append to the buffered result; an error sticks until it is observed.
                let merged = match (buffered, result) {
                    (Ok(mut events), Ok(mut more)) => {
                        events.append(&mut more);
                        Ok(events)
                    }
                    (Err(e), _) => Err(e),
                    (Ok(_), Err(e)) => Err(e),
                };
                self.pending = Pending::Buffered(merged);
            }
        }
    }

    fn handle_platform_event(&mut self, event: notify::Event) {
        trace!("notify event: {event:?}");
        let mut events = Vec::new();

        if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = &event.kind {
            // The single event carries both ends of the rename.
            if let [from, to] = &event.paths[..] {
                if let Some(event) = self.portable_event(from, PathEventKind::Remove, None) {
                    events.push(event);
                }
                self.observed_addition(to, &mut events);
            }
        } else {
            for path in &event.paths {
                match &event.kind {
                    EventKind::Create(kind) => {
                        let known_directory = match kind {
                            CreateKind::Folder => Some(true),
                            CreateKind::File => Some(false),
                            _ => None,
                        };
                        if known_directory == Some(true) {
                            self.observed_directory_addition(path, &mut events);
                        } else if known_directory == Some(false) {
                            if let Some(event) =
                                self.portable_event(path, PathEventKind::Add, Some(false))
                            {
                                events.push(event);
                            }
                        } else {
                            self.observed_addition(path, &mut events);
                        }
                    }
                    EventKind::Remove(kind) => {
                        if self.directories.contains_key(path) && path != &self.root {
                            self.forget_directory(path);
                            if let Some(event) =
                                self.portable_event(path, PathEventKind::RemoveSelf, Some(true))
                            {
                                events.push(event);
                            }
                        } else if path == &self.root {
                            events.push(PathEvent {
                                kind: PathEventKind::RemoveSelf,
                                path: PathBuf::new(),
                                is_directory: true,
                            });
                        } else {
                            let is_directory = matches!(kind, RemoveKind::Folder);
                            if let Some(event) =
                                self.portable_event(path, PathEventKind::Remove, Some(is_directory))
                            {
                                events.push(event);
                            }
                        }
                    }
                    EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                        if self.directories.contains_key(path) {
                            self.forget_directory(path);
                            if let Some(event) =
                                self.portable_event(path, PathEventKind::MoveSelf, Some(true))
                            {
                                events.push(event);
                            }
                        } else if let Some(event) =
                            self.portable_event(path, PathEventKind::Remove, None)
                        {
                            events.push(event);
                        }
                    }
                    EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                        self.observed_addition(path, &mut events);
                    }
                    EventKind::Modify(ModifyKind::Name(_)) => {
                        let kind = if self.directories.contains_key(path) {
                            PathEventKind::MoveSelf
                        } else {
                            PathEventKind::ChangeContentOrMetadata
                        };
                        if let Some(event) = self.portable_event(path, kind, None) {
                            events.push(event);
                        }
                    }
                    EventKind::Modify(ModifyKind::Data(_)) => {
                        if let Some(event) =
                            self.portable_event(path, PathEventKind::ChangeContent, Some(false))
                        {
                            events.push(event);
                        }
                    }
                    EventKind::Modify(ModifyKind::Metadata(_)) => {
                        if let Some(event) =
                            self.portable_event(path, PathEventKind::ChangeMetadata, None)
                        {
                            events.push(event);
                        }
                    }
                    EventKind::Modify(_) => {
                        if let Some(event) = self.portable_event(
                            path,
                            PathEventKind::ChangeContentOrMetadata,
                            None,
                        ) {
                            events.push(event);
                        }
                    }
                    EventKind::Access(_) => {}
                    _ => {
                        if let Some(event) = self.portable_event(
                            path,
                            PathEventKind::ChangeContentOrMetadata,
                            None,
                        ) {
                            events.push(event);
                        }
                    }
                }
            }
        }

        if !events.is_empty() {
            self.deliver(Ok(events));
        }
    }

    ///
    /// An addition whose kind the platform did not disclose: stat to learn whether a new watch
    /// (and scan) is needed.
    ///
    fn observed_addition(&mut self, path: &Path, events: &mut Vec<PathEvent>) {
        let is_directory = std::fs::metadata(path)
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false);
        if is_directory {
            self.observed_directory_addition(path, events);
        } else if let Some(event) = self.portable_event(path, PathEventKind::Add, Some(false)) {
            events.push(event);
        }
    }

    fn observed_directory_addition(&mut self, path: &Path, events: &mut Vec<PathEvent>) {
        let Some(relative) = self.relative_to_root(path) else {
            return;
        };
        events.push(PathEvent {
            kind: PathEventKind::Add,
            path: relative.clone(),
            is_directory: true,
        });
        self.watch_and_scan(relative, path.to_owned());
    }

    fn portable_event(
        &self,
        path: &Path,
        kind: PathEventKind,
        is_directory: Option<bool>,
    ) -> Option<PathEvent> {
        let relative = self.relative_to_root(path)?;
        let is_directory =
            is_directory.unwrap_or_else(|| self.directories.contains_key(path));
        Some(PathEvent {
            kind,
            path: relative,
            is_directory,
        })
    }

    fn relative_to_root(&self, path: &Path) -> Option<PathBuf> {
        match path.strip_prefix(&self.root) {
            Ok(relative) => Some(relative.to_owned()),
            Err(_) => {
                trace!("Ignoring notification outside of the root: {path:?}");
                None
            }
        }
    }

    fn forget_directory(&mut self, path: &Path) {
        self.directories.remove(path);
        let prefix = path.to_owned();
        self.directories.retain(|absolute, _| !absolute.starts_with(&prefix));
    }

    ///
    /// Installs a watch on the directory and then hands its walk to the scanner pool. The watch
    /// must exist before the walk reads any entries, so that entries created in between are still
    /// observed.
    ///
    fn watch_and_scan(&mut self, relative: PathBuf, absolute: PathBuf) {
        if self.directories.contains_key(&absolute) && !relative.as_os_str().is_empty() {
            return;
        }
        if !relative.as_os_str().is_empty() {
            if let Err(e) = self.watcher.watch(&absolute, RecursiveMode::NonRecursive) {
                // The directory may already have been removed again; report and move on.
                self.deliver(Err(WatchError::Notify(format!(
                    "Failed to watch {absolute:?}: {e}"
                ))));
                return;
            }
            self.directories.insert(absolute.clone(), relative.clone());
        }
        self.begin_scan(relative, absolute);
    }

    fn begin_scan(&self, relative: PathBuf, absolute: PathBuf) {
        let message_sender = self.message_sender.clone();
        let scan_permits = self.scan_permits.clone();
        let executor = self.executor.clone();
        self.executor.native_spawn(async move {
            // The permit bounds how many scan workers can occupy the blocking pool at once.
            let _permit = scan_permits
                .acquire_owned()
                .await
                .expect("the scan semaphore is never closed");
            let worker_sender = message_sender.clone();
            let result = executor
                .spawn_blocking(
                    move || scan_one_directory(&absolute, &relative, &worker_sender),
                    |e| Err(WatchError::Scan(format!("Scan worker failed: {e}"))),
                )
                .await;
            let _ = message_sender.send(Message::ScanResult(result));
        });
    }
}

///
/// Walks exactly one directory, synthesizing `Add` events for its entries and requesting scans
/// of its subdirectories. Runs on the scanner pool; touches no coordinator state.
///
fn scan_one_directory(
    absolute: &Path,
    relative: &Path,
    message_sender: &Sender<Message>,
) -> EventBatch {
    let scan_error =
        |e: std::io::Error| WatchError::Scan(format!("Failed to scan {absolute:?}: {e}"));
    let mut events = Vec::new();
    for entry in absolute.read_dir().map_err(scan_error)? {
        let entry = entry.map_err(scan_error)?;
        let file_type = entry.file_type().map_err(scan_error)?;
        let entry_relative = relative.join(entry.file_name());
        if file_type.is_dir() {
            let _ = message_sender.send(Message::ScanSubdirectory {
                relative: entry_relative.clone(),
                absolute: entry.path(),
            });
            events.push(PathEvent {
                kind: PathEventKind::Add,
                path: entry_relative,
                is_directory: true,
            });
        } else if file_type.is_file() {
            events.push(PathEvent {
                kind: PathEventKind::Add,
                path: entry_relative,
                is_directory: false,
            });
        }
    }
    Ok(events)
}

///
/// Watches a single directory, without recursion and without an initial scan: the flat variant
/// used by `watchflat`. Delivery is a blocking receive, suitable for a command-line loop.
///
pub struct SingleDirectoryWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
    receiver: Receiver<notify::Result<notify::Event>>,
}

impl SingleDirectoryWatcher {
    pub fn new(root: PathBuf) -> Result<SingleDirectoryWatcher, String> {
        let canonical_root = std::fs::canonicalize(&root)
            .map_err(|e| format!("Could not canonicalize watch root {root:?}: {e}"))?;
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut watcher: RecommendedWatcher = Watcher::new(
            move |event| {
                let _ = sender.send(event);
            },
            notify::Config::default(),
        )
        .map_err(|e| format!("Failed to begin watching the filesystem: {e}"))?;
        watcher
            .watch(&canonical_root, RecursiveMode::NonRecursive)
            .map_err(|e| format!("Failed to watch {canonical_root:?}: {e}"))?;
        Ok(SingleDirectoryWatcher {
            root: canonical_root,
            _watcher: watcher,
            receiver,
        })
    }

    /// Blocks until the directory changes.
    pub fn next_batch(&self) -> EventBatch {
        loop {
            let event = match self.receiver.recv() {
                Ok(Ok(event)) => event,
                Ok(Err(e)) => return Err(WatchError::Notify(e.to_string())),
                Err(_) => return Err(WatchError::Cancelled),
            };
            let events: Vec<PathEvent> = event
                .paths
                .iter()
                .filter_map(|path| {
                    let relative = path.strip_prefix(&self.root).ok()?;
                    let kind = flat_kind(&event.kind, relative.as_os_str().is_empty())?;
                    Some(PathEvent {
                        kind,
                        path: relative.to_owned(),
                        is_directory: std::fs::metadata(path)
                            .map(|metadata| metadata.is_dir())
                            .unwrap_or(false),
                    })
                })
                .collect();
            if !events.is_empty() {
                return Ok(events);
            }
        }
    }
}

fn flat_kind(kind: &EventKind, is_self: bool) -> Option<PathEventKind> {
    let kind = match kind {
        EventKind::Create(_) => PathEventKind::Add,
        EventKind::Remove(_) if is_self => PathEventKind::RemoveSelf,
        EventKind::Remove(_) => PathEventKind::Remove,
        EventKind::Modify(ModifyKind::Data(_)) => PathEventKind::ChangeContent,
        EventKind::Modify(ModifyKind::Metadata(_)) => PathEventKind::ChangeMetadata,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => PathEventKind::Remove,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => PathEventKind::Add,
        EventKind::Modify(ModifyKind::Name(_)) if is_self => PathEventKind::MoveSelf,
        EventKind::Modify(_) => PathEventKind::ChangeContentOrMetadata,
        EventKind::Access(_) => return None,
        _ => PathEventKind::ChangeContentOrMetadata,
    };
    Some(kind)
}
