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

mod request;

pub use crate::request::{Request, Route};

use std::io;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::StreamExt;
use log::{debug, info, warn};
use store::{Location, Snapshot};
use task_executor::Executor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use watch::{RecursiveDirectoryWatcher, WatchError};

const MAX_REQUEST_HEADER_BYTES: usize = 8192;
const BODY_CHUNK_BYTES: usize = 8192;

///
/// Serves the objects of a Snapshot over HTTP/1.0, one request per connection.
///
/// Connections read the current snapshot once at request start; `store_snapshot` atomically
/// publishes a fresh one without disturbing responses already in flight.
///
pub struct Server {
    port: u16,
    snapshot: Arc<ArcSwap<Snapshot>>,
    exit_sender: Option<oneshot::Sender<()>>,
}

impl Server {
    ///
    /// Binds and begins serving on a background task. `port_requested` may be 0 to request an
    /// ephemeral port; `port()` reports the one actually bound.
    ///
    pub async fn new(
        executor: Executor,
        port_requested: u16,
        snapshot: Snapshot,
    ) -> Result<Server, String> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port_requested))
            .await
            .map_err(|e| format!("Could not bind to port {port_requested}: {e}"))?;
        let port = listener
            .local_addr()
            .map_err(|e| format!("No local address for listener: {e}"))?
            .port();

        let snapshot = Arc::new(ArcSwap::from_pointee(snapshot));
        let (exit_sender, exit_receiver) = oneshot::channel();
        executor.native_spawn(Self::accept_loop(
            executor.clone(),
            listener,
            snapshot.clone(),
            exit_receiver,
        ));

        Ok(Server {
            port,
            snapshot,
            exit_sender: Some(exit_sender),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Atomically replaces the served snapshot. Requests already responding keep the one they
    /// loaded.
    pub fn store_snapshot(&self, snapshot: Snapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    async fn accept_loop(
        executor: Executor,
        listener: TcpListener,
        snapshot: Arc<ArcSwap<Snapshot>>,
        mut should_exit: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
              accepted = listener.accept() => {
                match accepted {
                  Ok((socket, peer)) => {
                    debug!("Accepted connection from {peer}");
                    executor.native_spawn(handle_connection(socket, snapshot.load_full()));
                  }
                  Err(e) => {
                    warn!("Failed to accept a connection: {e}");
                    break;
                  }
                }
              }
              _ = &mut should_exit => break,
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(exit_sender) = self.exit_sender.take() {
            let _ = exit_sender.send(());
        }
    }
}

///
/// One connection: `reading_request -> responding -> draining -> closed`.
///
/// Malformed input, or EOF before a complete header, closes without reply. Any error while
/// responding drops the socket where it stands, aborting the body mid-stream.
///
async fn handle_connection(mut socket: TcpStream, snapshot: Arc<Snapshot>) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };

    if respond(&mut socket, &request, &snapshot).await.is_err() {
        return;
    }

    // HTTP/1.0 with `Connection: close`: shut our half down, then drain whatever the peer still
    // had in flight.
    let _ = socket.shutdown().await;
    let mut drain = [0_u8; 1024];
    while matches!(socket.read(&mut drain).await, Ok(n) if n > 0) {}
}

///
/// Reads bytes until a complete request header has arrived and parses it. None means the
/// connection should be closed without a reply.
///
async fn read_request(socket: &mut TcpStream) -> Option<Request> {
    let mut buffer = Vec::with_capacity(1024);
    loop {
        if let Some(header_end) = find_header_end(&buffer) {
            return Request::parse(&buffer[..header_end]);
        }
        if buffer.len() >= MAX_REQUEST_HEADER_BYTES {
            debug!("Request header exceeded {MAX_REQUEST_HEADER_BYTES} bytes");
            return None;
        }
        let mut chunk = [0_u8; 1024];
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
}

async fn respond(
    socket: &mut TcpStream,
    request: &Request,
    snapshot: &Snapshot,
) -> Result<(), io::Error> {
    let digest = match &request.route {
        Some(Route::Object(digest)) => digest.clone(),
        // The name route is a placeholder: any name resolves to the root listing.
        Some(Route::Root) => snapshot.root.digest.to_unknown(),
        None => return send_not_found(socket).await,
    };

    let Some(location) = snapshot
        .repository
        .find(&digest)
        .and_then(|locations| locations.first())
    else {
        debug!("No object for digest {digest}");
        return send_not_found(socket).await;
    };

    let header = format!(
        "HTTP/1.0 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        location.size()
    );
    socket.write_all(header.as_bytes()).await?;

    if request.is_head {
        return Ok(());
    }
    send_body(socket, location).await
}

async fn send_not_found(socket: &mut TcpStream) -> Result<(), io::Error> {
    socket
        .write_all(b"HTTP/1.0 404 Not Found\r\nConnection: close\r\n\r\n")
        .await
}

///
/// Streams the object's bytes, verifying against the advertised Content-Length on the fly. On
/// any disagreement the error propagates and the caller closes the socket mid-body, which is the
/// only honest signal left once the header has been sent.
///
async fn send_body(socket: &mut TcpStream, location: &Location) -> Result<(), io::Error> {
    let expected_size = location.size();
    match location {
        Location::InMemory { content } => socket.write_all(content).await,
        Location::OnDisk { path, .. } => {
            let file = tokio::fs::File::open(path).await?;
            let mut chunks = ReaderStream::with_capacity(file, BODY_CHUNK_BYTES);
            let mut sent: u64 = 0;
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                sent += chunk.len() as u64;
                if sent > expected_size {
                    return Err(size_mismatch(path, expected_size));
                }
                socket.write_all(&chunk).await?;
            }
            if sent != expected_size {
                return Err(size_mismatch(path, expected_size));
            }
            Ok(())
        }
    }
}

fn size_mismatch(path: &std::path::Path, expected_size: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{path:?} no longer has the expected size of {expected_size} bytes"),
    )
}

///
/// Scans `root`, serves it on `port`, and keeps the served snapshot consistent with filesystem
/// mutations by rescanning whenever the watcher reports a change. Runs until the watcher dies.
///
pub async fn serve(executor: Executor, root: PathBuf, port: u16) -> Result<(), String> {
    let snapshot = store::scan_directory(&executor, root.clone())
        .await
        .map_err(|e| format!("Failed to scan {root:?}: {e}"))?;
    info!(
        "Scan complete: {} objects, root {}",
        snapshot.repository.len(),
        snapshot.root
    );

    let server = Server::new(executor.clone(), port, snapshot).await?;
    info!("Serving {root:?} on port {}", server.port());

    let watcher = RecursiveDirectoryWatcher::new(executor.clone(), root.clone())?;
    loop {
        match watcher.next_batch().await {
            Ok(events) => {
                debug!("Observed {} filesystem change(s); rescanning", events.len());
                match store::scan_directory(&executor, root.clone()).await {
                    Ok(snapshot) => {
                        debug!("Rescan complete: root {}", snapshot.root);
                        server.store_snapshot(snapshot);
                    }
                    Err(e) => warn!("Rescan of {root:?} failed: {e}"),
                }
            }
            Err(WatchError::Cancelled) => {
                return Err("The filesystem watcher shut down".to_owned());
            }
            Err(e) => warn!("Watcher error: {e}"),
        }
    }
}
