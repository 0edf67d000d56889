// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use hashing::UnknownDigest;

///
/// What an accepted request asks for. Methods other than HEAD are all handled as GET, so only
/// the HEAD-ness of the method survives parsing.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Request {
    pub is_head: bool,
    pub route: Option<Route>,
}

///
/// A resolved request path. `None` at the `Request` level means the path matched no route (or a
/// digest segment did not parse) and the response is 404.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Route {
    /// Fetch the object with this digest.
    Object(UnknownDigest),
    /// Fetch the root listing. The `/get/name/<name>` route currently resolves every name here.
    Root,
}

impl Request {
    ///
    /// Parses a request header (everything before the blank line). None means the header is
    /// malformed and the connection should close without replying.
    ///
    pub fn parse(header: &[u8]) -> Option<Request> {
        let header = std::str::from_utf8(header).ok()?;
        let request_line = header.lines().next()?;
        let mut parts = request_line.split(' ');
        let method = parts.next()?;
        let path = parts.next()?;
        let version = parts.next()?;
        if parts.next().is_some() || !version.starts_with("HTTP/") {
            return None;
        }
        Some(Request {
            is_head: method == "HEAD",
            route: route(path),
        })
    }
}

///
/// The URL grammar:
///
/// ```text
/// /get/hash/<hex-digest>     - fetch object body
/// /get/name/<utf8-name>      - reserved; resolves to the root
/// /browse/hash/<hex-digest>  - future human-readable listing; serves the object for now
/// /hash/<hex-digest>         - legacy shorthand for /get/hash/<...>
/// ```
///
/// A digest segment must parse as hex in its entirety, or the route does not match.
///
fn route(path: &str) -> Option<Route> {
    let segments: Vec<&str> = path.strip_prefix('/')?.split('/').collect();
    match segments[..] {
        ["hash", digest] | ["get", "hash", digest] | ["browse", "hash", digest] => {
            UnknownDigest::from_hex_segment(digest).map(Route::Object)
        }
        ["get", "name", name] if !name.is_empty() => Some(Route::Root),
        _ => None,
    }
}
