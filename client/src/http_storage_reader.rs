// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::net::SocketAddr;

use async_trait::async_trait;
use futures::StreamExt;
use hashing::UnknownDigest;
use log::debug;
use reqwest::StatusCode;
use reqwest::header::CONTENT_LENGTH;
use url::Url;

use crate::{LinearFile, ServiceError, StorageReader};

///
/// A StorageReader speaking the object-transfer protocol: `HEAD /hash/<hex>` for sizes and
/// `GET /hash/<hex>` for content, `Content-Length` carrying the object size.
///
pub struct HttpStorageReader {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpStorageReader {
    pub fn new(server: SocketAddr) -> Result<HttpStorageReader, String> {
        let base_url = Url::parse(&format!("http://{server}/"))
            .map_err(|e| format!("Invalid server address {server}: {e}"))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| format!("Failed to create an HTTP client: {e}"))?;
        Ok(HttpStorageReader { client, base_url })
    }

    fn object_url(&self, digest: &UnknownDigest) -> Result<Url, ServiceError> {
        self.base_url
            .join(&format!("hash/{digest}"))
            .map_err(|e| ServiceError::Transport(format!("Could not build an object URL: {e}")))
    }
}

fn content_length(response: &reqwest::Response) -> Result<u64, ServiceError> {
    let header = response
        .headers()
        .get(CONTENT_LENGTH)
        .ok_or_else(|| ServiceError::MalformedResponse("missing Content-Length".to_owned()))?;
    header
        .to_str()
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .ok_or_else(|| {
            ServiceError::MalformedResponse(format!("unparseable Content-Length: {header:?}"))
        })
}

#[async_trait]
impl StorageReader for HttpStorageReader {
    async fn open(&self, digest: &UnknownDigest) -> Result<LinearFile, ServiceError> {
        let url = self.object_url(digest)?;
        debug!("GET {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(ServiceError::FileNotFound);
        }
        let size = content_length(&response)?;

        // The stream ends after `size` bytes even if the peer keeps sending, and ends early if
        // the peer closes first; the consumer sees the short count.
        let content = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ServiceError::Transport(e.to_string())))
            .scan(size, |remaining, chunk| {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => return futures::future::ready(Some(Err(e))),
                };
                if *remaining == 0 {
                    return futures::future::ready(None);
                }
                let take = chunk.len().min(*remaining as usize);
                *remaining -= take as u64;
                futures::future::ready(Some(Ok(chunk.slice(0..take))))
            })
            .boxed();
        Ok(LinearFile { size, content })
    }

    async fn size(&self, digest: &UnknownDigest) -> Result<u64, ServiceError> {
        let url = self.object_url(digest)?;
        debug!("HEAD {url}");
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(ServiceError::FileNotFound);
        }
        content_length(&response)
    }
}
