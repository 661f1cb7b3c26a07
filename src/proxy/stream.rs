//! Response bodies streamed in bounded chunks.
//!
//! The HTTP server polls a body stream only when the connection can take
//! more data, so no chunk is produced ahead of the client.

use std::path::Path;

use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt, future, stream};
use rama::http::Body;
use tracing::warn;

pub const CHUNK_SIZE: usize = 16 * 1024;

/// Splits a buffer into chunks of at most `chunk_size` bytes without copying.
#[derive(Debug)]
pub struct ByteChunks {
    remaining: Bytes,
    chunk_size: usize,
}

impl ByteChunks {
    pub fn new(bytes: Bytes) -> Self {
        Self::with_chunk_size(bytes, CHUNK_SIZE)
    }

    pub fn with_chunk_size(bytes: Bytes, chunk_size: usize) -> Self {
        Self {
            remaining: bytes,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Iterator for ByteChunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        let at = self.remaining.len().min(self.chunk_size);
        Some(self.remaining.split_to(at))
    }
}

/// Body over an in-memory (typically memory-mapped) artifact.
pub fn local_body(bytes: Bytes) -> Body {
    Body::from_stream(stream::iter(
        ByteChunks::new(bytes).map(Ok::<Bytes, std::io::Error>),
    ))
}

/// Body relaying an upstream response, re-chunked to [`CHUNK_SIZE`].
pub fn upstream_body(response: reqwest::Response, target_url: String) -> Body {
    let chunks = response
        .bytes_stream()
        .flat_map(|chunk| match chunk {
            Ok(bytes) => stream::iter(ByteChunks::new(bytes).map(Ok::<Bytes, reqwest::Error>))
                .left_stream(),
            Err(err) => stream::once(future::ready(Err(err))).right_stream(),
        })
        .inspect_err(move |err| {
            warn!(target_url = %target_url, error = %err, "upstream body transfer failed");
        });
    Body::from_stream(chunks)
}

/// Content type for a locally served artifact, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("pom" | "xml") => "application/xml",
        Some("jar") => "application/java-archive",
        Some("sha1" | "md5" | "sha256" | "sha512" | "asc") => "text/plain",
        _ => "application/octet-stream",
    }
}
