//! Response duplication
//!
//! A response body is a one-shot stream, but a cache miss needs the same
//! bytes twice: once for the client, once for the background cache writer.
//! `duplicate` buffers the body a single time into reference-counted
//! [`Bytes`] and hands out two independent consumers of it.

use anyhow::{Context, Result};
use bytes::Bytes;
use rama::http::{Body, HeaderMap, Response, StatusCode, body::util::BodyExt};

/// The cache-bound copy of a duplicated response.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Split a response into a client-facing response and a snapshot for the
/// cache writer. Both carry the original status and headers; the two body
/// handles share one buffer and are consumed independently.
pub async fn duplicate(response: Response<Body>) -> Result<(Response<Body>, ResponseSnapshot)> {
    let (parts, body) = response.into_parts();
    let bytes = body
        .collect()
        .await
        .context("buffering response body for duplication")?
        .to_bytes();

    let snapshot = ResponseSnapshot {
        status: parts.status,
        headers: parts.headers.clone(),
        body: bytes.clone(),
    };
    let client = Response::from_parts(parts, Body::from(bytes));
    Ok((client, snapshot))
}
