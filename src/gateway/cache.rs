//! Read-through response cache
//!
//! Wraps a downstream handler in a URL-keyed cache: serve the stored
//! response when one is live, otherwise run the handler, hand its response
//! back immediately, and populate the store in the background. Store
//! trouble is never allowed to fail a request that would otherwise
//! succeed; every lookup failure downgrades to a miss.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lode_adapter::CacheStore;
use rama::http::{
    Body, HeaderValue, Response, StatusCode, Uri,
    header::{HeaderMap, HeaderName},
};
use tracing::warn;

use super::tee;
use super::types::CacheStatus;

pub const SERVER_TIMING: HeaderName = HeaderName::from_static("server-timing");

const HIT_MARKER: &str = "hit-state;desc=hit";
const MISS_MARKER: &str = "hit-state;desc=miss";

#[derive(Clone)]
pub struct ReadThroughCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    active: bool,
}

impl ReadThroughCache {
    /// `service_version` is the deployment-identity signal: when it is
    /// absent or empty this is a local/dev run and caching is disabled so
    /// development never depends on the store service.
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration, service_version: Option<&str>) -> Self {
        Self {
            store,
            ttl,
            active: service_version.is_some_and(|v| !v.is_empty()),
        }
    }

    /// Cache key derivation: a pure function of path + query string.
    pub fn cache_key(uri: &Uri) -> String {
        match uri.query() {
            Some(query) => format!("{}?{query}", uri.path()),
            None => uri.path().to_string(),
        }
    }

    /// Serve `uri` through the cache, invoking `downstream` only on a miss
    /// (or when caching is bypassed). The returned status says which of
    /// those happened; the response carries the matching marker header.
    pub async fn handle<F, Fut>(
        &self,
        uri: &Uri,
        downstream: F,
    ) -> Result<(Response<Body>, CacheStatus)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Response<Body>>>,
    {
        if !self.active {
            return Ok((downstream().await?, CacheStatus::Bypass));
        }

        let key = Self::cache_key(uri);
        let body_key = format!("__body__{key}");
        let headers_key = format!("__headers__{key}");

        match self.lookup(&body_key, &headers_key).await {
            Ok(Some(resp)) => return Ok((resp, CacheStatus::Hit)),
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, key = %key, "cache lookup failed, treating as miss");
            }
        }

        let response = downstream().await?;
        let (mut client, snapshot) = tee::duplicate(response).await?;

        // Populate the store off the request path; the client response is
        // already independently satisfied, so write failures only get logged.
        let store = Arc::clone(&self.store);
        let ttl = self.ttl;
        tokio::spawn(async move {
            if let Err(err) = store.set(&body_key, &snapshot.body, ttl).await {
                warn!(error = %err, key = %body_key, "cache body write failed");
            }
            match serialize_headers(&snapshot.headers) {
                Ok(serialized) => {
                    if let Err(err) = store.set(&headers_key, serialized.as_bytes(), ttl).await {
                        warn!(error = %err, key = %headers_key, "cache header write failed");
                    }
                }
                Err(err) => {
                    warn!(error = %err, key = %headers_key, "cache header serialization failed");
                }
            }
        });

        client
            .headers_mut()
            .append(SERVER_TIMING, HeaderValue::from_static(MISS_MARKER));
        Ok((client, CacheStatus::Miss))
    }

    /// A hit needs both entries; a body without its header set is a miss.
    async fn lookup(&self, body_key: &str, headers_key: &str) -> Result<Option<Response<Body>>> {
        let Some(body) = self.store.get(body_key).await? else {
            return Ok(None);
        };
        let Some(raw_headers) = self.store.get(headers_key).await? else {
            return Ok(None);
        };

        let mut headers =
            deserialize_headers(&raw_headers).context("deserializing cached header set")?;
        headers.insert(SERVER_TIMING, HeaderValue::from_static(HIT_MARKER));

        let mut builder = Response::builder().status(StatusCode::OK);
        if let Some(slot) = builder.headers_mut() {
            *slot = headers;
        }
        builder
            .body(Body::from(body))
            .context("building cached response")
            .map(Some)
    }
}

/// Serialize a header map as a JSON name -> value object. Duplicate names
/// collapse into one comma-joined value; non-UTF-8 values are skipped.
pub fn serialize_headers(headers: &HeaderMap) -> Result<String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    serde_json::to_string(&map).context("serializing header set")
}

fn deserialize_headers(raw: &[u8]) -> Result<HeaderMap> {
    let map: BTreeMap<String, String> =
        serde_json::from_slice(raw).context("parsing header set")?;
    let mut headers = HeaderMap::with_capacity(map.len());
    for (name, value) in map {
        let name: HeaderName = name.parse().context("parsing cached header name")?;
        let value = HeaderValue::from_str(&value).context("parsing cached header value")?;
        headers.insert(name, value);
    }
    Ok(headers)
}
