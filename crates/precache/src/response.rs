//! # Proxy Responses
//!
//! Responses handed back to intercepted requests. A response body is an immutable
//! [`Bytes`] buffer; [`ProxyResponse::duplicate`] splits ownership into two
//! independent copies so one can be returned while the other is persisted.

use std::fmt;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::cache::{CacheMetadata, CachedResponse, RequestKey};

/// Body text of the synthesized response for requests that fail both cache and network
pub const DEFAULT_OFFLINE_BODY: &str = "Content unavailable offline";

/// Where a response handed to the caller came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Served from the current cache generation
    Cache,
    /// Fetched from the network
    Network,
    /// Cached fallback document substituted for a failed navigation
    Fallback,
    /// Synthesized offline response
    Offline,
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseSource::Cache => "cache",
            ResponseSource::Network => "network",
            ResponseSource::Fallback => "fallback",
            ResponseSource::Offline => "offline",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct ProxyResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    source: ResponseSource,
}

impl ProxyResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, source: ResponseSource) -> Self {
        Self {
            status,
            headers,
            body,
            source,
        }
    }

    /// Synthesize the `503 Service Unavailable` offline response
    pub fn offline(body: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            headers,
            body: Bytes::from(body.into()),
            source: ResponseSource::Offline,
        }
    }

    /// Rebuild a response from a cache entry
    pub fn from_cached(cached: CachedResponse, source: ResponseSource) -> Self {
        let status = StatusCode::from_u16(cached.metadata.status).unwrap_or(StatusCode::OK);
        let mut headers = HeaderMap::with_capacity(cached.metadata.headers.len());
        for (name, value) in &cached.metadata.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(header = %name, "Dropping unparsable cached header"),
            }
        }
        Self {
            status,
            headers,
            body: cached.body,
            source,
        }
    }

    /// Capture this response as a cache entry under `key`
    pub fn into_cached(self, key: RequestKey) -> CachedResponse {
        let headers = self
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_owned(), v.to_owned()))
            })
            .collect();
        let size = self.body.len() as u64;
        CachedResponse {
            body: self.body,
            metadata: CacheMetadata::new(key, self.status.as_u16(), headers, size),
        }
    }

    /// Split into two independent readable copies
    pub fn duplicate(self) -> (Self, Self) {
        let copy = Self {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            source: self.source,
        };
        (self, copy)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub fn source(&self) -> ResponseSource {
        self.source
    }

    /// Relabel the origin of this response
    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    /// Whether this response may be written opportunistically to the cache
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }
}
