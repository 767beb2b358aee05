//! # Cache Types
//!
//! This module defines common types used across the caching system.

use std::fmt;

use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::CacheError;

/// Opaque identifier of one cache generation (e.g. `chateau-combo-v1`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(String);

impl GenerationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe directory name for this generation
    pub fn to_dirname(&self) -> String {
        let hash = Sha256::digest(self.0.as_bytes());
        format!("{hash:x}")
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for GenerationId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for GenerationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for GenerationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Cache key for identifying a stored response: request method plus URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    /// Create a key for the given method and URL. Fragments never take part in matching.
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_owned(),
            url: url.into(),
        }
    }

    /// Create a GET key
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    /// Parse an absolute URL into a GET key
    pub fn parse(url: &str) -> Result<Self, CacheError> {
        let url = Url::parse(url).map_err(|e| CacheError::InvalidKey(format!("{url}: {e}")))?;
        Ok(Self::get(&url))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Convert to a filename-safe string
    pub fn to_filename(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(" ");
        hasher.update(self.url.as_bytes());
        let hash = hasher.finalize();
        format!("{hash:x}")
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Metadata for a cached response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Key the entry was stored under
    pub key: RequestKey,
    /// When the response was cached (seconds since the epoch)
    pub cached_at: u64,
    /// HTTP status of the captured response
    pub status: u16,
    /// Captured response headers, in order
    pub headers: Vec<(String, String)>,
    /// Size of the body in bytes
    pub size: u64,
}

impl CacheMetadata {
    pub fn new(key: RequestKey, status: u16, headers: Vec<(String, String)>, size: u64) -> Self {
        Self {
            key,
            cached_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            status,
            headers,
            size,
        }
    }

    /// Content type of the captured response, if any
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
    }
}

/// A response as held by a cache generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub body: Bytes,
    pub metadata: CacheMetadata,
}

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, CacheError>;
