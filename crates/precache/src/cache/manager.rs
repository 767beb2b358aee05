//! # Cache Storage Manager
//!
//! The process-wide cache namespace. [`CacheStorage`] opens, lists and deletes
//! generations and performs lookups across them; [`CacheHandle`] is a reference
//! to one open generation.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::cache::providers::{CacheProvider, FileCache, MemoryCache};
use crate::cache::types::{CacheResult, CachedResponse, GenerationId, RequestKey};
use crate::error::CacheError;
use crate::manifest::Manifest;
use crate::network::Transport;
use crate::request::ProxyRequest;

/// Cache storage shared by every worker version
#[derive(Clone)]
pub struct CacheStorage {
    provider: Arc<dyn CacheProvider>,
}

impl CacheStorage {
    /// Create a storage manager on top of any provider
    pub fn new(provider: Arc<dyn CacheProvider>) -> Self {
        Self { provider }
    }

    /// Process-local storage
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()))
    }

    /// Persistent storage rooted at `dir`
    pub fn on_disk(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileCache::new(dir)))
    }

    /// Open a generation, creating it if absent
    pub async fn open(&self, generation: &GenerationId) -> CacheResult<CacheHandle> {
        let created = self.provider.open(generation).await?;
        if created {
            debug!(generation = %generation, "Opened new cache generation");
        }
        Ok(CacheHandle {
            generation: generation.clone(),
            provider: self.provider.clone(),
            created,
        })
    }

    /// Search every generation, oldest first, for `key`. Read failures count as misses.
    pub async fn lookup(&self, key: &RequestKey) -> Option<CachedResponse> {
        let generations = match self.provider.generations().await {
            Ok(generations) => generations,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to list cache generations");
                return None;
            }
        };

        for generation in &generations {
            match self.provider.get(generation, key).await {
                Ok(Some(hit)) => return Some(hit),
                Ok(None) => {}
                Err(e) => {
                    warn!(generation = %generation, key = %key, error = %e, "Cache read failed");
                }
            }
        }
        None
    }

    /// All generations currently held, in creation order
    pub async fn list_generations(&self) -> CacheResult<Vec<GenerationId>> {
        self.provider.generations().await
    }

    /// Remove a generation and all its entries. Deleting an absent generation is a no-op.
    pub async fn delete(&self, generation: &GenerationId) -> CacheResult<bool> {
        let removed = self.provider.delete(generation).await?;
        if removed {
            info!(generation = %generation, "Deleted cache generation");
        }
        Ok(removed)
    }
}

/// Reference to one open generation
#[derive(Clone)]
pub struct CacheHandle {
    generation: GenerationId,
    provider: Arc<dyn CacheProvider>,
    created: bool,
}

impl CacheHandle {
    pub fn generation(&self) -> &GenerationId {
        &self.generation
    }

    /// Whether the generation did not exist before this handle was opened
    pub fn was_created(&self) -> bool {
        self.created
    }

    /// Look up `key` in this generation only
    pub async fn get(&self, key: &RequestKey) -> Option<CachedResponse> {
        match self.provider.get(&self.generation, key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(generation = %self.generation, key = %key, error = %e, "Cache read failed");
                None
            }
        }
    }

    /// Store or overwrite one entry
    pub async fn put(&self, response: CachedResponse) -> CacheResult<()> {
        self.provider.put(&self.generation, response).await
    }

    /// Fetch every manifest entry and store all of them as one unit.
    ///
    /// Any failed fetch, non-success status or storage error fails the whole call and
    /// leaves no entry of this batch in the generation.
    pub async fn put_all(&self, manifest: &Manifest, transport: &dyn Transport) -> CacheResult<()> {
        let fetches = manifest.iter().map(|url| async move {
            let request = ProxyRequest::get(url.clone());
            let response = transport.fetch(&request).await.map_err(|e| {
                CacheError::ManifestFetchFailure {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            })?;
            if !response.status().is_success() {
                return Err(CacheError::ManifestFetchFailure {
                    url: url.to_string(),
                    reason: format!("status {}", response.status()),
                });
            }
            Ok(response.into_cached(request.key()))
        });

        let responses = try_join_all(fetches).await?;
        let count = responses.len();
        self.provider.put_batch(&self.generation, responses).await?;

        info!(generation = %self.generation, count, "Pre-cached manifest entries");
        Ok(())
    }

    /// Keys stored in this generation
    pub async fn keys(&self) -> CacheResult<Vec<RequestKey>> {
        self.provider.keys(&self.generation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::CacheMetadata;
    use bytes::Bytes;

    fn entry(url: &str, body: &'static str) -> CachedResponse {
        CachedResponse {
            body: Bytes::from_static(body.as_bytes()),
            metadata: CacheMetadata::new(
                RequestKey::parse(url).unwrap(),
                200,
                Vec::new(),
                body.len() as u64,
            ),
        }
    }

    #[tokio::test]
    async fn open_reports_creation_once() {
        let storage = CacheStorage::in_memory();
        let first = storage.open(&"v1".into()).await.unwrap();
        let second = storage.open(&"v1".into()).await.unwrap();
        assert!(first.was_created());
        assert!(!second.was_created());
        assert_eq!(storage.list_generations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lookup_searches_oldest_generation_first() {
        let storage = CacheStorage::in_memory();
        let old = storage.open(&"v1".into()).await.unwrap();
        let new = storage.open(&"v2".into()).await.unwrap();
        old.put(entry("https://a.test/app.js", "old")).await.unwrap();
        new.put(entry("https://a.test/app.js", "new")).await.unwrap();
        new.put(entry("https://a.test/only-new.js", "fresh"))
            .await
            .unwrap();

        let key = RequestKey::parse("https://a.test/app.js").unwrap();
        assert_eq!(storage.lookup(&key).await.unwrap().body, "old");
        assert_eq!(new.get(&key).await.unwrap().body, "new");

        let only_new = RequestKey::parse("https://a.test/only-new.js").unwrap();
        assert!(storage.lookup(&only_new).await.is_some());
        assert!(old.get(&only_new).await.is_none());
    }

    #[tokio::test]
    async fn lookup_miss_is_none() {
        let storage = CacheStorage::in_memory();
        let key = RequestKey::parse("https://a.test/missing").unwrap();
        assert!(storage.lookup(&key).await.is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let storage = CacheStorage::in_memory();
        storage.open(&"v1".into()).await.unwrap();
        assert!(storage.delete(&"v1".into()).await.unwrap());
        assert!(!storage.delete(&"v1".into()).await.unwrap());
    }
}
