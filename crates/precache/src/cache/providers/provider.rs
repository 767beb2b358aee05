//! # Cache Provider
//!
//! This module defines the cache provider trait that all storage backends must follow.
//! A provider holds any number of named generations, each a flat map of request keys
//! to captured responses.

use async_trait::async_trait;

use crate::cache::types::{CacheResult, CachedResponse, GenerationId, RequestKey};

/// A trait for storage backends that hold cache generations
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Create the generation if it is absent. Returns `true` when it was created by this call.
    async fn open(&self, generation: &GenerationId) -> CacheResult<bool>;

    /// List all generations in creation order
    async fn generations(&self) -> CacheResult<Vec<GenerationId>>;

    /// Remove a generation and every entry in it. Returns `false` if it did not exist.
    async fn delete(&self, generation: &GenerationId) -> CacheResult<bool>;

    /// Get an entry from a generation
    async fn get(
        &self,
        generation: &GenerationId,
        key: &RequestKey,
    ) -> CacheResult<Option<CachedResponse>>;

    /// Store or overwrite one entry
    async fn put(&self, generation: &GenerationId, response: CachedResponse) -> CacheResult<()>;

    /// Store a batch of entries as one unit: either all of them become visible or none does
    async fn put_batch(
        &self,
        generation: &GenerationId,
        responses: Vec<CachedResponse>,
    ) -> CacheResult<()>;

    /// List the keys stored in a generation
    async fn keys(&self, generation: &GenerationId) -> CacheResult<Vec<RequestKey>>;
}
