//! # Memory Cache Provider
//!
//! This module provides an in-process cache provider. Generations live in insertion
//! order; an optional byte quota makes writes fail the way a host refusing storage would.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::cache::providers::CacheProvider;
use crate::cache::types::{CacheResult, CachedResponse, GenerationId, RequestKey};
use crate::error::CacheError;

struct Generation {
    id: GenerationId,
    entries: HashMap<RequestKey, CachedResponse>,
}

impl Generation {
    fn size(&self) -> u64 {
        self.entries.values().map(|e| e.body.len() as u64).sum()
    }
}

/// Memory cache provider implementation
#[derive(Default)]
pub struct MemoryCache {
    generations: RwLock<Vec<Generation>>,
    /// Maximum number of body bytes across all generations
    quota: Option<u64>,
}

impl MemoryCache {
    /// Create an unbounded memory cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory cache that refuses writes beyond `quota_bytes`
    pub fn with_quota(quota_bytes: u64) -> Self {
        debug!(quota = quota_bytes, "Memory cache created with quota");
        Self {
            generations: RwLock::new(Vec::new()),
            quota: Some(quota_bytes),
        }
    }

    /// Total body bytes held across all generations
    pub fn size(&self) -> u64 {
        self.generations.read().iter().map(Generation::size).sum()
    }

    fn check_quota(
        &self,
        generations: &[Generation],
        generation: &GenerationId,
        incoming: &[CachedResponse],
    ) -> CacheResult<()> {
        let Some(quota) = self.quota else {
            return Ok(());
        };

        // A key repeated within the batch is stored once, last write wins
        let mut batch: HashMap<&RequestKey, u64> = HashMap::with_capacity(incoming.len());
        for response in incoming {
            batch.insert(&response.metadata.key, response.body.len() as u64);
        }

        let existing = generations.iter().find(|g| &g.id == generation);
        // Entries about to be overwritten no longer count against the quota
        let replaced: u64 = existing
            .map(|g| {
                batch
                    .keys()
                    .filter_map(|key| g.entries.get(*key))
                    .map(|e| e.body.len() as u64)
                    .sum()
            })
            .unwrap_or(0);
        let used: u64 = generations.iter().map(Generation::size).sum();
        let added: u64 = batch.values().sum();

        if used.saturating_sub(replaced) + added > quota {
            warn!(
                generation = %generation,
                used,
                added,
                quota,
                "Memory cache quota exceeded"
            );
            return Err(CacheError::StorageUnavailable(format!(
                "quota of {quota} bytes exceeded"
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheProvider for MemoryCache {
    async fn open(&self, generation: &GenerationId) -> CacheResult<bool> {
        let mut generations = self.generations.write();
        if generations.iter().any(|g| &g.id == generation) {
            return Ok(false);
        }
        generations.push(Generation {
            id: generation.clone(),
            entries: HashMap::new(),
        });
        debug!(generation = %generation, "Created memory cache generation");
        Ok(true)
    }

    async fn generations(&self) -> CacheResult<Vec<GenerationId>> {
        Ok(self
            .generations
            .read()
            .iter()
            .map(|g| g.id.clone())
            .collect())
    }

    async fn delete(&self, generation: &GenerationId) -> CacheResult<bool> {
        let mut generations = self.generations.write();
        let before = generations.len();
        generations.retain(|g| &g.id != generation);
        Ok(generations.len() != before)
    }

    async fn get(
        &self,
        generation: &GenerationId,
        key: &RequestKey,
    ) -> CacheResult<Option<CachedResponse>> {
        Ok(self
            .generations
            .read()
            .iter()
            .find(|g| &g.id == generation)
            .and_then(|g| g.entries.get(key).cloned()))
    }

    async fn put(&self, generation: &GenerationId, response: CachedResponse) -> CacheResult<()> {
        self.put_batch(generation, vec![response]).await
    }

    async fn put_batch(
        &self,
        generation: &GenerationId,
        responses: Vec<CachedResponse>,
    ) -> CacheResult<()> {
        let mut generations = self.generations.write();
        self.check_quota(&generations, generation, &responses)?;

        let target = generations
            .iter_mut()
            .find(|g| &g.id == generation)
            .ok_or_else(|| CacheError::UnknownGeneration(generation.clone()))?;

        for response in responses {
            target.entries.insert(response.metadata.key.clone(), response);
        }
        Ok(())
    }

    async fn keys(&self, generation: &GenerationId) -> CacheResult<Vec<RequestKey>> {
        let generations = self.generations.read();
        let target = generations
            .iter()
            .find(|g| &g.id == generation)
            .ok_or_else(|| CacheError::UnknownGeneration(generation.clone()))?;
        let mut keys: Vec<_> = target.entries.keys().cloned().collect();
        keys.sort_by(|a, b| a.url().cmp(b.url()));
        Ok(keys)
    }
}
