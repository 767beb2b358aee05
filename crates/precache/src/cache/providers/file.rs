//! # File Cache
//!
//! This module implements a file-based persistent cache provider.
//!
//! Each generation lives in its own directory named after the hash of its id:
//!
//! ```text
//! <root>/<sha256(id)>/generation.json
//! <root>/<sha256(id)>/entries/<sha256(key)>.body
//! <root>/<sha256(id)>/entries/<sha256(key)>.meta
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{self, AsyncWriteExt};
use tracing::{debug, warn};

use crate::cache::types::{
    CacheMetadata, CacheResult, CachedResponse, GenerationId, RequestKey,
};
use crate::error::CacheError;

use super::CacheProvider;

const GENERATION_FILE: &str = "generation.json";
const ENTRIES_DIR: &str = "entries";

/// Suffix source for staging files, unique within the process
static STAGE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Descriptor written once when a generation directory is created
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GenerationDescriptor {
    id: GenerationId,
    created_at: u64,
    sequence: u64,
}

#[derive(Debug, Clone)]
pub struct FileCache {
    cache_dir: PathBuf,
    /// Held while staged files are renamed into place, so the body and metadata
    /// of one entry always come from the same writer
    promote: Arc<tokio::sync::Mutex<()>>,
}

impl FileCache {
    /// Create a new file cache rooted at the specified directory
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            promote: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn generation_dir(&self, generation: &GenerationId) -> PathBuf {
        self.cache_dir.join(generation.to_dirname())
    }

    fn entries_dir(&self, generation: &GenerationId) -> PathBuf {
        self.generation_dir(generation).join(ENTRIES_DIR)
    }

    /// Get the body path for a cached entry
    fn body_path(&self, generation: &GenerationId, key: &RequestKey) -> PathBuf {
        let mut path = self.entries_dir(generation).join(key.to_filename());
        path.set_extension("body");
        path
    }

    /// Get the metadata path for a cached entry
    fn metadata_path(&self, generation: &GenerationId, key: &RequestKey) -> PathBuf {
        let mut path = self.entries_dir(generation).join(key.to_filename());
        path.set_extension("meta");
        path
    }

    async fn ensure_root(&self) -> CacheResult<()> {
        fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(CacheError::from_storage_io)
    }

    async fn read_descriptors(&self) -> CacheResult<Vec<GenerationDescriptor>> {
        let mut descriptors = Vec::new();
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(descriptors),
            Err(e) => return Err(CacheError::from_storage_io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path().join(GENERATION_FILE);
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = ?path, error = %e, "Failed to read generation descriptor");
                    continue;
                }
            };
            match serde_json::from_slice::<GenerationDescriptor>(&bytes) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => {
                    warn!(path = ?path, error = %e, "Skipping generation with corrupt descriptor");
                }
            }
        }

        descriptors.sort_by_key(|d| (d.sequence, d.created_at));
        Ok(descriptors)
    }

    async fn require_generation(&self, generation: &GenerationId) -> CacheResult<()> {
        let descriptor = self.generation_dir(generation).join(GENERATION_FILE);
        if fs::try_exists(&descriptor).await? {
            Ok(())
        } else {
            Err(CacheError::UnknownGeneration(generation.clone()))
        }
    }

    /// Write body and metadata of one entry to temporary files. Returns the
    /// (temporary, final) path pairs to rename.
    async fn stage_entry(
        &self,
        generation: &GenerationId,
        response: &CachedResponse,
    ) -> CacheResult<[(PathBuf, PathBuf); 2]> {
        let key = &response.metadata.key;
        let body_path = self.body_path(generation, key);
        let meta_path = self.metadata_path(generation, key);
        let stage = format!(
            "{}-{}",
            std::process::id(),
            STAGE_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        let temp_body_path = body_path.with_extension(format!("body.{stage}.tmp"));
        let temp_meta_path = meta_path.with_extension(format!("meta.{stage}.tmp"));

        let metadata_json = serde_json::to_vec(&response.metadata)?;

        if let Err(e) = fs::write(&temp_body_path, &response.body).await {
            warn!(path = ?temp_body_path, error = %e, "Failed to write cache body file");
            return Err(CacheError::from_storage_io(e));
        }

        if let Err(e) = fs::write(&temp_meta_path, &metadata_json).await {
            warn!(path = ?temp_meta_path, error = %e, "Failed to write cache metadata file");
            let _ = fs::remove_file(&temp_body_path).await;
            return Err(CacheError::from_storage_io(e));
        }

        Ok([(temp_body_path, body_path), (temp_meta_path, meta_path)])
    }

    async fn discard_staged(staged: &[(PathBuf, PathBuf)]) {
        for (temp, _) in staged {
            let _ = fs::remove_file(temp).await;
        }
    }
}

#[async_trait::async_trait]
impl CacheProvider for FileCache {
    async fn open(&self, generation: &GenerationId) -> CacheResult<bool> {
        self.ensure_root().await?;

        let dir = self.generation_dir(generation);
        let descriptor_path = dir.join(GENERATION_FILE);
        if fs::try_exists(&descriptor_path).await? {
            return Ok(false);
        }

        fs::create_dir_all(dir.join(ENTRIES_DIR))
            .await
            .map_err(CacheError::from_storage_io)?;

        let sequence = self
            .read_descriptors()
            .await?
            .last()
            .map(|d| d.sequence + 1)
            .unwrap_or(0);
        let descriptor = GenerationDescriptor {
            id: generation.clone(),
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            sequence,
        };

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&descriptor_path)
            .await
        {
            Ok(file) => file,
            // Another task opened the same generation first
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(CacheError::from_storage_io(e)),
        };
        file.write_all(&serde_json::to_vec(&descriptor)?)
            .await
            .map_err(CacheError::from_storage_io)?;
        file.flush().await?;

        debug!(generation = %generation, dir = ?dir, "Created file cache generation");
        Ok(true)
    }

    async fn generations(&self) -> CacheResult<Vec<GenerationId>> {
        Ok(self
            .read_descriptors()
            .await?
            .into_iter()
            .map(|d| d.id)
            .collect())
    }

    async fn delete(&self, generation: &GenerationId) -> CacheResult<bool> {
        let dir = self.generation_dir(generation);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(generation = %generation, "Removed file cache generation");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => {
                warn!(dir = ?dir, error = %e, "Failed to remove cache generation");
                Err(CacheError::Io(e))
            }
        }
    }

    async fn get(
        &self,
        generation: &GenerationId,
        key: &RequestKey,
    ) -> CacheResult<Option<CachedResponse>> {
        let body_path = self.body_path(generation, key);
        let meta_path = self.metadata_path(generation, key);

        let metadata_bytes = match fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(path = ?meta_path, error = %e, "Failed to read cache metadata file");
                return Ok(None);
            }
        };

        let metadata: CacheMetadata = match serde_json::from_slice(&metadata_bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = ?meta_path, error = %e, "Failed to parse cache metadata");

                // Delete invalid cache entry as a background task
                tokio::spawn(async move {
                    let _ = fs::remove_file(&body_path).await;
                    let _ = fs::remove_file(&meta_path).await;
                });
                return Ok(None);
            }
        };

        // Hash collisions are not expected, but a mismatch must never be served
        if &metadata.key != key {
            warn!(expected = %key, found = %metadata.key, "Cache metadata key mismatch");
            return Ok(None);
        }

        let body = match fs::read(&body_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = ?body_path, error = %e, "Failed to read cache body file");
                return Ok(None);
            }
        };

        if body.len() as u64 != metadata.size {
            warn!(
                key = %key,
                expected = metadata.size,
                found = body.len(),
                "Cache body does not match its metadata"
            );
            return Ok(None);
        }

        Ok(Some(CachedResponse {
            body: Bytes::from(body),
            metadata,
        }))
    }

    async fn put(&self, generation: &GenerationId, response: CachedResponse) -> CacheResult<()> {
        self.put_batch(generation, vec![response]).await
    }

    async fn put_batch(
        &self,
        generation: &GenerationId,
        responses: Vec<CachedResponse>,
    ) -> CacheResult<()> {
        self.require_generation(generation).await?;

        // Stage every entry first so a failure leaves nothing visible
        let mut staged = Vec::with_capacity(responses.len() * 2);
        for response in &responses {
            match self.stage_entry(generation, response).await {
                Ok(pair) => staged.extend(pair),
                Err(e) => {
                    Self::discard_staged(&staged).await;
                    return Err(e);
                }
            }
        }

        // Bodies are promoted before their metadata; rollback only ever touches
        // files this call promoted while holding the lock
        let _promote = self.promote.lock().await;
        for (index, (temp, target)) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(temp, target).await {
                warn!(
                    from = ?temp,
                    to = ?target,
                    error = %e,
                    "Failed to rename temporary cache file"
                );
                Self::discard_staged(&staged[index..]).await;
                // Roll back what was already promoted
                for (_, promoted) in &staged[..index] {
                    let _ = fs::remove_file(promoted).await;
                }
                return Err(CacheError::from_storage_io(e));
            }
        }

        debug!(
            generation = %generation,
            count = responses.len(),
            "Successfully cached entries to file"
        );
        Ok(())
    }

    async fn keys(&self, generation: &GenerationId) -> CacheResult<Vec<RequestKey>> {
        self.require_generation(generation).await?;

        let mut keys = Vec::new();
        let mut entries = fs::read_dir(self.entries_dir(generation)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("meta") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<CacheMetadata>(&bytes) {
                Ok(metadata) => keys.push(metadata.key),
                Err(e) => warn!(path = ?path, error = %e, "Skipping corrupt cache metadata"),
            }
        }

        keys.sort_by(|a, b| a.url().cmp(b.url()));
        Ok(keys)
    }
}
