use crate::cache::GenerationId;

/// Errors raised by the cache storage layer
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Failed to fetch manifest entry {url}: {reason}")]
    ManifestFetchFailure { url: String, reason: String },

    #[error("Generation {0} does not exist")]
    UnknownGeneration(GenerationId),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl CacheError {
    /// Map an I/O error to `StorageUnavailable` when the host refuses storage
    pub(crate) fn from_storage_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::PermissionDenied
            | ErrorKind::ReadOnlyFilesystem
            | ErrorKind::StorageFull
            | ErrorKind::QuotaExceeded => CacheError::StorageUnavailable(err.to_string()),
            _ => CacheError::Io(err),
        }
    }
}

/// Errors raised by the network transport
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Network unreachable: {0}")]
    Unreachable(String),
}

/// Errors raised while driving a worker through its lifecycle
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Install of {version} failed: {source}")]
    InstallFailed {
        version: GenerationId,
        #[source]
        source: CacheError,
    },

    #[error("Activation of {version} failed: {source}")]
    ActivationFailed {
        version: GenerationId,
        #[source]
        source: CacheError,
    },

    #[error("Invalid lifecycle transition for {version}: cannot {action} while {state}")]
    InvalidTransition {
        version: GenerationId,
        action: &'static str,
        state: crate::worker::WorkerState,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Version identifier must not be empty")]
    EmptyVersion,

    #[error("Origin must be an absolute http(s) URL: {0}")]
    InvalidOrigin(String),

    #[error("Pre-cache manifest must not be empty")]
    EmptyManifest,

    #[error("Manifest entry {path} cannot be resolved against the origin: {reason}")]
    InvalidManifestEntry { path: String, reason: String },

    #[error("Fallback document {0} is not part of the manifest")]
    FallbackNotInManifest(String),
}
