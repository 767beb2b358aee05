//! # Cache System
//!
//! Versioned cache generations. A generation is created and filled during install,
//! served from while its worker is active and deleted wholesale once a newer
//! version activates. Entries are never evicted individually.

// Module declarations
mod manager;
pub mod providers;
mod types;

// Re-export primary types from our various modules
pub use manager::{CacheHandle, CacheStorage};
pub use types::{CacheMetadata, CacheResult, CachedResponse, GenerationId, RequestKey};

pub use providers::{CacheProvider, FileCache, MemoryCache};
