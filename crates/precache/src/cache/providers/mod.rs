//! # Cache Providers
//!
//! This module contains the storage backends a cache store can run on.

pub use self::file::FileCache;
pub use self::memory::MemoryCache;
pub use self::provider::CacheProvider;

// Provider interface
pub mod provider;

// Individual provider implementations
pub mod file;
pub mod memory;
