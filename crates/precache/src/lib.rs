//! # Precache Engine
//!
//! An offline-first caching layer for a web application shell. Each deployed
//! version pre-caches a fixed manifest into its own cache generation, then serves
//! intercepted requests cache-first with network fallback.
//!
//! ## Features
//!
//! - Versioned cache generations stored in memory or on disk
//! - Atomic manifest pre-caching during install
//! - Worker lifecycle with waiting, skip-waiting and client claiming
//! - Opportunistic caching of successful network responses
//! - Offline fallback to the application shell document or a synthesized 503

pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod manifest;
pub mod network;
pub mod registration;
pub mod request;
pub mod response;
pub mod test_utils;
pub mod worker;

pub use builder::{TransportConfigBuilder, WorkerConfigBuilder};
pub use cache::{CacheHandle, CacheStorage, CachedResponse, GenerationId, RequestKey};
pub use config::{TransportConfig, WorkerConfig};
pub use error::{CacheError, ConfigError, NetworkError, WorkerError};
pub use manifest::Manifest;
pub use network::{HttpTransport, Transport, create_client};
pub use registration::{ClientId, Registration};
pub use request::{ProxyRequest, RequestDestination};
pub use response::{ProxyResponse, ResponseSource};
pub use worker::{ActivationReport, ControlMessage, FetchOutcome, ServiceWorker, WorkerState};
