use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::GenerationId;
use crate::error::ConfigError;
use crate::manifest::Manifest;
use crate::response::DEFAULT_OFFLINE_BODY;

const DEFAULT_USER_AGENT: &str = concat!("precache/", env!("CARGO_PKG_VERSION"));

/// Version identifier of the bundled application shell
pub const DEFAULT_VERSION: &str = "chateau-combo-v1";

/// Paths the application shell needs to run offline
pub const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    "/index.html",
    "/css/style.css",
    "/js/app.js",
    "/js/camera.js",
    "/js/scoring.js",
    "/manifest.json",
    "/icons/icon-192.png",
    "/icons/icon-512.png",
];

/// Manifest entry substituted for failed document navigations
pub const DEFAULT_FALLBACK_DOCUMENT: &str = "/index.html";

/// Configuration fixed for the lifetime of one worker version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Version identifier; also the name of the cache generation
    pub version: GenerationId,

    /// Origin manifest paths are resolved against
    pub origin: Url,

    /// Ordered pre-cache manifest
    pub manifest: Vec<String>,

    /// Manifest entry served when a document request fails offline
    pub fallback_document: String,

    /// Body of the synthesized 503 response
    pub offline_body: String,

    /// Request skip-waiting as soon as install succeeds
    pub skip_waiting_on_install: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            version: GenerationId::from(DEFAULT_VERSION),
            origin: Url::parse("http://localhost:8080/").expect("default origin is a valid URL"),
            manifest: DEFAULT_MANIFEST.iter().map(|p| (*p).to_owned()).collect(),
            fallback_document: DEFAULT_FALLBACK_DOCUMENT.to_owned(),
            offline_body: DEFAULT_OFFLINE_BODY.to_owned(),
            skip_waiting_on_install: true,
        }
    }
}

impl WorkerConfig {
    pub fn builder() -> crate::builder::WorkerConfigBuilder {
        crate::builder::WorkerConfigBuilder::new()
    }

    /// Check the configuration and resolve the manifest against the origin
    pub fn validate(&self) -> Result<Manifest, ConfigError> {
        if self.version.as_str().trim().is_empty() {
            return Err(ConfigError::EmptyVersion);
        }

        if !matches!(self.origin.scheme(), "http" | "https") || self.origin.cannot_be_a_base() {
            return Err(ConfigError::InvalidOrigin(self.origin.to_string()));
        }

        if self.manifest.is_empty() {
            return Err(ConfigError::EmptyManifest);
        }

        let manifest = Manifest::resolve(&self.origin, &self.manifest, &self.fallback_document)?;
        if !manifest.iter().any(|url| url == manifest.fallback_document()) {
            return Err(ConfigError::FallbackNotInManifest(
                self.fallback_document.clone(),
            ));
        }
        Ok(manifest)
    }
}

/// Configurable options for the network transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Overall timeout for the entire HTTP request
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Idle timeout of pooled connections
    pub pool_idle_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: TransportConfig::get_default_headers(),
            use_system_proxy: true,
        }
    }
}

impl TransportConfig {
    pub fn builder() -> crate::builder::TransportConfigBuilder {
        crate::builder::TransportConfigBuilder::new()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        default_headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = WorkerConfig::default();
        let manifest = config.validate().unwrap();
        assert_eq!(manifest.len(), DEFAULT_MANIFEST.len());
        assert_eq!(
            manifest.fallback_document().as_str(),
            "http://localhost:8080/index.html"
        );
    }

    #[test]
    fn fallback_must_be_in_manifest() {
        let config = WorkerConfig {
            fallback_document: "/offline.html".into(),
            ..WorkerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FallbackNotInManifest(_))
        ));
    }

    #[test]
    fn fallback_is_matched_after_resolution() {
        let config = WorkerConfig {
            manifest: vec!["/".into(), "/index.html".into()],
            fallback_document: "index.html".into(),
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_ok());

        let config = WorkerConfig {
            manifest: vec!["/".into(), "/index.html#top".into()],
            fallback_document: "https://scores.example/index.html".into(),
            origin: Url::parse("https://scores.example/").unwrap(),
            ..WorkerConfig::default()
        };
        let manifest = config.validate().unwrap();
        assert_eq!(
            manifest.fallback_document().as_str(),
            "https://scores.example/index.html"
        );
    }

    #[test]
    fn empty_version_and_manifest_rejected() {
        let config = WorkerConfig {
            version: GenerationId::from("  "),
            ..WorkerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyVersion)));

        let config = WorkerConfig {
            manifest: Vec::new(),
            ..WorkerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyManifest)));
    }

    #[test]
    fn non_http_origin_rejected() {
        let config = WorkerConfig {
            origin: Url::parse("file:///srv/app/").unwrap(),
            ..WorkerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidOrigin(_))));
    }

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let config: WorkerConfig = serde_json::from_str(
            r#"{"version":"chateau-combo-v2","origin":"https://scores.example/"}"#,
        )
        .unwrap();
        assert_eq!(config.version.as_str(), "chateau-combo-v2");
        assert_eq!(config.manifest.len(), DEFAULT_MANIFEST.len());
        assert!(config.skip_waiting_on_install);
    }
}
