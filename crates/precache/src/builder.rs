//! # Configuration builders
//!
//! Fluent builders for [`WorkerConfig`] and [`TransportConfig`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use precache_engine::{TransportConfig, WorkerConfig};
//!
//! let worker = WorkerConfig::builder()
//!     .version("chateau-combo-v2")
//!     .origin("https://scores.example/")
//!     .manifest(["/", "/index.html", "/js/app.js"])
//!     .fallback_document("/index.html")
//!     .build()
//!     .unwrap();
//!
//! let transport = TransportConfig::builder()
//!     .with_timeout(Duration::from_secs(15))
//!     .with_user_agent("ScoreKeeper/1.0")
//!     .build();
//! ```

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::cache::GenerationId;
use crate::config::{TransportConfig, WorkerConfig};
use crate::error::ConfigError;

/// Builder for [`WorkerConfig`]. `build` validates the result.
#[derive(Debug, Clone)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
    /// Origin that failed to parse, reported by `build`
    invalid_origin: Option<String>,
}

impl WorkerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: WorkerConfig::default(),
            invalid_origin: None,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = GenerationId::new(version);
        self
    }

    pub fn origin(mut self, origin: &str) -> Self {
        match Url::parse(origin) {
            Ok(url) => {
                self.config.origin = url;
                self.invalid_origin = None;
            }
            Err(_) => self.invalid_origin = Some(origin.to_owned()),
        }
        self
    }

    /// Replace the manifest
    pub fn manifest<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.manifest = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn fallback_document(mut self, path: impl Into<String>) -> Self {
        self.config.fallback_document = path.into();
        self
    }

    pub fn offline_body(mut self, body: impl Into<String>) -> Self {
        self.config.offline_body = body.into();
        self
    }

    pub fn skip_waiting_on_install(mut self, skip: bool) -> Self {
        self.config.skip_waiting_on_install = skip;
        self
    }

    pub fn build(self) -> Result<WorkerConfig, ConfigError> {
        if let Some(origin) = self.invalid_origin {
            return Err(ConfigError::InvalidOrigin(origin));
        }
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for WorkerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`TransportConfig`]
#[derive(Debug, Clone)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
        }
    }

    /// Set the overall timeout for the entire HTTP request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Set all HTTP headers, replacing any existing headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.config.headers = headers;
        self
    }

    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        self.config.use_system_proxy = use_system_proxy;
        self
    }

    pub fn build(self) -> TransportConfig {
        self.config
    }
}

impl Default for TransportConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_builder_validates() {
        let config = WorkerConfigBuilder::new()
            .version("v7")
            .origin("https://scores.example/app/")
            .manifest(["/app/", "/app/index.html"])
            .fallback_document("/app/index.html")
            .offline_body("Hors ligne")
            .build()
            .unwrap();
        assert_eq!(config.version.as_str(), "v7");
        assert_eq!(config.offline_body, "Hors ligne");
        assert!(config.skip_waiting_on_install);

        let err = WorkerConfigBuilder::new()
            .manifest(["/"])
            .fallback_document("/index.html")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::FallbackNotInManifest(_)));
    }

    #[test]
    fn unparsable_origin_reported_on_build() {
        let err = WorkerConfigBuilder::new()
            .origin("not a url")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOrigin(origin) if origin == "not a url"));
    }

    #[test]
    fn transport_builder_customization() {
        let config = TransportConfigBuilder::new()
            .with_timeout(Duration::from_secs(60))
            .with_connect_timeout(Duration::from_secs(20))
            .with_follow_redirects(false)
            .with_user_agent("ScoreKeeper/1.0")
            .with_header("X-Client", "kiosk")
            .with_header("bad header", "ignored")
            .with_system_proxy(false)
            .build();

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(20));
        assert!(!config.follow_redirects);
        assert_eq!(config.user_agent, "ScoreKeeper/1.0");
        assert!(!config.use_system_proxy);
        assert_eq!(config.headers.get("X-Client").unwrap(), "kiosk");
        assert!(config.headers.get("bad header").is_none());
    }
}
