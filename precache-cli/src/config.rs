use anyhow::{Context, Result};
use precache_engine::{TransportConfig, WorkerConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Args;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding cache generations
    pub cache_dir: PathBuf,

    /// Address `serve` listens on
    pub listen: SocketAddr,

    /// Request timeout in seconds
    pub timeout: u64,

    /// Connection timeout in seconds
    pub connect_timeout: u64,

    /// User agent string for requests
    pub user_agent: Option<String>,

    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,

    /// Use system proxy settings
    pub use_system_proxy: bool,

    /// Deployed version, manifest and fallback settings
    pub worker: WorkerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".precache"),
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            timeout: 30,
            connect_timeout: 10,
            user_agent: None,
            headers: BTreeMap::new(),
            use_system_proxy: true,
            worker: WorkerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
                toml::from_str(&content).context("Failed to parse configuration file")
            }
            _ => Ok(Self::default()),
        }
    }

    /// Apply command line overrides
    pub fn apply_args(&mut self, args: &Args) -> Result<(), AppError> {
        if let Some(dir) = &args.cache_dir {
            self.cache_dir = dir.clone();
        }
        if let Some(timeout) = args.timeout {
            self.timeout = timeout;
        }
        if let Some(timeout) = args.connect_timeout {
            self.connect_timeout = timeout;
        }
        if args.no_proxy {
            self.use_system_proxy = false;
        }
        for header in &args.headers {
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| AppError::InvalidInput(format!("header {header:?} is not \"Name: value\"")))?;
            self.headers
                .insert(name.trim().to_owned(), value.trim().to_owned());
        }
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        let mut builder = TransportConfig::builder()
            .with_timeout(Duration::from_secs(self.timeout))
            .with_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_system_proxy(self.use_system_proxy);
        if let Some(user_agent) = &self.user_agent {
            builder = builder.with_user_agent(user_agent);
        }
        for (name, value) in &self.headers {
            builder = builder.with_header(name, value);
        }
        builder.build()
    }
}
