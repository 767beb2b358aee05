use std::sync::Arc;

use precache_engine::{
    CacheStorage, GenerationId, HttpTransport, ProxyRequest, Registration, RequestDestination,
    ServiceWorker, Transport,
};
use tracing::{info, warn};
use url::Url;

use crate::config::AppConfig;
use crate::error::{AppError, Result};

pub struct CommandExecutor {
    config: AppConfig,
    storage: CacheStorage,
    transport: Arc<dyn Transport>,
}

impl CommandExecutor {
    pub fn new(config: AppConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.transport_config())?;
        let storage = CacheStorage::on_disk(&config.cache_dir);
        info!(cache_dir = %config.cache_dir.display(), "Using on-disk cache storage");
        Ok(Self {
            config,
            storage,
            transport: Arc::new(transport),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registration(&self) -> Registration {
        Registration::new(self.storage.clone(), self.transport.clone())
    }

    /// Restore the configured version from storage, installing it if needed.
    /// Falls back to the newest complete stored generation when the install fails.
    pub async fn start(&self, registration: &Registration) -> Result<Arc<ServiceWorker>> {
        Ok(registration.start(self.config.worker.clone()).await?)
    }

    pub async fn install(&self) -> Result<()> {
        let registration = self.registration();
        let worker = registration.register(self.config.worker.clone()).await?;
        println!(
            "Installed {} ({} entries), state: {}",
            worker.version(),
            worker.manifest().len(),
            worker.state()
        );
        self.generations().await
    }

    pub async fn fetch(&self, targets: &[String], document: bool) -> Result<()> {
        let registration = self.registration();
        if let Err(e) = self.start(&registration).await {
            warn!(error = %e, "No usable version, requests go straight to the network");
        }

        for target in targets {
            let mut request = ProxyRequest::get(self.resolve(target)?);
            if document {
                request = request.with_destination(RequestDestination::Document);
            }
            match registration.fetch(&request).await {
                Ok(response) => println!(
                    "{:<4} {:<8} {:>9}  {}",
                    response.status().as_u16(),
                    response.source(),
                    response.body().len(),
                    request.url()
                ),
                Err(e) => println!("ERR  {e}  {}", request.url()),
            }
        }

        registration.settle().await;
        Ok(())
    }

    pub async fn generations(&self) -> Result<()> {
        let generations = self.storage.list_generations().await?;
        if generations.is_empty() {
            println!("No cache generations stored in {}", self.config.cache_dir.display());
            return Ok(());
        }
        for generation in generations {
            let entries = self.storage.open(&generation).await?.keys().await?.len();
            let marker = if generation == self.config.worker.version { "*" } else { " " };
            println!("{marker} {generation:<32} {entries:>6} entries");
        }
        Ok(())
    }

    pub async fn purge(&self, generation: &str) -> Result<()> {
        if self.storage.delete(&GenerationId::from(generation)).await? {
            println!("Deleted generation {generation}");
        } else {
            println!("Generation {generation} not present");
        }
        Ok(())
    }

    /// Accept absolute URLs or paths relative to the configured origin
    fn resolve(&self, target: &str) -> Result<Url> {
        Url::parse(target)
            .or_else(|_| self.config.worker.origin.join(target))
            .map_err(|e| AppError::InvalidInput(format!("{target}: {e}")))
    }
}
