//! # Registration
//!
//! The host side of the worker lifecycle. A [`Registration`] installs new versions
//! one at a time, decides when a waiting version may activate, claims open clients
//! for the newly active version and routes requests to whichever version controls
//! the requesting client.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::config::WorkerConfig;
use crate::error::{NetworkError, WorkerError};
use crate::network::Transport;
use crate::request::ProxyRequest;
use crate::response::ProxyResponse;
use crate::worker::{ActivationReport, ControlMessage, FetchOutcome, ServiceWorker};

/// Identifier of one open application instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

#[derive(Default)]
struct Slots {
    installing: Option<Arc<ServiceWorker>>,
    waiting: Option<Arc<ServiceWorker>>,
    active: Option<Arc<ServiceWorker>>,
    /// Open clients and the worker controlling each of them
    clients: BTreeMap<ClientId, Option<Arc<ServiceWorker>>>,
}

impl Slots {
    fn active_has_clients(&self) -> bool {
        let Some(active) = &self.active else {
            return false;
        };
        self.clients
            .values()
            .flatten()
            .any(|controller| Arc::ptr_eq(controller, active))
    }
}

pub struct Registration {
    storage: CacheStorage,
    transport: Arc<dyn Transport>,
    /// Serializes install and activation
    lifecycle: tokio::sync::Mutex<()>,
    slots: Mutex<Slots>,
    next_client: AtomicU64,
}

impl Registration {
    pub fn new(storage: CacheStorage, transport: Arc<dyn Transport>) -> Self {
        Self {
            storage,
            transport,
            lifecycle: tokio::sync::Mutex::new(()),
            slots: Mutex::new(Slots::default()),
            next_client: AtomicU64::new(1),
        }
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn active(&self) -> Option<Arc<ServiceWorker>> {
        self.slots.lock().active.clone()
    }

    pub fn waiting(&self) -> Option<Arc<ServiceWorker>> {
        self.slots.lock().waiting.clone()
    }

    pub fn installing(&self) -> Option<Arc<ServiceWorker>> {
        self.slots.lock().installing.clone()
    }

    /// Install a version and activate it when possible.
    ///
    /// Registering the version that is already active or waiting returns that worker.
    /// A failed install leaves the active version serving.
    pub async fn register(&self, config: WorkerConfig) -> Result<Arc<ServiceWorker>, WorkerError> {
        let _guard = self.lifecycle.lock().await;

        if let Some(worker) = self.registered(&config) {
            return Ok(worker);
        }

        let worker = Arc::new(ServiceWorker::new(
            config,
            self.storage.clone(),
            self.transport.clone(),
        )?);
        self.slots.lock().installing = Some(worker.clone());

        let installed = worker.install().await;

        let superseded = {
            let mut slots = self.slots.lock();
            slots.installing = None;
            match installed {
                Ok(()) => slots.waiting.replace(worker.clone()),
                Err(e) => return Err(e),
            }
        };
        if let Some(previous) = superseded {
            info!(
                version = %previous.version(),
                by = %worker.version(),
                "Waiting worker superseded"
            );
            previous.mark_redundant();
        }

        self.activate_if_ready().await?;
        Ok(worker)
    }

    /// Active or waiting worker already running `config.version`
    fn registered(&self, config: &WorkerConfig) -> Option<Arc<ServiceWorker>> {
        let slots = self.slots.lock();
        let worker = [&slots.active, &slots.waiting]
            .into_iter()
            .flatten()
            .find(|worker| worker.version() == &config.version)
            .cloned()?;
        debug!(version = %worker.version(), state = %worker.state(), "Version already registered");
        Some(worker)
    }

    /// Bring back a version whose generation survived from an earlier process.
    ///
    /// Returns `None` when nothing complete is stored for this version; the caller
    /// should `register` it instead.
    pub async fn restore(
        &self,
        config: WorkerConfig,
    ) -> Result<Option<Arc<ServiceWorker>>, WorkerError> {
        let _guard = self.lifecycle.lock().await;
        if let Some(worker) = self.registered(&config) {
            return Ok(Some(worker));
        }

        let worker = Arc::new(ServiceWorker::new(
            config,
            self.storage.clone(),
            self.transport.clone(),
        )?);
        if !worker.restore().await? {
            return Ok(None);
        }
        // Nothing was fetched, so there is nothing to wait for
        worker.skip_waiting();

        let superseded = self.slots.lock().waiting.replace(worker.clone());
        if let Some(previous) = superseded {
            previous.mark_redundant();
        }
        self.activate_if_ready().await?;
        Ok(Some(worker))
    }

    /// Bring up `config.version`, restoring it from storage or installing it.
    ///
    /// When the install fails, the newest stored generation that still holds every
    /// manifest entry is restored under its own version instead, so a restart
    /// without network keeps serving the last complete deploy.
    pub async fn start(&self, config: WorkerConfig) -> Result<Arc<ServiceWorker>, WorkerError> {
        if let Some(worker) = self.restore(config.clone()).await? {
            return Ok(worker);
        }
        let error = match self.register(config.clone()).await {
            Ok(worker) => return Ok(worker),
            Err(e) => e,
        };

        let generations = match self.storage.list_generations().await {
            Ok(generations) => generations,
            Err(e) => {
                warn!(error = %e, "Cannot list stored generations");
                return Err(error);
            }
        };
        for version in generations.into_iter().rev() {
            if version == config.version {
                continue;
            }
            let stored = WorkerConfig {
                version: version.clone(),
                ..config.clone()
            };
            match self.restore(stored).await {
                Ok(Some(worker)) => {
                    warn!(
                        version = %version,
                        wanted = %config.version,
                        error = %error,
                        "Install failed, serving stored generation"
                    );
                    return Ok(worker);
                }
                Ok(None) => debug!(version = %version, "Stored generation not usable"),
                Err(e) => debug!(version = %version, error = %e, "Stored generation not restored"),
            }
        }
        Err(error)
    }

    /// Activate the waiting worker if skip-waiting was requested or no open client
    /// is still controlled by the active worker. Requires the lifecycle lock.
    async fn activate_if_ready(&self) -> Result<Option<ActivationReport>, WorkerError> {
        let candidate = {
            let slots = self.slots.lock();
            let Some(waiting) = slots.waiting.clone() else {
                return Ok(None);
            };
            if !waiting.skip_waiting_requested() && slots.active_has_clients() {
                debug!(version = %waiting.version(), "Waiting for controlled clients to close");
                return Ok(None);
            }
            waiting
        };

        // Stale generations are gone before any client is claimed
        let report = candidate.activate().await?;

        let (previous, claimed) = {
            let mut slots = self.slots.lock();
            slots.waiting = None;
            let previous = slots.active.replace(candidate.clone());
            for controller in slots.clients.values_mut() {
                *controller = Some(candidate.clone());
            }
            (previous, slots.clients.len())
        };
        if let Some(previous) = previous {
            previous.mark_redundant();
        }

        info!(
            version = %report.version,
            deleted = report.deleted.len(),
            claimed,
            "Worker activated and claimed clients"
        );
        Ok(Some(report))
    }

    /// Open a client. It is controlled by the active worker, if any.
    pub fn connect_client(&self) -> ClientId {
        let id = ClientId(self.next_client.fetch_add(1, Ordering::Relaxed));
        let mut slots = self.slots.lock();
        let controller = slots.active.clone();
        slots.clients.insert(id, controller);
        debug!(client = %id, "Client connected");
        id
    }

    /// Close a client; a waiting worker may activate as a result
    pub async fn disconnect_client(
        &self,
        id: ClientId,
    ) -> Result<Option<ActivationReport>, WorkerError> {
        if self.slots.lock().clients.remove(&id).is_none() {
            return Ok(None);
        }
        debug!(client = %id, "Client disconnected");

        let _guard = self.lifecycle.lock().await;
        self.activate_if_ready().await
    }

    /// Version controlling `client`, if any
    pub fn controller(&self, client: ClientId) -> Option<Arc<ServiceWorker>> {
        self.slots.lock().clients.get(&client).cloned().flatten()
    }

    pub fn client_count(&self) -> usize {
        self.slots.lock().clients.len()
    }

    /// Deliver a control message to the waiting worker (or, failing that, the installing
    /// one), then re-check activation
    pub async fn post_message(
        &self,
        message: ControlMessage,
    ) -> Result<Option<ActivationReport>, WorkerError> {
        let target = {
            let slots = self.slots.lock();
            slots.waiting.clone().or_else(|| slots.installing.clone())
        };
        let Some(target) = target else {
            debug!(?message, "No pending worker to receive message");
            return Ok(None);
        };
        target.handle_message(message);

        let _guard = self.lifecycle.lock().await;
        self.activate_if_ready().await
    }

    /// Resolve a request through the active worker
    pub async fn fetch(&self, request: &ProxyRequest) -> Result<ProxyResponse, NetworkError> {
        let active = self.active();
        self.route(active, request).await
    }

    /// Resolve a request on behalf of `client`, through the worker controlling it
    pub async fn fetch_for(
        &self,
        client: ClientId,
        request: &ProxyRequest,
    ) -> Result<ProxyResponse, NetworkError> {
        let controller = self.controller(client);
        self.route(controller, request).await
    }

    async fn route(
        &self,
        worker: Option<Arc<ServiceWorker>>,
        request: &ProxyRequest,
    ) -> Result<ProxyResponse, NetworkError> {
        if let Some(worker) = worker {
            if let FetchOutcome::Respond(response) = worker.handle_fetch(request).await {
                return Ok(response);
            }
        }
        self.transport.fetch(request).await
    }

    /// Wait for background cache writes of the current workers
    pub async fn settle(&self) {
        let workers: Vec<_> = {
            let slots = self.slots.lock();
            [&slots.active, &slots.waiting]
                .into_iter()
                .flatten()
                .cloned()
                .collect()
        };
        for worker in workers {
            worker.settle().await;
        }
    }
}
