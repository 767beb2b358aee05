use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::try_join_all;
use parking_lot::{Mutex, RwLock};
use reqwest::Method;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::cache::{CacheHandle, CacheResult, CacheStorage, GenerationId, RequestKey};
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::manifest::Manifest;
use crate::network::Transport;
use crate::request::ProxyRequest;
use crate::response::{ProxyResponse, ResponseSource};
use crate::worker::{ControlMessage, WorkerState};

/// Result of intercepting one request
#[derive(Debug)]
pub enum FetchOutcome {
    /// The worker produced the response
    Respond(ProxyResponse),
    /// Not intercepted; the host performs the request natively
    PassThrough,
}

/// What an activation cleaned up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub version: GenerationId,
    pub deleted: Vec<GenerationId>,
}

/// One version of the request interception proxy
pub struct ServiceWorker {
    config: Arc<WorkerConfig>,
    manifest: Manifest,
    storage: CacheStorage,
    transport: Arc<dyn Transport>,
    state: RwLock<WorkerState>,
    install_started: AtomicBool,
    skip_waiting: AtomicBool,
    generation: RwLock<Option<CacheHandle>>,
    /// Opportunistic cache writes still in flight
    writes: Mutex<TaskTracker>,
}

impl ServiceWorker {
    /// Create a worker in the `Installing` state
    pub fn new(
        config: WorkerConfig,
        storage: CacheStorage,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, WorkerError> {
        let manifest = config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            manifest,
            storage,
            transport,
            state: RwLock::new(WorkerState::Installing),
            install_started: AtomicBool::new(false),
            skip_waiting: AtomicBool::new(false),
            generation: RwLock::new(None),
            writes: Mutex::new(TaskTracker::new()),
        })
    }

    pub fn version(&self) -> &GenerationId {
        &self.config.version
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    fn transition(&self, action: &'static str, next: WorkerState) -> Result<(), WorkerError> {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            return Err(WorkerError::InvalidTransition {
                version: self.config.version.clone(),
                action,
                state: *state,
            });
        }
        let previous = *state;
        *state = next;
        info!(version = %self.config.version, from = %previous, to = %next, "Worker state change");
        Ok(())
    }

    fn expect_state(&self, action: &'static str, expected: WorkerState) -> Result<(), WorkerError> {
        let state = self.state();
        if state != expected {
            return Err(WorkerError::InvalidTransition {
                version: self.config.version.clone(),
                action,
                state,
            });
        }
        Ok(())
    }

    /// Record a skip-waiting request. Takes effect at the next activation opportunity.
    pub fn skip_waiting(&self) {
        if !self.skip_waiting.swap(true, Ordering::SeqCst) {
            debug!(version = %self.config.version, "Skip waiting requested");
        }
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// React to a control message from the application
    pub fn handle_message(&self, message: ControlMessage) {
        match message {
            ControlMessage::SkipWaiting => self.skip_waiting(),
        }
    }

    /// Pre-cache the manifest into this version's generation.
    ///
    /// On success the worker is `Waiting`. On failure it becomes `Redundant` and a
    /// generation created by this attempt is removed again.
    pub async fn install(&self) -> Result<(), WorkerError> {
        self.expect_state("install", WorkerState::Installing)?;
        if self.install_started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::InvalidTransition {
                version: self.config.version.clone(),
                action: "install",
                state: WorkerState::Installing,
            });
        }

        info!(
            version = %self.config.version,
            entries = self.manifest.len(),
            "Installing worker"
        );

        match self.populate().await {
            Ok(handle) => {
                *self.generation.write() = Some(handle);
                self.transition("install", WorkerState::Waiting)?;
                if self.config.skip_waiting_on_install {
                    self.skip_waiting();
                }
                Ok(())
            }
            Err(source) => {
                warn!(version = %self.config.version, error = %source, "Install failed");
                self.transition("install", WorkerState::Redundant)?;
                Err(WorkerError::InstallFailed {
                    version: self.config.version.clone(),
                    source,
                })
            }
        }
    }

    /// Adopt a generation left by an earlier process instead of installing.
    ///
    /// Succeeds only when this version's generation already holds every manifest
    /// entry; the worker then moves to `Waiting` without touching the network.
    /// Returns `false` and stays `Installing` otherwise.
    pub async fn restore(&self) -> Result<bool, WorkerError> {
        self.expect_state("restore", WorkerState::Installing)?;
        let version = &self.config.version;
        let install_failed = |source| WorkerError::InstallFailed {
            version: version.clone(),
            source,
        };

        let generations = self
            .storage
            .list_generations()
            .await
            .map_err(install_failed)?;
        if !generations.contains(version) {
            return Ok(false);
        }

        let handle = self.storage.open(version).await.map_err(install_failed)?;
        let stored = handle.keys().await.map_err(install_failed)?;
        let missing = self
            .manifest
            .keys()
            .into_iter()
            .filter(|key| !stored.contains(key))
            .count();
        if missing > 0 {
            debug!(version = %version, missing, "Stored generation incomplete, not restoring");
            return Ok(false);
        }

        if self.install_started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::InvalidTransition {
                version: version.clone(),
                action: "restore",
                state: WorkerState::Installing,
            });
        }
        *self.generation.write() = Some(handle);
        self.transition("restore", WorkerState::Waiting)?;
        info!(version = %version, entries = stored.len(), "Restored stored generation");
        Ok(true)
    }

    async fn populate(&self) -> CacheResult<CacheHandle> {
        let handle = self.storage.open(&self.config.version).await?;
        if let Err(e) = handle.put_all(&self.manifest, self.transport.as_ref()).await {
            if handle.was_created() {
                if let Err(cleanup) = self.storage.delete(&self.config.version).await {
                    warn!(
                        version = %self.config.version,
                        error = %cleanup,
                        "Failed to remove partially installed generation"
                    );
                }
            }
            return Err(e);
        }
        Ok(handle)
    }

    /// Delete every generation other than this version's, then become `Active`.
    pub async fn activate(&self) -> Result<ActivationReport, WorkerError> {
        self.expect_state("activate", WorkerState::Waiting)?;
        let version = &self.config.version;
        let activation_failed = |source| WorkerError::ActivationFailed {
            version: version.clone(),
            source,
        };

        let stale: Vec<GenerationId> = self
            .storage
            .list_generations()
            .await
            .map_err(activation_failed)?
            .into_iter()
            .filter(|generation| generation != version)
            .collect();

        for generation in &stale {
            info!(version = %version, stale = %generation, "Removing old cache generation");
        }
        try_join_all(stale.iter().map(|generation| self.storage.delete(generation)))
            .await
            .map_err(activation_failed)?;

        self.transition("activate", WorkerState::Active)?;
        Ok(ActivationReport {
            version: version.clone(),
            deleted: stale,
        })
    }

    /// Stop intercepting for good
    pub fn mark_redundant(&self) {
        if self.state().is_terminal() {
            return;
        }
        if let Err(e) = self.transition("retire", WorkerState::Redundant) {
            warn!(error = %e, "Failed to retire worker");
        }
    }

    /// Intercept one request. Only an `Active` worker intercepts, and only GET requests.
    pub async fn handle_fetch(&self, request: &ProxyRequest) -> FetchOutcome {
        if self.state() != WorkerState::Active || request.method() != Method::GET {
            return FetchOutcome::PassThrough;
        }
        FetchOutcome::Respond(self.respond(request).await)
    }

    async fn respond(&self, request: &ProxyRequest) -> ProxyResponse {
        let key = request.key();
        let handle = self.generation.read().clone();

        if let Some(handle) = &handle {
            if let Some(hit) = handle.get(&key).await {
                debug!(key = %key, "Cache hit");
                return ProxyResponse::from_cached(hit, ResponseSource::Cache);
            }
        }
        debug!(key = %key, "Cache miss, fetching from network");

        match self.transport.fetch(request).await {
            Ok(response) if response.is_cacheable() => {
                let (returned, persisted) = response.duplicate();
                if let Some(handle) = handle {
                    self.cache_in_background(handle, key, persisted);
                }
                returned
            }
            Ok(response) => {
                debug!(key = %key, status = %response.status(), "Not caching non-200 response");
                response
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Network fetch failed, serving offline fallback");
                self.fallback(request).await
            }
        }
    }

    fn cache_in_background(&self, handle: CacheHandle, key: RequestKey, response: ProxyResponse) {
        self.writes.lock().spawn(async move {
            let generation = handle.generation().clone();
            match handle.put(response.into_cached(key.clone())).await {
                Ok(()) => debug!(generation = %generation, key = %key, "Cached network response"),
                Err(e) => {
                    warn!(generation = %generation, key = %key, error = %e, "Opportunistic cache write failed")
                }
            }
        });
    }

    async fn fallback(&self, request: &ProxyRequest) -> ProxyResponse {
        if request.destination().is_document() {
            let key = RequestKey::get(self.manifest.fallback_document());
            if let Some(document) = self.storage.lookup(&key).await {
                return ProxyResponse::from_cached(document, ResponseSource::Fallback);
            }
            warn!(key = %key, "Fallback document is not cached");
        }
        ProxyResponse::offline(self.config.offline_body.clone())
    }

    /// Wait until every opportunistic cache write issued so far has settled
    pub async fn settle(&self) {
        let retired = {
            let mut writes = self.writes.lock();
            let retired = std::mem::replace(&mut *writes, TaskTracker::new());
            retired.close();
            // Later callers wait on the fresh tracker, which waits on this one
            let pending = retired.clone();
            writes.spawn(async move { pending.wait().await });
            retired
        };
        retired.wait().await;
    }
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("version", &self.config.version)
            .field("state", &self.state())
            .field("skip_waiting", &self.skip_waiting_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheProvider, MemoryCache};
    use crate::init_test_tracing;
    use crate::request::RequestDestination;
    use crate::response::DEFAULT_OFFLINE_BODY;
    use crate::test_utils::ScriptedTransport;
    use reqwest::StatusCode;

    fn config(version: &str) -> WorkerConfig {
        WorkerConfig::builder()
            .version(version)
            .origin("https://scores.example/")
            .manifest(["/", "/index.html", "/js/app.js"])
            .fallback_document("/index.html")
            .skip_waiting_on_install(false)
            .build()
            .unwrap()
    }

    fn worker(version: &str, storage: &CacheStorage) -> (ServiceWorker, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new());
        let worker = ServiceWorker::new(config(version), storage.clone(), transport.clone()).unwrap();
        transport.serve_manifest(worker.manifest());
        (worker, transport)
    }

    async fn active(version: &str, storage: &CacheStorage) -> (ServiceWorker, Arc<ScriptedTransport>) {
        let (worker, transport) = worker(version, storage);
        worker.install().await.unwrap();
        worker.activate().await.unwrap();
        transport.reset_calls();
        (worker, transport)
    }

    #[tokio::test]
    async fn install_moves_to_waiting_and_fills_generation() {
        init_test_tracing!();
        let storage = CacheStorage::in_memory();
        let (worker, _) = worker("v1", &storage);

        worker.install().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Waiting);
        assert!(!worker.skip_waiting_requested());

        for key in worker.manifest().keys() {
            assert!(storage.lookup(&key).await.is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn install_twice_is_rejected() {
        let storage = CacheStorage::in_memory();
        let (worker, _) = worker("v1", &storage);
        worker.install().await.unwrap();
        assert!(matches!(
            worker.install().await,
            Err(WorkerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn failed_install_leaves_no_generation() {
        let storage = CacheStorage::in_memory();
        let (worker, transport) = worker("v1", &storage);
        transport.fail("https://scores.example/js/app.js", "connection reset");

        let err = worker.install().await.unwrap_err();
        assert!(matches!(err, WorkerError::InstallFailed { .. }));
        assert_eq!(worker.state(), WorkerState::Redundant);
        assert!(storage.list_generations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_success_manifest_status_fails_install() {
        let storage = CacheStorage::in_memory();
        let (worker, transport) = worker("v1", &storage);
        transport.serve_with(
            "https://scores.example/index.html",
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/html",
            "boom",
        );

        assert!(worker.install().await.is_err());
        assert!(storage.list_generations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_refusal_fails_install() {
        let storage = CacheStorage::new(Arc::new(MemoryCache::with_quota(4)));
        let (worker, _) = worker("v1", &storage);

        match worker.install().await {
            Err(WorkerError::InstallFailed { source, .. }) => {
                assert!(matches!(source, crate::error::CacheError::StorageUnavailable(_)));
            }
            other => panic!("unexpected install result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn restore_adopts_complete_generation_offline() {
        let storage = CacheStorage::in_memory();
        let (first, _) = worker("v1", &storage);
        first.install().await.unwrap();

        let (second, transport) = worker("v1", &storage);
        transport.set_offline(true);
        assert!(second.restore().await.unwrap());
        assert_eq!(second.state(), WorkerState::Waiting);
        assert_eq!(transport.total_calls(), 0);
        assert!(matches!(
            second.install().await,
            Err(WorkerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn restore_refuses_missing_or_incomplete_generation() {
        let storage = CacheStorage::in_memory();
        let (fresh, _) = worker("v1", &storage);
        assert!(!fresh.restore().await.unwrap());
        assert!(storage.list_generations().await.unwrap().is_empty());

        storage.open(&"v1".into()).await.unwrap();
        assert!(!fresh.restore().await.unwrap());
        assert_eq!(fresh.state(), WorkerState::Installing);

        fresh.install().await.unwrap();
        assert_eq!(fresh.state(), WorkerState::Waiting);
    }

    #[tokio::test]
    async fn activate_requires_waiting() {
        let storage = CacheStorage::in_memory();
        let (worker, _) = worker("v1", &storage);
        assert!(matches!(
            worker.activate().await,
            Err(WorkerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn activate_removes_other_generations() {
        let provider = Arc::new(MemoryCache::new());
        provider.open(&"v1".into()).await.unwrap();
        let storage = CacheStorage::new(provider);

        let (worker, _) = worker("v2", &storage);
        worker.install().await.unwrap();
        let report = worker.activate().await.unwrap();

        assert_eq!(report.deleted, vec![GenerationId::from("v1")]);
        assert_eq!(
            storage.list_generations().await.unwrap(),
            vec![GenerationId::from("v2")]
        );
        assert_eq!(worker.state(), WorkerState::Active);
    }

    #[tokio::test]
    async fn waiting_worker_does_not_intercept() {
        let storage = CacheStorage::in_memory();
        let (worker, _) = worker("v1", &storage);
        worker.install().await.unwrap();

        let request = ProxyRequest::parse_get("https://scores.example/js/app.js").unwrap();
        assert!(matches!(
            worker.handle_fetch(&request).await,
            FetchOutcome::PassThrough
        ));
    }

    #[tokio::test]
    async fn cache_hit_skips_network() {
        let storage = CacheStorage::in_memory();
        let (worker, transport) = active("v1", &storage).await;

        let request = ProxyRequest::parse_get("https://scores.example/js/app.js").unwrap();
        let FetchOutcome::Respond(response) = worker.handle_fetch(&request).await else {
            panic!("expected a response");
        };
        assert_eq!(response.source(), ResponseSource::Cache);
        assert_eq!(transport.calls("https://scores.example/js/app.js"), 0);
    }

    #[tokio::test]
    async fn miss_is_fetched_and_cached() {
        let storage = CacheStorage::in_memory();
        let (worker, transport) = active("v1", &storage).await;
        transport.serve("https://scores.example/img/board.jpg", "jpeg bytes");

        let request = ProxyRequest::parse_get("https://scores.example/img/board.jpg").unwrap();
        let FetchOutcome::Respond(response) = worker.handle_fetch(&request).await else {
            panic!("expected a response");
        };
        assert_eq!(response.source(), ResponseSource::Network);
        assert_eq!(response.body(), "jpeg bytes");

        worker.settle().await;
        let cached = storage.lookup(&request.key()).await.unwrap();
        assert_eq!(cached.body, "jpeg bytes");

        let FetchOutcome::Respond(second) = worker.handle_fetch(&request).await else {
            panic!("expected a response");
        };
        assert_eq!(second.source(), ResponseSource::Cache);
        assert_eq!(transport.calls("https://scores.example/img/board.jpg"), 1);
    }

    #[tokio::test]
    async fn non_200_is_returned_but_not_cached() {
        let storage = CacheStorage::in_memory();
        let (worker, _) = active("v1", &storage).await;

        let request = ProxyRequest::parse_get("https://scores.example/missing.png").unwrap();
        let FetchOutcome::Respond(response) = worker.handle_fetch(&request).await else {
            panic!("expected a response");
        };
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        worker.settle().await;
        assert!(storage.lookup(&request.key()).await.is_none());
    }

    #[tokio::test]
    async fn offline_document_gets_fallback() {
        let storage = CacheStorage::in_memory();
        let (worker, transport) = active("v1", &storage).await;
        transport.set_offline(true);

        let request = ProxyRequest::parse_get("https://scores.example/results")
            .unwrap()
            .with_destination(RequestDestination::Document);
        let FetchOutcome::Respond(response) = worker.handle_fetch(&request).await else {
            panic!("expected a response");
        };
        assert_eq!(response.source(), ResponseSource::Fallback);
        assert_eq!(response.body(), "content of https://scores.example/index.html");
    }

    #[tokio::test]
    async fn offline_subresource_gets_503() {
        let storage = CacheStorage::in_memory();
        let (worker, transport) = active("v1", &storage).await;
        transport.set_offline(true);

        let request = ProxyRequest::parse_get("https://scores.example/api/score")
            .unwrap()
            .with_destination(RequestDestination::Image);
        let FetchOutcome::Respond(response) = worker.handle_fetch(&request).await else {
            panic!("expected a response");
        };
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.body(), DEFAULT_OFFLINE_BODY);
    }

    #[tokio::test]
    async fn post_is_passed_through() {
        let storage = CacheStorage::in_memory();
        let (worker, transport) = active("v1", &storage).await;

        let url = url::Url::parse("https://scores.example/js/app.js").unwrap();
        let request = ProxyRequest::new(Method::POST, url);
        assert!(matches!(
            worker.handle_fetch(&request).await,
            FetchOutcome::PassThrough
        ));
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn write_failure_does_not_affect_response() {
        let storage = CacheStorage::in_memory();
        let (worker, transport) = active("v1", &storage).await;
        transport.serve("https://scores.example/late.js", "late");

        // The generation disappears underneath the worker
        storage.delete(&"v1".into()).await.unwrap();

        let request = ProxyRequest::parse_get("https://scores.example/late.js").unwrap();
        let FetchOutcome::Respond(response) = worker.handle_fetch(&request).await else {
            panic!("expected a response");
        };
        assert_eq!(response.status(), StatusCode::OK);
        worker.settle().await;
        assert!(storage.lookup(&request.key()).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_settles_all_see_earlier_writes() {
        let storage = CacheStorage::in_memory();
        let (worker, transport) = active("v1", &storage).await;
        let urls: Vec<String> = (0..6)
            .map(|i| format!("https://scores.example/round/{i}.json"))
            .collect();
        for url in &urls {
            transport.serve(url, "{}");
            let request = ProxyRequest::parse_get(url).unwrap();
            worker.handle_fetch(&request).await;
        }

        let settled = || async {
            worker.settle().await;
            for url in &urls {
                let key = RequestKey::parse(url).unwrap();
                assert!(storage.lookup(&key).await.is_some(), "{url} not settled");
            }
        };
        tokio::join!(settled(), settled());

        // The tracker stays usable after concurrent settles
        transport.serve("https://scores.example/after.json", "{}");
        let request = ProxyRequest::parse_get("https://scores.example/after.json").unwrap();
        worker.handle_fetch(&request).await;
        worker.settle().await;
        let key = RequestKey::parse("https://scores.example/after.json").unwrap();
        assert!(storage.lookup(&key).await.is_some());
    }

    #[tokio::test]
    async fn skip_waiting_message_is_recorded() {
        let storage = CacheStorage::in_memory();
        let (worker, _) = worker("v1", &storage);
        worker.handle_message(ControlMessage::SkipWaiting);
        assert!(worker.skip_waiting_requested());
        assert_eq!(worker.state(), WorkerState::Installing);
    }

    #[tokio::test]
    async fn redundant_worker_passes_through() {
        let storage = CacheStorage::in_memory();
        let (worker, _) = active("v1", &storage).await;
        worker.mark_redundant();
        worker.mark_redundant();

        let request = ProxyRequest::parse_get("https://scores.example/").unwrap();
        assert!(matches!(
            worker.handle_fetch(&request).await,
            FetchOutcome::PassThrough
        ));
    }
}
