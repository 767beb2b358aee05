//! Test doubles shared by unit and integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};

use crate::error::NetworkError;
use crate::manifest::Manifest;
use crate::network::Transport;
use crate::request::ProxyRequest;
use crate::response::{ProxyResponse, ResponseSource};

/// Macro to initialize tracing for tests
///
/// Usage:
/// - `init_test_tracing!()` - uses DEBUG level (default)
/// - `init_test_tracing!(INFO)` - uses specified level
#[macro_export]
macro_rules! init_test_tracing {
    () => {
        $crate::init_test_tracing!(DEBUG);
    };
    ($level:ident) => {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::$level)
            .with_test_writer()
            .try_init();
    };
}

#[derive(Debug, Clone)]
enum Route {
    Respond {
        status: StatusCode,
        content_type: &'static str,
        body: Bytes,
    },
    Fail(String),
}

/// In-memory [`Transport`] answering from a fixed routing table and counting calls per URL.
/// Unrouted URLs answer `404`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: RwLock<HashMap<String, Route>>,
    calls: Mutex<HashMap<String, usize>>,
    offline: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `200 OK` and `body`
    pub fn serve(&self, url: &str, body: impl Into<Bytes>) -> &Self {
        self.serve_with(url, StatusCode::OK, "text/plain", body)
    }

    pub fn serve_with(
        &self,
        url: &str,
        status: StatusCode,
        content_type: &'static str,
        body: impl Into<Bytes>,
    ) -> &Self {
        self.routes.write().insert(
            url.to_owned(),
            Route::Respond {
                status,
                content_type,
                body: body.into(),
            },
        );
        self
    }

    /// Make every fetch of `url` fail at the network level
    pub fn fail(&self, url: &str, reason: &str) -> &Self {
        self.routes
            .write()
            .insert(url.to_owned(), Route::Fail(reason.to_owned()));
        self
    }

    /// Serve every manifest entry; each body names its URL
    pub fn serve_manifest(&self, manifest: &Manifest) -> &Self {
        for url in manifest.iter() {
            self.serve(url.as_str(), format!("content of {url}"));
        }
        self
    }

    /// Simulate losing (or regaining) connectivity
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetches issued for `url`
    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, request: &ProxyRequest) -> Result<ProxyResponse, NetworkError> {
        let url = request.url().as_str().to_owned();
        *self.calls.lock().entry(url.clone()).or_default() += 1;

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Unreachable(format!("offline: {url}")));
        }

        let route = self.routes.read().get(&url).cloned();
        match route {
            Some(Route::Respond {
                status,
                content_type,
                body,
            }) => {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                Ok(ProxyResponse::new(
                    status,
                    headers,
                    body,
                    ResponseSource::Network,
                ))
            }
            Some(Route::Fail(reason)) => Err(NetworkError::Unreachable(reason)),
            None => Ok(ProxyResponse::new(
                StatusCode::NOT_FOUND,
                HeaderMap::new(),
                Bytes::from_static(b"not found"),
                ResponseSource::Network,
            )),
        }
    }
}
