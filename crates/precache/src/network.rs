//! # Network Transport
//!
//! The outbound side of the proxy. [`Transport`] is the seam the worker fetches
//! through; [`HttpTransport`] is the production implementation on top of `reqwest`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use rustls::{ClientConfig, crypto::aws_lc_rs};
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::{debug, info};

use crate::config::TransportConfig;
use crate::error::NetworkError;
use crate::request::ProxyRequest;
use crate::response::{ProxyResponse, ResponseSource};

/// Something that can perform a network fetch for an intercepted request.
///
/// A fetch succeeds whenever a complete response arrives, whatever its status.
/// Connectivity, DNS, timeout and body-read failures are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &ProxyRequest) -> Result<ProxyResponse, NetworkError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn fetch(&self, request: &ProxyRequest) -> Result<ProxyResponse, NetworkError> {
        (**self).fetch(request).await
    }
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &TransportConfig) -> Result<Client, NetworkError> {
    let provider = Arc::new(aws_lc_rs::default_provider());

    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| NetworkError::Tls(e.to_string()))?
        .with_platform_verifier()
        .map_err(|e| NetworkError::Tls(e.to_string()))?
        .with_no_client_auth();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .use_preconfigured_tls(tls_config)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.pool_idle_timeout.is_zero() {
        client_builder = client_builder.pool_idle_timeout(config.pool_idle_timeout);
    }

    if config.use_system_proxy {
        // reqwest picks up system proxy settings unless no_proxy() is called
        info!("Using system proxy settings for network fetches");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for network fetches");
    }

    client_builder.build().map_err(NetworkError::from)
}

/// [`Transport`] backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, NetworkError> {
        Ok(Self {
            client: create_client(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: &ProxyRequest) -> Result<ProxyResponse, NetworkError> {
        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        debug!(
            method = %request.method(),
            url = %request.url(),
            status = status.as_u16(),
            size = body.len(),
            "Network fetch completed"
        );
        Ok(ProxyResponse::new(
            status,
            headers,
            body,
            ResponseSource::Network,
        ))
    }
}
