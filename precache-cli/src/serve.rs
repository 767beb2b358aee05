use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{
    CONNECTION, CONTENT_LENGTH, HOST, HeaderMap, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use precache_engine::{ProxyRequest, ProxyResponse, Registration};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use url::Url;

use crate::commands::CommandExecutor;
use crate::error::Result;

/// Largest request body forwarded to the origin
const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

#[derive(Clone)]
struct ProxyState {
    registration: Arc<Registration>,
    origin: Url,
}

pub async fn serve(executor: &CommandExecutor, listen: SocketAddr) -> Result<()> {
    let registration = Arc::new(executor.registration());
    match executor.start(&registration).await {
        Ok(worker) => info!(version = %worker.version(), state = %worker.state(), "Worker ready"),
        Err(e) => warn!(error = %e, "No usable version, forwarding every request"),
    }

    let state = ProxyState {
        registration: registration.clone(),
        origin: executor.config().worker.origin.clone(),
    };
    let app = Router::new()
        .fallback(proxy)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(listen).await?;
    info!(%listen, origin = %executor.config().worker.origin, "Proxy listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registration.settle().await;
    info!("Proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn proxy(State(state): State<ProxyState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let url = match target_url(&state.origin, &parts.uri) {
        Ok(url) => url,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let body = match axum::body::to_bytes(body, MAX_REQUEST_BODY).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
    };

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    let request = ProxyRequest::new(parts.method, url)
        .with_headers(headers)
        .with_body(body);

    match state.registration.fetch(&request).await {
        Ok(response) => into_response(response),
        Err(e) => {
            warn!(url = %request.url(), error = %e, "Upstream fetch failed");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

fn target_url(origin: &Url, uri: &Uri) -> std::result::Result<Url, url::ParseError> {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    origin.join(path)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in [HOST, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING, TE, TRAILER, UPGRADE] {
        headers.remove(name);
    }
}

fn into_response(response: ProxyResponse) -> Response {
    let source = response.source();
    let (status, mut headers, body) = response.into_parts();
    strip_hop_by_hop(&mut headers);

    let mut out = Response::new(Body::from(body));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    if let Ok(value) = source.to_string().parse() {
        out.headers_mut().insert("x-precache-source", value);
    }
    out
}
