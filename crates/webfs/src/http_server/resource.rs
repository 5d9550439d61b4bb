use std::net::SocketAddr;
use std::path::Path;

use axum::body::Body;
use axum::extract::{ConnectInfo, OriginalUri, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;

use crate::store::{Resource, StagingError, StoreError};
use crate::ServiceState;

/// Set by a reverse proxy in front of us.
const REAL_IP_HEADER: &str = "x-real-ip";

const ALLOWED_METHODS: &str = "GET, HEAD, PUT, POST, PATCH, DELETE";

const CONTENT_TYPE: &str = "application/octet-stream";
const CONTENT_DISPOSITION: &str = "attachment";

/// Serve any method on any path outside the status routes.
///
/// The path is taken from the raw request URI and percent-decoded to bytes,
/// so names that are not valid UTF-8 still reach the store.
pub async fn handler(
    State(state): State<ServiceState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    OriginalUri(uri): OriginalUri,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let client = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    let raw_path: Vec<u8> = percent_decode_str(uri.path()).collect();
    dispatch(&state, &client, method, &raw_path, body).await
}

async fn dispatch(
    state: &ServiceState,
    client: &str,
    method: Method,
    raw_path: &[u8],
    body: Body,
) -> Response {
    let store = state.store();
    let path = store.resolve(raw_path);

    tracing::info!(%client, %method, path = %path.display(), "request");

    let result = match method {
        Method::GET | Method::HEAD => store.read(&path).await.map(content_response),
        Method::PUT | Method::POST | Method::PATCH => store
            .write(&path, body.into_data_stream())
            .await
            .map(content_response),
        Method::DELETE => store
            .delete(&path)
            .await
            .map(|()| StatusCode::OK.into_response()),
        _ => {
            tracing::warn!(%method, path = %path.display(), "method not allowed");
            return (
                StatusCode::METHOD_NOT_ALLOWED,
                [(header::ALLOW, ALLOWED_METHODS)],
            )
                .into_response();
        }
    };

    result.unwrap_or_else(|err| {
        log_failure(&method, &path, &err);
        err.into_response()
    })
}

/// The body streams from the open file and keeps its lock until sent.
fn content_response(resource: Resource) -> Response {
    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE)),
        (
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static(CONTENT_DISPOSITION),
        ),
        (header::CONTENT_LENGTH, HeaderValue::from(resource.len())),
    ];
    (
        StatusCode::OK,
        headers,
        Body::from_stream(resource.into_stream()),
    )
        .into_response()
}

fn log_failure(method: &Method, path: &Path, err: &StoreError) {
    match err {
        StoreError::NotFound(_) => {
            tracing::warn!(%method, path = %path.display(), "resource does not exist")
        }
        StoreError::Staging(StagingError::TooLarge(_)) => {
            tracing::warn!(%method, path = %path.display(), "request body too large")
        }
        _ => tracing::error!(%method, path = %path.display(), "request failed: {}", err),
    }
}

impl StoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Staging(StagingError::TooLarge(_)) => StatusCode::PAYLOAD_TOO_LARGE,
            // the target cannot be opened for this request
            StoreError::Staging(StagingError::Open { .. })
            | StoreError::Remove { .. }
            | StoreError::RootRemoval(_) => StatusCode::BAD_REQUEST,
            StoreError::Lock(_) | StoreError::Staging(_) | StoreError::Read { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            [(header::CONTENT_TYPE, "text/plain")],
            status.canonical_reason().unwrap_or_default(),
        )
            .into_response()
    }
}

/// Best-effort address of the caller for logging.
///
/// Prefers the proxy-provided header, then the peer socket, then the `Host`
/// header with its port and IPv6 brackets removed.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let real_ip = headers
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    if let Some(addr) = peer {
        return addr.ip().to_string();
    }

    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(strip_host_port)
        .unwrap_or_else(|| "unknown".to_string())
}

fn strip_host_port(host: &str) -> String {
    let host = match host.strip_prefix('[') {
        Some(bracketed) => bracketed.split(']').next().unwrap_or(bracketed),
        None => host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host),
    };
    host.replace(['[', ']'], "")
}
