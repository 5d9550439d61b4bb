use std::net::SocketAddr;

use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tower_http::trace::{DefaultOnFailure, DefaultOnResponse};
use tower_http::LatencyUnit;

mod config;
mod health;
pub mod resource;

pub use config::Config;

use crate::ServiceState;

const STATUS_PREFIX: &str = "/_status";

/// Build the router: the liveness probe under `/_status`, every other path
/// is a resource in the store.
pub fn router(config: &Config, state: ServiceState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .on_response(
            DefaultOnResponse::new()
                .include_headers(false)
                .level(config.log_level)
                .latency_unit(LatencyUnit::Micros),
        )
        .on_failure(DefaultOnFailure::new().latency_unit(LatencyUnit::Micros));

    Router::new()
        .nest(STATUS_PREFIX, health::router(state.clone()))
        .route("/", any(resource::handler))
        .route("/*key", any(resource::handler))
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .with_state(state)
        .layer(trace_layer)
}

/// Bind `config.listen_addr` and serve until `shutdown_rx` fires.
pub async fn run(
    config: Config,
    state: ServiceState,
    shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let listen_addr = config.listen_addr;
    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = ?listen_addr, "webfs server listening");

    serve(listener, config, state, shutdown_rx).await
}

/// Serve on an already bound listener until `shutdown_rx` fires.
///
/// On shutdown the lock registry is closed so requests still queued for a
/// lock fail instead of holding up the drain.
pub async fn serve(
    listener: TcpListener,
    config: Config,
    state: ServiceState,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let router = router(&config, state.clone());

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.changed().await;
        tracing::info!("shutting down, rejecting new lock acquisitions");
        state.store().locks().close();
    })
    .await?;

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("an error occurred running the HTTP server: {0}")]
    ServingFailed(#[from] std::io::Error),
}
