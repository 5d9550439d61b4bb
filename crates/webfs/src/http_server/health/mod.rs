use axum::routing::get;
use axum::Router;

use crate::ServiceState;

pub mod liveness;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/livez", get(liveness::handler))
        .with_state(state)
}
