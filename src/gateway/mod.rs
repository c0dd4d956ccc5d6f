//! HTTP gateway (Axum) serving cached content.
//!
//! This module is primarily used by the `cascade` server binary.

pub mod error;
pub mod handler;
pub mod middleware;
pub mod state;

#[cfg(test)]
mod handler_tests;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::trace::TraceLayer;

pub use error::GatewayError;
pub use handler::content_handler;
pub use middleware::request_logging;
pub use state::HandlerState;

use crate::cache::{TierStore, WritableTierStore};

pub fn create_router_with_state<L, D, O>(state: HandlerState<L, D, O>) -> Router
where
    L: WritableTierStore + 'static,
    D: WritableTierStore + 'static,
    O: TierStore + 'static,
{
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/", get(content_handler::<L, D, O>))
        .route("/{*path}", get(content_handler::<L, D, O>))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            request_logging::<L, D, O>,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(serde::Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[tracing::instrument]
pub async fn health_handler() -> Response {
    (StatusCode::OK, Json(HealthResponse { status: "ok" })).into_response()
}
