use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::constants::CASCADE_STATUS_HEADER;

/// Errors surfaced to HTTP clients.
///
/// Tier failures never end up here; they degrade to misses inside the resolver.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

#[derive(serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, cascade_status) = match &self {
            GatewayError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            GatewayError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ERROR"),
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            CASCADE_STATUS_HEADER,
            HeaderValue::from_static(cascade_status),
        );

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: status.as_u16(),
        });

        (status, headers, body).into_response()
    }
}
