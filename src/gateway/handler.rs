use axum::{
    Extension,
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderValue, StatusCode, Uri,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, HOST},
    },
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument};

use crate::cache::{CacheKey, Resolution, Resolved, TierStore, WritableTierStore};
use crate::constants::{CASCADE_STATUS_HEADER, FALLBACK_CONTENT_TYPE};
use crate::gateway::error::GatewayError;
use crate::gateway::state::HandlerState;
use crate::telemetry::RequestContext;

/// `GET /*path`: resolves the object through the cache tiers.
#[instrument(skip_all, fields(path = %uri.path(), namespace = tracing::field::Empty))]
pub async fn content_handler<L, D, O>(
    State(state): State<HandlerState<L, D, O>>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, GatewayError>
where
    L: WritableTierStore + 'static,
    D: WritableTierStore + 'static,
    O: TierStore + 'static,
{
    let path = uri.path();
    validate_path(path)?;

    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.host())
        .unwrap_or_default();
    let namespace = state.config.namespace_for_host(host);
    tracing::Span::current().record("namespace", tracing::field::display(namespace));

    let key = CacheKey::new(namespace, path);
    let resolution = state.resolver.resolve(&key, &ctx).await;
    debug!(status = %resolution.status, "Resolved request");

    make_response(&resolution)
}

/// Rejects paths that could escape the namespace.
pub fn validate_path(path: &str) -> Result<(), GatewayError> {
    if path.contains('\0') {
        return Err(GatewayError::InvalidRequest(
            "path contains a NUL byte".to_string(),
        ));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(GatewayError::InvalidRequest(
            "path contains a parent directory segment".to_string(),
        ));
    }
    Ok(())
}

/// Builds the HTTP response for a resolution. The outcome flags ride along in the
/// response extensions for the request logger.
pub fn make_response(resolution: &Resolution) -> Result<Response, GatewayError> {
    let mut response = match &resolution.resolved {
        Resolved::Found(entry) => {
            let content_type = HeaderValue::from_str(&entry.content_type)
                .unwrap_or(HeaderValue::from_static(FALLBACK_CONTENT_TYPE));
            let mut response = Response::new(Body::from(entry.bytes.clone()));
            *response.status_mut() = StatusCode::OK;
            let headers = response.headers_mut();
            headers.insert(CONTENT_TYPE, content_type);
            headers.insert(CONTENT_LENGTH, HeaderValue::from(entry.content_length));
            response
        }
        Resolved::NotFound => (
            StatusCode::NOT_FOUND,
            [(CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
            "not found",
        )
            .into_response(),
    };

    let cache_control = HeaderValue::from_str(&resolution.directive.header_value())
        .map_err(|e| GatewayError::InternalError(format!("invalid cache directive: {}", e)))?;

    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, cache_control);
    headers.insert(
        CASCADE_STATUS_HEADER,
        HeaderValue::from_static(resolution.status.as_header_value()),
    );

    response.extensions_mut().insert(resolution.outcome);
    Ok(response)
}
