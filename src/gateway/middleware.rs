//! Per-request telemetry.
//!
//! Builds the [`RequestContext`] handed to handlers, then logs one
//! `HTTP {method} {path}` event with the resolution outcome and schedules a flush.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use serde_json::json;

use crate::background::task;
use crate::cache::{ResolutionOutcome, TierStore, WritableTierStore};
use crate::gateway::state::HandlerState;
use crate::telemetry::RequestContext;

const CLIENT_IP_HEADERS: [&str; 3] = ["cf-connecting-ip", "x-real-ip", "x-forwarded-for"];

pub async fn request_logging<L, D, O>(
    State(state): State<HandlerState<L, D, O>>,
    mut request: Request,
    next: Next,
) -> Response
where
    L: WritableTierStore + 'static,
    D: WritableTierStore + 'static,
    O: TierStore + 'static,
{
    let ctx = RequestContext::new(state.batcher.clone());
    request.extensions_mut().insert(ctx.clone());

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let url = request.uri().to_string();
    let headers = headers_json(request.headers());
    let ip = client_ip(request.headers());

    let response = next.run(request).await;

    let outcome = response
        .extensions()
        .get::<ResolutionOutcome>()
        .copied()
        .unwrap_or_default();

    ctx.info(
        format!("HTTP {} {}", method, path),
        Some(json!({
            "request": {
                "url": url,
                "method": method,
                "path": path,
                "headers": headers,
                "ip": ip,
            },
            "status": response.status().as_u16(),
            "duration": ctx.elapsed().as_millis() as u64,
            "msc": outcome,
        })),
    );

    let batcher = state.batcher.clone();
    state.scheduler.schedule(task(async move {
        batcher.flush(false).await;
    }));

    response
}

/// First client address header present, in priority order.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    CLIENT_IP_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    })
}

/// Request headers as a JSON string of `[name, value]` pairs.
pub fn headers_json(headers: &HeaderMap) -> String {
    let pairs: Vec<(&str, &str)> = headers
        .iter()
        .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or("<binary>")))
        .collect();
    serde_json::to_string(&pairs).unwrap_or_default()
}
