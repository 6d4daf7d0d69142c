use axum::{
    body::Body,
    http::{Request, Response},
};
use super::request_id::REQUEST_ID_HEADER;
use std::time::Duration;
use tracing::{Span, info};

/// Span for one HTTP request, tagged with the id set by `request_id_middleware`
pub fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
    )
}

pub fn on_request(request: &Request<Body>, _span: &Span) {
    info!("📥 {} {}", request.method(), request.uri());
}

pub fn on_response(response: &Response<Body>, latency: Duration, _span: &Span) {
    info!(
        "📤 Finished in {:?} with status {}",
        latency,
        response.status()
    );
}
