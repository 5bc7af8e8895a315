use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderMap, Request, header::ETAG},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};

use crate::application::error::ErrorReport;

/// Log every response. Errors are logged at `warn`/`error` together with
/// the [`ErrorReport`] attached to them; everything else at `debug`.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis();

    if !(status.is_client_error() || status.is_server_error()) {
        debug!(
            target = "fascio::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            elapsed_ms,
            etag = etag(response.headers()),
            "request served",
        );
        return response;
    }

    let report = response.extensions_mut().remove::<ErrorReport>();
    let (source, chain) = report
        .map(|report| (report.source, report.messages))
        .unwrap_or(("unknown", Vec::new()));
    let detail = chain.first().map_or("no diagnostic available", String::as_str);

    if status.is_server_error() {
        error!(
            target = "fascio::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            query = uri.query().unwrap_or(""),
            elapsed_ms,
            source,
            detail,
            chain = ?chain,
            "bundle request failed",
        );
    } else {
        warn!(
            target = "fascio::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            query = uri.query().unwrap_or(""),
            elapsed_ms,
            source,
            detail,
            "bundle request rejected",
        );
    }

    response
}

fn etag(headers: &HeaderMap) -> &str {
    headers
        .get(ETAG)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
}
