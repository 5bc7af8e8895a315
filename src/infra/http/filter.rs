use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::application::orchestrator::Dispatch;
use crate::application::transport::ResourceRequest;

use super::HttpState;

/// Intercept requests under the bundler prefix and answer them with the
/// processed artifact. Other requests pass through untouched.
pub async fn bundle_filter(
    State(state): State<HttpState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.owns(request.uri().path()) {
        return next.run(request).await;
    }

    let resource_request = ResourceRequest::new(request.uri().clone(), request.headers().clone());
    match state.orchestrator.handle(&resource_request).await {
        Ok(Dispatch::Served(response)) => response.into_response(),
        Ok(Dispatch::Continue) => next.run(request).await,
        Err(error) => error.into_response(),
    }
}
