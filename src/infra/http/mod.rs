//! axum adapter: routes bundle requests through the orchestrator.

mod filter;
mod middleware;

use std::sync::Arc;

use axum::{Router, http::StatusCode, middleware as axum_middleware, response::IntoResponse};

use crate::application::orchestrator::ProcessingOrchestrator;

pub use filter::bundle_filter;
pub use middleware::log_responses;

#[derive(Clone)]
pub struct HttpState {
    pub orchestrator: Arc<ProcessingOrchestrator>,
    /// Path prefix owned by the bundler, e.g. `/wro`.
    pub prefix: Arc<str>,
}

impl HttpState {
    pub fn new(orchestrator: Arc<ProcessingOrchestrator>, prefix: impl Into<Arc<str>>) -> Self {
        Self {
            orchestrator,
            prefix: prefix.into(),
        }
    }

    /// Whether `path` lies under the bundler prefix.
    pub fn owns(&self, path: &str) -> bool {
        path.strip_prefix(&*self.prefix)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Build the public router. Requests under the prefix go through
/// [`bundle_filter`]; everything else, and bundle requests the failure hook
/// lets continue, reaches `downstream`.
pub fn build_router_with(state: HttpState, downstream: Router) -> Router {
    downstream
        .fallback(fallback)
        .layer(axum_middleware::from_fn_with_state(state, bundle_filter))
        .layer(axum_middleware::from_fn(log_responses))
}

/// [`build_router_with`] and no downstream routes.
pub fn build_router(state: HttpState) -> Router {
    build_router_with(state, Router::new())
}

async fn fallback() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}
