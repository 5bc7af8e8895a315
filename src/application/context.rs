//! Per-request context and its release guard.

use std::fmt;
use std::sync::{Arc, Mutex};

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

use crate::application::runtime_config::RuntimeConfiguration;
use crate::application::transport::ResourceRequest;
use crate::cache::mutex_lock;

const SOURCE: &str = "application::context";

/// Query parameter that disables minimizing processors in debug mode.
pub const MINIMIZE_PARAM: &str = "minimize";

/// Everything a single `handle` call knows about its request.
///
/// Created by the orchestrator, borrowed by hooks, dropped when the call
/// returns. It is never stored beyond that call.
pub struct RequestContext<'a> {
    request_id: Uuid,
    request: &'a ResourceRequest,
    config: Arc<RuntimeConfiguration>,
    response_headers: Mutex<HeaderMap>,
}

impl<'a> RequestContext<'a> {
    pub fn new(request: &'a ResourceRequest, config: Arc<RuntimeConfiguration>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            request,
            config,
            response_headers: Mutex::new(HeaderMap::new()),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn request(&self) -> &'a ResourceRequest {
        self.request
    }

    pub fn config(&self) -> &RuntimeConfiguration {
        &self.config
    }

    /// Whether minimizing processors run for this request.
    ///
    /// Only a debug configuration honours `minimize=false`.
    pub fn minimize(&self) -> bool {
        !(self.config.debug()
            && self
                .request
                .query_param(MINIMIZE_PARAM)
                .is_some_and(|value| value.eq_ignore_ascii_case("false")))
    }

    /// Queue a header for the response that ends this request. Hooks use this
    /// to decorate whatever is eventually served.
    pub fn insert_response_header(&self, name: HeaderName, value: HeaderValue) {
        mutex_lock(&self.response_headers, SOURCE, "insert_response_header").insert(name, value);
    }

    pub(crate) fn apply_response_headers(&self, headers: &mut HeaderMap) {
        let queued = std::mem::take(&mut *mutex_lock(
            &self.response_headers,
            SOURCE,
            "apply_response_headers",
        ));
        for (name, value) in queued {
            if let Some(name) = name {
                headers.insert(name, value);
            }
        }
    }
}

impl fmt::Debug for RequestContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("path", &self.request.path())
            .finish_non_exhaustive()
    }
}

/// How a request ended, as reported to the release hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Succeeded,
    Failed,
    /// The handling future was dropped before it finished.
    Aborted,
}

/// What the release hook observes once a request is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedContext {
    pub request_id: Uuid,
    pub path: String,
    pub outcome: RequestOutcome,
}

pub type ReleaseHook = Arc<dyn Fn(&ReleasedContext) + Send + Sync>;

/// Runs the release hook exactly once, when dropped.
///
/// Unless [`ContextGuard::finish`] recorded an outcome, the request counts as
/// aborted.
pub(crate) struct ContextGuard {
    request_id: Uuid,
    path: String,
    outcome: Option<RequestOutcome>,
    on_release: ReleaseHook,
}

impl ContextGuard {
    pub(crate) fn new(context: &RequestContext<'_>, on_release: ReleaseHook) -> Self {
        Self {
            request_id: context.request_id(),
            path: context.request().path().to_string(),
            outcome: None,
            on_release,
        }
    }

    pub(crate) fn finish(&mut self, outcome: RequestOutcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let released = ReleasedContext {
            request_id: self.request_id,
            path: std::mem::take(&mut self.path),
            outcome: self.outcome.unwrap_or(RequestOutcome::Aborted),
        };
        (self.on_release)(&released);
    }
}
