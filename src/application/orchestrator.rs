//! Request-time processing orchestrator.
//!
//! [`ProcessingOrchestrator::handle`] turns one [`ResourceRequest`] into a
//! served artifact:
//!
//! 1. open a [`RequestContext`] guarded by the release hook;
//! 2. resolve the requested group and load its resources;
//! 3. fingerprint the source bytes and consult the [`ProcessingCache`];
//! 4. on a miss run pre-processors per resource, merge with `\n`, run
//!    post-processors on the merged text and store the result;
//! 5. answer with `ETag`/`Cache-Control` headers, or `304` when the client
//!    already holds the artifact.
//!
//! Failures reach the failure hook exactly once; the release hook always runs
//! last.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Instant;

use axum::http::{
    HeaderMap, HeaderValue, StatusCode,
    header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH},
};
use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::{Span, debug, error, field, info, instrument, warn};

use crate::application::context::{
    ContextGuard, ReleaseHook, ReleasedContext, RequestContext, RequestOutcome,
};
use crate::application::error::{ErrorReport, ProcessingError};
use crate::application::processors::{ProcessorRef, ProcessorRegistry};
use crate::application::runtime_config::{ConfigError, RuntimeConfigBuilder, RuntimeConfiguration};
use crate::application::sources::{GroupResolver, ResolveError, ResourceLocator};
use crate::application::transport::{ResourceRequest, ResourceResponse};
use crate::cache::{
    CacheFlushTask, CacheKey, LruProcessingCache, PeriodicScheduler, PeriodicTask,
    ProcessedContent, ProcessingCache,
};
use crate::domain::resource::{ResolvedGroup, Resource, ResourceType};

const METRIC_CACHE_HIT_TOTAL: &str = "fascio_cache_hit_total";
const METRIC_CACHE_MISS_TOTAL: &str = "fascio_cache_miss_total";
const METRIC_PROCESSING_FAILURE_TOTAL: &str = "fascio_processing_failure_total";
const METRIC_PROCESSING_MS: &str = "fascio_processing_ms";

const CACHE_CONTROL_DEBUG: &str = "no-cache";
const CACHE_CONTROL_RELEASE: &str = "public, max-age=31536000";

pub type SuccessHook = Arc<dyn Fn(&RequestContext<'_>) + Send + Sync>;
pub type FailureHook =
    Arc<dyn Fn(&ProcessingError, &RequestContext<'_>) -> FailureOutcome + Send + Sync>;

/// Decision returned by the failure hook.
#[derive(Debug)]
pub enum FailureOutcome {
    /// Serve this response instead.
    Respond(ResourceResponse),
    /// Hand the request to the downstream handler untouched.
    Continue,
    /// Return the error from [`ProcessingOrchestrator::handle`].
    Propagate,
}

/// Result of a handled request.
#[derive(Debug)]
pub enum Dispatch {
    Served(ResourceResponse),
    /// The request should continue down the handler chain.
    Continue,
}

/// The failure hook used when none is configured: log, then answer with a
/// generic `404` or `500` body carrying an [`ErrorReport`].
pub fn default_failure_hook() -> FailureHook {
    Arc::new(|error: &ProcessingError, context: &RequestContext<'_>| {
        let status = error.status_code();
        if status.is_server_error() {
            error!(
                target = "fascio::orchestrator",
                request_id = %context.request_id(),
                path = context.request().path(),
                error = %error,
                "processing failed"
            );
        } else {
            warn!(
                target = "fascio::orchestrator",
                request_id = %context.request_id(),
                path = context.request().path(),
                error = %error,
                "requested resource not found"
            );
        }
        let report = ErrorReport::from_error("application::orchestrator", status, error);
        FailureOutcome::Respond(
            ResourceResponse::new(status, error.presentation_message())
                .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))
                .with_report(report),
        )
    })
}

pub struct ProcessingOrchestratorBuilder {
    resolver: Arc<dyn GroupResolver>,
    locator: Arc<dyn ResourceLocator>,
    config: RuntimeConfigBuilder,
    registry: Option<Arc<ProcessorRegistry>>,
    cache: Option<Arc<dyn ProcessingCache>>,
    reload_task: Option<Arc<dyn PeriodicTask>>,
    on_success: Option<SuccessHook>,
    on_failure: Option<FailureHook>,
    on_release: Option<ReleaseHook>,
}

impl ProcessingOrchestratorBuilder {
    /// Replace the property mapping of the runtime configuration.
    pub fn properties(mut self, properties: HashMap<String, String>) -> Self {
        self.config = self.config.properties(properties);
        self
    }

    /// Use a prepared configuration builder, including its overrides. Replaces
    /// properties set earlier through [`Self::properties`].
    pub fn config_builder(mut self, builder: RuntimeConfigBuilder) -> Self {
        self.config = builder;
        self
    }

    pub fn registry(mut self, registry: Arc<ProcessorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ProcessingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Task run every `model-update-period` seconds, typically a group model
    /// reload.
    pub fn reload_task(mut self, task: Arc<dyn PeriodicTask>) -> Self {
        self.reload_task = Some(task);
        self
    }

    pub fn on_success(
        mut self,
        hook: impl Fn(&RequestContext<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn on_failure(
        mut self,
        hook: impl Fn(&ProcessingError, &RequestContext<'_>) -> FailureOutcome + Send + Sync + 'static,
    ) -> Self {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    pub fn on_release(mut self, hook: impl Fn(&ReleasedContext) + Send + Sync + 'static) -> Self {
        self.on_release = Some(Arc::new(hook));
        self
    }

    /// Validate the configuration and assemble the orchestrator.
    ///
    /// Fails on the first unknown processor alias or malformed property;
    /// nothing is started in that case.
    pub fn build(self) -> Result<ProcessingOrchestrator, ConfigError> {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ProcessorRegistry::with_builtins()));
        let config = Arc::new(self.config.build(&registry)?);
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(LruProcessingCache::default()));

        let cache_scheduler = PeriodicScheduler::new(
            config.cache_update_period(),
            Arc::new(CacheFlushTask::new(Arc::clone(&cache))),
        );
        let reload_scheduler = self
            .reload_task
            .map(|task| PeriodicScheduler::new(config.model_update_period(), task));

        let pre: Vec<&str> = config.pre_processors().iter().map(ProcessorRef::alias).collect();
        let post: Vec<&str> = config.post_processors().iter().map(ProcessorRef::alias).collect();
        info!(
            target = "fascio::orchestrator",
            encoding = config.encoding(),
            management_id = config.management_id().unwrap_or("-"),
            cache_update_period = config.cache_update_period(),
            model_update_period = config.model_update_period(),
            pre_processors = ?pre,
            post_processors = ?post,
            debug = config.debug(),
            fingerprint = %config.fingerprint(),
            "processing configuration ready"
        );

        Ok(ProcessingOrchestrator {
            config,
            resolver: self.resolver,
            locator: self.locator,
            cache,
            cache_scheduler,
            reload_scheduler,
            on_success: self.on_success.unwrap_or_else(|| Arc::new(|_: &RequestContext<'_>| {})),
            on_failure: self.on_failure.unwrap_or_else(default_failure_hook),
            on_release: self.on_release.unwrap_or_else(|| Arc::new(|_: &ReleasedContext| {})),
        })
    }
}

/// Owns the active configuration, the collaborators and the background
/// schedulers for one deployment.
pub struct ProcessingOrchestrator {
    config: Arc<RuntimeConfiguration>,
    resolver: Arc<dyn GroupResolver>,
    locator: Arc<dyn ResourceLocator>,
    cache: Arc<dyn ProcessingCache>,
    cache_scheduler: PeriodicScheduler,
    reload_scheduler: Option<PeriodicScheduler>,
    on_success: SuccessHook,
    on_failure: FailureHook,
    on_release: ReleaseHook,
}

impl ProcessingOrchestrator {
    pub fn builder(
        resolver: Arc<dyn GroupResolver>,
        locator: Arc<dyn ResourceLocator>,
    ) -> ProcessingOrchestratorBuilder {
        ProcessingOrchestratorBuilder {
            resolver,
            locator,
            config: RuntimeConfigBuilder::new(),
            registry: None,
            cache: None,
            reload_task: None,
            on_success: None,
            on_failure: None,
            on_release: None,
        }
    }

    pub fn config(&self) -> &Arc<RuntimeConfiguration> {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn ProcessingCache> {
        &self.cache
    }

    /// Start the periodic cache flush and model reload. Requires a tokio
    /// runtime.
    pub fn start(&self) {
        self.cache_scheduler.start();
        if let Some(scheduler) = &self.reload_scheduler {
            scheduler.start();
        }
    }

    /// Stop every scheduler and wait for in-flight ticks.
    pub async fn shutdown(&self) {
        self.cache_scheduler.stop().await;
        if let Some(scheduler) = &self.reload_scheduler {
            scheduler.stop().await;
        }
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.cache_scheduler.is_running()
    }

    /// Drop every cached artifact now.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    #[instrument(
        name = "fascio.handle",
        skip_all,
        fields(path = request.path(), request_id = field::Empty)
    )]
    pub async fn handle(&self, request: &ResourceRequest) -> Result<Dispatch, ProcessingError> {
        let started_at = Instant::now();
        let context = RequestContext::new(request, Arc::clone(&self.config));
        Span::current().record("request_id", field::display(context.request_id()));
        let mut guard = ContextGuard::new(&context, Arc::clone(&self.on_release));

        match self.process(&context).await {
            Ok(mut response) => {
                (self.on_success)(&context);
                context.apply_response_headers(&mut response.headers);
                histogram!(METRIC_PROCESSING_MS)
                    .record(started_at.elapsed().as_secs_f64() * 1000.0);
                guard.finish(RequestOutcome::Succeeded);
                Ok(Dispatch::Served(response))
            }
            Err(error) => {
                counter!(METRIC_PROCESSING_FAILURE_TOTAL).increment(1);
                let outcome = (self.on_failure)(&error, &context);
                guard.finish(RequestOutcome::Failed);
                match outcome {
                    FailureOutcome::Respond(mut response) => {
                        context.apply_response_headers(&mut response.headers);
                        Ok(Dispatch::Served(response))
                    }
                    FailureOutcome::Continue => Ok(Dispatch::Continue),
                    FailureOutcome::Propagate => Err(error),
                }
            }
        }
    }

    async fn process(&self, context: &RequestContext<'_>) -> Result<ResourceResponse, ProcessingError> {
        let group = self.resolver.resolve(context.request()).await?;
        let minimize = context.minimize();
        let sources = self.load_sources(&group).await?;
        let fingerprint = self.source_fingerprint(&group, &sources)?;
        let key = CacheKey::new(group.id.clone(), minimize, fingerprint);
        let resource_type = group.id.resource_type;

        let content = match self.cache.get(&key) {
            Some(content) => {
                counter!(METRIC_CACHE_HIT_TOTAL, "type" => resource_type.extension()).increment(1);
                debug!(target = "fascio::orchestrator", key = %key, "cache hit");
                content
            }
            None => {
                counter!(METRIC_CACHE_MISS_TOTAL, "type" => resource_type.extension())
                    .increment(1);
                let content = self.run_chain(&group, &sources, minimize)?;
                debug!(
                    target = "fascio::orchestrator",
                    key = %key,
                    bytes = content.body.len(),
                    "cache miss, artifact processed"
                );
                self.cache.put(key, content.clone());
                content
            }
        };

        Ok(self.build_response(context, resource_type, content))
    }

    async fn load_sources(
        &self,
        group: &ResolvedGroup,
    ) -> Result<Vec<(Resource, Bytes)>, ProcessingError> {
        let mut sources = Vec::with_capacity(group.resources.len());
        for resource in &group.resources {
            match self.locator.load(resource).await {
                Ok(bytes) => sources.push((resource.clone(), bytes)),
                Err(ResolveError::ResourceNotFound { uri })
                    if self.config.ignore_missing_resources() =>
                {
                    warn!(
                        target = "fascio::orchestrator",
                        group = %group.id,
                        uri = %uri,
                        "skipping missing resource"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(sources)
    }

    fn source_fingerprint(
        &self,
        group: &ResolvedGroup,
        sources: &[(Resource, Bytes)],
    ) -> Result<String, ProcessingError> {
        // Each member is framed by its uri and length so that moving bytes
        // between members, or adding an empty one, changes the digest.
        let frames: Vec<String> = sources
            .iter()
            .map(|(resource, bytes)| format!("{}\0{}\0", resource.uri, bytes.len()))
            .collect();
        let mut reader: Box<dyn Read + '_> = Box::new(io::empty());
        for ((_, bytes), frame) in sources.iter().zip(&frames) {
            reader = Box::new(reader.chain(frame.as_bytes()).chain(bytes.as_ref()));
        }
        self.config
            .fingerprint()
            .generator()
            .digest(&mut reader)
            .map_err(|source| ProcessingError::Fingerprint {
                group: group.id.to_string(),
                source,
            })
    }

    fn run_chain(
        &self,
        group: &ResolvedGroup,
        sources: &[(Resource, Bytes)],
        minimize: bool,
    ) -> Result<ProcessedContent, ProcessingError> {
        let resource_type = group.id.resource_type;
        let applies = |stage: &&ProcessorRef| stage.applies_to(resource_type, minimize);

        let mut parts = Vec::with_capacity(sources.len());
        for (resource, bytes) in sources {
            let mut text = String::from_utf8_lossy(bytes).into_owned();
            for stage in self.config.pre_processors().iter().filter(applies) {
                text = stage
                    .process(&text, Some(resource))
                    .map_err(|source| {
                        ProcessingError::processor(stage.alias(), resource.uri.as_str(), source)
                    })?;
            }
            parts.push(text);
        }

        let mut merged = parts.join("\n");
        for stage in self.config.post_processors().iter().filter(applies) {
            merged = stage.process(&merged, None).map_err(|source| {
                ProcessingError::processor(stage.alias(), group.id.to_string(), source)
            })?;
        }

        let etag = self
            .config
            .fingerprint()
            .generator()
            .digest_bytes(merged.as_bytes());
        Ok(ProcessedContent::new(merged, etag))
    }

    fn build_response(
        &self,
        context: &RequestContext<'_>,
        resource_type: ResourceType,
        content: ProcessedContent,
    ) -> ResourceResponse {
        let etag = format!("\"{}\"", content.etag);
        let cache_control = if self.config.debug() {
            CACHE_CONTROL_DEBUG
        } else {
            CACHE_CONTROL_RELEASE
        };

        let mut response = if if_none_match(context.request().headers(), &etag) {
            ResourceResponse::new(StatusCode::NOT_MODIFIED, Bytes::new())
        } else {
            let content_type = format!(
                "{}; charset={}",
                resource_type.content_type(),
                self.config.encoding()
            );
            let content_type = HeaderValue::from_str(&content_type)
                .unwrap_or_else(|_| HeaderValue::from_static(resource_type.content_type()));
            ResourceResponse::new(StatusCode::OK, content.body).with_header(CONTENT_TYPE, content_type)
        };

        response
            .headers
            .insert(CACHE_CONTROL, HeaderValue::from_static(cache_control));
        if let Ok(value) = HeaderValue::from_str(&etag) {
            response.headers.insert(ETAG, value);
        }
        response
    }
}

/// Whether any `If-None-Match` entity tag matches `etag` (weak comparison).
fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|candidate| {
            candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::application::processors::{ProcessorError, ResourceProcessor};
    use crate::application::runtime_config::{
        PROP_CACHE_UPDATE_PERIOD, PROP_DEBUG, PROP_IGNORE_MISSING_RESOURCES, PROP_POST_PROCESSORS,
        PROP_PRE_PROCESSORS,
    };
    use crate::domain::resource::GroupId;

    /// Resolves `/wro/<name>.<ext>` against a fixed list of groups.
    struct StaticResolver {
        groups: Vec<ResolvedGroup>,
    }

    #[async_trait]
    impl GroupResolver for StaticResolver {
        async fn resolve(&self, request: &ResourceRequest) -> Result<ResolvedGroup, ResolveError> {
            let name = request.path().trim_start_matches("/wro/");
            self.groups
                .iter()
                .find(|group| group.id.to_string() == name)
                .cloned()
                .ok_or_else(|| ResolveError::GroupNotFound {
                    name: name.to_string(),
                })
        }
    }

    struct MapLocator {
        files: Mutex<HashMap<String, String>>,
        loads: AtomicUsize,
    }

    impl MapLocator {
        fn new(files: &[(&str, &str)]) -> Self {
            Self {
                files: Mutex::new(
                    files
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                loads: AtomicUsize::new(0),
            }
        }

        fn set(&self, uri: &str, content: &str) {
            self.files
                .lock()
                .unwrap()
                .insert(uri.to_string(), content.to_string());
        }
    }

    #[async_trait]
    impl ResourceLocator for MapLocator {
        async fn load(&self, resource: &Resource) -> Result<Bytes, ResolveError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.files
                .lock()
                .unwrap()
                .get(&resource.uri)
                .map(|content| Bytes::from(content.clone()))
                .ok_or_else(|| ResolveError::ResourceNotFound {
                    uri: resource.uri.clone(),
                })
        }
    }

    /// Upper-cases its input and counts invocations.
    struct Shout {
        calls: Arc<AtomicUsize>,
    }

    impl ResourceProcessor for Shout {
        fn process(&self, input: &str, _: Option<&Resource>) -> Result<String, ProcessorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(input.to_uppercase())
        }
    }

    struct Broken;

    impl ResourceProcessor for Broken {
        fn process(&self, _: &str, _: Option<&Resource>) -> Result<String, ProcessorError> {
            Err(ProcessorError::failed("boom"))
        }
    }

    fn js_group() -> ResolvedGroup {
        ResolvedGroup {
            id: GroupId::new("all", ResourceType::Js),
            resources: vec![
                Resource::new("a.js", ResourceType::Js),
                Resource::new("b.js", ResourceType::Js),
            ],
        }
    }

    struct Fixture {
        locator: Arc<MapLocator>,
        cache: Arc<LruProcessingCache>,
        shout_calls: Arc<AtomicUsize>,
        registry: Arc<ProcessorRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            let shout_calls = Arc::new(AtomicUsize::new(0));
            let mut registry = ProcessorRegistry::with_builtins();
            registry
                .register(
                    "shout",
                    Shout {
                        calls: Arc::clone(&shout_calls),
                    },
                )
                .register("broken", Broken);
            Self {
                locator: Arc::new(MapLocator::new(&[("a.js", "var a = 1"), ("b.js", "var b = 2")])),
                cache: Arc::new(LruProcessingCache::default()),
                shout_calls,
                registry: Arc::new(registry),
            }
        }

        fn builder(&self, properties: &[(&str, &str)]) -> ProcessingOrchestratorBuilder {
            let properties = properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            ProcessingOrchestrator::builder(
                Arc::new(StaticResolver {
                    groups: vec![js_group()],
                }),
                self.locator.clone(),
            )
            .properties(properties)
            .registry(Arc::clone(&self.registry))
            .cache(self.cache.clone())
        }
    }

    fn served(dispatch: Dispatch) -> ResourceResponse {
        match dispatch {
            Dispatch::Served(response) => response,
            Dispatch::Continue => panic!("expected a served response"),
        }
    }

    fn request(uri: &str) -> ResourceRequest {
        ResourceRequest::from_uri(uri).unwrap()
    }

    #[tokio::test]
    async fn unknown_alias_prevents_construction() {
        let fixture = Fixture::new();
        let result = fixture
            .builder(&[(PROP_PRE_PROCESSORS, "INVALID_PROCESSOR_NAME")])
            .build();
        match result {
            Err(err) => assert_eq!(err.unknown_alias(), Some("INVALID_PROCESSOR_NAME")),
            Ok(_) => panic!("construction must fail"),
        }
    }

    #[tokio::test]
    async fn processes_group_in_order_and_serves_headers() {
        let fixture = Fixture::new();
        let orchestrator = fixture
            .builder(&[
                (PROP_PRE_PROCESSORS, "semicolonAppender"),
                (PROP_POST_PROCESSORS, "shout"),
                (PROP_DEBUG, "false"),
            ])
            .build()
            .unwrap();

        let response = served(orchestrator.handle(&request("/wro/all.js")).await.unwrap());
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from_static(b"VAR A = 1;\nVAR B = 2;"));
        assert_eq!(
            response.header_str(&CONTENT_TYPE),
            Some("application/javascript; charset=UTF-8")
        );
        assert_eq!(response.header_str(&CACHE_CONTROL), Some(CACHE_CONTROL_RELEASE));
        let etag = response.header_str(&ETAG).unwrap();
        assert!(etag.starts_with('"') && etag.len() == 10);
    }

    #[tokio::test]
    async fn cache_hit_skips_the_chain() {
        let fixture = Fixture::new();
        let orchestrator = fixture
            .builder(&[(PROP_POST_PROCESSORS, "shout")])
            .build()
            .unwrap();

        let first = served(orchestrator.handle(&request("/wro/all.js")).await.unwrap());
        let second = served(orchestrator.handle(&request("/wro/all.js")).await.unwrap());
        assert_eq!(first.body, second.body);
        assert_eq!(fixture.shout_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.cache.len(), 1);
        assert_eq!(second.header_str(&CACHE_CONTROL), Some(CACHE_CONTROL_DEBUG));
    }

    #[tokio::test]
    async fn changed_source_misses_the_cache() {
        let fixture = Fixture::new();
        let orchestrator = fixture
            .builder(&[(PROP_POST_PROCESSORS, "shout")])
            .build()
            .unwrap();

        orchestrator.handle(&request("/wro/all.js")).await.unwrap();
        fixture.locator.set("b.js", "var b = 3");
        let response = served(orchestrator.handle(&request("/wro/all.js")).await.unwrap());
        assert_eq!(response.body, Bytes::from_static(b"VAR A = 1\nVAR B = 3"));
        assert_eq!(fixture.shout_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bytes_moved_between_members_miss_the_cache() {
        let fixture = Fixture::new();
        fixture.locator.set("a.js", "ab");
        fixture.locator.set("b.js", "c");
        let orchestrator = fixture
            .builder(&[(PROP_PRE_PROCESSORS, "semicolonAppender")])
            .build()
            .unwrap();

        let first = served(orchestrator.handle(&request("/wro/all.js")).await.unwrap());
        assert_eq!(first.body, Bytes::from_static(b"ab;\nc;"));

        fixture.locator.set("a.js", "a");
        fixture.locator.set("b.js", "bc");
        let second = served(orchestrator.handle(&request("/wro/all.js")).await.unwrap());
        assert_eq!(second.body, Bytes::from_static(b"a;\nbc;"));
        assert_eq!(fixture.cache.len(), 2);
    }

    #[tokio::test]
    async fn matching_if_none_match_yields_not_modified() {
        let fixture = Fixture::new();
        let orchestrator = fixture.builder(&[]).build().unwrap();

        let first = served(orchestrator.handle(&request("/wro/all.js")).await.unwrap());
        let etag = first.headers.get(ETAG).cloned().unwrap();

        let conditional = request("/wro/all.js").with_header(IF_NONE_MATCH, etag.clone());
        let response = served(orchestrator.handle(&conditional).await.unwrap());
        assert_eq!(response.status, StatusCode::NOT_MODIFIED);
        assert!(response.body.is_empty());
        assert_eq!(response.headers.get(ETAG), Some(&etag));
    }

    #[tokio::test]
    async fn failing_stage_stores_nothing_and_hits_hooks_once() {
        let fixture = Fixture::new();
        let failures = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(Mutex::new(Vec::new()));
        let failure_count = Arc::clone(&failures);
        let release_sink = Arc::clone(&released);

        let orchestrator = fixture
            .builder(&[(PROP_POST_PROCESSORS, "broken")])
            .on_failure(move |error, _context| {
                failure_count.fetch_add(1, Ordering::SeqCst);
                assert!(matches!(error, ProcessingError::Processor { alias, .. } if alias == "broken"));
                FailureOutcome::Respond(ResourceResponse::new(StatusCode::IM_A_TEAPOT, "custom"))
            })
            .on_release(move |context| release_sink.lock().unwrap().push(context.outcome))
            .build()
            .unwrap();

        let response = served(orchestrator.handle(&request("/wro/all.js")).await.unwrap());
        assert_eq!(response.status, StatusCode::IM_A_TEAPOT);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(fixture.cache.is_empty());
        assert_eq!(*released.lock().unwrap(), vec![RequestOutcome::Failed]);
    }

    #[tokio::test]
    async fn default_failure_hook_answers_not_found() {
        let fixture = Fixture::new();
        let orchestrator = fixture.builder(&[]).build().unwrap();

        let response = served(orchestrator.handle(&request("/wro/nope.js")).await.unwrap());
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.body, Bytes::from_static(b"Resource not found"));
        assert!(response.report().is_some());
    }

    #[tokio::test]
    async fn failure_outcomes_continue_and_propagate() {
        let fixture = Fixture::new();
        let orchestrator = fixture
            .builder(&[])
            .on_failure(|_, _| FailureOutcome::Continue)
            .build()
            .unwrap();
        assert!(matches!(
            orchestrator.handle(&request("/wro/nope.js")).await,
            Ok(Dispatch::Continue)
        ));

        let orchestrator = fixture
            .builder(&[])
            .on_failure(|_, _| FailureOutcome::Propagate)
            .build()
            .unwrap();
        let err = orchestrator.handle(&request("/wro/nope.js")).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::Resolve(ResolveError::GroupNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn success_runs_success_then_release_hooks() {
        let fixture = Fixture::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let on_success = Arc::clone(&events);
        let on_release = Arc::clone(&events);

        let orchestrator = fixture
            .builder(&[])
            .on_success(move |context| {
                on_success.lock().unwrap().push("success".to_string());
                context.insert_response_header(
                    axum::http::HeaderName::from_static("x-bundle"),
                    HeaderValue::from_static("yes"),
                );
            })
            .on_release(move |released| {
                on_release
                    .lock()
                    .unwrap()
                    .push(format!("release:{:?}", released.outcome));
            })
            .build()
            .unwrap();

        let response = served(orchestrator.handle(&request("/wro/all.js")).await.unwrap());
        assert_eq!(response.header_str(&axum::http::HeaderName::from_static("x-bundle")), Some("yes"));
        assert_eq!(
            *events.lock().unwrap(),
            vec!["success".to_string(), "release:Succeeded".to_string()]
        );
    }

    #[tokio::test]
    async fn dropped_request_is_released_as_aborted() {
        struct Pending;

        #[async_trait]
        impl GroupResolver for Pending {
            async fn resolve(&self, _: &ResourceRequest) -> Result<ResolvedGroup, ResolveError> {
                std::future::pending().await
            }
        }

        let released = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&released);
        let orchestrator = ProcessingOrchestrator::builder(
            Arc::new(Pending),
            Arc::new(MapLocator::new(&[])),
        )
        .on_release(move |context| sink.lock().unwrap().push(context.outcome))
        .build()
        .unwrap();

        let request = request("/wro/all.js");
        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            orchestrator.handle(&request),
        )
        .await;
        assert!(outcome.is_err());
        assert_eq!(*released.lock().unwrap(), vec![RequestOutcome::Aborted]);
    }

    #[tokio::test]
    async fn missing_resources_are_skipped_or_fatal() {
        let fixture = Fixture::new();
        fixture.locator.files.lock().unwrap().remove("a.js");

        let orchestrator = fixture.builder(&[]).build().unwrap();
        let response = served(orchestrator.handle(&request("/wro/all.js")).await.unwrap());
        assert_eq!(response.body, Bytes::from_static(b"var b = 2"));

        let orchestrator = fixture
            .builder(&[(PROP_IGNORE_MISSING_RESOURCES, "false")])
            .on_failure(|_, _| FailureOutcome::Propagate)
            .build()
            .unwrap();
        let err = orchestrator.handle(&request("/wro/all.js")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn minimize_false_skips_minimizers_in_debug() {
        let fixture = Fixture::new();
        let orchestrator = fixture
            .builder(&[(PROP_POST_PROCESSORS, "jsMin")])
            .build()
            .unwrap();
        fixture.locator.set("a.js", "/* banner */\nvar a = 1");

        let minimized = served(orchestrator.handle(&request("/wro/all.js")).await.unwrap());
        assert_eq!(minimized.body, Bytes::from_static(b"var a = 1\nvar b = 2"));

        let raw = served(
            orchestrator
                .handle(&request("/wro/all.js?minimize=false"))
                .await
                .unwrap(),
        );
        assert_eq!(raw.body, Bytes::from_static(b"/* banner */\nvar a = 1\nvar b = 2"));
        assert_eq!(fixture.cache.len(), 2);
    }

    #[tokio::test]
    async fn omitted_period_never_starts_the_scheduler() {
        let fixture = Fixture::new();
        let orchestrator = fixture.builder(&[]).build().unwrap();
        orchestrator.start();
        assert!(!orchestrator.is_scheduler_running());
        orchestrator.shutdown().await;

        let orchestrator = fixture
            .builder(&[(PROP_CACHE_UPDATE_PERIOD, "10")])
            .build()
            .unwrap();
        orchestrator.start();
        assert!(orchestrator.is_scheduler_running());
        orchestrator.shutdown().await;
        assert!(!orchestrator.is_scheduler_running());
    }

    #[tokio::test]
    async fn clear_cache_empties_the_store() {
        let fixture = Fixture::new();
        let orchestrator = fixture.builder(&[]).build().unwrap();
        orchestrator.handle(&request("/wro/all.js")).await.unwrap();
        assert_eq!(orchestrator.cache().len(), 1);
        orchestrator.clear_cache();
        assert!(orchestrator.cache().is_empty());
    }

    #[test]
    fn if_none_match_accepts_lists_weak_tags_and_wildcard() {
        let mut headers = HeaderMap::new();
        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("\"x\", W/\"abc\""));
        assert!(if_none_match(&headers, "\"abc\""));
        assert!(!if_none_match(&headers, "\"def\""));

        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("*"));
        assert!(if_none_match(&headers, "\"def\""));
        assert!(!if_none_match(&HeaderMap::new(), "\"def\""));
    }
}
