use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Transport crates log every connection at `debug`; keep them at `warn`
/// unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: &[&str] = &["hyper=warn", "hyper_util=warn", "h2=warn"];

#[derive(Clone, Copy)]
enum MetricKind {
    Counter,
    Histogram,
}

const METRICS: &[(&str, MetricKind, &str)] = &[
    (
        "fascio_cache_hit_total",
        MetricKind::Counter,
        "Requests answered from the processed-artifact cache.",
    ),
    (
        "fascio_cache_miss_total",
        MetricKind::Counter,
        "Requests that had to run the processor chain.",
    ),
    (
        "fascio_cache_evict_total",
        MetricKind::Counter,
        "Cached artifacts evicted due to capacity.",
    ),
    (
        "fascio_cache_flush_total",
        MetricKind::Counter,
        "Full cache flushes, scheduled or manual.",
    ),
    (
        "fascio_processing_failure_total",
        MetricKind::Counter,
        "Requests that reached the failure hook.",
    ),
    (
        "fascio_model_reload_total",
        MetricKind::Counter,
        "Group model reload attempts, labelled by result.",
    ),
    (
        "fascio_processing_ms",
        MetricKind::Histogram,
        "Latency of successfully handled bundle requests in milliseconds.",
    ),
];

/// Install the global tracing subscriber and describe the metrics.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let mut env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() {
        for directive in QUIET_TARGETS {
            if let Ok(directive) = directive.parse() {
                env_filter = env_filter.add_directive(directive);
            }
        }
    }

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("failed to install tracing subscriber: {err}")))
}

/// Register descriptions for every metric fascio emits. Safe to call more
/// than once; only the first call registers.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        for &(name, kind, description) in METRICS {
            match kind {
                MetricKind::Counter => describe_counter!(name, Unit::Count, description),
                MetricKind::Histogram => {
                    describe_histogram!(name, Unit::Milliseconds, description)
                }
            }
        }
    });
}
