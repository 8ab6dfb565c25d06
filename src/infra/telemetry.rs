use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "motorway_cache_hit_total",
            Unit::Count,
            "Total number of fresh response-cache hits."
        );
        describe_counter!(
            "motorway_cache_miss_total",
            Unit::Count,
            "Total number of response-cache misses."
        );
        describe_counter!(
            "motorway_cache_stale_total",
            Unit::Count,
            "Total number of stale responses served while revalidating."
        );
        describe_counter!(
            "motorway_cache_wait_hit_total",
            Unit::Count,
            "Total number of hits found after waiting on another refill."
        );
        describe_counter!(
            "motorway_cache_bypass_total",
            Unit::Count,
            "Total number of requests that skipped the cache read path."
        );
        describe_counter!(
            "motorway_cache_store_error_total",
            Unit::Count,
            "Total number of store failures absorbed by the response cache."
        );
        describe_counter!(
            "motorway_cache_revalidate_total",
            Unit::Count,
            "Total number of background revalidations by outcome."
        );
        describe_histogram!(
            "motorway_search_build_ms",
            Unit::Milliseconds,
            "Search index build latency in milliseconds."
        );
        describe_gauge!(
            "motorway_search_entries",
            Unit::Count,
            "Entries in the process-local search index."
        );
    });
}
