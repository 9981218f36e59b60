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
            "pinfall_cache_hit_total",
            Unit::Count,
            "Total number of cached query hits."
        );
        describe_counter!(
            "pinfall_cache_miss_total",
            Unit::Count,
            "Total number of cached query misses."
        );
        describe_counter!(
            "pinfall_cache_backend_error_total",
            Unit::Count,
            "Total number of cache backend failures absorbed by cached queries."
        );
        describe_counter!(
            "pinfall_cache_evict_total",
            Unit::Count,
            "Total number of in-memory cache evictions due to capacity."
        );
        describe_gauge!(
            "pinfall_refresh_listeners",
            Unit::Count,
            "Current number of refresh status observers."
        );
        describe_counter!(
            "pinfall_refresh_stream_lagged_total",
            Unit::Count,
            "Total number of refresh observers resynchronised after lagging."
        );
        describe_counter!(
            "pinfall_refresh_job_total",
            Unit::Count,
            "Total number of finished document refresh jobs by outcome."
        );
        describe_histogram!(
            "pinfall_refresh_job_ms",
            Unit::Milliseconds,
            "Document refresh job latency in milliseconds."
        );
    });
}
