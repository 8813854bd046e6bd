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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "connexa_monitor_cache_hit_total",
            Unit::Count,
            "Indicator lookups answered from a fresh cache entry."
        );
        describe_counter!(
            "connexa_monitor_cache_miss_total",
            Unit::Count,
            "Indicator lookups that had to query the data source."
        );
        describe_counter!(
            "connexa_monitor_cache_fetch_error_total",
            Unit::Count,
            "Cache fetches that failed and were not stored."
        );
        describe_gauge!(
            "connexa_monitor_cache_entries",
            Unit::Count,
            "Keys currently tracked by the query cache."
        );
        describe_counter!(
            "connexa_monitor_indicator_render_total",
            Unit::Count,
            "Indicator panels rendered, labelled by indicator and outcome."
        );
        describe_histogram!(
            "connexa_monitor_query_ms",
            Unit::Milliseconds,
            "Indicator query latency against the data source in milliseconds."
        );
    });
}
