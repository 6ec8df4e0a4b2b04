use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_COMPUTE_MS, METRIC_EVICT, METRIC_FRESH, METRIC_MISS, METRIC_PURGED,
    METRIC_REVALIDATE_FAILED, METRIC_STALE, METRIC_SUPERSEDED,
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
            METRIC_FRESH,
            Unit::Count,
            "Total number of reads served from a fresh entry."
        );
        describe_counter!(
            METRIC_STALE,
            Unit::Count,
            "Total number of reads served from a stale entry while revalidating."
        );
        describe_counter!(
            METRIC_MISS,
            Unit::Count,
            "Total number of reads that found no entry."
        );
        describe_counter!(
            METRIC_EVICT,
            Unit::Count,
            "Total number of entries evicted due to capacity."
        );
        describe_counter!(
            METRIC_PURGED,
            Unit::Count,
            "Total number of entries removed by tag or fingerprint purges."
        );
        describe_counter!(
            METRIC_REVALIDATE_FAILED,
            Unit::Count,
            "Total number of background revalidations that failed."
        );
        describe_counter!(
            METRIC_SUPERSEDED,
            Unit::Count,
            "Total number of computed values discarded because a purge superseded them."
        );
        describe_histogram!(
            METRIC_COMPUTE_MS,
            Unit::Milliseconds,
            "Read computation latency in milliseconds."
        );
    });
}
