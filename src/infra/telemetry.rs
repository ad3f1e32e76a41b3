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

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
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

/// Register descriptions for every metric the engine emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "devlog_cache_hit_total",
            Unit::Count,
            "Total number of entity cache hits."
        );
        describe_counter!(
            "devlog_cache_miss_total",
            Unit::Count,
            "Total number of entity cache misses."
        );
        describe_counter!(
            "devlog_cache_evict_total",
            Unit::Count,
            "Total number of entity cache evictions due to capacity."
        );
        describe_counter!(
            "devlog_fetch_discarded_total",
            Unit::Count,
            "Fetch responses dropped because a newer fetch or local write won."
        );
        describe_counter!(
            "devlog_mutation_reconciled_total",
            Unit::Count,
            "Mutations confirmed by the remote service."
        );
        describe_counter!(
            "devlog_mutation_rollback_total",
            Unit::Count,
            "Mutations whose speculative state was rolled back."
        );
        describe_counter!(
            "devlog_mutation_purged_total",
            Unit::Count,
            "Mutations whose target no longer existed remotely."
        );
        describe_histogram!(
            "devlog_mutation_ms",
            Unit::Milliseconds,
            "Mutation round-trip latency in milliseconds."
        );
    });
}
