//! Prometheus metrics
//!
//! Call sites record through the `metrics` facade; with the `metrics` feature
//! a Prometheus recorder is installed once at startup and rendered by the
//! `/metrics` endpoint. Without an installed recorder every call is a no-op.

use std::time::Duration;

use telemetry_metrics::{counter, histogram};

/// Total admission requests by resource kind and operation
pub const REQUESTS_TOTAL: &str = "mutating_webhook_requests_total";
/// Request duration by resource kind and operation
pub const REQUEST_DURATION: &str = "mutating_webhook_request_duration_seconds";
/// Requests that produced a patch, by resource kind
pub const MUTATIONS_TOTAL: &str = "mutating_webhook_mutations_total";
/// Errors by error type
pub const ERRORS_TOTAL: &str = "mutating_webhook_errors_total";
/// Successful certificate reloads
pub const CREDENTIAL_RELOADS_TOTAL: &str = "mutating_webhook_credential_reloads_total";
/// Successful config snapshot reloads
pub const CONFIG_RELOADS_TOTAL: &str = "mutating_webhook_config_reloads_total";
/// Requests rejected by the admission gate
pub const RATE_LIMITED_TOTAL: &str = "mutating_webhook_rate_limited_requests_total";

/// Same buckets as the Prometheus client defaults
#[cfg(feature = "metrics")]
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Record one decoded admission request
pub fn record_request(kind: &str, operation: &str) {
    counter!(
        REQUESTS_TOTAL,
        "resource_kind" => kind.to_owned(),
        "operation" => operation.to_owned()
    )
    .increment(1);
}

/// Record how long an answered admission request took
pub fn record_duration(kind: &str, operation: &str, elapsed: Duration) {
    histogram!(
        REQUEST_DURATION,
        "resource_kind" => kind.to_owned(),
        "operation" => operation.to_owned()
    )
    .record(elapsed.as_secs_f64());
}

/// Record a response that carried a patch
pub fn record_mutation(kind: &str) {
    counter!(MUTATIONS_TOTAL, "resource_kind" => kind.to_owned()).increment(1);
}

/// Record an error by its `error_type` label
pub fn record_error(error_type: &'static str) {
    counter!(ERRORS_TOTAL, "error_type" => error_type).increment(1);
}

/// Record a successful reload of a watched source
pub fn record_reload(source: &str) {
    match source {
        "credential" => counter!(CREDENTIAL_RELOADS_TOTAL).increment(1),
        "config" => counter!(CONFIG_RELOADS_TOTAL).increment(1),
        _ => {}
    }
}

/// Record a request turned away by the admission gate
pub fn record_rate_limited() {
    counter!(RATE_LIMITED_TOTAL).increment(1);
}

/// Renders the installed recorder in text exposition format
#[derive(Clone, Default)]
pub struct MetricsExporter {
    #[cfg(feature = "metrics")]
    handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl MetricsExporter {
    /// Exporter that renders nothing (tests, or a recorder installed elsewhere)
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Install the process-wide Prometheus recorder.
    ///
    /// Only one recorder can be installed per process; later calls fail.
    #[cfg(feature = "metrics")]
    pub fn install() -> crate::Result<Self> {
        use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(REQUEST_DURATION.to_string()),
                DURATION_BUCKETS,
            )
            .map_err(|e| crate::Error::Internal(format!("Invalid histogram buckets: {e}")))?
            .install_recorder()
            .map_err(|e| {
                crate::Error::Internal(format!("Failed to install metrics recorder: {e}"))
            })?;

        describe();
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Metrics are compiled out; nothing to install
    #[cfg(not(feature = "metrics"))]
    pub fn install() -> crate::Result<Self> {
        Ok(Self::default())
    }

    /// Current exposition text (empty when no recorder is installed)
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "metrics")]
        if let Some(handle) = &self.handle {
            return handle.render();
        }
        String::new()
    }
}

#[cfg(feature = "metrics")]
fn describe() {
    use telemetry_metrics::{describe_counter, describe_histogram};

    describe_counter!(
        REQUESTS_TOTAL,
        "The total number of mutating webhook requests"
    );
    describe_histogram!(
        REQUEST_DURATION,
        telemetry_metrics::Unit::Seconds,
        "The duration of mutating webhook requests in seconds"
    );
    describe_counter!(MUTATIONS_TOTAL, "The total number of mutations performed");
    describe_counter!(ERRORS_TOTAL, "The total number of errors encountered");
    describe_counter!(
        CREDENTIAL_RELOADS_TOTAL,
        "The total number of serving certificate reloads"
    );
    describe_counter!(
        CONFIG_RELOADS_TOTAL,
        "The total number of configuration reloads"
    );
    describe_counter!(
        RATE_LIMITED_TOTAL,
        "The total number of rate-limited requests"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_request("Kustomization", "CREATE");
        record_duration("Kustomization", "CREATE", Duration::from_millis(3));
        record_mutation("Kustomization");
        record_error("decode_error");
        record_reload("credential");
        record_rate_limited();
        assert_eq!(MetricsExporter::disabled().render(), "");
    }
}
