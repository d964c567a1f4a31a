use once_cell::sync::Lazy;
use prometheus::{opts, register_int_counter_vec, register_int_gauge, IntCounterVec, IntGauge, TextEncoder};
use tracing_unwrap::ResultExt;

/// Current number of rows in the sync queue, published on every
/// processor tick.
pub(crate) static QUEUE_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!("queue_size", "Number of issue keys waiting in the sync queue")).unwrap_or_log()
});

pub(crate) static UPSTREAM_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("upstream_requests_total", "Requests issued against the upstream trackers"),
        &["source"]
    ).unwrap_or_log()
});

pub(crate) static UPSTREAM_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("upstream_errors_total", "Failed requests against the upstream trackers"),
        &["source"]
    ).unwrap_or_log()
});

/// Renders the default registry in the text exposition format.
pub(crate) fn gather() -> String {
    TextEncoder::new().encode_to_string(&prometheus::gather()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_gauge_is_exported() {
        QUEUE_SIZE.set(3);

        let exposition = gather();
        assert!(exposition.contains("queue_size 3"));
    }

    #[test]
    fn request_counters_are_labelled_per_source() {
        UPSTREAM_REQUESTS.with_label_values(&["legacy"]).inc();
        UPSTREAM_REQUESTS.with_label_values(&["legacy"]).inc();

        let exposition = gather();
        assert!(exposition.contains("upstream_requests_total{source=\"legacy\"} 2"));
    }
}
