//! Engine metrics

use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Histogram,
    HistogramVec,
};

lazy_static::lazy_static! {
    /// Verifications by final status
    pub static ref VERIFICATIONS_TOTAL: CounterVec = register_counter_vec!(
        "trust_verifications_total",
        "Total verifications by status",
        &["status"]
    )
    .unwrap();

    /// End-to-end verification latency
    pub static ref VERIFICATION_DURATION: Histogram = register_histogram!(
        "trust_verification_duration_seconds",
        "Verification duration",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap();

    /// Collectors that fell back to neutral defaults
    pub static ref COLLECTOR_DEGRADED_TOTAL: CounterVec = register_counter_vec!(
        "trust_collector_degraded_total",
        "Collector calls degraded to the neutral default",
        &["collector"]
    )
    .unwrap();

    /// Refund decisions by outcome
    pub static ref REFUND_DECISIONS_TOTAL: CounterVec = register_counter_vec!(
        "trust_refund_decisions_total",
        "Refund decisions by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Routing decisions by selected processor
    pub static ref ROUTING_DECISIONS_TOTAL: CounterVec = register_counter_vec!(
        "trust_routing_decisions_total",
        "Routing decisions by processor",
        &["processor"]
    )
    .unwrap();

    /// Cross-reference fan-out latency
    pub static ref CROSS_REFERENCE_DURATION: HistogramVec = register_histogram_vec!(
        "trust_cross_reference_duration_seconds",
        "Cross-reference fan-out duration",
        &["found"]
    )
    .unwrap();
}
