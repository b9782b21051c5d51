//! Adapter metrics

use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge_vec, CounterVec,
    HistogramVec, IntGaugeVec,
};

lazy_static::lazy_static! {
    pub static ref PROCESSOR_LOOKUPS_TOTAL: CounterVec = register_counter_vec!(
        "processor_lookups_total",
        "Total processor lookups",
        &["processor", "status"]
    )
    .unwrap();

    pub static ref PROCESSOR_LOOKUP_DURATION: HistogramVec = register_histogram_vec!(
        "processor_lookup_duration_seconds",
        "Processor lookup duration",
        &["processor"]
    )
    .unwrap();

    pub static ref PROCESSOR_CIRCUIT_STATE: IntGaugeVec = register_int_gauge_vec!(
        "processor_circuit_state",
        "Circuit breaker state (0=closed, 1=half-open, 2=open)",
        &["processor"]
    )
    .unwrap();
}
