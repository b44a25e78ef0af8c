//! Prometheus metrics for the data coordinator.
//!
//! Metrics are registered lazily on first access using once_cell::Lazy.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

/// Compaction signals handled, by kind (`global`, `segment`) and trigger (`auto`, `force`)
pub static COMPACTION_SIGNALS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "datacoord_compaction_signals_total",
        "Total number of compaction signals handled",
        &["kind", "trigger"]
    )
    .expect("Failed to register compaction signal counter")
});

/// Plans produced by the trigger, by outcome (`submitted`, `rejected`)
pub static COMPACTION_PLANS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "datacoord_compaction_plans_total",
        "Total number of compaction plans produced",
        &["outcome"]
    )
    .expect("Failed to register compaction plan counter")
});

/// Tracked compaction tasks by state
pub static COMPACTION_TASKS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "datacoord_compaction_tasks",
        "Number of tracked compaction tasks by state",
        &["state"]
    )
    .expect("Failed to register compaction task gauge")
});

/// Time spent evaluating one signal
pub static TRIGGER_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "datacoord_compaction_trigger_duration_seconds",
        "Compaction signal handling duration in seconds",
        &["kind"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register compaction trigger duration histogram")
});
