use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};

lazy_static! {
    // Request metrics
    pub static ref TAKES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "driplimit_takes_total",
        "Total number of take decisions",
        &["type", "conformant"]
    ).unwrap();

    pub static ref TOKENS_CONSUMED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "driplimit_tokens_consumed_total",
        "Total number of tokens deducted by conformant takes",
        &["type"]
    ).unwrap();

    pub static ref ERL_ACTIVE_TAKES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "driplimit_erl_active_takes_total",
        "Takes answered while elevated limits were active",
        &["type"]
    ).unwrap();

    pub static ref SKIP_CACHE_HITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "driplimit_skip_cache_hits_total",
        "Takes answered from the skip-call cache without a round-trip",
        &["type"]
    ).unwrap();

    // Store metrics
    pub static ref STORE_DURATION: HistogramVec = register_histogram_vec!(
        "driplimit_store_duration_seconds",
        "Store round-trip duration in seconds",
        &["op"],
        vec![0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5]
    ).unwrap();

    pub static ref STORE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "driplimit_store_errors_total",
        "Total number of failed store operations",
        &["op"]
    ).unwrap();

    // Liveness metrics
    pub static ref PING_TOTAL: IntCounterVec = register_int_counter_vec!(
        "driplimit_ping_total",
        "Liveness probe outcomes",
        &["status"]
    ).unwrap();

    pub static ref CONFIGURED_TYPES: IntGauge = register_int_gauge!(
        "driplimit_configured_bucket_types",
        "Number of compiled bucket types"
    ).unwrap();
}

/// Record a take decision
pub fn record_take(bucket_type: &str, conformant: bool, count: u64) {
    let conformant_str = if conformant { "true" } else { "false" };
    TAKES_TOTAL
        .with_label_values(&[bucket_type, conformant_str])
        .inc();

    if conformant {
        TOKENS_CONSUMED_TOTAL
            .with_label_values(&[bucket_type])
            .inc_by(count);
    }
}

/// Record a take answered while elevated limits were active
pub fn record_erl_active(bucket_type: &str) {
    ERL_ACTIVE_TAKES_TOTAL
        .with_label_values(&[bucket_type])
        .inc();
}

/// Record a skip-call cache hit
pub fn record_skip_hit(bucket_type: &str) {
    SKIP_CACHE_HITS_TOTAL
        .with_label_values(&[bucket_type])
        .inc();
}

/// Record a store round-trip
pub fn record_store_op(op: &str, duration_secs: f64) {
    STORE_DURATION.with_label_values(&[op]).observe(duration_secs);
}

/// Record a failed store operation
pub fn record_store_error(op: &str) {
    STORE_ERRORS_TOTAL.with_label_values(&[op]).inc();
}

/// Record a liveness probe outcome
pub fn record_ping(status: &str) {
    PING_TOTAL.with_label_values(&[status]).inc();
}

/// Update the compiled bucket type gauge
pub fn update_configured_types(count: usize) {
    CONFIGURED_TYPES.set(count as i64);
}
