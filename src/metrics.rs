//! Lightweight metrics helpers for Vane.
//!
//! This module exposes a small set of convenience functions wrapping the
//! `metrics` crate macros. It intentionally avoids embedding a concrete
//! exporter (the application can initialize any compatible recorder
//! externally) while still documenting and describing Vane-specific metric
//! names.
//!
//! Provided metrics (labels vary by family):
//! * `vane_requests_routed_total` (counter, by route)
//! * `vane_requests_blocked_total` (counter, by policy)
//! * `vane_requests_failed_total` (counter, by reason)
//! * `vane_route_decision_duration_seconds` (histogram, by outcome)
//! * `vane_target_health_status` (gauge per target)
//! * `vane_breaker_state` (gauge per route)
//! * `vane_history_entries` (gauge)
use std::{collections::HashMap, sync::Mutex, time::Duration};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

use crate::core::circuit_breaker::BreakerState;

// Vane-specific metric names
pub const VANE_REQUESTS_ROUTED_TOTAL: &str = "vane_requests_routed_total";
pub const VANE_REQUESTS_BLOCKED_TOTAL: &str = "vane_requests_blocked_total";
pub const VANE_REQUESTS_FAILED_TOTAL: &str = "vane_requests_failed_total"; // labels: reason
pub const VANE_ROUTE_DECISION_DURATION_SECONDS: &str = "vane_route_decision_duration_seconds";
pub const VANE_TARGET_HEALTH_STATUS: &str = "vane_target_health_status";
pub const VANE_BREAKER_STATE: &str = "vane_breaker_state"; // 0 closed, 1 open, 2 half-open
pub const VANE_HISTORY_ENTRIES: &str = "vane_history_entries";

/// Storage for target health gauge values
pub static TARGET_HEALTH_GAUGES: Lazy<Mutex<HashMap<String, f64>>> = Lazy::new(|| {
    // Register metric descriptions
    describe_gauge!(
        VANE_TARGET_HEALTH_STATUS,
        "Health status of individual targets (1 for healthy, 0 for unhealthy)"
    );
    describe_counter!(
        VANE_REQUESTS_ROUTED_TOTAL,
        Unit::Count,
        "Total number of requests routed to a target."
    );
    describe_counter!(
        VANE_REQUESTS_BLOCKED_TOTAL,
        Unit::Count,
        "Total number of requests blocked by a traffic policy."
    );
    describe_counter!(
        VANE_REQUESTS_FAILED_TOTAL,
        Unit::Count,
        "Total number of requests that could not be routed."
    );
    describe_histogram!(
        VANE_ROUTE_DECISION_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of routing decisions, by outcome."
    );
    describe_gauge!(
        VANE_BREAKER_STATE,
        "Circuit breaker state per route (0 closed, 1 open, 2 half-open)."
    );
    describe_gauge!(
        VANE_HISTORY_ENTRIES,
        "Number of request records currently held in the history ring."
    );

    Mutex::new(HashMap::new())
});

/// Set (and record) the health status gauge for a target.
pub fn set_target_health_status(target_url: &str, is_healthy: bool) {
    let health_value = if is_healthy { 1.0 } else { 0.0 };

    if let Ok(mut gauges) = TARGET_HEALTH_GAUGES.lock() {
        gauges.insert(target_url.to_string(), health_value);
    } else {
        tracing::error!("Failed to acquire lock for target health gauges");
        return;
    }

    let target_label = target_url.to_string();
    gauge!(VANE_TARGET_HEALTH_STATUS, "target" => target_label).set(health_value);
}

/// Set the breaker state gauge for a route.
pub fn set_breaker_state(route: &str, state: BreakerState) {
    let value = match state {
        BreakerState::Closed => 0.0,
        BreakerState::Open => 1.0,
        BreakerState::HalfOpen => 2.0,
    };
    gauge!(VANE_BREAKER_STATE, "route" => route.to_string()).set(value);
}

/// Set the history ring occupancy gauge.
pub fn set_history_entries(count: usize) {
    gauge!(VANE_HISTORY_ENTRIES).set(count as f64);
}

/// Increment the routed-request counter for a route.
pub fn increment_requests_routed(route: &str) {
    counter!(VANE_REQUESTS_ROUTED_TOTAL, "route" => route.to_string()).increment(1);
}

/// Increment the blocked-request counter for a policy.
pub fn increment_requests_blocked(policy: &str) {
    counter!(VANE_REQUESTS_BLOCKED_TOTAL, "policy" => policy.to_string()).increment(1);
}

/// Increment the failed-request counter for a failure reason.
pub fn increment_requests_failed(reason: &str) {
    counter!(VANE_REQUESTS_FAILED_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Record one routing decision's duration.
pub fn record_decision_duration(outcome: &'static str, duration: Duration) {
    histogram!(VANE_ROUTE_DECISION_DURATION_SECONDS, "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    tracing::info!("Initializing Vane metrics system");

    // Force lazy initialization of metrics descriptions
    Lazy::force(&TARGET_HEALTH_GAUGES);

    tracing::info!("Vane metrics system initialized successfully");
    Ok(())
}

/// Collect a snapshot of gauge values used for ad-hoc exports.
pub fn get_current_metrics() -> HashMap<String, f64> {
    let mut metrics = HashMap::new();

    if let Ok(gauges) = TARGET_HEALTH_GAUGES.lock() {
        for (target, health) in gauges.iter() {
            metrics.insert(format!("target_health_{target}"), *health);
        }
    }

    metrics
}
