//! Dispatch metrics.
//!
//! # Metrics
//! - `dispatch_flows_resolved_total` (counter): flows yielded, by api and resolver
//! - `dispatch_endpoint_selected_total` (counter): load balancer picks, by group
//! - `dispatch_invocations_total` (counter): finished invocations, by status
//! - `dispatch_invocation_duration_seconds` (histogram): invocation latency
//! - `dispatch_failover_attempts_total` (counter): retries, by invoker

use std::time::Duration;

pub fn record_flows_resolved(api: &str, resolver: &'static str, count: usize) {
    ::metrics::counter!(
        "dispatch_flows_resolved_total",
        "api" => api.to_string(),
        "resolver" => resolver
    )
    .increment(count as u64);
}

pub fn record_endpoint_selected(group: &str) {
    ::metrics::counter!("dispatch_endpoint_selected_total", "group" => group.to_string()).increment(1);
}

pub fn record_invocation(status: u16, elapsed: Duration) {
    ::metrics::counter!("dispatch_invocations_total", "status" => status.to_string()).increment(1);
    ::metrics::histogram!("dispatch_invocation_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_failover_attempt(invoker: &str) {
    ::metrics::counter!("dispatch_failover_attempts_total", "invoker" => invoker.to_string()).increment(1);
}
