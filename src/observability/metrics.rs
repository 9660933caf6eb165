//! Metrics collection and exposition.
//!
//! # Metrics
//! - `cascade_requests_total` (counter): handled requests by outcome
//! - `cascade_breaker_transitions_total` (counter): breaker transitions by from/to
//! - `cascade_short_circuits_total` (counter): calls refused, by source (local breaker or shared cache)
//! - `cascade_fallbacks_total` (counter): alternative / exception resolutions by result
//! - `cascade_propagated_records_total` (counter): cascade writes by kind and result
//! - `cascade_stale_records_total` (counter): bus records discarded as expired
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed, so tests need no setup
//! - Labels are bounded enums; endpoint keys are logged, not used as labels

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::breaker::State;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(outcome: &'static str) {
    metrics::counter!("cascade_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_transition(from: State, to: State) {
    metrics::counter!(
        "cascade_breaker_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub fn record_short_circuit(source: &'static str) {
    metrics::counter!("cascade_short_circuits_total", "source" => source).increment(1);
}

pub fn record_fallback(result: &'static str) {
    metrics::counter!("cascade_fallbacks_total", "result" => result).increment(1);
}

pub fn record_propagation(kind: &'static str, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    metrics::counter!(
        "cascade_propagated_records_total",
        "kind" => kind,
        "result" => result
    )
    .increment(1);
}

pub fn record_stale_record() {
    metrics::counter!("cascade_stale_records_total").increment(1);
}
