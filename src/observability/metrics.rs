//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gatehouse_admission_decisions_total` (counter): decisions by verdict, reason
//! - `gatehouse_admission_duration_seconds` (histogram): decision latency
//! - `gatehouse_counter_writes_total` (counter): access-list counter writes by kind, result
//! - `gatehouse_compile_total` (counter): compile passes by result
//! - `gatehouse_compile_duration_seconds` (histogram): compile pass latency
//! - `gatehouse_compile_skipped_routes` (gauge): rows dropped by the last pass
//! - `gatehouse_supervisor_state` (gauge): numeric supervisor state
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed, so tests need no setup
//! - Labels are static strings; addresses never become label values

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        );

    let builder = match builder {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to apply histogram buckets, using defaults");
            PrometheusBuilder::new().with_http_listener(addr)
        }
    };

    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_admission(verdict: &'static str, reason: &'static str, started: Instant) {
    metrics::counter!(
        "gatehouse_admission_decisions_total",
        "verdict" => verdict,
        "reason" => reason
    )
    .increment(1);
    metrics::histogram!("gatehouse_admission_duration_seconds")
        .record(started.elapsed().as_secs_f64());
}

pub fn record_counter_write(kind: &'static str, result: &'static str) {
    metrics::counter!(
        "gatehouse_counter_writes_total",
        "kind" => kind,
        "result" => result
    )
    .increment(1);
}

pub fn record_compile(result: &'static str, started: Instant) {
    metrics::counter!("gatehouse_compile_total", "result" => result).increment(1);
    metrics::histogram!("gatehouse_compile_duration_seconds")
        .record(started.elapsed().as_secs_f64());
}

pub fn record_skipped_routes(count: usize) {
    metrics::gauge!("gatehouse_compile_skipped_routes").set(count as f64);
}

pub fn record_supervisor_state(code: u8) {
    metrics::gauge!("gatehouse_supervisor_state").set(f64::from(code));
}
