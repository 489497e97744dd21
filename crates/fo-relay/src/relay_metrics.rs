//! Metrics for the fanout relay
//!
//! Recorded through the `metrics` facade; the binary installs a Prometheus
//! recorder and serves it on the management listener.

use metrics::{counter, histogram};
use std::time::Duration;

/// Record the outcome of one inbound broadcast
pub fn record_broadcast(outcome: &'static str) {
    counter!("fanout_broadcasts_total", "outcome" => outcome).increment(1);
}

/// Record the number of endpoints a broadcast fanned out to
pub fn record_broadcast_endpoints(count: usize) {
    histogram!("fanout_broadcast_endpoints").record(count as f64);
}

/// Record one finished downstream call
pub fn record_job(result: &'static str, duration: Duration) {
    counter!("fanout_jobs_total", "result" => result).increment(1);
    histogram!("fanout_job_duration_seconds").record(duration.as_secs_f64());
}
