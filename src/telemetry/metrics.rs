//! Counters and gauges for the telemetry pipeline.

use ::metrics::{counter, gauge};

pub fn record_batch_received(bytes: usize) {
    counter!("policy_tap_batches_received_total").increment(1);
    counter!("policy_tap_batch_bytes_total").increment(bytes as u64);
}

pub fn record_queue_depth(depth: usize) {
    gauge!("policy_tap_queue_depth").set(depth as f64);
}

pub fn record_invocation() {
    counter!("policy_tap_invocations_total").increment(1);
}

pub fn record_snapshot() {
    counter!("policy_tap_snapshots_total").increment(1);
}

pub fn record_dropped_batch() {
    counter!("policy_tap_dropped_batches_total").increment(1);
}
