//! Correlation IDs for review runs.
//!
//! Every top-level analysis gets a `trace_id`; subagents and iterations derive
//! their IDs from it so log lines from nested loops can be stitched together.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generate a unique trace ID for a top-level analysis.
pub fn generate_trace_id() -> String {
    let ts = Utc::now().timestamp_millis();
    // Counter disambiguates calls within the same millisecond.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tr-{ts:x}-{count:04x}")
}

/// Trace ID for subagent `id` spawned under `parent`.
pub fn subagent_trace_id(parent: &str, id: u32) -> String {
    format!("{parent}-sub{id}")
}

/// Span ID for one iteration of a run.
pub fn generate_span_id(trace_id: &str, iteration: u32) -> String {
    format!("{trace_id}:i{iteration}")
}
