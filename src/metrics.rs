// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for keyspace-tree.
//!
//! Uses the `metrics` crate facade; the host application installs the
//! exporter (Prometheus, OTEL, etc.).
//!
//! # Metric Naming Convention
//! - `keyspace_tree_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: load, live_update, expand, rematerialize
//! - `source`: memory, redis
//! - `reason`: epoch, node, cap

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// BUILD - Grouping keys into the tree
// ═══════════════════════════════════════════════════════════════════════════

/// Record one builder pass
pub fn record_build(keys: usize, materialized: usize, deferred: usize, duration: Duration) {
    histogram!("keyspace_tree_build_seconds").record(duration.as_secs_f64());
    histogram!("keyspace_tree_build_keys").record(keys as f64);
    counter!("keyspace_tree_keys_materialized_total").increment(materialized as u64);
    counter!("keyspace_tree_keys_deferred_total").increment(deferred as u64);
}

/// Record a reconcile pass
pub fn record_reconcile(added: usize, removed: usize, duration: Duration) {
    histogram!("keyspace_tree_reconcile_seconds").record(duration.as_secs_f64());
    counter!("keyspace_tree_reconcile_added_total").increment(added as u64);
    counter!("keyspace_tree_reconcile_removed_total").increment(removed as u64);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "keyspace_tree_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// SOURCES - Key fetches
// ═══════════════════════════════════════════════════════════════════════════

/// Record a completed key fetch
pub fn record_fetch(source: &str, keys: usize) {
    counter!(
        "keyspace_tree_fetches_total",
        "source" => source.to_string()
    )
    .increment(1);
    histogram!(
        "keyspace_tree_fetch_keys",
        "source" => source.to_string()
    )
    .record(keys as f64);
}

/// Record a failed key fetch
pub fn record_fetch_error(operation: &str) {
    counter!(
        "keyspace_tree_fetch_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// COORDINATOR - Task lifecycle
// ═══════════════════════════════════════════════════════════════════════════

/// Record a background result discarded as stale
pub fn record_stale_result(reason: &str) {
    counter!(
        "keyspace_tree_stale_results_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record live update being switched off for a database
pub fn record_live_update_disabled(reason: &str) {
    counter!(
        "keyspace_tree_live_update_disabled_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Set number of tasks in flight
pub fn set_tasks_in_flight(count: usize) {
    gauge!("keyspace_tree_tasks_in_flight").set(count as f64);
}

/// Set number of live tree nodes
pub fn set_tree_nodes(count: usize) {
    gauge!("keyspace_tree_nodes").set(count as f64);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
