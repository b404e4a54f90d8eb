//! Instrumentation surface for LauraDB
//!
//! Thin wrappers over the `metrics` crate's facade. Recording is a no-op
//! until the embedding application installs a recorder; exporting metrics
//! (Prometheus endpoint, etc.) is an outer-surface concern and out of scope
//! here.

use std::time::Instant;

use metrics::{counter, gauge, histogram};

// ============================================================================
// Storage metrics
// ============================================================================

pub fn record_storage_write(bytes: u64) {
    counter!("lauradb_storage_bytes_written_total").increment(bytes);
}

pub fn record_storage_read(bytes: u64) {
    counter!("lauradb_storage_bytes_read_total").increment(bytes);
}

pub fn record_flush(entries: u64, duration_ms: u64) {
    counter!("lauradb_flush_total").increment(1);
    histogram!("lauradb_flush_duration_ms").record(duration_ms as f64);
    counter!("lauradb_flush_entries_total").increment(entries);
}

pub fn record_compaction(sstables_merged: u64, duration_ms: u64) {
    counter!("lauradb_compaction_total").increment(1);
    counter!("lauradb_compaction_sstables_merged_total").increment(sstables_merged);
    histogram!("lauradb_compaction_duration_ms").record(duration_ms as f64);
}

// ============================================================================
// Transaction metrics
// ============================================================================

pub fn record_txn_commit(success: bool) {
    let status = if success { "committed" } else { "conflict" };
    counter!("lauradb_txn_commits_total", "status" => status).increment(1);
}

pub fn record_txn_abort() {
    counter!("lauradb_txn_aborts_total").increment(1);
}

pub fn set_gc_watermark(watermark: u64) {
    gauge!("lauradb_version_gc_watermark").set(watermark as f64);
}

// ============================================================================
// Oplog metrics
// ============================================================================

pub fn record_oplog_append() {
    counter!("lauradb_oplog_appends_total").increment(1);
}

pub fn set_oplog_current_id(op_id: u64) {
    gauge!("lauradb_oplog_current_op_id").set(op_id as f64);
}

// ============================================================================
// Replica set metrics
// ============================================================================

pub fn record_election(won: bool) {
    let outcome = if won { "won" } else { "lost" };
    counter!("lauradb_elections_total", "outcome" => outcome).increment(1);
}

pub fn set_replication_lag(node_id: &str, lag_ms: u64) {
    gauge!("lauradb_replication_lag_ms", "node" => node_id.to_string()).set(lag_ms as f64);
}

// ============================================================================
// Change-stream metrics
// ============================================================================

pub fn record_change_event_delivered() {
    counter!("lauradb_change_events_delivered_total").increment(1);
}

pub fn record_change_event_dropped() {
    counter!("lauradb_change_events_dropped_total").increment(1);
}

/// Timer guard that records an operation's latency in microseconds when
/// dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(self.start.elapsed().as_secs_f64() * 1_000_000.0);
    }
}
