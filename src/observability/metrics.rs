//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Name every metric the core emits in one place
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//!
//! # Metrics
//! - `live_config_updates_total` (counter): update attempts by outcome
//! - `live_config_rollbacks_total` (counter): rollbacks, explicit or automatic
//! - `live_config_watcher_failures_total` (counter): failed watcher callbacks
//! - `live_config_snapshots` (gauge): snapshots currently held
//! - `live_config_cache_{hits,misses,evictions}_total` (counter)
//! - `live_config_cache_entries` (gauge)
//! - `live_config_hot_reloads_total` (counter): reload outcomes by key
//! - `live_config_sync_conflicts_total` (counter): conflicts by strategy
//! - `live_config_sync_peers` (gauge): known peers
//! - `live_config_audit_entries_total` (counter): entries appended by action
//!
//! # Design Decisions
//! - Without an installed recorder every helper is a no-op, so library users
//!   and tests pay nothing

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

const UPDATES_TOTAL: &str = "live_config_updates_total";
const ROLLBACKS_TOTAL: &str = "live_config_rollbacks_total";
const WATCHER_FAILURES_TOTAL: &str = "live_config_watcher_failures_total";
const SNAPSHOTS: &str = "live_config_snapshots";

const CACHE_HITS: &str = "live_config_cache_hits_total";
const CACHE_MISSES: &str = "live_config_cache_misses_total";
const CACHE_EVICTIONS: &str = "live_config_cache_evictions_total";
const CACHE_ENTRIES: &str = "live_config_cache_entries";

const HOT_RELOADS_TOTAL: &str = "live_config_hot_reloads_total";

const SYNC_CONFLICTS_TOTAL: &str = "live_config_sync_conflicts_total";
const SYNC_PEERS: &str = "live_config_sync_peers";
const SYNC_MESSAGES_TOTAL: &str = "live_config_sync_messages_total";

const AUDIT_ENTRIES_TOTAL: &str = "live_config_audit_entries_total";

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(metrics_addr = %addr, "Prometheus metrics exporter started"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus exporter"),
    }
}

#[inline]
pub fn record_update(outcome: &'static str) {
    counter!(UPDATES_TOTAL, "outcome" => outcome).increment(1);
}

#[inline]
pub fn record_rollback() {
    counter!(ROLLBACKS_TOTAL).increment(1);
}

#[inline]
pub fn record_watcher_failure() {
    counter!(WATCHER_FAILURES_TOTAL).increment(1);
}

#[inline]
pub fn record_snapshot_count(count: usize) {
    gauge!(SNAPSHOTS).set(count as f64);
}

#[inline]
pub fn record_cache_hit() {
    counter!(CACHE_HITS).increment(1);
}

#[inline]
pub fn record_cache_miss() {
    counter!(CACHE_MISSES).increment(1);
}

#[inline]
pub fn record_cache_eviction() {
    counter!(CACHE_EVICTIONS).increment(1);
}

#[inline]
pub fn record_cache_entries(count: usize) {
    gauge!(CACHE_ENTRIES).set(count as f64);
}

/// Records a hot reload outcome (`reloaded`, `validation_failed`, `load_failed`, `unchanged`).
#[inline]
pub fn record_hot_reload(key: &str, outcome: &'static str) {
    counter!(HOT_RELOADS_TOTAL, "key" => key.to_string(), "outcome" => outcome).increment(1);
}

#[inline]
pub fn record_sync_conflict(strategy: &'static str) {
    counter!(SYNC_CONFLICTS_TOTAL, "strategy" => strategy).increment(1);
}

#[inline]
pub fn record_sync_message(direction: &'static str, kind: &'static str) {
    counter!(SYNC_MESSAGES_TOTAL, "direction" => direction, "kind" => kind).increment(1);
}

#[inline]
pub fn record_peer_count(count: usize) {
    gauge!(SYNC_PEERS).set(count as f64);
}

#[inline]
pub fn record_audit_entry(action: &'static str) {
    counter!(AUDIT_ENTRIES_TOTAL, "action" => action).increment(1);
}
