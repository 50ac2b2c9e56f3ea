//! Observability metrics exposed via the `metrics` crate.
//!
//! ## Metric Naming Conventions
//!
//! All metrics follow the pattern: `replisub_{name}_{unit}`
//!
//! - Counters: `_total` suffix
//! - Histograms: `_seconds` suffix
//! - Gauges: no suffix
//!
//! Metrics are observability only; no protocol decision reads them.

use metrics::{counter, gauge, histogram};

/// Counter of snapshot rounds started.
const SNAPSHOTS_STARTED: &str = "replisub_snapshots_started_total";
/// Gauge of currently pending snapshot rounds.
const SNAPSHOTS_PENDING: &str = "replisub_snapshots_pending";
/// Counter of snapshot rounds that collected every response.
const SNAPSHOTS_COMPLETED: &str = "replisub_snapshots_completed_total";
/// Latency from round start to completion.
const SNAPSHOT_COMPLETED_LATENCY: &str = "replisub_snapshot_completed_latency_seconds";
/// Counter of snapshot rounds abandoned on timeout.
const SNAPSHOTS_TIMED_OUT: &str = "replisub_snapshots_timed_out_total";
/// Age of a round when it was abandoned.
const SNAPSHOT_TIMEOUT_LATENCY: &str = "replisub_snapshot_timeout_latency_seconds";

/// Records the start of a snapshot round.
#[inline]
pub fn record_snapshot_started() {
    counter!(SNAPSHOTS_STARTED).increment(1);
    gauge!(SNAPSHOTS_PENDING).increment(1.0);
}

/// Records completion of a snapshot round.
#[inline]
pub fn record_snapshot_completed(latency_secs: f64) {
    gauge!(SNAPSHOTS_PENDING).decrement(1.0);
    counter!(SNAPSHOTS_COMPLETED).increment(1);
    histogram!(SNAPSHOT_COMPLETED_LATENCY).record(latency_secs);
}

/// Records a snapshot round abandoned on timeout.
#[inline]
pub fn record_snapshot_timed_out(latency_secs: f64) {
    gauge!(SNAPSHOTS_PENDING).decrement(1.0);
    counter!(SNAPSHOTS_TIMED_OUT).increment(1);
    histogram!(SNAPSHOT_TIMEOUT_LATENCY).record(latency_secs);
}
