//! A handful of `prometheus` gauges/counters for the syncer's externally
//! visible progress. Grounded on the `LazyLock<IntGauge...>` pattern used
//! throughout `nearcore/src/metrics.rs` and referenced from
//! `chain/client/src/sync/state/mod.rs` as `crate::metrics::STATE_SYNC_STAGE`.
//! Built directly against `prometheus` here rather than through `near-o11y`,
//! which wraps that crate but is itself out of this crate's scope.

use prometheus::{IntCounter, IntGauge, Opts};
use std::sync::LazyLock;

pub static SYNCER_STAGE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("statesync_stage", "Current stage of the syncer state machine (0=idle)")
        .expect("metric registration")
});

pub static SNAPSHOTS_REJECTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::with_opts(Opts::new("statesync_snapshots_rejected_total", "Snapshots rejected by the pool"))
        .expect("metric registration")
});

pub static CHUNKS_APPLIED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::with_opts(Opts::new("statesync_chunks_applied_total", "Chunks accepted by the application"))
        .expect("metric registration")
});
