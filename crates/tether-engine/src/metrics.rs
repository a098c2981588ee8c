//! Diagnostics counters for the lifetime bridge.
//!
//! [`BridgeMetrics`] is a point-in-time snapshot: table occupancy is
//! computed on demand, cumulative counters are read from the engine's
//! atomics. Nothing here is used for control decisions.

use std::sync::atomic::{AtomicU64, Ordering};

/// Table occupancy and cumulative bridge activity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BridgeMetrics {
    /// Handle slots in use.
    pub handles_active: usize,
    /// Handle slots being released.
    pub handles_disposing: usize,
    /// Handle slots released and cached for reuse.
    pub handles_disposed: usize,
    /// Occupied object slots.
    pub objects_live: usize,
    /// Object slots holding a rooted handle.
    pub objects_rooted: usize,
    /// Cumulative native collection passes forced by the host.
    pub collection_passes: u64,
    /// Cumulative handles moved to `Disposed`.
    pub reclaimed_handles: u64,
    /// Cumulative bridge decisions deferred to `process_pending`.
    pub deferred_decisions: u64,
    /// Cumulative collection requests for unknown or unconnected handles.
    pub orphan_requests: u64,
    /// Cumulative callback failures answered with "reclaim".
    pub fail_open_events: u64,
    /// Cumulative object slots removed by `sweep`.
    pub swept_objects: u64,
}

/// Cumulative counters shared by every clone of an engine.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) collection_passes: AtomicU64,
    pub(crate) reclaimed_handles: AtomicU64,
    pub(crate) deferred_decisions: AtomicU64,
    pub(crate) orphan_requests: AtomicU64,
    pub(crate) fail_open_events: AtomicU64,
    pub(crate) swept_objects: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Copy the cumulative counters into `metrics`.
    pub(crate) fn fill(&self, metrics: &mut BridgeMetrics) {
        metrics.collection_passes = self.collection_passes.load(Ordering::Relaxed);
        metrics.reclaimed_handles = self.reclaimed_handles.load(Ordering::Relaxed);
        metrics.deferred_decisions = self.deferred_decisions.load(Ordering::Relaxed);
        metrics.orphan_requests = self.orphan_requests.load(Ordering::Relaxed);
        metrics.fail_open_events = self.fail_open_events.load(Ordering::Relaxed);
        metrics.swept_objects = self.swept_objects.load(Ordering::Relaxed);
    }
}
