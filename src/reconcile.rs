//! Reconciliation of polled facts into the metric store.
//!
//! The reconciler is the store's only writer. Every cycle it takes the three
//! per-fact results, locks the store once, and applies whatever succeeded.
//! A failed fact is logged and its previous values stay published
//! (stale-but-present); nothing in here ever aborts the loop or the process.
//!
//! Cache hit/miss counters: kopia reports running totals, so the reconciler
//! tracks the last-seen totals and adds only the delta each cycle. A total
//! that went backwards means the upstream restarted its counters; the full
//! new total is added in that case.

use tracing::{debug, warn};

use crate::collector::CycleOutcome;
use crate::decode::{RepositoryStatus, SnapshotRecord};
use crate::store::SharedStore;

/// Last-seen cumulative cache totals, for delta computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheTotals {
    hits: u64,
    miss: u64,
}

/// Maps decoded domain records onto metric store updates.
pub struct Reconciler {
    store: SharedStore,
    cache_last: Option<CacheTotals>,
}

impl Reconciler {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            cache_last: None,
        }
    }

    /// Applies one cycle's outcome to the store.
    ///
    /// The store lock is held for the whole batch, so a concurrent scrape
    /// observes the entire cycle or none of it.
    pub fn apply(&mut self, outcome: &CycleOutcome) {
        let store = self.store.lock().unwrap();

        match &outcome.snapshots {
            Ok(records) => {
                for record in records {
                    apply_snapshot(&store, record);
                }
                debug!(snapshots = records.len(), "reconciled snapshot list");
            }
            Err(e) => {
                warn!(error = %e, "snapshot list poll failed; keeping previous backup gauges");
            }
        }

        match &outcome.repository {
            Ok(status) => {
                self.cache_last = apply_repository(&store, status, self.cache_last);
                debug!(connected = status.is_connected(), "reconciled repository status");
            }
            Err(e) => {
                warn!(error = %e, "repository status poll failed; keeping previous repository gauges");
            }
        }

        match &outcome.free_space {
            Ok(bytes) => {
                store.set_free_space(*bytes as f64);
            }
            Err(e) => {
                warn!(error = %e, "free-space query failed; keeping previous gauge");
            }
        }
    }

    /// Publishes the outcome of the one-shot startup handshake.
    pub fn record_handshake(&self, connected: bool) {
        self.store.lock().unwrap().set_repository_connected(connected);
    }
}

/// Writes one snapshot's full gauge set. Records later in the decoded list
/// overwrite earlier ones with the same source (last-write-wins per poll).
fn apply_snapshot(store: &crate::store::MetricStore, record: &SnapshotRecord) {
    let duration = (record.end_time - record.start_time).num_seconds();
    if duration < 0 {
        // Data anomaly from the tool, not a reason to crash.
        warn!(
            source = %record.source,
            id = %record.id,
            duration,
            "snapshot ends before it starts; clamping duration to 0"
        );
    }

    store.set_backup(
        &record.source,
        if record.is_healthy() { 1.0 } else { 0.0 },
        record.stats.total_size as f64,
        duration.max(0) as f64,
        record.end_time.timestamp() as f64,
        record.stats.files as f64,
    );
}

fn apply_repository(
    store: &crate::store::MetricStore,
    status: &RepositoryStatus,
    cache_last: Option<CacheTotals>,
) -> Option<CacheTotals> {
    store.set_repository_connected(status.is_connected());
    store.set_repository_size(status.size as f64);
    store.set_cache_size(status.cache.size as f64);

    let current = CacheTotals {
        hits: status.cache.hits,
        miss: status.cache.miss,
    };
    let (hit_delta, miss_delta) = match cache_last {
        Some(last) if current.hits >= last.hits && current.miss >= last.miss => {
            (current.hits - last.hits, current.miss - last.miss)
        }
        Some(last) => {
            // Upstream totals went backwards: counter reset on the kopia side.
            warn!(
                last_hits = last.hits,
                last_miss = last.miss,
                hits = current.hits,
                miss = current.miss,
                "cache totals decreased; treating as upstream counter reset"
            );
            (current.hits, current.miss)
        }
        None => (current.hits, current.miss),
    };
    store.add_cache_hits(hit_delta);
    store.add_cache_misses(miss_delta);

    Some(current)
}
