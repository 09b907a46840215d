//! Periodic collection loop.
//!
//! One cycle at a time: the next tick is not armed until the previous cycle
//! has finished reconciling, so cycles never overlap. When a cycle overruns
//! the interval the next one starts right away instead of being dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::collector::Collector;
use crate::command::CommandRunner;
use crate::freespace::SpaceProbe;
use crate::reconcile::Reconciler;

/// Runs collection cycles until the shutdown channel fires.
///
/// The blocking work (process spawning, statvfs) runs on the blocking pool;
/// reconciliation happens back on this task so the reconciler needs no
/// internal synchronization beyond the store's own lock.
pub async fn run_loop<R, S>(
    collector: Arc<Collector<R, S>>,
    mut reconciler: Reconciler,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    R: CommandRunner + Send + Sync + 'static,
    S: SpaceProbe + Send + Sync + 'static,
{
    let mut tick = tokio::time::interval(interval);
    // Delay rather than Skip: an overrun cycle is followed immediately by the
    // next one, and the schedule re-anchors from there.
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut cycle_count: u64 = 0;

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.changed() => {
                info!(cycle_count, "collection loop stopping");
                return;
            }
        }

        let collector = collector.clone();
        let t0 = Instant::now();
        let result = tokio::task::spawn_blocking(move || collector.collect_cycle()).await;
        let elapsed = t0.elapsed();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "collection cycle panicked in spawn_blocking");
                continue;
            }
        };

        reconciler.apply(&outcome);
        cycle_count += 1;

        if cycle_count == 1 {
            info!(
                duration_ms = elapsed.as_millis() as u64,
                "first collection cycle completed"
            );
        } else {
            debug!(
                duration_ms = elapsed.as_millis() as u64,
                cycle_count,
                "collection cycle completed"
            );
        }

        if elapsed > interval / 2 {
            warn!(
                duration_ms = elapsed.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "collection cycle exceeded 50% of interval"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MockRunner;
    use crate::freespace::MockSpaceProbe;
    use crate::store::shared_store;

    const SNAPSHOT_JSON: &[u8] = br#"[{
        "id": "s1", "source": "home",
        "startTime": "2024-01-01T00:00:00Z",
        "endTime": "2024-01-01T00:10:00Z",
        "stats": {"totalSize": 1048576, "files": 10}
    }]"#;

    const STATUS_JSON: &[u8] =
        br#"{"status": "connected", "size": 2048, "cache": {"size": 64, "hits": 1, "miss": 0}}"#;

    #[tokio::test]
    async fn runs_a_cycle_then_stops_on_shutdown() {
        let runner = MockRunner::new()
            .respond("snapshot", SNAPSHOT_JSON)
            .respond("repository", STATUS_JSON);
        let probe = MockSpaceProbe {
            blocks: 100,
            block_size: 4096,
        };
        let collector = Arc::new(Collector::new(runner, probe, "/repository"));

        let store = shared_store().unwrap();
        let reconciler = Reconciler::new(store.clone());

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            collector,
            reconciler,
            Duration::from_millis(10),
            rx,
        ));

        // Give the loop a few ticks, then signal shutdown.
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop did not stop after shutdown signal")
            .unwrap();

        let store = store.lock().unwrap();
        assert_eq!(store.value("backup_status", &[("source", "home")]), Some(1.0));
        assert_eq!(store.value("repository_free_space_bytes", &[]), Some(409_600.0));
    }

    #[tokio::test]
    async fn pre_signaled_shutdown_stops_before_first_tick() {
        let runner = MockRunner::new();
        let probe = MockSpaceProbe {
            blocks: 1,
            block_size: 1,
        };
        let collector = Arc::new(Collector::new(runner, probe, "/repository"));
        let store = shared_store().unwrap();
        let reconciler = Reconciler::new(store.clone());

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        // A fresh interval fires its first tick immediately, so one cycle may
        // still run; the loop must exit promptly regardless.
        tokio::time::timeout(
            Duration::from_secs(5),
            run_loop(collector, reconciler, Duration::from_secs(3600), rx),
        )
        .await
        .expect("loop did not honor pre-signaled shutdown");
    }
}
