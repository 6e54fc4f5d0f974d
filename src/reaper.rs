use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::Ms;
use crate::observability;

/// One finalization pass: every in-progress appointment that has started
/// becomes finished. Returns how many were promoted.
pub async fn finalize_due(engine: &Engine, now: Ms) -> usize {
    let mut finished = 0;
    for id in engine.collect_due_appointments(now).await {
        match engine.finish_appointment(id).await {
            Ok(true) => finished += 1,
            // Canceled or finished since it was collected.
            Ok(false) => {}
            Err(e) => tracing::warn!("finalizer skip {id}: {e}"),
        }
    }
    if finished > 0 {
        metrics::counter!(observability::APPOINTMENTS_FINISHED_TOTAL).increment(finished as u64);
        info!("finalized {finished} appointments");
    }
    finished
}

/// Background task that periodically finalizes started appointments.
pub async fn run_finalizer(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let now = chrono::Utc::now().timestamp_millis();
        finalize_due(&engine, now).await;
        let pruned = engine.prune_customer_locks();
        if pruned > 0 {
            tracing::debug!("pruned {pruned} idle customer locks");
        }
    }
}

/// Background task that compacts the WAL once enough appends have accumulated.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted wal after {appends} appends"),
            Err(e) => tracing::error!("wal compaction failed: {e}"),
        }
    }
}
