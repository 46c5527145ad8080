use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{self, Engine};
use crate::model::BookingStatus;
use crate::observability;

/// Background task that completes stays whose check-out day has passed.
pub async fn run_checkout_sweep(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_overdue_stays(&engine, engine::today()).await;
    }
}

/// One sweep pass. Returns how many stays were completed.
pub async fn sweep_overdue_stays(engine: &Engine, today: chrono::NaiveDate) -> usize {
    let mut completed = 0;
    for booking_id in engine.collect_overdue_stays(today) {
        match engine
            .transition_booking(booking_id, BookingStatus::Completed, today)
            .await
        {
            Ok(_) => {
                completed += 1;
                metrics::counter!(observability::AUTO_CHECKOUTS_TOTAL).increment(1);
                info!("auto checkout {booking_id}");
            }
            // May already have been checked out by the front desk
            Err(e) => tracing::debug!("checkout sweep skip {booking_id}: {e}"),
        }
    }
    completed
}

/// Background task that rewrites the WAL once `threshold` appends have
/// piled up since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}
