//! Sweeper for checkouts the user abandoned.
//!
//! A checkout that never receives a provider event stays PENDING
//! forever. How long "too long" is, is business policy: the TTL comes
//! from configuration and the job does not run at all when none is set.
//! Each stale transaction is cancelled through the reconciliation
//! engine's locked settle path, so a webhook racing the sweep loses
//! cleanly on one side or the other.

use chrono::{Duration, Utc};
use sqlx::PgPool;

use crate::models::Transaction;
use crate::services::reconciliation::{self, ReconciliationResult};

const BATCH_SIZE: i64 = 100;

#[derive(Debug, Default)]
pub struct SweepStats {
    pub scanned: usize,
    pub cancelled: usize,
    pub already_settled: usize,
    pub errors: usize,
}

pub async fn sweep_stale_pending(pool: &PgPool, ttl_hours: i64) -> Result<SweepStats, sqlx::Error> {
    let cutoff = Utc::now() - Duration::hours(ttl_hours);
    let stale = Transaction::find_stale_pending(pool, cutoff, BATCH_SIZE).await?;

    let mut stats = SweepStats {
        scanned: stale.len(),
        ..Default::default()
    };

    tracing::info!(
        cutoff = %cutoff,
        scanned = stats.scanned,
        "Starting pending-transaction sweep"
    );

    for txn in stale {
        match reconciliation::cancel_pending(pool, txn.id).await {
            Ok(ReconciliationResult::Applied { .. }) => stats.cancelled += 1,
            // Settled between the scan and the lock; the race resolved itself.
            Ok(_) => stats.already_settled += 1,
            Err(e) => {
                tracing::error!(transaction_id = %txn.id, error = %e, "Sweep cancellation failed");
                stats.errors += 1;
            }
        }
    }

    tracing::info!(?stats, "Pending-transaction sweep completed");

    Ok(stats)
}
