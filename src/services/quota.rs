//! Quota ledger.
//!
//! The user's `total_zip_quota` / `used_zip_quota` columns are caches,
//! and every writer goes through `recompute`, which re-derives both
//! values from the ACTIVE subscription rows. Nothing in the codebase
//! increments or decrements these counters; out-of-order cancellations
//! and duplicate webhook deliveries therefore cannot accumulate drift.

use sqlx::PgConnection;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{SubscriptionStatus, User, ZipCode};

#[derive(Error, Debug)]
pub enum QuotaError {
    /// The user already holds one or more of the requested codes.
    /// Carries the offending subset so the caller can resubmit.
    #[error("zip codes already reserved: {0:?}")]
    DuplicateCodes(Vec<String>),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuotaTotals {
    pub total_zip_quota: i32,
    pub used_zip_quota: i32,
}

impl QuotaTotals {
    /// Pure derivation over (status, package profile quota, bound zip
    /// count) rows. Only ACTIVE subscriptions count.
    pub fn from_subscriptions<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (SubscriptionStatus, i32, i32)>,
    {
        let mut totals = Self::default();
        for (status, profile_quota, zip_count) in rows {
            if status == SubscriptionStatus::Active {
                totals.total_zip_quota += profile_quota;
                totals.used_zip_quota += zip_count;
            }
        }
        totals
    }
}

/// Re-derives both quota caches from the current ACTIVE subscription set
/// and writes them back. Runs on the caller's connection so it can share
/// the settlement/deletion transaction.
pub async fn recompute(conn: &mut PgConnection, user_id: Uuid) -> Result<QuotaTotals, sqlx::Error> {
    let (total, used): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(p.profile_quota), 0)::BIGINT,
            COALESCE(SUM(z.zip_count), 0)::BIGINT
        FROM subscriptions s
        JOIN packages p ON p.id = s.package_id
        LEFT JOIN (
            SELECT subscription_id, COUNT(*) AS zip_count
            FROM zip_codes
            GROUP BY subscription_id
        ) z ON z.subscription_id = s.id
        WHERE s.user_id = $1 AND s.status = 'ACTIVE'
        "#,
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    let totals = QuotaTotals {
        total_zip_quota: total as i32,
        used_zip_quota: used as i32,
    };

    User::update_quota(
        &mut *conn,
        user_id,
        totals.total_zip_quota,
        totals.used_zip_quota,
    )
    .await?;

    tracing::debug!(
        user_id = %user_id,
        total = totals.total_zip_quota,
        used = totals.used_zip_quota,
        "Quota recomputed"
    );

    Ok(totals)
}

/// Reserves codes for a subscription being created. Uniqueness is
/// per-user across all subscriptions: a pre-check reports the offending
/// subset, and the unique index backstops the race between two
/// concurrent checkouts.
pub async fn reserve_codes(
    conn: &mut PgConnection,
    user_id: Uuid,
    subscription_id: Uuid,
    codes: &[String],
) -> Result<Vec<ZipCode>, QuotaError> {
    let duplicates = ZipCode::find_existing_values(&mut *conn, user_id, codes).await?;
    if !duplicates.is_empty() {
        return Err(QuotaError::DuplicateCodes(duplicates));
    }

    ZipCode::insert_many(&mut *conn, user_id, subscription_id, codes)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.constraint() == Some("idx_zip_codes_user_value") => {
                QuotaError::DuplicateCodes(codes.to_vec())
            }
            _ => QuotaError::Database(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_active_subscriptions_count() {
        let totals = QuotaTotals::from_subscriptions([
            (SubscriptionStatus::Active, 5, 5),
            (SubscriptionStatus::Pending, 10, 3),
            (SubscriptionStatus::Cancelled, 7, 7),
            (SubscriptionStatus::Active, 2, 1),
            (SubscriptionStatus::PaymentFailed, 4, 4),
            (SubscriptionStatus::Inactive, 9, 9),
        ]);

        assert_eq!(totals.total_zip_quota, 7);
        assert_eq!(totals.used_zip_quota, 6);
    }

    #[test]
    fn no_subscriptions_means_zero_quota() {
        assert_eq!(QuotaTotals::from_subscriptions([]), QuotaTotals::default());
    }

    #[test]
    fn cancelling_the_only_active_subscription_zeroes_the_caches() {
        let before = QuotaTotals::from_subscriptions([(SubscriptionStatus::Active, 5, 5)]);
        let after = QuotaTotals::from_subscriptions([(SubscriptionStatus::Cancelled, 5, 5)]);

        assert_eq!(before.used_zip_quota, 5);
        assert_eq!(after, QuotaTotals::default());
    }
}
