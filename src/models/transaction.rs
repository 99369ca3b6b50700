use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Legacy,
    Paypal,
    Stripe,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "LEGACY",
            Self::Paypal => "PAYPAL",
            Self::Stripe => "STRIPE",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Settlement is monotonic: once terminal, a transaction never moves.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// COMPLETED transactions are the financial record and may never be
    /// deleted; everything else may.
    pub fn is_deletable(&self) -> bool {
        !matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub external_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTransactionData {
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub payment_method: PaymentMethod,
}

impl Transaction {
    /// Creates a new PENDING transaction.
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        data: CreateTransactionData,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO transactions (subscription_id, user_id, amount_cents, payment_method, payment_status)
            VALUES ($1, $2, $3, $4, 'PENDING')
            RETURNING *
            "#,
        )
        .bind(data.subscription_id)
        .bind(data.user_id)
        .bind(data.amount_cents)
        .bind(data.payment_method)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Row-locked lookup. Concurrent settlement attempts on the same
    /// transaction serialize here, so the status check that follows
    /// cannot race with a duplicate delivery.
    pub async fn lock_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM transactions WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Compare-and-set settlement: only moves the row if it is still
    /// PENDING. Returns the updated row, or None if some other writer
    /// settled it first.
    pub async fn settle<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
        status: PaymentStatus,
        external_reference: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE transactions
            SET payment_status = $2, external_reference = $3, updated_at = NOW()
            WHERE id = $1 AND payment_status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(external_reference)
        .fetch_optional(executor)
        .await
    }

    pub async fn set_external_reference<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
        external_reference: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE transactions SET external_reference = $2, updated_at = NOW() WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(external_reference)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// PENDING transactions older than the cutoff, oldest first. Used by
    /// the sweeper job.
    pub async fn find_stale_pending<'e, E: PgExecutor<'e>>(
        executor: E,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM transactions
            WHERE payment_status = 'PENDING' AND created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    pub async fn delete<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM transactions WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_is_the_only_non_terminal_status() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Cancelled.is_terminal());
    }

    #[test]
    fn completed_is_never_deletable() {
        assert!(PaymentStatus::Pending.is_deletable());
        assert!(PaymentStatus::Failed.is_deletable());
        assert!(PaymentStatus::Cancelled.is_deletable());
        assert!(!PaymentStatus::Completed.is_deletable());
    }
}
