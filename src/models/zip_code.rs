use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

/// One reserved postal code. The (user_id, value) pair is unique across
/// all of the user's subscriptions; the database index enforces it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ZipCode {
    pub id: Uuid,
    pub value: String,
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ZipCode {
    /// Inserts one row per code, bound to the subscription.
    pub async fn insert_many<'e, E: PgExecutor<'e>>(
        executor: E,
        user_id: Uuid,
        subscription_id: Uuid,
        values: &[String],
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO zip_codes (value, user_id, subscription_id)
            SELECT v, $1, $2 FROM UNNEST($3::text[]) AS v
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(subscription_id)
        .bind(values)
        .fetch_all(executor)
        .await
    }

    /// Which of the given codes the user already holds, under any
    /// subscription.
    pub async fn find_existing_values<'e, E: PgExecutor<'e>>(
        executor: E,
        user_id: Uuid,
        values: &[String],
    ) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT value FROM zip_codes
            WHERE user_id = $1 AND value = ANY($2)
            ORDER BY value
            "#,
        )
        .bind(user_id)
        .bind(values)
        .fetch_all(executor)
        .await?;

        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    pub async fn delete_by_subscription<'e, E: PgExecutor<'e>>(
        executor: E,
        subscription_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM zip_codes WHERE subscription_id = $1")
            .bind(subscription_id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected())
    }
}
