use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub is_admin: bool,
    /// Derived cache: Σ package.profile_quota over ACTIVE subscriptions.
    pub total_zip_quota: i32,
    /// Derived cache: count of zip codes under ACTIVE subscriptions.
    pub used_zip_quota: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Overwrites both quota caches. Only the quota ledger calls this;
    /// nothing else is allowed to touch these columns.
    pub async fn update_quota<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
        total_zip_quota: i32,
        used_zip_quota: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET total_zip_quota = $2, used_zip_quota = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(total_zip_quota)
        .bind(used_zip_quota)
        .execute(executor)
        .await?;

        Ok(())
    }
}
