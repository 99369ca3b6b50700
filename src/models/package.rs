use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

/// A purchasable package. Read-only lookup data as far as the payment
/// core is concerned; pricing is managed elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Package {
    pub id: Uuid,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub duration_years: i32,
    pub profile_quota: i32,
    pub created_at: DateTime<Utc>,
}

impl Package {
    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM packages WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }
}
