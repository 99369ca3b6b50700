//! Transaction deletion path.
//!
//! Deletion cascades zip codes → transaction → subscription and then
//! recomputes the owner's quota through the same ledger call the
//! settlement path uses, so the two paths cannot disagree about quota.

use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Subscription, Transaction, ZipCode};
use crate::services::quota;

#[derive(Error, Debug)]
pub enum DeletionError {
    #[error("transaction not found")]
    NotFound,

    #[error("only the owning user or an admin may delete a transaction")]
    Forbidden,

    #[error("completed transactions are the financial record and cannot be deleted")]
    CompletedUndeletable,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[tracing::instrument(skip(pool), fields(transaction_id = %transaction_id))]
pub async fn delete_transaction(
    pool: &PgPool,
    transaction_id: Uuid,
    requesting_user_id: Uuid,
    is_admin: bool,
) -> Result<(), DeletionError> {
    let mut tx = pool.begin().await?;

    let txn = Transaction::lock_by_id(&mut *tx, transaction_id)
        .await?
        .ok_or(DeletionError::NotFound)?;

    if !is_admin && txn.user_id != requesting_user_id {
        return Err(DeletionError::Forbidden);
    }

    if !txn.payment_status.is_deletable() {
        return Err(DeletionError::CompletedUndeletable);
    }

    let removed_codes = ZipCode::delete_by_subscription(&mut *tx, txn.subscription_id).await?;
    Transaction::delete(&mut *tx, txn.id).await?;
    Subscription::delete(&mut *tx, txn.subscription_id).await?;
    quota::recompute(&mut tx, txn.user_id).await?;

    tx.commit().await?;

    tracing::info!(
        subscription_id = %txn.subscription_id,
        removed_codes = removed_codes,
        payment_status = %txn.payment_status,
        "Transaction deleted"
    );

    Ok(())
}
