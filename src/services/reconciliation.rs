//! Reconciliation engine.
//!
//! One state machine, whichever adapter produced the event:
//!
//! ```text
//! PENDING --SUCCEEDED--> COMPLETED   (terminal)
//! PENDING --FAILED-----> FAILED      (terminal)
//! PENDING --CANCELLED--> CANCELLED   (terminal)
//! terminal --anything--> no-op
//! ```
//!
//! Providers redeliver webhooks and clients race the confirm endpoint
//! against them, so the same event can arrive any number of times in any
//! order. The row lock taken in step 1 plus the PENDING-only
//! compare-and-set make the transition exactly-once in effect: the loser
//! of any race observes a terminal status and performs no mutation and
//! no notification.

use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{PaymentStatus, Subscription, SubscriptionStatus, Transaction, User};
use crate::providers::{SettlementEvent, SettlementOutcome};
use crate::services::{mailer::Mailer, quota};

#[derive(Error, Debug)]
pub enum ReconciliationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationResult {
    /// Fresh transition; side effects fired.
    Applied {
        payment_status: PaymentStatus,
        subscription_status: SubscriptionStatus,
    },
    /// Transaction was already terminal. Idempotent no-op, not an error.
    AlreadySettled { payment_status: PaymentStatus },
    /// No such transaction. Expected under provider retry policies for
    /// deleted orders; acknowledged and dropped.
    Ignored,
}

/// The authoritative outcome mapping. A failed or cancelled payment
/// cancels the subscription; only success activates it.
pub fn settlement_transition(outcome: SettlementOutcome) -> (PaymentStatus, SubscriptionStatus) {
    match outcome {
        SettlementOutcome::Succeeded => (PaymentStatus::Completed, SubscriptionStatus::Active),
        SettlementOutcome::Failed => (PaymentStatus::Failed, SubscriptionStatus::Cancelled),
        SettlementOutcome::Cancelled => (PaymentStatus::Cancelled, SubscriptionStatus::Cancelled),
    }
}

/// Applies a normalized settlement event. Invoked from the webhook
/// handlers and from the client-redirect confirm endpoint.
#[tracing::instrument(
    skip(pool, mailer, event),
    fields(
        transaction_id = %event.transaction_id,
        provider_event_id = %event.provider_event_id,
    )
)]
pub async fn apply(
    pool: &PgPool,
    mailer: &Mailer,
    event: &SettlementEvent,
) -> Result<ReconciliationResult, ReconciliationError> {
    let (payment_status, subscription_status) = settlement_transition(event.outcome);

    let settled = match settle_in_storage(
        pool,
        event.transaction_id,
        payment_status,
        subscription_status,
        &event.external_ref,
    )
    .await?
    {
        StorageOutcome::Applied(txn) => txn,
        StorageOutcome::AlreadySettled(status) => {
            tracing::info!(payment_status = %status, "Transaction already settled, no-op");
            return Ok(ReconciliationResult::AlreadySettled {
                payment_status: status,
            });
        }
        StorageOutcome::Missing => {
            tracing::info!("Settlement event for unknown transaction, ignoring");
            return Ok(ReconciliationResult::Ignored);
        }
    };

    if let Some(reported) = event.amount_cents {
        if reported != settled.amount_cents {
            tracing::warn!(
                expected = settled.amount_cents,
                reported = reported,
                "Provider-reported amount differs from transaction amount"
            );
        }
    }

    tracing::info!(
        payment_status = %payment_status,
        subscription_status = %subscription_status,
        "Settlement applied"
    );

    notify_settlement(pool, mailer, &settled).await;

    Ok(ReconciliationResult::Applied {
        payment_status,
        subscription_status,
    })
}

/// Cancels a stale PENDING transaction through the same locked path as
/// settlement. Used by the sweeper job; sends no mail, the user walked
/// away from this checkout.
#[tracing::instrument(skip(pool))]
pub async fn cancel_pending(
    pool: &PgPool,
    transaction_id: Uuid,
) -> Result<ReconciliationResult, ReconciliationError> {
    match settle_in_storage(
        pool,
        transaction_id,
        PaymentStatus::Cancelled,
        SubscriptionStatus::Cancelled,
        "expired",
    )
    .await?
    {
        StorageOutcome::Applied(_) => Ok(ReconciliationResult::Applied {
            payment_status: PaymentStatus::Cancelled,
            subscription_status: SubscriptionStatus::Cancelled,
        }),
        StorageOutcome::AlreadySettled(status) => Ok(ReconciliationResult::AlreadySettled {
            payment_status: status,
        }),
        StorageOutcome::Missing => Ok(ReconciliationResult::Ignored),
    }
}

enum StorageOutcome {
    Applied(Transaction),
    AlreadySettled(PaymentStatus),
    Missing,
}

/// The atomic unit: lock the row, check PENDING, move transaction and
/// subscription, recompute the owner's quota, commit. A concurrent
/// duplicate observes either the fully-old or fully-new state.
async fn settle_in_storage(
    pool: &PgPool,
    transaction_id: Uuid,
    payment_status: PaymentStatus,
    subscription_status: SubscriptionStatus,
    external_ref: &str,
) -> Result<StorageOutcome, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let txn = match Transaction::lock_by_id(&mut *tx, transaction_id).await? {
        Some(txn) => txn,
        None => return Ok(StorageOutcome::Missing),
    };

    if txn.payment_status.is_terminal() {
        return Ok(StorageOutcome::AlreadySettled(txn.payment_status));
    }

    let settled = match Transaction::settle(&mut *tx, txn.id, payment_status, external_ref).await? {
        Some(settled) => settled,
        // Unreachable while we hold the row lock, but never double-apply.
        None => return Ok(StorageOutcome::AlreadySettled(txn.payment_status)),
    };

    Subscription::set_status(&mut *tx, settled.subscription_id, subscription_status).await?;
    quota::recompute(&mut tx, settled.user_id).await?;

    tx.commit().await?;

    Ok(StorageOutcome::Applied(settled))
}

/// Post-commit notification. Best-effort: failure is logged and the
/// financial state stands.
async fn notify_settlement(pool: &PgPool, mailer: &Mailer, txn: &Transaction) {
    let template = match txn.payment_status {
        PaymentStatus::Completed => "subscription-activated",
        PaymentStatus::Failed => "payment-failed",
        PaymentStatus::Cancelled => "payment-cancelled",
        PaymentStatus::Pending => return,
    };

    let user = match User::find_by_id(pool, txn.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::warn!(user_id = %txn.user_id, "Settled transaction owner not found, skipping mail");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load user for settlement mail");
            return;
        }
    };

    let context = serde_json::json!({
        "transaction_id": txn.id,
        "subscription_id": txn.subscription_id,
        "amount_cents": txn.amount_cents,
        "payment_method": txn.payment_method,
    });

    if let Err(e) = mailer.send_mail(&user.email, template, context).await {
        tracing::warn!(error = %e, template = template, "Settlement mail failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_activates_and_failure_cancels() {
        assert_eq!(
            settlement_transition(SettlementOutcome::Succeeded),
            (PaymentStatus::Completed, SubscriptionStatus::Active)
        );
        assert_eq!(
            settlement_transition(SettlementOutcome::Failed),
            (PaymentStatus::Failed, SubscriptionStatus::Cancelled)
        );
        assert_eq!(
            settlement_transition(SettlementOutcome::Cancelled),
            (PaymentStatus::Cancelled, SubscriptionStatus::Cancelled)
        );
    }

    #[test]
    fn every_transition_lands_in_a_terminal_status() {
        for outcome in [
            SettlementOutcome::Succeeded,
            SettlementOutcome::Failed,
            SettlementOutcome::Cancelled,
        ] {
            let (payment_status, _) = settlement_transition(outcome);
            assert!(payment_status.is_terminal());
        }
    }
}
