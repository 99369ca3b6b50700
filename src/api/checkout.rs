//! Checkout, confirm and deletion endpoints.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{caller_id, caller_is_admin, AppState};
use crate::error::AppError;
use crate::models::{PaymentMethod, Transaction};
use crate::services::{
    cancellation,
    checkout::{self, StartCheckoutRequest},
    reconciliation::{self, ReconciliationResult},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(start_checkout))
        .route("/transactions/:id/confirm", post(confirm_transaction))
        .route("/transactions/:id", delete(delete_transaction))
}

#[derive(Debug, Deserialize)]
struct StartCheckoutBody {
    package_id: Uuid,
    payment_method: PaymentMethod,
    zip_codes: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CheckoutResponse {
    payment_url: String,
    transaction_id: Uuid,
}

async fn start_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<StartCheckoutBody>,
) -> Result<Json<CheckoutResponse>, AppError> {
    let user_id = caller_id(&headers)?;

    let started = checkout::start_checkout(
        &state.pool,
        &state.registry,
        &state.config.base_url,
        StartCheckoutRequest {
            user_id,
            package_id: body.package_id,
            payment_method: body.payment_method,
            zip_codes: body.zip_codes,
        },
    )
    .await?;

    Ok(Json(CheckoutResponse {
        payment_url: started.payment_url,
        transaction_id: started.transaction_id,
    }))
}

#[derive(Debug, Serialize)]
struct ConfirmResponse {
    status: &'static str,
    payment_status: Option<crate::models::PaymentStatus>,
}

/// Client-redirect confirmation. Races the provider webhook for the same
/// transaction; both funnel into the same reconciliation path, so
/// whichever arrives second is a no-op.
async fn confirm_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ConfirmResponse>, AppError> {
    let user_id = caller_id(&headers)?;

    let txn = Transaction::find_by_id(&state.pool, transaction_id)
        .await?
        .ok_or_else(|| AppError::NotFound("transaction".to_string()))?;

    if txn.user_id != user_id && !caller_is_admin(&headers) {
        return Err(AppError::Forbidden);
    }

    let external_ref = txn.external_reference.as_deref().ok_or_else(|| {
        AppError::Validation("transaction has no provider reference".to_string())
    })?;

    let provider = state.registry.for_method(txn.payment_method);
    let event = provider.fetch_order(external_ref).await?;

    // The provider's metadata must point back at this transaction;
    // anything else means the reference was swapped out from under us.
    if event.transaction_id != transaction_id {
        return Err(AppError::Validation(
            "provider order does not belong to this transaction".to_string(),
        ));
    }

    let result = reconciliation::apply(&state.pool, &state.mailer, &event).await?;

    let response = match result {
        ReconciliationResult::Applied { payment_status, .. } => ConfirmResponse {
            status: "applied",
            payment_status: Some(payment_status),
        },
        ReconciliationResult::AlreadySettled { payment_status } => ConfirmResponse {
            status: "already_settled",
            payment_status: Some(payment_status),
        },
        ReconciliationResult::Ignored => ConfirmResponse {
            status: "ignored",
            payment_status: None,
        },
    };

    Ok(Json(response))
}

async fn delete_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let user_id = caller_id(&headers)?;
    let is_admin = caller_is_admin(&headers);

    cancellation::delete_transaction(&state.pool, transaction_id, user_id, is_admin).await?;

    Ok(StatusCode::NO_CONTENT)
}
