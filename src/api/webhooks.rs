//! Inbound webhook endpoints, one per provider.
//!
//! Response policy (deliberate, see the error-handling notes in
//! DESIGN.md): a verified-but-unusable payload, an unknown transaction
//! and an already-settled transaction are all acknowledged with 2xx,
//! because providers retry non-2xx responses indefinitely and redelivery
//! cannot change any of those outcomes. Only a verification failure
//! (401) or a storage failure (500, redelivery IS our retry loop) leaves
//! the 2xx path.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::json;

use crate::api::AppState;
use crate::models::PaymentMethod;
use crate::providers::ProviderError;
use crate::services::reconciliation::{self, ReconciliationResult};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/legacy", post(legacy_webhook))
        .route("/webhooks/paypal", post(paypal_webhook))
        .route("/webhooks/stripe", post(stripe_webhook))
}

async fn legacy_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    handle_webhook(state, PaymentMethod::Legacy, headers, body).await
}

async fn paypal_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    handle_webhook(state, PaymentMethod::Paypal, headers, body).await
}

async fn stripe_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    handle_webhook(state, PaymentMethod::Stripe, headers, body).await
}

async fn handle_webhook(
    state: AppState,
    method: PaymentMethod,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let provider = state.registry.for_method(method);

    let event = match provider.verify_and_parse_webhook(&body, &headers).await {
        Ok(event) => event,
        Err(ProviderError::Verification(msg)) => {
            tracing::warn!(provider = %method, error = %msg, "Webhook verification failed");
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "verification failed" })))
                .into_response();
        }
        Err(ProviderError::BadEvent(msg)) => {
            // Authentic but unusable. Acknowledge so the provider stops
            // redelivering a payload we will never accept.
            tracing::warn!(provider = %method, error = %msg, "Unusable webhook payload acknowledged");
            return (StatusCode::OK, Json(json!({ "status": "rejected" }))).into_response();
        }
        Err(e) => {
            // Our outbound verification call failed; redelivery may succeed.
            tracing::error!(provider = %method, error = %e, "Webhook verification call failed");
            return (StatusCode::BAD_GATEWAY, Json(json!({ "error": "provider unavailable" })))
                .into_response();
        }
    };

    match reconciliation::apply(&state.pool, &state.mailer, &event).await {
        Ok(ReconciliationResult::Applied { payment_status, .. }) => (
            StatusCode::OK,
            Json(json!({ "status": "applied", "payment_status": payment_status })),
        )
            .into_response(),
        Ok(ReconciliationResult::AlreadySettled { payment_status }) => (
            StatusCode::OK,
            Json(json!({ "status": "already_settled", "payment_status": payment_status })),
        )
            .into_response(),
        Ok(ReconciliationResult::Ignored) => {
            (StatusCode::OK, Json(json!({ "status": "ignored" }))).into_response()
        }
        Err(e) => {
            tracing::error!(provider = %method, error = %e, "Settlement failed, provider will redeliver");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "settlement failed" })),
            )
                .into_response()
        }
    }
}
