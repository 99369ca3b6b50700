use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::providers::ProviderError;
use crate::services::{
    cancellation::DeletionError, checkout::CheckoutError, reconciliation::ReconciliationError,
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate zip codes: {0:?}")]
    DuplicateZipCodes(Vec<String>),

    #[error("Webhook verification failed: {0}")]
    Verification(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<CheckoutError> for AppError {
    fn from(e: CheckoutError) -> Self {
        match e {
            CheckoutError::UserNotFound => Self::NotFound("user".to_string()),
            CheckoutError::PackageNotFound => Self::NotFound("package".to_string()),
            CheckoutError::DuplicateZipCodes(codes) => Self::DuplicateZipCodes(codes),
            CheckoutError::NoZipCodes | CheckoutError::TooManyZipCodes { .. } => {
                Self::Validation(e.to_string())
            }
            CheckoutError::Provider(e) => Self::Provider(e.to_string()),
            CheckoutError::Database(e) => Self::Database(e),
        }
    }
}

impl From<DeletionError> for AppError {
    fn from(e: DeletionError) -> Self {
        match e {
            DeletionError::NotFound => Self::NotFound("transaction".to_string()),
            DeletionError::Forbidden => Self::Forbidden,
            DeletionError::CompletedUndeletable => Self::Validation(e.to_string()),
            DeletionError::Database(e) => Self::Database(e),
        }
    }
}

impl From<ReconciliationError> for AppError {
    fn from(e: ReconciliationError) -> Self {
        match e {
            ReconciliationError::Database(e) => Self::Database(e),
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Verification(msg) => Self::Verification(msg),
            ProviderError::BadEvent(msg) => Self::Validation(msg),
            other => Self::Provider(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error_debug = format!("{:?}", self);

        let (status, body) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, json!({ "message": msg })),
            AppError::DuplicateZipCodes(codes) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "message": "zip codes already reserved",
                    "duplicate_zip_codes": codes,
                }),
            ),
            AppError::Verification(msg) => (StatusCode::UNAUTHORIZED, json!({ "message": msg })),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                json!({ "message": format!("{} not found", what) }),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "message": "Unauthorized" }),
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, json!({ "message": "Forbidden" })),
            AppError::Provider(msg) => (StatusCode::BAD_GATEWAY, json!({ "message": msg })),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "message": "Database error" }),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "message": "Internal server error" }),
            ),
        };

        tracing::debug!(error = %error_debug, "Request failed");

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
