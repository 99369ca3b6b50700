// API module - HTTP endpoints
//
// Authentication is an upstream gateway concern; handlers trust the
// caller identity headers the gateway injects.

pub mod checkout;
pub mod webhooks;

use std::sync::Arc;

use axum::http::HeaderMap;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::providers::ProviderRegistry;
use crate::services::mailer::Mailer;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ADMIN_HEADER: &str = "x-admin";

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub registry: Arc<ProviderRegistry>,
    pub mailer: Mailer,
}

/// Identity of the authenticated caller, as injected by the gateway.
pub fn caller_id(headers: &HeaderMap) -> Result<Uuid, AppError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or(AppError::Unauthorized)
}

pub fn caller_is_admin(headers: &HeaderMap) -> bool {
    headers
        .get(ADMIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "true")
        .unwrap_or(false)
}
