//! Session initiator.
//!
//! Turns "user wants to buy package X with codes [...]" into a pending
//! Subscription + Transaction + ZipCode set and a provider payment URL.
//! The local rows and the provider call live inside one storage
//! transaction: if the provider call fails, nothing survives.

use chrono::{Months, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    subscription::CreateSubscriptionData, transaction::CreateTransactionData, Package,
    PaymentMethod, Subscription, Transaction, User,
};
use crate::providers::{CheckoutRequest, ProviderError, ProviderRegistry};
use crate::services::quota::{self, QuotaError};

#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("user not found")]
    UserNotFound,

    #[error("package not found")]
    PackageNotFound,

    #[error("at least one zip code is required")]
    NoZipCodes,

    #[error("package allows {allowed} zip codes, {requested} requested")]
    TooManyZipCodes { allowed: i32, requested: usize },

    #[error("zip codes already reserved: {0:?}")]
    DuplicateZipCodes(Vec<String>),

    #[error("provider checkout failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<QuotaError> for CheckoutError {
    fn from(e: QuotaError) -> Self {
        match e {
            QuotaError::DuplicateCodes(codes) => Self::DuplicateZipCodes(codes),
            QuotaError::Database(e) => Self::Database(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StartCheckoutRequest {
    pub user_id: Uuid,
    pub package_id: Uuid,
    pub payment_method: PaymentMethod,
    pub zip_codes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutStarted {
    pub payment_url: String,
    pub transaction_id: Uuid,
    pub subscription_id: Uuid,
}

#[tracing::instrument(
    skip(pool, registry, base_url, request),
    fields(
        user_id = %request.user_id,
        package_id = %request.package_id,
        payment_method = %request.payment_method,
    )
)]
pub async fn start_checkout(
    pool: &PgPool,
    registry: &ProviderRegistry,
    base_url: &str,
    request: StartCheckoutRequest,
) -> Result<CheckoutStarted, CheckoutError> {
    if request.zip_codes.is_empty() {
        return Err(CheckoutError::NoZipCodes);
    }

    let user = User::find_by_id(pool, request.user_id)
        .await?
        .ok_or(CheckoutError::UserNotFound)?;

    let package = Package::find_by_id(pool, request.package_id)
        .await?
        .ok_or(CheckoutError::PackageNotFound)?;

    if request.zip_codes.len() > package.profile_quota as usize {
        return Err(CheckoutError::TooManyZipCodes {
            allowed: package.profile_quota,
            requested: request.zip_codes.len(),
        });
    }

    let start_date = Utc::now();
    let end_date = start_date
        .checked_add_months(Months::new(12 * package.duration_years as u32))
        .unwrap_or(start_date);

    // Everything below happens in one storage transaction, held open
    // across the provider call. Adapter failure drops the transaction
    // and no PENDING rows survive.
    let mut tx = pool.begin().await?;

    let subscription = Subscription::create(
        &mut *tx,
        CreateSubscriptionData {
            user_id: user.id,
            package_id: package.id,
            start_date,
            end_date,
        },
    )
    .await?;

    quota::reserve_codes(&mut tx, user.id, subscription.id, &request.zip_codes).await?;

    let transaction = Transaction::create(
        &mut *tx,
        CreateTransactionData {
            subscription_id: subscription.id,
            user_id: user.id,
            amount_cents: package.price_cents,
            payment_method: request.payment_method,
        },
    )
    .await?;

    let provider = registry.for_method(request.payment_method);
    let session = provider
        .create_checkout(&CheckoutRequest {
            transaction_id: transaction.id,
            amount_cents: package.price_cents,
            currency: package.currency.clone(),
            description: package.name.clone(),
            return_url: format!(
                "{}/checkout/return?transaction_id={}",
                base_url, transaction.id
            ),
            cancel_url: format!("{}/checkout/cancelled", base_url),
        })
        .await?;

    Transaction::set_external_reference(&mut *tx, transaction.id, &session.external_ref).await?;

    tx.commit().await?;

    tracing::info!(
        transaction_id = %transaction.id,
        subscription_id = %subscription.id,
        external_ref = %session.external_ref,
        "Checkout session created"
    );

    Ok(CheckoutStarted {
        payment_url: session.payment_url,
        transaction_id: transaction.id,
        subscription_id: subscription.id,
    })
}
