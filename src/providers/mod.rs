// Provider adapters - one per external payment provider.
//
// Each adapter translates its provider's request/response/webhook shapes
// into the normalized `SettlementEvent` the reconciliation engine consumes.
// The engine never sees a provider payload.

pub mod legacy;
pub mod paypal;
pub mod stripe;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::PaymentMethod;

pub use legacy::LegacyAdapter;
pub use paypal::PaypalAdapter;
pub use stripe::StripeAdapter;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// Signature / authenticity check failed. Never downgraded to success.
    #[error("webhook verification failed: {0}")]
    Verification(String),

    /// Payload was authentic but not something we can act on.
    #[error("malformed provider event: {0}")]
    BadEvent(String),

    /// Provider API returned an error status.
    #[error("provider call failed: {status} - {message}")]
    Call {
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// The one event shape the reconciliation engine understands, whichever
/// provider produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementEvent {
    /// Internal transaction id, recovered from provider metadata. The
    /// single durable correlation key; provider ids are unstable before
    /// settlement.
    pub transaction_id: Uuid,
    /// Provider's own id for the session/order at settlement time.
    pub external_ref: String,
    pub outcome: SettlementOutcome,
    pub amount_cents: Option<i64>,
    pub provider_event_id: String,
}

/// What the session initiator hands an adapter when opening a checkout.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub transaction_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub return_url: String,
    pub cancel_url: String,
}

/// Provider-side session created for a checkout.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    /// Where to send the user's browser.
    pub payment_url: String,
    /// Provider's id for the session/order.
    pub external_ref: String,
}

/// Tagged adapter set. Enum dispatch keeps the capability set
/// `{create_checkout, verify_and_parse_webhook, capture, fetch_order}`
/// in one place without trait objects.
#[derive(Debug, Clone)]
pub enum PaymentProvider {
    Legacy(LegacyAdapter),
    Paypal(PaypalAdapter),
    Stripe(StripeAdapter),
}

impl PaymentProvider {
    pub fn method(&self) -> PaymentMethod {
        match self {
            Self::Legacy(_) => PaymentMethod::Legacy,
            Self::Paypal(_) => PaymentMethod::Paypal,
            Self::Stripe(_) => PaymentMethod::Stripe,
        }
    }

    /// Opens a checkout session with the provider. The internal
    /// transaction id is embedded in provider metadata so later events
    /// can be correlated without trusting provider ids.
    pub async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        match self {
            Self::Legacy(adapter) => adapter.create_checkout(request).await,
            Self::Paypal(adapter) => adapter.create_checkout(request).await,
            Self::Stripe(adapter) => adapter.create_checkout(request).await,
        }
    }

    /// Cryptographically verifies a webhook delivery and normalizes it.
    /// A verification failure is an error, never a degraded event.
    pub async fn verify_and_parse_webhook(
        &self,
        body: &[u8],
        headers: &HeaderMap,
    ) -> Result<SettlementEvent, ProviderError> {
        match self {
            Self::Legacy(adapter) => adapter.verify_and_parse_webhook(body, headers),
            Self::Paypal(adapter) => adapter.verify_and_parse_webhook(body, headers).await,
            Self::Stripe(adapter) => adapter.verify_and_parse_webhook(body, headers),
        }
    }

    /// Explicit capture. Only the PayPal-style flow is two-phase; the
    /// other providers auto-capture and this is a no-op for them.
    pub async fn capture(&self, external_ref: &str) -> Result<(), ProviderError> {
        match self {
            Self::Paypal(adapter) => adapter.capture(external_ref).await,
            Self::Legacy(_) | Self::Stripe(_) => Ok(()),
        }
    }

    /// Fetches the provider's current view of an order and normalizes
    /// it. Used by the client-initiated confirm path.
    pub async fn fetch_order(&self, external_ref: &str) -> Result<SettlementEvent, ProviderError> {
        match self {
            Self::Legacy(adapter) => adapter.fetch_order(external_ref).await,
            Self::Paypal(adapter) => adapter.fetch_order(external_ref).await,
            Self::Stripe(adapter) => adapter.fetch_order(external_ref).await,
        }
    }
}

/// All configured adapters, selectable by payment method.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    pub legacy: PaymentProvider,
    pub paypal: PaymentProvider,
    pub stripe: PaymentProvider,
}

impl ProviderRegistry {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            legacy: PaymentProvider::Legacy(LegacyAdapter::from_config(config)),
            paypal: PaymentProvider::Paypal(PaypalAdapter::from_config(config)),
            stripe: PaymentProvider::Stripe(StripeAdapter::from_config(config)),
        }
    }

    pub fn for_method(&self, method: PaymentMethod) -> &PaymentProvider {
        match method {
            PaymentMethod::Legacy => &self.legacy,
            PaymentMethod::Paypal => &self.paypal,
            PaymentMethod::Stripe => &self.stripe,
        }
    }
}

/// Parses a provider decimal amount like "49.00" into minor units.
/// Rejects more than two fractional digits rather than rounding money.
pub(crate) fn parse_decimal_cents(value: &str) -> Option<i64> {
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };

    if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = whole.parse().ok()?;
    let frac_cents: i64 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<2}", frac);
        padded.parse().ok()?
    };

    if whole < 0 {
        Some(whole * 100 - frac_cents)
    } else {
        Some(whole * 100 + frac_cents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_amounts_to_cents() {
        assert_eq!(parse_decimal_cents("49.00"), Some(4900));
        assert_eq!(parse_decimal_cents("49.5"), Some(4950));
        assert_eq!(parse_decimal_cents("49"), Some(4900));
        assert_eq!(parse_decimal_cents("0.07"), Some(7));
    }

    #[test]
    fn rejects_sub_cent_precision_and_garbage() {
        assert_eq!(parse_decimal_cents("49.001"), None);
        assert_eq!(parse_decimal_cents("49.x"), None);
        assert_eq!(parse_decimal_cents("abc"), None);
    }
}
