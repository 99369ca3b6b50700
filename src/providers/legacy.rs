//! Adapter for the legacy in-house payment gateway.
//!
//! The gateway predates metadata support, so correlation rides on a
//! structured order-id string (`VD-<transaction uuid>`). That is weaker
//! than the metadata embedding the other adapters use and is kept only
//! for compatibility; new adapters should not copy it.

use axum::http::HeaderMap;
use reqwest::Client;
use ring::hmac;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CheckoutRequest, CheckoutSession, ProviderError, SettlementEvent, SettlementOutcome};
use crate::config::Config;

const ORDER_ID_PREFIX: &str = "VD";
pub const SIGNATURE_HEADER: &str = "x-legacy-signature";

pub fn format_order_id(transaction_id: Uuid) -> String {
    format!("{}-{}", ORDER_ID_PREFIX, transaction_id)
}

/// Recovers the internal transaction id from a `VD-<uuid>` order id.
pub fn parse_order_id(order_id: &str) -> Option<Uuid> {
    let rest = order_id.strip_prefix(ORDER_ID_PREFIX)?.strip_prefix('-')?;
    Uuid::parse_str(rest).ok()
}

#[derive(Debug, Clone)]
pub struct LegacyAdapter {
    client: Client,
    api_url: String,
    webhook_secret: Secret<String>,
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    order_id: &'a str,
    amount_cents: i64,
    currency: &'a str,
    description: &'a str,
    return_url: &'a str,
    cancel_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    payment_url: String,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    event_id: String,
    order_id: String,
    status: String,
    #[serde(default)]
    amount_cents: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order_id: String,
    status: String,
    #[serde(default)]
    amount_cents: Option<i64>,
}

fn map_status(status: &str) -> Result<SettlementOutcome, ProviderError> {
    match status {
        "PAID" => Ok(SettlementOutcome::Succeeded),
        "FAILED" => Ok(SettlementOutcome::Failed),
        "CANCELLED" => Ok(SettlementOutcome::Cancelled),
        other => Err(ProviderError::BadEvent(format!(
            "unknown legacy order status: {}",
            other
        ))),
    }
}

impl LegacyAdapter {
    pub fn new(api_url: String, webhook_secret: Secret<String>) -> Self {
        Self {
            client: Client::new(),
            api_url,
            webhook_secret,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.legacy_api_url.clone(),
            config.legacy_webhook_secret.clone(),
        )
    }

    fn hmac_key(&self) -> hmac::Key {
        hmac::Key::new(
            hmac::HMAC_SHA256,
            self.webhook_secret.expose_secret().as_bytes(),
        )
    }

    pub async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let order_id = format_order_id(request.transaction_id);

        let response = self
            .client
            .post(format!("{}/orders", self.api_url))
            .json(&CreateOrderRequest {
                order_id: &order_id,
                amount_cents: request.amount_cents,
                currency: &request.currency,
                description: &request.description,
                return_url: &request.return_url,
                cancel_url: &request.cancel_url,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Call { status, message });
        }

        let body: CreateOrderResponse = response.json().await?;

        Ok(CheckoutSession {
            payment_url: body.payment_url,
            external_ref: order_id,
        })
    }

    /// HMAC-SHA256 over the raw body, hex digest in `x-legacy-signature`.
    pub fn verify_and_parse_webhook(
        &self,
        body: &[u8],
        headers: &HeaderMap,
    ) -> Result<SettlementEvent, ProviderError> {
        let signature_hex = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProviderError::Verification("missing signature header".into()))?;

        let signature = hex::decode(signature_hex)
            .map_err(|_| ProviderError::Verification("signature is not valid hex".into()))?;

        hmac::verify(&self.hmac_key(), body, &signature)
            .map_err(|_| ProviderError::Verification("signature mismatch".into()))?;

        let payload: WebhookPayload = serde_json::from_slice(body)
            .map_err(|e| ProviderError::BadEvent(format!("invalid webhook body: {}", e)))?;

        let transaction_id = parse_order_id(&payload.order_id).ok_or_else(|| {
            ProviderError::BadEvent(format!("unparseable order id: {}", payload.order_id))
        })?;

        Ok(SettlementEvent {
            transaction_id,
            external_ref: payload.order_id,
            outcome: map_status(&payload.status)?,
            amount_cents: payload.amount_cents,
            provider_event_id: payload.event_id,
        })
    }

    pub async fn fetch_order(&self, external_ref: &str) -> Result<SettlementEvent, ProviderError> {
        let response = self
            .client
            .get(format!("{}/orders/{}", self.api_url, external_ref))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Call { status, message });
        }

        let order: OrderResponse = response.json().await?;

        let transaction_id = parse_order_id(&order.order_id).ok_or_else(|| {
            ProviderError::BadEvent(format!("unparseable order id: {}", order.order_id))
        })?;

        Ok(SettlementEvent {
            transaction_id,
            external_ref: order.order_id.clone(),
            outcome: map_status(&order.status)?,
            amount_cents: order.amount_cents,
            provider_event_id: format!("fetch:{}", order.order_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn test_adapter() -> LegacyAdapter {
        LegacyAdapter::new(
            "http://localhost:9".to_string(),
            Secret::new("legacy-test-secret".to_string()),
        )
    }

    fn sign(adapter: &LegacyAdapter, body: &[u8]) -> String {
        hex::encode(hmac::sign(&adapter.hmac_key(), body).as_ref())
    }

    fn signed_headers(adapter: &LegacyAdapter, body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&sign(adapter, body)).unwrap(),
        );
        headers
    }

    #[test]
    fn order_id_round_trips() {
        let id = Uuid::new_v4();
        assert_eq!(parse_order_id(&format_order_id(id)), Some(id));
    }

    #[test]
    fn rejects_foreign_order_ids() {
        assert_eq!(parse_order_id("VD_not-a-uuid"), None);
        assert_eq!(parse_order_id("XX-6e1b2b1e-0000-4000-8000-000000000000"), None);
        assert_eq!(parse_order_id("6e1b2b1e-0000-4000-8000-000000000000"), None);
    }

    #[test]
    fn valid_signature_yields_normalized_event() {
        let adapter = test_adapter();
        let transaction_id = Uuid::new_v4();
        let body = serde_json::json!({
            "event_id": "evt-123",
            "order_id": format_order_id(transaction_id),
            "status": "PAID",
            "amount_cents": 4900,
        })
        .to_string();

        let event = adapter
            .verify_and_parse_webhook(body.as_bytes(), &signed_headers(&adapter, body.as_bytes()))
            .unwrap();

        assert_eq!(event.transaction_id, transaction_id);
        assert_eq!(event.outcome, SettlementOutcome::Succeeded);
        assert_eq!(event.amount_cents, Some(4900));
        assert_eq!(event.provider_event_id, "evt-123");
    }

    #[test]
    fn tampered_body_is_rejected() {
        let adapter = test_adapter();
        let body = br#"{"event_id":"evt-1","order_id":"VD-x","status":"PAID"}"#;
        let headers = signed_headers(&adapter, body);

        let tampered = br#"{"event_id":"evt-1","order_id":"VD-x","status":"PAID","extra":1}"#;
        let result = adapter.verify_and_parse_webhook(tampered, &headers);

        assert!(matches!(result, Err(ProviderError::Verification(_))));
    }

    #[test]
    fn missing_signature_is_rejected() {
        let adapter = test_adapter();
        let result = adapter.verify_and_parse_webhook(b"{}", &HeaderMap::new());
        assert!(matches!(result, Err(ProviderError::Verification(_))));
    }

    #[test]
    fn unknown_status_is_a_bad_event_not_a_verification_failure() {
        let adapter = test_adapter();
        let body = serde_json::json!({
            "event_id": "evt-9",
            "order_id": format_order_id(Uuid::new_v4()),
            "status": "REFUNDED",
        })
        .to_string();

        let result = adapter
            .verify_and_parse_webhook(body.as_bytes(), &signed_headers(&adapter, body.as_bytes()));

        assert!(matches!(result, Err(ProviderError::BadEvent(_))));
    }

    #[tokio::test]
    async fn create_checkout_posts_the_structured_order_id() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let transaction_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(body_partial_json(serde_json::json!({
                "order_id": format_order_id(transaction_id),
                "amount_cents": 4900,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "payment_url": "https://legacy.example/pay/123",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = LegacyAdapter::new(server.uri(), Secret::new("s".to_string()));
        let session = adapter
            .create_checkout(&CheckoutRequest {
                transaction_id,
                amount_cents: 4900,
                currency: "USD".to_string(),
                description: "Starter package".to_string(),
                return_url: "https://app.example/return".to_string(),
                cancel_url: "https://app.example/cancel".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(session.payment_url, "https://legacy.example/pay/123");
        assert_eq!(session.external_ref, format_order_id(transaction_id));
    }
}
