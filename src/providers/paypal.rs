//! Adapter for the PayPal-style provider.
//!
//! Two differences from the other adapters. Verification is a provider
//! round-trip (`verify-webhook-signature`), not a local HMAC. And the
//! webhook body is never trusted for correlation: the internal
//! transaction id always comes from `custom_id` on the order, fetched
//! through an authenticated follow-up call.
//!
//! The flow is two-phase: an approved order still needs an explicit
//! capture before funds move, so `CHECKOUT.ORDER.APPROVED` captures
//! before reporting success.

use axum::http::HeaderMap;
use base64::Engine as _;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{
    parse_decimal_cents, CheckoutRequest, CheckoutSession, ProviderError, SettlementEvent,
    SettlementOutcome,
};
use crate::config::Config;

#[derive(Debug, Clone)]
pub struct PaypalAdapter {
    client: Client,
    api_url: String,
    client_id: String,
    client_secret: Secret<String>,
    webhook_id: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    id: String,
    event_type: String,
    resource: WebhookResource,
}

#[derive(Debug, Deserialize)]
struct WebhookResource {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    supplementary_data: Option<SupplementaryData>,
}

#[derive(Debug, Deserialize)]
struct SupplementaryData {
    #[serde(default)]
    related_ids: Option<RelatedIds>,
}

#[derive(Debug, Deserialize)]
struct RelatedIds {
    #[serde(default)]
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    verification_status: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    custom_id: Option<String>,
    #[serde(default)]
    amount: Option<OrderAmount>,
}

#[derive(Debug, Deserialize)]
struct OrderAmount {
    value: String,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    id: String,
    #[serde(default)]
    links: Vec<OrderLink>,
}

#[derive(Debug, Deserialize)]
struct OrderLink {
    rel: String,
    href: String,
}

const VERIFICATION_HEADERS: [&str; 5] = [
    "paypal-auth-algo",
    "paypal-cert-url",
    "paypal-transmission-id",
    "paypal-transmission-sig",
    "paypal-transmission-time",
];

impl PaypalAdapter {
    pub fn new(
        api_url: String,
        client_id: String,
        client_secret: Secret<String>,
        webhook_id: String,
    ) -> Self {
        Self {
            client: Client::new(),
            api_url,
            client_id,
            client_secret,
            webhook_id,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.paypal_api_url.clone(),
            config.paypal_client_id.clone(),
            config.paypal_client_secret.clone(),
            config.paypal_webhook_id.clone(),
        )
    }

    /// Client-credentials token exchange. Every authenticated call gets
    /// a fresh token; the provider caches server-side.
    async fn access_token(&self) -> Result<String, ProviderError> {
        let credentials = base64::engine::general_purpose::STANDARD.encode(format!(
            "{}:{}",
            self.client_id,
            self.client_secret.expose_secret()
        ));

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.api_url))
            .header("Authorization", format!("Basic {}", credentials))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Call { status, message });
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    pub async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let token = self.access_token().await?;

        let body = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "custom_id": request.transaction_id.to_string(),
                "description": request.description,
                "amount": {
                    "currency_code": request.currency,
                    "value": format!("{}.{:02}", request.amount_cents / 100, request.amount_cents % 100),
                },
            }],
            "application_context": {
                "return_url": request.return_url,
                "cancel_url": request.cancel_url,
            },
        });

        let response = self
            .client
            .post(format!("{}/v2/checkout/orders", self.api_url))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Call { status, message });
        }

        let order: CreateOrderResponse = response.json().await?;

        let approve_url = order
            .links
            .iter()
            .find(|l| l.rel == "approve")
            .map(|l| l.href.clone())
            .ok_or_else(|| {
                ProviderError::BadEvent(format!("order {} has no approve link", order.id))
            })?;

        Ok(CheckoutSession {
            payment_url: approve_url,
            external_ref: order.id,
        })
    }

    /// Verifies the delivery with the provider, then resolves the order
    /// through an authenticated fetch before normalizing.
    pub async fn verify_and_parse_webhook(
        &self,
        body: &[u8],
        headers: &HeaderMap,
    ) -> Result<SettlementEvent, ProviderError> {
        let raw: JsonValue = serde_json::from_slice(body)
            .map_err(|e| ProviderError::BadEvent(format!("invalid webhook body: {}", e)))?;

        self.verify_delivery(&raw, headers).await?;

        let envelope: WebhookEnvelope = serde_json::from_value(raw)
            .map_err(|e| ProviderError::BadEvent(format!("invalid webhook shape: {}", e)))?;

        let order_id = match envelope.event_type.as_str() {
            "CHECKOUT.ORDER.APPROVED" | "CHECKOUT.ORDER.VOIDED" => envelope.resource.id.clone(),
            "PAYMENT.CAPTURE.COMPLETED" | "PAYMENT.CAPTURE.DENIED" => envelope
                .resource
                .supplementary_data
                .as_ref()
                .and_then(|s| s.related_ids.as_ref())
                .and_then(|r| r.order_id.clone()),
            other => {
                return Err(ProviderError::BadEvent(format!(
                    "unhandled event type: {}",
                    other
                )))
            }
        }
        .ok_or_else(|| ProviderError::BadEvent("event carries no order id".into()))?;

        let order = self.get_order(&order_id).await?;
        let (transaction_id, amount_cents) = order_correlation(&order)?;

        let outcome = match envelope.event_type.as_str() {
            "CHECKOUT.ORDER.APPROVED" => {
                // Two-phase: funds only move after an explicit capture.
                self.capture(&order_id).await?;
                SettlementOutcome::Succeeded
            }
            "PAYMENT.CAPTURE.COMPLETED" => SettlementOutcome::Succeeded,
            "PAYMENT.CAPTURE.DENIED" => SettlementOutcome::Failed,
            "CHECKOUT.ORDER.VOIDED" => SettlementOutcome::Cancelled,
            _ => unreachable!("filtered above"),
        };

        Ok(SettlementEvent {
            transaction_id,
            external_ref: order_id,
            outcome,
            amount_cents,
            provider_event_id: envelope.id,
        })
    }

    async fn verify_delivery(
        &self,
        webhook_event: &JsonValue,
        headers: &HeaderMap,
    ) -> Result<(), ProviderError> {
        let mut header_values = Vec::with_capacity(VERIFICATION_HEADERS.len());
        for name in VERIFICATION_HEADERS {
            let value = headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    ProviderError::Verification(format!("missing header: {}", name))
                })?;
            header_values.push(value);
        }

        let token = self.access_token().await?;

        let body = serde_json::json!({
            "auth_algo": header_values[0],
            "cert_url": header_values[1],
            "transmission_id": header_values[2],
            "transmission_sig": header_values[3],
            "transmission_time": header_values[4],
            "webhook_id": self.webhook_id,
            "webhook_event": webhook_event,
        });

        let response = self
            .client
            .post(format!(
                "{}/v1/notifications/verify-webhook-signature",
                self.api_url
            ))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Call { status, message });
        }

        let verdict: VerifyResponse = response.json().await?;
        if verdict.verification_status != "SUCCESS" {
            return Err(ProviderError::Verification(format!(
                "provider verdict: {}",
                verdict.verification_status
            )));
        }

        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderResponse, ProviderError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(format!("{}/v2/checkout/orders/{}", self.api_url, order_id))
            .bearer_auth(&token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Call { status, message });
        }

        Ok(response.json().await?)
    }

    /// Explicit capture of an approved order. A concurrent capture (the
    /// webhook racing the confirm endpoint) reports the order as already
    /// captured; that is success, not an error.
    pub async fn capture(&self, order_id: &str) -> Result<(), ProviderError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.api_url, order_id
            ))
            .bearer_auth(&token)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let message = response.text().await.unwrap_or_default();

        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY
            && message.contains("ORDER_ALREADY_CAPTURED")
        {
            return Ok(());
        }

        Err(ProviderError::Call { status, message })
    }

    /// Normalizes the provider's current view of an order. Approved but
    /// uncaptured orders are captured here, so the confirm path and the
    /// webhook path converge on the same state.
    pub async fn fetch_order(&self, external_ref: &str) -> Result<SettlementEvent, ProviderError> {
        let order = self.get_order(external_ref).await?;
        let (transaction_id, amount_cents) = order_correlation(&order)?;

        let outcome = match order.status.as_str() {
            "COMPLETED" => SettlementOutcome::Succeeded,
            "APPROVED" => {
                self.capture(&order.id).await?;
                SettlementOutcome::Succeeded
            }
            "VOIDED" => SettlementOutcome::Cancelled,
            other => {
                return Err(ProviderError::BadEvent(format!(
                    "order {} not settled (status {})",
                    order.id, other
                )))
            }
        };

        Ok(SettlementEvent {
            transaction_id,
            external_ref: order.id.clone(),
            outcome,
            amount_cents,
            provider_event_id: format!("fetch:{}", order.id),
        })
    }
}

fn order_correlation(order: &OrderResponse) -> Result<(Uuid, Option<i64>), ProviderError> {
    let unit = order.purchase_units.first().ok_or_else(|| {
        ProviderError::BadEvent(format!("order {} has no purchase units", order.id))
    })?;

    let transaction_id = unit
        .custom_id
        .as_deref()
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| {
            ProviderError::BadEvent(format!("order {} has no usable custom_id", order.id))
        })?;

    let amount_cents = unit
        .amount
        .as_ref()
        .and_then(|a| parse_decimal_cents(&a.value));

    Ok((transaction_id, amount_cents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter_for(server: &MockServer) -> PaypalAdapter {
        PaypalAdapter::new(
            server.uri(),
            "client-id".to_string(),
            Secret::new("client-secret".to_string()),
            "WH-123".to_string(),
        )
    }

    fn transmission_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        for name in VERIFICATION_HEADERS {
            headers.insert(name, HeaderValue::from_static("x"));
        }
        headers
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "test-token",
                "token_type": "Bearer",
            })))
            .mount(server)
            .await;
    }

    async fn mount_verification(server: &MockServer, status: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/notifications/verify-webhook-signature"))
            .and(body_partial_json(serde_json::json!({ "webhook_id": "WH-123" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "verification_status": status,
            })))
            .mount(server)
            .await;
    }

    async fn mount_order(server: &MockServer, order_id: &str, status: &str, custom_id: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/v2/checkout/orders/{}", order_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": order_id,
                "status": status,
                "purchase_units": [{
                    "custom_id": custom_id,
                    "amount": { "currency_code": "USD", "value": "49.00" },
                }],
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn approved_webhook_captures_then_succeeds() {
        let server = MockServer::start().await;
        let transaction_id = Uuid::new_v4();

        mount_token(&server).await;
        mount_verification(&server, "SUCCESS").await;
        mount_order(&server, "ORDER-1", "APPROVED", &transaction_id.to_string()).await;

        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/ORDER-1/capture"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "ORDER-1",
                "status": "COMPLETED",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let body = serde_json::json!({
            "id": "WH-EVT-1",
            "event_type": "CHECKOUT.ORDER.APPROVED",
            "resource": { "id": "ORDER-1" },
        })
        .to_string();

        let adapter = adapter_for(&server);
        let event = adapter
            .verify_and_parse_webhook(body.as_bytes(), &transmission_headers())
            .await
            .unwrap();

        assert_eq!(event.transaction_id, transaction_id);
        assert_eq!(event.outcome, SettlementOutcome::Succeeded);
        assert_eq!(event.external_ref, "ORDER-1");
        assert_eq!(event.amount_cents, Some(4900));
        assert_eq!(event.provider_event_id, "WH-EVT-1");
    }

    #[tokio::test]
    async fn failed_verification_never_reaches_the_order_api() {
        let server = MockServer::start().await;

        mount_token(&server).await;
        mount_verification(&server, "FAILURE").await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let body = serde_json::json!({
            "id": "WH-EVT-2",
            "event_type": "CHECKOUT.ORDER.APPROVED",
            "resource": { "id": "ORDER-2" },
        })
        .to_string();

        let adapter = adapter_for(&server);
        let result = adapter
            .verify_and_parse_webhook(body.as_bytes(), &transmission_headers())
            .await;

        assert!(matches!(result, Err(ProviderError::Verification(_))));
    }

    #[tokio::test]
    async fn capture_completed_webhook_correlates_through_the_order() {
        let server = MockServer::start().await;
        let transaction_id = Uuid::new_v4();

        mount_token(&server).await;
        mount_verification(&server, "SUCCESS").await;
        mount_order(&server, "ORDER-3", "COMPLETED", &transaction_id.to_string()).await;

        let body = serde_json::json!({
            "id": "WH-EVT-3",
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "resource": {
                "id": "CAPTURE-9",
                "supplementary_data": { "related_ids": { "order_id": "ORDER-3" } },
            },
        })
        .to_string();

        let adapter = adapter_for(&server);
        let event = adapter
            .verify_and_parse_webhook(body.as_bytes(), &transmission_headers())
            .await
            .unwrap();

        assert_eq!(event.transaction_id, transaction_id);
        assert_eq!(event.outcome, SettlementOutcome::Succeeded);
    }

    #[tokio::test]
    async fn missing_transmission_headers_fail_verification() {
        let server = MockServer::start().await;
        let adapter = adapter_for(&server);

        let body = serde_json::json!({
            "id": "WH-EVT-4",
            "event_type": "CHECKOUT.ORDER.APPROVED",
            "resource": { "id": "ORDER-4" },
        })
        .to_string();

        let result = adapter
            .verify_and_parse_webhook(body.as_bytes(), &HeaderMap::new())
            .await;

        assert!(matches!(result, Err(ProviderError::Verification(_))));
    }

    #[tokio::test]
    async fn fetch_order_treats_already_captured_as_success() {
        let server = MockServer::start().await;
        let transaction_id = Uuid::new_v4();

        mount_token(&server).await;
        mount_order(&server, "ORDER-5", "APPROVED", &transaction_id.to_string()).await;

        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/ORDER-5/capture"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "name": "UNPROCESSABLE_ENTITY",
                "details": [{ "issue": "ORDER_ALREADY_CAPTURED" }],
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let event = adapter.fetch_order("ORDER-5").await.unwrap();

        assert_eq!(event.outcome, SettlementOutcome::Succeeded);
        assert_eq!(event.transaction_id, transaction_id);
    }
}
