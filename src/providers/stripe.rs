//! Adapter for the Stripe-style provider.
//!
//! Correlation rides on checkout-session metadata: `create_checkout`
//! embeds the internal transaction id as `metadata[transaction_id]` and
//! every webhook carries it back inside the session object.

use axum::http::HeaderMap;
use reqwest::Client;
use ring::hmac;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use uuid::Uuid;

use super::{CheckoutRequest, CheckoutSession, ProviderError, SettlementEvent, SettlementOutcome};
use crate::config::Config;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Replay window for the signed timestamp, in seconds.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeAdapter {
    client: Client,
    api_url: String,
    secret_key: Secret<String>,
    webhook_secret: Secret<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: SessionObject,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    metadata: Option<SessionMetadata>,
}

#[derive(Debug, Deserialize)]
struct SessionMetadata {
    #[serde(default)]
    transaction_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    id: String,
    url: String,
}

/// Parsed `stripe-signature` header: `t=<unix ts>,v1=<hex hmac>`.
struct SignatureHeader {
    timestamp: i64,
    v1: Vec<u8>,
}

fn parse_signature_header(value: &str) -> Result<SignatureHeader, ProviderError> {
    let mut timestamp = None;
    let mut v1 = None;

    for part in value.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = ts.parse::<i64>().ok(),
            Some(("v1", sig)) => v1 = hex::decode(sig).ok(),
            _ => {}
        }
    }

    match (timestamp, v1) {
        (Some(timestamp), Some(v1)) => Ok(SignatureHeader { timestamp, v1 }),
        _ => Err(ProviderError::Verification(
            "malformed stripe-signature header".into(),
        )),
    }
}

fn session_transaction_id(session: &SessionObject) -> Result<Uuid, ProviderError> {
    session
        .metadata
        .as_ref()
        .and_then(|m| m.transaction_id.as_deref())
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| {
            ProviderError::BadEvent(format!(
                "session {} has no usable transaction_id metadata",
                session.id
            ))
        })
}

impl StripeAdapter {
    pub fn new(api_url: String, secret_key: Secret<String>, webhook_secret: Secret<String>) -> Self {
        Self {
            client: Client::new(),
            api_url,
            secret_key,
            webhook_secret,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.stripe_api_url.clone(),
            config.stripe_secret_key.clone(),
            config.stripe_webhook_secret.clone(),
        )
    }

    pub async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let form: Vec<(&str, String)> = vec![
            ("mode", "payment".to_string()),
            ("success_url", request.return_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            (
                "line_items[0][price_data][currency]",
                request.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                request.amount_cents.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                request.description.clone(),
            ),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "metadata[transaction_id]",
                request.transaction_id.to_string(),
            ),
        ];

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_url))
            .bearer_auth(self.secret_key.expose_secret())
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Call { status, message });
        }

        let session: CreateSessionResponse = response.json().await?;

        Ok(CheckoutSession {
            payment_url: session.url,
            external_ref: session.id,
        })
    }

    /// HMAC-SHA256 over `"{t}.{body}"`, constant-time comparison, with a
    /// replay window on the signed timestamp.
    pub fn verify_and_parse_webhook(
        &self,
        body: &[u8],
        headers: &HeaderMap,
    ) -> Result<SettlementEvent, ProviderError> {
        self.verify_signature_at(body, headers, chrono::Utc::now().timestamp())?;

        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|e| ProviderError::BadEvent(format!("invalid webhook body: {}", e)))?;

        let outcome = match envelope.event_type.as_str() {
            "checkout.session.completed" => SettlementOutcome::Succeeded,
            "checkout.session.async_payment_failed" => SettlementOutcome::Failed,
            "checkout.session.expired" => SettlementOutcome::Cancelled,
            other => {
                return Err(ProviderError::BadEvent(format!(
                    "unhandled event type: {}",
                    other
                )))
            }
        };

        let session = envelope.data.object;
        let transaction_id = session_transaction_id(&session)?;

        Ok(SettlementEvent {
            transaction_id,
            external_ref: session.id,
            outcome,
            amount_cents: session.amount_total,
            provider_event_id: envelope.id,
        })
    }

    fn verify_signature_at(
        &self,
        body: &[u8],
        headers: &HeaderMap,
        now: i64,
    ) -> Result<(), ProviderError> {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProviderError::Verification("missing signature header".into()))?;

        let parsed = parse_signature_header(header)?;

        if (now - parsed.timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(ProviderError::Verification(
                "signed timestamp outside tolerance".into(),
            ));
        }

        let key = hmac::Key::new(
            hmac::HMAC_SHA256,
            self.webhook_secret.expose_secret().as_bytes(),
        );

        let mut signed_payload = format!("{}.", parsed.timestamp).into_bytes();
        signed_payload.extend_from_slice(body);

        hmac::verify(&key, &signed_payload, &parsed.v1)
            .map_err(|_| ProviderError::Verification("signature mismatch".into()))
    }

    /// Fetches a checkout session; only a paid session yields a
    /// SUCCEEDED event. Used by the client-redirect confirm path.
    pub async fn fetch_order(&self, external_ref: &str) -> Result<SettlementEvent, ProviderError> {
        let response = self
            .client
            .get(format!(
                "{}/v1/checkout/sessions/{}",
                self.api_url, external_ref
            ))
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Call { status, message });
        }

        let session: SessionObject = response.json().await?;
        let transaction_id = session_transaction_id(&session)?;

        let outcome = match (session.payment_status.as_deref(), session.status.as_deref()) {
            (Some("paid"), _) => SettlementOutcome::Succeeded,
            (_, Some("expired")) => SettlementOutcome::Cancelled,
            _ => {
                return Err(ProviderError::BadEvent(format!(
                    "session {} is not settled yet",
                    session.id
                )))
            }
        };

        Ok(SettlementEvent {
            transaction_id,
            external_ref: session.id.clone(),
            outcome,
            amount_cents: session.amount_total,
            provider_event_id: format!("fetch:{}", session.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const WEBHOOK_SECRET: &str = "whsec_test123";

    fn test_adapter() -> StripeAdapter {
        StripeAdapter::new(
            "http://localhost:9".to_string(),
            Secret::new("sk_test_xxx".to_string()),
            Secret::new(WEBHOOK_SECRET.to_string()),
        )
    }

    fn sign(body: &[u8], timestamp: i64, secret: &str) -> String {
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
        let mut payload = format!("{}.", timestamp).into_bytes();
        payload.extend_from_slice(body);
        hex::encode(hmac::sign(&key, &payload).as_ref())
    }

    fn signed_headers(body: &[u8], timestamp: i64, secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = format!("t={},v1={}", timestamp, sign(body, timestamp, secret));
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&value).unwrap());
        headers
    }

    fn completed_body(transaction_id: Uuid) -> Vec<u8> {
        serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_1",
                    "amount_total": 4900,
                    "metadata": { "transaction_id": transaction_id.to_string() },
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn completed_session_normalizes_to_succeeded() {
        let adapter = test_adapter();
        let transaction_id = Uuid::new_v4();
        let body = completed_body(transaction_id);
        let now = chrono::Utc::now().timestamp();

        let event = adapter
            .verify_and_parse_webhook(&body, &signed_headers(&body, now, WEBHOOK_SECRET))
            .unwrap();

        assert_eq!(event.transaction_id, transaction_id);
        assert_eq!(event.outcome, SettlementOutcome::Succeeded);
        assert_eq!(event.external_ref, "cs_test_1");
        assert_eq!(event.amount_cents, Some(4900));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let adapter = test_adapter();
        let body = completed_body(Uuid::new_v4());
        let now = chrono::Utc::now().timestamp();

        let result =
            adapter.verify_and_parse_webhook(&body, &signed_headers(&body, now, "wrong_secret"));

        assert!(matches!(result, Err(ProviderError::Verification(_))));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let adapter = test_adapter();
        let body = completed_body(Uuid::new_v4());
        let stale = chrono::Utc::now().timestamp() - 600;

        let result =
            adapter.verify_and_parse_webhook(&body, &signed_headers(&body, stale, WEBHOOK_SECRET));

        assert!(matches!(result, Err(ProviderError::Verification(_))));
    }

    #[test]
    fn missing_metadata_is_a_bad_event() {
        let adapter = test_adapter();
        let body = serde_json::json!({
            "id": "evt_2",
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_test_2" } }
        })
        .to_string()
        .into_bytes();
        let now = chrono::Utc::now().timestamp();

        let result =
            adapter.verify_and_parse_webhook(&body, &signed_headers(&body, now, WEBHOOK_SECRET));

        assert!(matches!(result, Err(ProviderError::BadEvent(_))));
    }

    #[test]
    fn expired_session_normalizes_to_cancelled() {
        let adapter = test_adapter();
        let transaction_id = Uuid::new_v4();
        let body = serde_json::json!({
            "id": "evt_3",
            "type": "checkout.session.expired",
            "data": {
                "object": {
                    "id": "cs_test_3",
                    "metadata": { "transaction_id": transaction_id.to_string() },
                }
            }
        })
        .to_string()
        .into_bytes();
        let now = chrono::Utc::now().timestamp();

        let event = adapter
            .verify_and_parse_webhook(&body, &signed_headers(&body, now, WEBHOOK_SECRET))
            .unwrap();

        assert_eq!(event.outcome, SettlementOutcome::Cancelled);
    }

    #[tokio::test]
    async fn create_checkout_embeds_transaction_metadata() {
        use wiremock::matchers::{body_string_contains, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let transaction_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(body_string_contains(transaction_id.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_test_9",
                "url": "https://checkout.example/s/cs_test_9",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = StripeAdapter::new(
            server.uri(),
            Secret::new("sk_test_xxx".to_string()),
            Secret::new(WEBHOOK_SECRET.to_string()),
        );

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

        assert_eq!(session.external_ref, "cs_test_9");
    }
}
