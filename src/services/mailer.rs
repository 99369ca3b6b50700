//! Notification collaborator.
//!
//! Mail is fire-and-forget: the reconciliation engine sends after its
//! storage transaction commits, and a delivery failure is logged, never
//! propagated back into financial state.

use std::sync::{Arc, Mutex};

use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::config::Config;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail API error: {status} - {message}")]
    Api {
        status: reqwest::StatusCode,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct MailMessage {
    pub to: String,
    pub template: String,
    pub context: JsonValue,
}

#[derive(Clone)]
pub enum Mailer {
    Http(HttpMailer),
    /// Captures messages instead of sending them; used by tests.
    Recording(Arc<Mutex<Vec<MailMessage>>>),
    Noop,
}

impl Mailer {
    pub fn from_config(config: &Config) -> Self {
        match &config.mail_api_url {
            Some(url) => Self::Http(HttpMailer {
                client: Client::new(),
                api_url: url.clone(),
                api_token: config.mail_api_token.clone(),
            }),
            None => {
                tracing::warn!("No mail API configured, notifications will be dropped");
                Self::Noop
            }
        }
    }

    pub fn recording() -> (Self, Arc<Mutex<Vec<MailMessage>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (Self::Recording(sent.clone()), sent)
    }

    pub async fn send_mail(
        &self,
        to: &str,
        template: &str,
        context: JsonValue,
    ) -> Result<(), MailError> {
        let message = MailMessage {
            to: to.to_string(),
            template: template.to_string(),
            context,
        };

        match self {
            Self::Http(mailer) => mailer.send(&message).await,
            Self::Recording(sent) => {
                sent.lock().expect("mail recorder poisoned").push(message);
                Ok(())
            }
            Self::Noop => {
                tracing::debug!(to = %message.to, template = %message.template, "Mail dropped (noop mailer)");
                Ok(())
            }
        }
    }
}

#[derive(Clone)]
pub struct HttpMailer {
    client: Client,
    api_url: String,
    api_token: Option<Secret<String>>,
}

impl HttpMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        let mut request = self
            .client
            .post(format!("{}/send", self.api_url))
            .json(message);

        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(MailError::Api { status, message });
        }

        Ok(())
    }
}
