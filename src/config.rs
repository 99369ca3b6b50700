use secrecy::Secret;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub base_url: String,
    pub host: String,
    pub port: u16,

    // Legacy in-house gateway
    pub legacy_api_url: String,
    pub legacy_webhook_secret: Secret<String>,

    // PayPal-style provider
    pub paypal_api_url: String,
    pub paypal_client_id: String,
    pub paypal_client_secret: Secret<String>,
    pub paypal_webhook_id: String,

    // Stripe-style provider
    pub stripe_api_url: String,
    pub stripe_secret_key: Secret<String>,
    pub stripe_webhook_secret: Secret<String>,

    // Mail collaborator (optional; notifications drop when unset)
    pub mail_api_url: Option<String>,
    pub mail_api_token: Option<Secret<String>>,

    // Pending-transaction sweeper. The TTL is policy, not code: there is
    // deliberately no default, and the sweeper never runs when unset.
    pub pending_ttl_hours: Option<i64>,
    pub pending_sweep_schedule: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Ok(Self {
            database_url: config.get("database_url")?,
            base_url: config.get("base_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            legacy_api_url: config.get("legacy_api_url")?,
            legacy_webhook_secret: Secret::new(config.get("legacy_webhook_secret")?),

            paypal_api_url: config
                .get("paypal_api_url")
                .unwrap_or_else(|_| "https://api-m.paypal.com".to_string()),
            paypal_client_id: config.get("paypal_client_id")?,
            paypal_client_secret: Secret::new(config.get("paypal_client_secret")?),
            paypal_webhook_id: config.get("paypal_webhook_id")?,

            stripe_api_url: config
                .get("stripe_api_url")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            stripe_secret_key: Secret::new(config.get("stripe_secret_key")?),
            stripe_webhook_secret: Secret::new(config.get("stripe_webhook_secret")?),

            mail_api_url: config.get("mail_api_url").ok(),
            mail_api_token: config
                .get::<String>("mail_api_token")
                .ok()
                .map(Secret::new),

            pending_ttl_hours: config.get("pending_ttl_hours").ok(),
            pending_sweep_schedule: config
                .get("pending_sweep_schedule")
                .unwrap_or_else(|_| "0 0 * * * *".to_string()),
        })
    }
}
