// Services module - orchestration over models and provider adapters

pub mod cancellation;
pub mod checkout;
pub mod mailer;
pub mod quota;
pub mod reconciliation;
