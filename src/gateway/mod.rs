//! Send gateway: outbound email dispatch.
//!
//! A gateway hands one email to a provider and returns the provider's message
//! id. The correlation id travels with the message so asynchronous delivery
//! and engagement callbacks can be mapped back to an email instance.

pub mod sendgrid;
pub mod smtp;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GatewayError;

pub use sendgrid::{SendGridConfig, SendGridGateway};
pub use smtp::{SmtpConfig, SmtpGateway};

/// One email ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body_text: String,
    /// Echoed back by the provider on delivery/engagement callbacks.
    pub correlation_id: String,
}

/// Capability to dispatch an email.
#[async_trait]
pub trait SendGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Hand the email to the provider. Returns the provider message id only
    /// once the provider has accepted it.
    async fn dispatch(&self, email: &OutboundEmail) -> Result<String, GatewayError>;
}

/// Gateway selection, built from configuration.
#[derive(Debug, Clone)]
pub enum GatewayConfig {
    SendGrid(SendGridConfig),
    Smtp(SmtpConfig),
}

/// Create the configured gateway.
pub fn create_gateway(config: &GatewayConfig) -> Result<Arc<dyn SendGateway>, GatewayError> {
    match config {
        GatewayConfig::SendGrid(cfg) => {
            tracing::info!(from = %cfg.from_email, "Using SendGrid gateway");
            Ok(Arc::new(SendGridGateway::new(cfg.clone())?))
        }
        GatewayConfig::Smtp(cfg) => {
            tracing::info!(host = %cfg.host, port = cfg.port, "Using SMTP gateway");
            Ok(Arc::new(SmtpGateway::new(cfg.clone())?))
        }
    }
}
