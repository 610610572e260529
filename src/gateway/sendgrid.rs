//! SendGrid v3 mail send over HTTPS.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::gateway::{OutboundEmail, SendGateway};

pub const DEFAULT_BASE_URL: &str = "https://api.sendgrid.com";

/// Custom argument name SendGrid echoes back in event webhooks.
pub const CORRELATION_ARG: &str = "email_instance_id";

#[derive(Debug, Clone)]
pub struct SendGridConfig {
    pub api_key: SecretString,
    pub from_email: String,
    pub base_url: String,
}

pub struct SendGridGateway {
    client: reqwest::Client,
    config: SendGridConfig,
}

impl SendGridGateway {
    pub fn new(config: SendGridConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Transport {
                gateway: "sendgrid".into(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    fn payload(&self, email: &OutboundEmail) -> serde_json::Value {
        json!({
            "personalizations": [{
                "to": [{ "email": email.to }],
                "custom_args": { CORRELATION_ARG: email.correlation_id },
            }],
            "from": { "email": self.config.from_email },
            "subject": email.subject,
            "content": [{ "type": "text/plain", "value": email.body_text }],
        })
    }
}

#[async_trait]
impl SendGateway for SendGridGateway {
    fn name(&self) -> &str {
        "sendgrid"
    }

    async fn dispatch(&self, email: &OutboundEmail) -> Result<String, GatewayError> {
        let url = format!(
            "{}/v3/mail/send",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&self.payload(email))
            .send()
            .await
            .map_err(|e| GatewayError::Transport {
                gateway: "sendgrid".into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                gateway: "sendgrid".into(),
                reason: format!("HTTP {status}: {text}"),
            });
        }

        // Header lookup is case-insensitive
        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .filter(|id| !id.is_empty());

        let message_id = match message_id {
            Some(id) => id,
            None => {
                let id = format!("sendgrid-{}", uuid::Uuid::new_v4());
                warn!(
                    correlation_id = %email.correlation_id,
                    generated = %id,
                    "SendGrid accepted message without X-Message-Id"
                );
                id
            }
        };

        debug!(to = %email.to, message_id = %message_id, "SendGrid accepted message");
        Ok(message_id)
    }
}
