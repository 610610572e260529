//! SMTP gateway via lettre.
//!
//! The correlation id rides in an `X-Email-Instance-Id` header and the
//! generated `Message-ID` doubles as the provider message id.

use async_trait::async_trait;
use lettre::message::header::{Header, HeaderName, HeaderValue};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::gateway::{OutboundEmail, SendGateway};

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

/// `X-Email-Instance-Id` header carrying the correlation id.
#[derive(Debug, Clone, PartialEq)]
struct EmailInstanceId(String);

impl Header for EmailInstanceId {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Email-Instance-Id")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.trim().to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

pub struct SmtpGateway {
    transport: SmtpTransport,
    from_address: String,
}

impl SmtpGateway {
    pub fn new(config: SmtpConfig) -> Result<Self, GatewayError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| GatewayError::Transport {
                gateway: "smtp".into(),
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            transport,
            from_address: config.from_address,
        })
    }

    /// Build the message and its Message-ID (without angle brackets).
    fn build_message(&self, email: &OutboundEmail) -> Result<(Message, String), GatewayError> {
        let domain = self
            .from_address
            .rsplit_once('@')
            .map(|(_, d)| d.trim_end_matches('>'))
            .unwrap_or("localhost");
        let message_id = format!("{}@{}", Uuid::new_v4(), domain);

        let message = Message::builder()
            .from(self.from_address.parse().map_err(|e| GatewayError::InvalidAddress {
                address: self.from_address.clone(),
                reason: format!("{e}"),
            })?)
            .to(email.to.parse().map_err(|e| GatewayError::InvalidAddress {
                address: email.to.clone(),
                reason: format!("{e}"),
            })?)
            .subject(email.subject.as_str())
            .message_id(Some(format!("<{message_id}>")))
            .header(EmailInstanceId(email.correlation_id.clone()))
            .body(email.body_text.clone())
            .map_err(|e| GatewayError::Rejected {
                gateway: "smtp".into(),
                reason: format!("Failed to build email: {e}"),
            })?;

        Ok((message, message_id))
    }
}

#[async_trait]
impl SendGateway for SmtpGateway {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn dispatch(&self, email: &OutboundEmail) -> Result<String, GatewayError> {
        let (message, message_id) = self.build_message(email)?;
        let transport = self.transport.clone();

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| GatewayError::Transport {
                gateway: "smtp".into(),
                reason: format!("send task failed: {e}"),
            })?
            .map_err(|e| GatewayError::Transport {
                gateway: "smtp".into(),
                reason: format!("SMTP send failed: {e}"),
            })?;

        info!(to = %email.to, message_id = %message_id, "Email sent via SMTP");
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(from: &str) -> SmtpGateway {
        SmtpGateway::new(SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: "me".into(),
            password: SecretString::from("pw"),
            from_address: from.into(),
        })
        .unwrap()
    }

    fn email(to: &str) -> OutboundEmail {
        OutboundEmail {
            to: to.into(),
            subject: "Hello".into(),
            body_text: "Dear Ann,\n\nHi.\n\nBest regards,\nAlex".into(),
            correlation_id: "42".into(),
        }
    }

    #[test]
    fn message_carries_correlation_header_and_id() {
        let (message, message_id) = gateway("me@example.com")
            .build_message(&email("ann@x.com"))
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(message_id.ends_with("@example.com"));
        assert!(raw.contains("X-Email-Instance-Id: 42"));
        assert!(raw.contains(&format!("Message-ID: <{message_id}>")));
        assert!(raw.contains("Subject: Hello"));
    }

    #[test]
    fn invalid_recipient_is_rejected_before_sending() {
        let err = gateway("me@example.com")
            .build_message(&email("not an address"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidAddress { .. }));
    }

    #[test]
    fn invalid_sender_is_rejected() {
        let err = gateway("broken").build_message(&email("ann@x.com")).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidAddress { ref address, .. } if address == "broken"));
    }

    #[test]
    fn header_parses_back() {
        assert_eq!(
            EmailInstanceId::parse(" 7 ").unwrap(),
            EmailInstanceId("7".into())
        );
    }
}
