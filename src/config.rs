//! Configuration types, read once from the environment at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::compose::{GeneratorConfig, RateLimitMode};
use crate::error::ConfigError;
use crate::gateway::{GatewayConfig, SendGridConfig, SmtpConfig, sendgrid};
use crate::llm::{DEFAULT_BASE_URL, DEFAULT_MODEL, LlmConfig};

const DEFAULT_DB_PATH: &str = "./data/outreach.db";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:5173,http://127.0.0.1:5173";

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub cors_origins: Vec<String>,
}

/// Enforced cap on LLM calls.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Calls per minute; zero disables the limiter.
    pub calls_per_minute: u32,
    pub mode: RateLimitMode,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls_per_minute: 30,
            mode: RateLimitMode::Wait,
        }
    }
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub rate_limit: RateLimitConfig,
    pub generator: GeneratorConfig,
    pub gateway: GatewayConfig,
}

impl AppConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = get("LLM_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("LLM_API_KEY".to_string()))?;
        let timeout = Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", 30u64)?);

        let llm = LlmConfig {
            base_url: get("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: SecretString::from(api_key),
            model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            request_timeout: timeout,
        };

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            calls_per_minute: parse_or(&get, "LLM_MAX_CALLS_PER_MIN", defaults.calls_per_minute)?,
            mode: parse_or(&get, "LLM_RATE_LIMIT_MODE", defaults.mode)?,
        };

        let generator = GeneratorConfig {
            sender_name: get("SENDER_FIRST_NAME")
                .unwrap_or_else(|| GeneratorConfig::default().sender_name),
            call_timeout: timeout,
            ..GeneratorConfig::default()
        };

        let server = ServerConfig {
            port: parse_or(&get, "OUTREACH_PORT", DEFAULT_PORT)?,
            cors_origins: get("OUTREACH_CORS_ORIGINS")
                .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        };

        Ok(Self {
            database_path: get("OUTREACH_DB_PATH")
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
                .into(),
            server,
            llm,
            rate_limit,
            generator,
            gateway: gateway_from(&get)?,
        })
    }
}

/// SendGrid when its key is set, otherwise SMTP.
fn gateway_from(get: &impl Fn(&str) -> Option<String>) -> Result<GatewayConfig, ConfigError> {
    if let Some(api_key) = get("SENDGRID_API_KEY") {
        let from_email = get("SENDGRID_FROM_EMAIL").ok_or_else(|| ConfigError::MissingRequired {
            key: "SENDGRID_FROM_EMAIL".to_string(),
            hint: "Set the verified sender address for SendGrid.".to_string(),
        })?;
        return Ok(GatewayConfig::SendGrid(SendGridConfig {
            api_key: SecretString::from(api_key),
            from_email,
            base_url: sendgrid::DEFAULT_BASE_URL.to_string(),
        }));
    }

    if let Some(host) = get("EMAIL_SMTP_HOST") {
        let username = get("EMAIL_USERNAME").unwrap_or_default();
        let from_address = get("EMAIL_FROM_ADDRESS").unwrap_or_else(|| username.clone());
        if from_address.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "EMAIL_FROM_ADDRESS".to_string(),
                hint: "Set EMAIL_FROM_ADDRESS or EMAIL_USERNAME for SMTP.".to_string(),
            });
        }
        return Ok(GatewayConfig::Smtp(SmtpConfig {
            host,
            port: parse_or(get, "EMAIL_SMTP_PORT", 587u16)?,
            username,
            password: SecretString::from(get("EMAIL_PASSWORD").unwrap_or_default()),
            from_address,
        }));
    }

    Err(ConfigError::MissingRequired {
        key: "SENDGRID_API_KEY or EMAIL_SMTP_HOST".to_string(),
        hint: "Configure SendGrid or an SMTP server to send email.".to_string(),
    })
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
    }
}
