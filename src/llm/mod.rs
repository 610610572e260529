//! LLM integration for Outreach Assist.
//!
//! Talks to any OpenAI-compatible chat completions endpoint (Groq by
//! default) through the `LlmProvider` trait, so callers and tests can swap
//! in their own backends.

pub mod openai_compat;
pub mod provider;

pub use openai_compat::OpenAiCompatProvider;
pub use provider::*;

use std::sync::Arc;
use std::time::Duration;

use crate::error::LlmError;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: secrecy::SecretString,
    pub model: String,
    /// Upper bound on a single HTTP round trip.
    pub request_timeout: Duration,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenAiCompatProvider::new(
        &config.base_url,
        config.api_key.clone(),
        &config.model,
        config.request_timeout,
    )?;
    tracing::info!(base_url = %config.base_url, model = %config.model, "LLM provider ready");
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_provider_constructs_without_network() {
        let config = LlmConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: secrecy::SecretString::from("test-key"),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(10),
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "llama-3.1-8b-instant");
    }
}
