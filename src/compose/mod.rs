//! Content generator: LLM-written outreach emails and reply handling.
//!
//! Every public operation is infallible from the caller's point of view: a
//! failed, rate-limited, timed-out or unparseable LLM call degrades to a
//! deterministic template (or, for classification, to "not simple").

pub mod limiter;
pub mod normalize;
pub mod parse;
pub mod prompts;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::store::model::{Campaign, Contact, EmailInstance, SequenceStep};

pub use limiter::{CallLimiter, RateLimitMode};
pub use parse::ReplyClassification;

/// Configuration for content generation.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// First name used in sign-offs.
    pub sender_name: String,
    /// Upper bound on one LLM call; exceeding it falls back to templates.
    pub call_timeout: Duration,
    /// LLM temperature for email writing.
    pub temperature: f32,
    /// Max tokens for generated emails and reply drafts.
    pub max_tokens: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            sender_name: "Alex".to_string(),
            call_timeout: Duration::from_secs(30),
            temperature: 0.5,
            max_tokens: 1500,
        }
    }
}

/// Temperature for classification (deterministic-ish).
const CLASSIFY_TEMPERATURE: f32 = 0.0;
const CLASSIFY_MAX_TOKENS: u32 = 200;

/// Where a generated email came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftSource {
    Llm,
    Fallback,
}

/// A normalized `{subject, body}` pair ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedEmail {
    pub subject: String,
    pub body: String,
    pub source: DraftSource,
}

/// Produces email content through a rate-limited LLM.
pub struct ContentGenerator {
    llm: Arc<dyn LlmProvider>,
    limiter: CallLimiter,
    config: GeneratorConfig,
}

impl ContentGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, limiter: CallLimiter, config: GeneratorConfig) -> Self {
        Self {
            llm,
            limiter,
            config,
        }
    }

    pub fn sender_name(&self) -> &str {
        &self.config.sender_name
    }

    /// One LLM round trip behind the limiter and the call timeout.
    async fn call(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.limiter.acquire().await?;

        match tokio::time::timeout(self.config.call_timeout, self.llm.complete(request)).await {
            Ok(response) => response.map(|r| r.content),
            Err(_) => Err(LlmError::Timeout(self.config.call_timeout)),
        }
    }

    /// Write the email for one contact at one sequence step.
    pub async fn generate_email(
        &self,
        campaign: &Campaign,
        contact: &Contact,
        step: &SequenceStep,
    ) -> GeneratedEmail {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(prompts::generation_system_prompt(campaign)),
            ChatMessage::user(prompts::generation_user_prompt(
                campaign,
                contact,
                step,
                &self.config.sender_name,
            )),
        ])
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens)
        .with_json_mode();

        let raw = match self.call(request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    campaign_id = campaign.id,
                    contact_id = contact.id,
                    step = step.step_number,
                    error = %e,
                    "Email generation failed, using fallback template"
                );
                return self.fallback_email(campaign, contact);
            }
        };

        let Some(draft) = parse::parse_email_draft(&raw) else {
            warn!(
                campaign_id = campaign.id,
                contact_id = contact.id,
                step = step.step_number,
                raw_response = %raw,
                "Unparseable email draft, using fallback template"
            );
            return self.fallback_email(campaign, contact);
        };

        let subject = normalize::normalize_subject(&draft.subject)
            .unwrap_or_else(|| fallback_subject(contact.first_name.as_deref()));
        let body = normalize::normalize_body(
            &draft.body,
            contact.first_name.as_deref(),
            &self.config.sender_name,
        );

        debug!(
            campaign_id = campaign.id,
            contact_id = contact.id,
            step = step.step_number,
            "Email generated"
        );
        GeneratedEmail {
            subject,
            body,
            source: DraftSource::Llm,
        }
    }

    /// Deterministic email built from static templates.
    pub fn fallback_email(&self, campaign: &Campaign, contact: &Contact) -> GeneratedEmail {
        let first_name = contact.first_name.as_deref();
        let description = campaign
            .product_description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or("We think you might find it valuable.");
        let product = campaign
            .product_name
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(campaign.name.as_str());

        let body = format!(
            "{greeting}\n\n\
             I wanted to reach out regarding our product: {product}.\n\
             {description}\n\
             If you have any questions, feel free to reply.\n\n\
             {sign_off}",
            greeting = normalize::greeting_for(first_name),
            sign_off = normalize::sign_off_for(&self.config.sender_name),
        );

        GeneratedEmail {
            subject: fallback_subject(first_name),
            body,
            source: DraftSource::Fallback,
        }
    }

    /// Decide whether an inbound reply can be answered automatically.
    ///
    /// Fails closed: any error or ambiguous output is "not simple".
    pub async fn classify_reply(&self, original_body: &str, incoming: &str) -> ReplyClassification {
        let request = CompletionRequest::new(vec![ChatMessage::user(
            prompts::classification_prompt(original_body, incoming),
        )])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS)
        .with_json_mode();

        match self.call(request).await {
            Ok(raw) => {
                let classification = parse::parse_classification(&raw);
                info!(
                    is_simple = classification.is_simple,
                    reason = %classification.reason,
                    "Reply classified"
                );
                classification
            }
            Err(e) => {
                warn!(error = %e, "Reply classification failed, treating as not simple");
                ReplyClassification::not_simple(format!("Classification unavailable: {e}"))
            }
        }
    }

    /// Draft a plain-text answer to an inbound reply.
    pub async fn draft_reply(
        &self,
        original: &EmailInstance,
        contact: &Contact,
        incoming: &str,
    ) -> String {
        let request = CompletionRequest::new(vec![ChatMessage::user(
            prompts::reply_draft_prompt(
                &original.body_text,
                incoming,
                prompts::REPLY_GOAL,
                &self.config.sender_name,
            ),
        )])
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        let first_name = contact.first_name.as_deref();
        match self.call(request).await {
            Ok(raw) if !raw.trim().is_empty() => {
                normalize::normalize_body(&raw, first_name, &self.config.sender_name)
            }
            Ok(_) => {
                warn!(email_id = original.id, "Empty reply draft, using fallback template");
                self.fallback_reply(first_name)
            }
            Err(e) => {
                warn!(email_id = original.id, error = %e, "Reply drafting failed, using fallback template");
                self.fallback_reply(first_name)
            }
        }
    }

    fn fallback_reply(&self, first_name: Option<&str>) -> String {
        format!(
            "{}\n\nThank you for getting back to me. I will follow up with the details shortly.\n\n{}",
            normalize::greeting_for(first_name),
            normalize::sign_off_for(&self.config.sender_name),
        )
    }
}

fn fallback_subject(first_name: Option<&str>) -> String {
    match first_name.map(str::trim) {
        Some(name) if !name.is_empty() => format!("Hello {name},"),
        _ => "Hello,".to_string(),
    }
}
