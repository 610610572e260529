//! Persistent entities and the email status state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recipient imported into the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub email: String,
    pub first_name: Option<String>,
    pub company: Option<String>,
    pub role: Option<String>,
    pub hobbies: Option<String>,
    pub mbti_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Contact fields supplied at import time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewContact {
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub hobbies: Option<String>,
    #[serde(default)]
    pub mbti_type: Option<String>,
}

/// Root of an outreach sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub product_name: Option<String>,
    pub product_description: Option<String>,
    pub base_prompt_template: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Campaign fields supplied at setup time.
#[derive(Debug, Clone, Default)]
pub struct NewCampaign {
    pub name: String,
    pub product_name: Option<String>,
    pub product_description: Option<String>,
    pub base_prompt_template: Option<String>,
}

/// One numbered stage of a campaign's cadence.
///
/// `offset_days` is stored for a future scheduler; nothing acts on it today.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub id: i64,
    pub campaign_id: i64,
    pub step_number: i64,
    pub offset_days: i64,
    pub name: String,
}

/// The default three-step cadence attached to every new campaign.
pub const DEFAULT_STEPS: &[(i64, i64, &str)] = &[
    (1, 0, "Initial email"),
    (2, 3, "Follow-up"),
    (3, 7, "Final reminder"),
];

/// Lifecycle state of an [`EmailInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    /// Generated root email, not yet reviewed.
    Draft,
    /// Drafted reply (or reviewed draft) waiting for a human.
    AwaitingReview,
    /// Reserved for scheduled sending. No transition produces it.
    Queued,
    /// Dispatch confirmed by the send gateway.
    Sent,
    /// Provider reported delivery.
    Delivered,
    /// Provider reported a bounce.
    Failed,
    /// Recipient replied.
    Replied,
}

impl EmailStatus {
    pub const ALL: [EmailStatus; 7] = [
        Self::Draft,
        Self::AwaitingReview,
        Self::Queued,
        Self::Sent,
        Self::Delivered,
        Self::Failed,
        Self::Replied,
    ];

    /// Check if this state allows transitioning to another state.
    ///
    /// Re-applying the current state is not a transition; callers treat it
    /// as a no-op before consulting this table.
    pub fn can_transition_to(&self, target: EmailStatus) -> bool {
        use EmailStatus::*;

        matches!(
            (self, target),
            // Human review
            (Draft, AwaitingReview) | (AwaitingReview, Draft) |
            // Confirmed dispatch
            (Draft, Sent) | (AwaitingReview, Sent) | (Queued, Sent) |
            // Provider callbacks
            (Sent, Delivered) |
            (Sent, Failed) | (Delivered, Failed) |
            (Sent, Replied) | (Delivered, Replied)
        )
    }

    /// Whether the email can still be dispatched.
    pub fn is_sendable(&self) -> bool {
        matches!(self, Self::Draft | Self::AwaitingReview | Self::Queued)
    }

    /// Whether subject and body may still be edited.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::AwaitingReview)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::AwaitingReview => "awaiting_review",
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Replied => "replied",
        }
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown email status '{s}'"))
    }
}

/// Tag on an [`EmailEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Sent,
    Delivered,
    Open,
    Click,
    Bounce,
    Spam,
    Reply,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        Self::Sent,
        Self::Delivered,
        Self::Open,
        Self::Click,
        Self::Bounce,
        Self::Spam,
        Self::Reply,
    ];

    /// Status an email moves to when this event arrives, if any.
    ///
    /// `spam` is engagement-only and does not fail the email.
    pub fn target_status(&self) -> Option<EmailStatus> {
        match self {
            Self::Delivered => Some(EmailStatus::Delivered),
            Self::Bounce => Some(EmailStatus::Failed),
            Self::Reply => Some(EmailStatus::Replied),
            Self::Sent | Self::Open | Self::Click | Self::Spam => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Open => "open",
            Self::Click => "click",
            Self::Bounce => "bounce",
            Self::Spam => "spam",
            Self::Reply => "reply",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type '{s}'"))
    }
}

/// One concrete email, either a root sequence email or a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailInstance {
    pub id: i64,
    pub campaign_id: i64,
    pub contact_id: i64,
    pub sequence_step_id: Option<i64>,
    pub is_reply: bool,
    pub parent_email_id: Option<i64>,
    pub subject: String,
    pub body_text: String,
    pub status: EmailStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A root email about to be persisted by the generation engine.
#[derive(Debug, Clone)]
pub struct NewRootEmail {
    pub campaign_id: i64,
    pub contact_id: i64,
    pub sequence_step_id: i64,
    pub subject: String,
    pub body_text: String,
}

/// A reply about to be persisted by the reply pipeline.
#[derive(Debug, Clone)]
pub struct NewReplyEmail {
    pub parent_email_id: i64,
    pub subject: String,
    pub body_text: String,
    /// Upstream delivery id of the inbound reply, used for dedup.
    pub delivery_id: Option<String>,
}

/// Append-only log entry tied to one email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailEvent {
    pub id: i64,
    pub email_id: i64,
    pub event_type: EventType,
    pub metadata: serde_json::Value,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A provider event that has been matched to an email.
#[derive(Debug, Clone)]
pub struct ResolvedEvent {
    pub email_id: i64,
    pub event_type: EventType,
    pub external_id: Option<String>,
    pub metadata: serde_json::Value,
}

/// Result of applying one resolved event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventApplication {
    /// Event recorded; status moved (or stayed) as expected.
    Applied,
    /// Event with this external id was already recorded.
    Duplicate,
    /// Referenced email no longer exists.
    MissingEmail,
    /// Event recorded, but its status change is not in the transition table.
    RejectedTransition,
}

/// Per-status counts for a campaign.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total_emails: i64,
    pub draft: i64,
    pub awaiting_review: i64,
    pub queued: i64,
    pub sent: i64,
    pub delivered: i64,
    pub failed: i64,
    pub replied: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: EmailStatus, count: i64) {
        self.total_emails += count;
        let slot = match status {
            EmailStatus::Draft => &mut self.draft,
            EmailStatus::AwaitingReview => &mut self.awaiting_review,
            EmailStatus::Queued => &mut self.queued,
            EmailStatus::Sent => &mut self.sent,
            EmailStatus::Delivered => &mut self.delivered,
            EmailStatus::Failed => &mut self.failed,
            EmailStatus::Replied => &mut self.replied,
        };
        *slot += count;
    }
}

/// Engagement numbers for one dispatched email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailEngagement {
    pub id: i64,
    pub subject: String,
    pub recipient_email: String,
    pub recipient_name: String,
    pub status: EmailStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub open_count: i64,
    pub click_count: i64,
    pub bounce: bool,
}
