//! Shared types for the inbound webhook pipelines.

use serde::{Deserialize, Serialize};

use crate::compose::ReplyClassification;
use crate::store::model::EmailInstance;

// ── Reply webhook ───────────────────────────────────────────────────

/// An inbound answer to one of our emails.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundReply {
    /// The email being answered.
    pub original_email_id: i64,
    /// Body of the incoming reply.
    pub incoming_text: String,
    /// Address the reply came from.
    pub from_email: String,
    /// Upstream delivery id; a repeated value short-circuits the pipeline.
    #[serde(default)]
    pub delivery_id: Option<String>,
}

/// What the reply pipeline did with one inbound reply.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyOutcome {
    pub reply: EmailInstance,
    pub classification: Option<ReplyClassification>,
    /// The drafted reply went out without review.
    pub auto_sent: bool,
    /// Gateway error of a failed auto-send; the draft stays in review.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_error: Option<String>,
    /// This delivery id was processed before; `reply` is the earlier draft.
    pub duplicate: bool,
}

// ── Provider events ─────────────────────────────────────────────────

/// Why a provider event was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAnObject,
    MissingReference,
    MissingEventType,
    UnknownEventType,
    UnknownEmail,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotAnObject => "not_an_object",
            Self::MissingReference => "missing_reference",
            Self::MissingEventType => "missing_event_type",
            Self::UnknownEventType => "unknown_event_type",
            Self::UnknownEmail => "unknown_email",
        }
    }
}

/// Counts from one ingested event batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Events recorded against an email.
    pub applied: usize,
    /// Events already recorded under the same external id.
    pub duplicates: usize,
    /// Recorded events whose status change is not allowed from the current status.
    pub rejected_transitions: usize,
    /// Malformed or unresolvable events.
    pub skipped: usize,
}
