//! `Database` trait: single async interface for all persistence.
//!
//! Every method is one unit of work: methods that touch more than one row
//! run inside a single transaction, so a failure leaves nothing half-applied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::store::model::{
    Campaign, Contact, EmailEngagement, EmailEvent, EmailInstance, EmailStatus,
    EventApplication, NewCampaign, NewContact, NewReplyEmail, NewRootEmail, ResolvedEvent,
    SequenceStep, StatusCounts,
};

/// A campaign created together with its steps and contacts.
#[derive(Debug, Clone)]
pub struct CampaignSetup {
    pub campaign: Campaign,
    pub steps: Vec<SequenceStep>,
    pub contacts: Vec<Contact>,
}

/// Reviewer changes to a not-yet-sent email.
#[derive(Debug, Clone, Default)]
pub struct EmailPatch {
    pub subject: Option<String>,
    pub body_text: Option<String>,
    pub status: Option<EmailStatus>,
}

/// Backend-agnostic database trait covering setup, emails, and events.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Setup ───────────────────────────────────────────────────────

    /// Create a campaign with the default step sequence and enroll the contacts.
    async fn create_campaign(
        &self,
        campaign: &NewCampaign,
        contacts: &[NewContact],
    ) -> Result<CampaignSetup, DatabaseError>;

    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>, DatabaseError>;

    async fn get_contact(&self, id: i64) -> Result<Option<Contact>, DatabaseError>;

    /// All contacts, ordered by id.
    async fn list_contacts(&self) -> Result<Vec<Contact>, DatabaseError>;

    /// Contacts enrolled in a campaign, ordered by id. `only` narrows the set.
    async fn list_campaign_contacts(
        &self,
        campaign_id: i64,
        only: Option<&[i64]>,
    ) -> Result<Vec<Contact>, DatabaseError>;

    /// Steps of a campaign, ordered by step number.
    async fn list_steps(&self, campaign_id: i64) -> Result<Vec<SequenceStep>, DatabaseError>;

    async fn get_step_by_number(
        &self,
        campaign_id: i64,
        step_number: i64,
    ) -> Result<Option<SequenceStep>, DatabaseError>;

    // ── Emails ──────────────────────────────────────────────────────

    async fn get_email(&self, id: i64) -> Result<Option<EmailInstance>, DatabaseError>;

    /// The root email for a (campaign, contact, step) key, if one exists.
    async fn find_root_email(
        &self,
        campaign_id: i64,
        contact_id: i64,
        sequence_step_id: i64,
    ) -> Result<Option<EmailInstance>, DatabaseError>;

    /// Insert a draft root email, or fetch the one that already holds its key.
    ///
    /// Returns the stored email and whether this call created it.
    async fn insert_root_email(
        &self,
        email: &NewRootEmail,
    ) -> Result<(EmailInstance, bool), DatabaseError>;

    /// Hard-delete every non-reply email of a campaign (events cascade).
    async fn delete_root_emails(&self, campaign_id: i64) -> Result<usize, DatabaseError>;

    /// Insert a reply at `awaiting_review` under an existing parent email.
    ///
    /// Fails with `NotFound` if the parent is gone. Records the delivery id
    /// when one is given; a delivery id seen before returns the earlier reply
    /// with `false`.
    async fn insert_reply_email(
        &self,
        reply: &NewReplyEmail,
    ) -> Result<(EmailInstance, bool), DatabaseError>;

    /// The reply drafted for an upstream delivery id, if any.
    async fn find_reply_by_delivery(
        &self,
        delivery_id: &str,
    ) -> Result<Option<EmailInstance>, DatabaseError>;

    /// Emails of a campaign, newest first, optionally filtered by status.
    async fn list_emails(
        &self,
        campaign_id: i64,
        status: Option<EmailStatus>,
    ) -> Result<Vec<EmailInstance>, DatabaseError>;

    /// Root emails of a step that can still be sent, ordered by id.
    async fn list_sendable_step_emails(
        &self,
        campaign_id: i64,
        sequence_step_id: i64,
    ) -> Result<Vec<EmailInstance>, DatabaseError>;

    /// Record a confirmed dispatch: status `sent`, `sent_at`, provider id,
    /// and a `sent` event.
    ///
    /// Fails with `Constraint` if the email is no longer sendable.
    async fn mark_sent(
        &self,
        id: i64,
        provider_message_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<EmailInstance, DatabaseError>;

    /// Apply a reviewer patch if the email is still in `expected` status.
    ///
    /// Returns `None` when the status moved on in the meantime.
    async fn update_email_review(
        &self,
        id: i64,
        expected: EmailStatus,
        patch: &EmailPatch,
    ) -> Result<Option<EmailInstance>, DatabaseError>;

    // ── Events ──────────────────────────────────────────────────────

    /// Append events and apply their status transitions in one transaction.
    async fn apply_events(
        &self,
        events: &[ResolvedEvent],
    ) -> Result<Vec<EventApplication>, DatabaseError>;

    /// Events of one email, oldest first.
    async fn list_events(&self, email_id: i64) -> Result<Vec<EmailEvent>, DatabaseError>;

    // ── Summary ─────────────────────────────────────────────────────

    async fn status_counts(&self, campaign_id: i64) -> Result<StatusCounts, DatabaseError>;

    /// Open/click/bounce numbers for every dispatched email of a campaign.
    async fn sent_engagement(
        &self,
        campaign_id: i64,
    ) -> Result<Vec<EmailEngagement>, DatabaseError>;
}
