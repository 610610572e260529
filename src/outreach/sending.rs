//! Dispatching emails through the send gateway.
//!
//! Status only moves to `sent` after the gateway confirms the hand-off; a
//! gateway failure leaves the email where it was and is reported back.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{DatabaseError, OutreachError};
use crate::gateway::{OutboundEmail, SendGateway};
use crate::store::Database;
use crate::store::model::{EmailInstance, EmailStatus};

/// One email that could not be sent during a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendFailure {
    pub email_id: i64,
    pub reason: String,
}

/// Outcome of a send-by-step run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendReport {
    pub sent: usize,
    pub failed: Vec<SendFailure>,
}

pub struct Dispatcher {
    db: Arc<dyn Database>,
    gateway: Arc<dyn SendGateway>,
    /// Held from the status check until the dispatch is recorded.
    send_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(db: Arc<dyn Database>, gateway: Arc<dyn SendGateway>) -> Self {
        Self {
            db,
            gateway,
            send_lock: Mutex::new(()),
        }
    }

    /// Send one email and record the confirmed dispatch.
    ///
    /// The stored row is re-read under the send lock, so a stale copy of an
    /// email that was already sent never reaches the gateway again.
    pub async fn dispatch_email(&self, email: &EmailInstance) -> Result<EmailInstance, OutreachError> {
        let _guard = self.send_lock.lock().await;
        self.dispatch_locked(email.id).await
    }

    async fn dispatch_locked(&self, email_id: i64) -> Result<EmailInstance, OutreachError> {
        let email = self
            .db
            .get_email(email_id)
            .await?
            .ok_or_else(|| OutreachError::not_found("email", email_id))?;
        let refused = || OutreachError::InvalidTransition {
            id: email.id,
            from: email.status.to_string(),
            to: EmailStatus::Sent.to_string(),
        };
        if !email.status.is_sendable() {
            return Err(refused());
        }

        let contact = self
            .db
            .get_contact(email.contact_id)
            .await?
            .ok_or_else(|| OutreachError::not_found("contact", email.contact_id))?;

        let outbound = OutboundEmail {
            to: contact.email,
            subject: email.subject.clone(),
            body_text: email.body_text.clone(),
            correlation_id: email.id.to_string(),
        };

        let message_id = self.gateway.dispatch(&outbound).await?;

        let sent = self
            .db
            .mark_sent(email.id, &message_id, Utc::now())
            .await
            .map_err(|e| match e {
                DatabaseError::Constraint(_) => refused(),
                other => other.into(),
            })?;

        info!(
            email_id = sent.id,
            gateway = self.gateway.name(),
            message_id = %message_id,
            "Email sent"
        );
        Ok(sent)
    }

    /// Send every draft or awaiting-review root email of one step.
    ///
    /// Individual failures are collected; the run continues with the rest.
    pub async fn send_step(
        &self,
        campaign_id: i64,
        step_number: i64,
    ) -> Result<SendReport, OutreachError> {
        self.db
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| OutreachError::not_found("campaign", campaign_id))?;

        let step = self
            .db
            .get_step_by_number(campaign_id, step_number)
            .await?
            .ok_or_else(|| {
                OutreachError::not_found("sequence step", format!("{campaign_id}/{step_number}"))
            })?;

        let _guard = self.send_lock.lock().await;

        let emails = self.db.list_sendable_step_emails(campaign_id, step.id).await?;
        let mut report = SendReport::default();

        for email in &emails {
            match self.dispatch_locked(email.id).await {
                Ok(_) => report.sent += 1,
                Err(e) => {
                    warn!(email_id = email.id, error = %e, "Send failed");
                    report.failed.push(SendFailure {
                        email_id: email.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            campaign_id,
            step_number,
            sent = report.sent,
            failed = report.failed.len(),
            "Step send complete"
        );
        Ok(report)
    }
}
