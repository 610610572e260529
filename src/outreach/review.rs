//! Reviewer edits to unsent emails.

use serde::Deserialize;
use tracing::info;

use crate::error::OutreachError;
use crate::store::model::{EmailInstance, EmailStatus};
use crate::store::{Database, EmailPatch};

/// Fields a reviewer may change. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewEdit {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub status: Option<EmailStatus>,
}

/// Apply a reviewer edit.
///
/// Only `draft` and `awaiting_review` emails are editable, and the only
/// manual status moves are between those two.
pub async fn review_edit(
    db: &dyn Database,
    id: i64,
    edit: &ReviewEdit,
) -> Result<EmailInstance, OutreachError> {
    let email = db
        .get_email(id)
        .await?
        .ok_or_else(|| OutreachError::not_found("email", id))?;

    if let Some(target) = edit.status {
        let manual = target.is_editable() && email.status.is_editable();
        if target != email.status && !(manual && email.status.can_transition_to(target)) {
            return Err(OutreachError::InvalidTransition {
                id,
                from: email.status.to_string(),
                to: target.to_string(),
            });
        }
    }

    if !email.status.is_editable() {
        return Err(OutreachError::InvalidState(format!(
            "email {id} is {} and can no longer be edited",
            email.status
        )));
    }

    let patch = EmailPatch {
        subject: edit.subject.clone(),
        body_text: edit.body_text.clone(),
        status: edit.status,
    };

    let updated = db
        .update_email_review(id, email.status, &patch)
        .await?
        .ok_or_else(|| {
            OutreachError::InvalidState(format!("email {id} changed status during the edit"))
        })?;

    info!(email_id = id, status = %updated.status, "Email reviewed");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use crate::store::model::{NewCampaign, NewContact, NewRootEmail};
    use chrono::Utc;

    async fn draft() -> (LibSqlBackend, EmailInstance) {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let setup = db
            .create_campaign(
                &NewCampaign {
                    name: "Launch".into(),
                    ..Default::default()
                },
                &[NewContact {
                    email: "ann@x.com".into(),
                    ..Default::default()
                }],
            )
            .await
            .unwrap();
        let (email, _) = db
            .insert_root_email(&NewRootEmail {
                campaign_id: setup.campaign.id,
                contact_id: setup.contacts[0].id,
                sequence_step_id: setup.steps[0].id,
                subject: "Hello".into(),
                body_text: "Body".into(),
            })
            .await
            .unwrap();
        (db, email)
    }

    #[tokio::test]
    async fn edits_content_and_moves_to_review() {
        let (db, email) = draft().await;
        let updated = review_edit(
            &db,
            email.id,
            &ReviewEdit {
                subject: Some("Better subject".into()),
                body_text: None,
                status: Some(EmailStatus::AwaitingReview),
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.subject, "Better subject");
        assert_eq!(updated.body_text, "Body");
        assert_eq!(updated.status, EmailStatus::AwaitingReview);

        let back = review_edit(
            &db,
            email.id,
            &ReviewEdit {
                status: Some(EmailStatus::Draft),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(back.status, EmailStatus::Draft);
    }

    #[tokio::test]
    async fn manual_send_status_is_rejected() {
        let (db, email) = draft().await;
        for target in [EmailStatus::Sent, EmailStatus::Delivered, EmailStatus::Queued] {
            let err = review_edit(
                &db,
                email.id,
                &ReviewEdit {
                    status: Some(target),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
            assert!(matches!(err, OutreachError::InvalidTransition { .. }), "{target}");
        }
        let stored = db.get_email(email.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EmailStatus::Draft);
    }

    #[tokio::test]
    async fn sent_email_is_not_editable() {
        let (db, email) = draft().await;
        db.mark_sent(email.id, "msg-1", Utc::now()).await.unwrap();

        let err = review_edit(
            &db,
            email.id,
            &ReviewEdit {
                body_text: Some("Too late".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OutreachError::InvalidState(_)));

        let err = review_edit(
            &db,
            email.id,
            &ReviewEdit {
                status: Some(EmailStatus::Draft),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OutreachError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn missing_email_is_not_found() {
        let (db, _) = draft().await;
        let err = review_edit(&db, 4242, &ReviewEdit::default()).await.unwrap_err();
        assert!(matches!(err, OutreachError::NotFound { .. }));
    }
}
