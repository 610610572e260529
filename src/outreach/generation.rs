//! Generation engine: one root email per (contact, sequence step).

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::compose::{ContentGenerator, DraftSource};
use crate::error::OutreachError;
use crate::store::Database;
use crate::store::model::{EmailInstance, NewRootEmail};

/// What to generate for a campaign.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationRequest {
    /// Delete every root email of the campaign before generating.
    #[serde(default)]
    pub regenerate: bool,
    /// Restrict generation to these campaign contacts.
    #[serde(default)]
    pub contact_ids: Option<Vec<i64>>,
}

/// Counts from one generation run, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationStats {
    pub created: usize,
    pub reused: usize,
    pub fallbacks: usize,
}

pub struct GenerationEngine {
    db: Arc<dyn Database>,
    generator: Arc<ContentGenerator>,
}

impl GenerationEngine {
    pub fn new(db: Arc<dyn Database>, generator: Arc<ContentGenerator>) -> Self {
        Self { db, generator }
    }

    /// Produce the root emails for a campaign.
    ///
    /// Iterates contacts by id, then steps by step number. Existing root
    /// emails are returned as-is without an LLM call; new ones are stored as
    /// drafts through insert-or-fetch, so a concurrent run for the same pair
    /// ends up sharing one row.
    pub async fn generate(
        &self,
        campaign_id: i64,
        request: &GenerationRequest,
    ) -> Result<Vec<EmailInstance>, OutreachError> {
        let campaign = self
            .db
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| OutreachError::not_found("campaign", campaign_id))?;

        let contacts = self
            .db
            .list_campaign_contacts(campaign_id, request.contact_ids.as_deref())
            .await?;
        if contacts.is_empty() {
            return Err(OutreachError::InvalidState(format!(
                "campaign {campaign_id} has no matching contacts"
            )));
        }

        let steps = self.db.list_steps(campaign_id).await?;
        if steps.is_empty() {
            return Err(OutreachError::InvalidState(format!(
                "campaign {campaign_id} has no sequence steps"
            )));
        }

        if request.regenerate {
            let deleted = self.db.delete_root_emails(campaign_id).await?;
            info!(campaign_id, deleted, "Regenerating campaign emails");
        }

        let mut stats = GenerationStats::default();
        let mut emails = Vec::with_capacity(contacts.len() * steps.len());

        for contact in &contacts {
            for step in &steps {
                if let Some(existing) = self
                    .db
                    .find_root_email(campaign_id, contact.id, step.id)
                    .await?
                {
                    stats.reused += 1;
                    emails.push(existing);
                    continue;
                }

                let content = self.generator.generate_email(&campaign, contact, step).await;
                if content.source == DraftSource::Fallback {
                    stats.fallbacks += 1;
                }

                let (email, created) = self
                    .db
                    .insert_root_email(&NewRootEmail {
                        campaign_id,
                        contact_id: contact.id,
                        sequence_step_id: step.id,
                        subject: content.subject,
                        body_text: content.body,
                    })
                    .await?;

                if created {
                    stats.created += 1;
                } else {
                    debug!(
                        campaign_id,
                        contact_id = contact.id,
                        step = step.step_number,
                        "Root email created concurrently, keeping existing"
                    );
                    stats.reused += 1;
                }
                emails.push(email);
            }
        }

        info!(
            campaign_id,
            created = stats.created,
            reused = stats.reused,
            fallbacks = stats.fallbacks,
            "Generation complete"
        );
        Ok(emails)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::tests::ScriptedLlm;
    use crate::compose::{CallLimiter, GeneratorConfig};
    use crate::store::model::{EmailStatus, NewCampaign, NewContact, NewReplyEmail};
    use crate::store::{CampaignSetup, LibSqlBackend};

    const DRAFT_JSON: &str = r#"{"subject": "Widget for you", "body": "Our widget helps."}"#;

    async fn setup(contacts: usize) -> (Arc<LibSqlBackend>, CampaignSetup) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let contacts: Vec<NewContact> = (0..contacts)
            .map(|i| NewContact {
                email: format!("c{i}@x.com"),
                first_name: Some(format!("C{i}")),
                ..Default::default()
            })
            .collect();
        let setup = db
            .create_campaign(
                &NewCampaign {
                    name: "Launch".into(),
                    product_name: Some("Widget".into()),
                    ..Default::default()
                },
                &contacts,
            )
            .await
            .unwrap();
        (db, setup)
    }

    fn engine(db: Arc<LibSqlBackend>, llm: Arc<ScriptedLlm>) -> GenerationEngine {
        let generator = ContentGenerator::new(llm, CallLimiter::unlimited(), GeneratorConfig::default());
        GenerationEngine::new(db, Arc::new(generator))
    }

    #[tokio::test]
    async fn generates_one_draft_per_contact_and_step() {
        let (db, setup) = setup(2).await;
        let llm = Arc::new(ScriptedLlm::always(DRAFT_JSON));
        let engine = engine(db.clone(), llm.clone());

        let emails = engine
            .generate(setup.campaign.id, &GenerationRequest::default())
            .await
            .unwrap();

        assert_eq!(emails.len(), 6);
        assert!(emails.iter().all(|e| e.status == EmailStatus::Draft && !e.is_reply));
        assert_eq!(llm.calls(), 6);

        // Contact id ascending, then step number ascending
        let order: Vec<(i64, Option<i64>)> =
            emails.iter().map(|e| (e.contact_id, e.sequence_step_id)).collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
        assert_eq!(emails[0].contact_id, setup.contacts[0].id);
        assert_eq!(emails[0].sequence_step_id, Some(setup.steps[0].id));
    }

    #[tokio::test]
    async fn second_run_is_idempotent() {
        let (db, setup) = setup(2).await;
        let llm = Arc::new(ScriptedLlm::always(DRAFT_JSON));
        let engine = engine(db.clone(), llm.clone());

        let first = engine
            .generate(setup.campaign.id, &GenerationRequest::default())
            .await
            .unwrap();
        let second = engine
            .generate(setup.campaign.id, &GenerationRequest::default())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(llm.calls(), 6, "no LLM calls for existing pairs");
        assert_eq!(db.list_emails(setup.campaign.id, None).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn concurrent_runs_never_duplicate() {
        let (db, setup) = setup(2).await;
        let llm = Arc::new(ScriptedLlm::always(DRAFT_JSON));
        let engine = Arc::new(engine(db.clone(), llm));

        let a = {
            let engine = engine.clone();
            let id = setup.campaign.id;
            tokio::spawn(async move { engine.generate(id, &GenerationRequest::default()).await })
        };
        let b = {
            let engine = engine.clone();
            let id = setup.campaign.id;
            tokio::spawn(async move { engine.generate(id, &GenerationRequest::default()).await })
        };
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        let ids = |v: &[EmailInstance]| v.iter().map(|e| e.id).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(db.list_emails(setup.campaign.id, None).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn regenerate_replaces_roots_and_keeps_replies() {
        let (db, setup) = setup(1).await;
        let engine = engine(db.clone(), Arc::new(ScriptedLlm::always(DRAFT_JSON)));

        let first = engine
            .generate(setup.campaign.id, &GenerationRequest::default())
            .await
            .unwrap();
        let (reply, _) = db
            .insert_reply_email(&NewReplyEmail {
                parent_email_id: first[0].id,
                subject: "Re: Widget for you".into(),
                body_text: "Thanks".into(),
                delivery_id: None,
            })
            .await
            .unwrap();

        let second = engine
            .generate(
                setup.campaign.id,
                &GenerationRequest {
                    regenerate: true,
                    contact_ids: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(second.len(), 3);
        for old in &first {
            assert!(db.get_email(old.id).await.unwrap().is_none());
            assert!(second.iter().all(|new| new.id != old.id));
        }
        assert!(db.get_email(reply.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn contact_subset_limits_generation() {
        let (db, setup) = setup(3).await;
        let engine = engine(db.clone(), Arc::new(ScriptedLlm::always(DRAFT_JSON)));
        let only = setup.contacts[1].id;

        let emails = engine
            .generate(
                setup.campaign.id,
                &GenerationRequest {
                    regenerate: false,
                    contact_ids: Some(vec![only]),
                },
            )
            .await
            .unwrap();
        assert_eq!(emails.len(), 3);
        assert!(emails.iter().all(|e| e.contact_id == only));
    }

    #[tokio::test]
    async fn missing_campaign_is_not_found() {
        let (db, _) = setup(1).await;
        let engine = engine(db, Arc::new(ScriptedLlm::always(DRAFT_JSON)));
        let err = engine
            .generate(999, &GenerationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OutreachError::NotFound { .. }));
    }

    #[tokio::test]
    async fn no_contacts_is_invalid_state() {
        let (db, setup) = setup(0).await;
        let llm = Arc::new(ScriptedLlm::always(DRAFT_JSON));
        let engine = engine(db.clone(), llm.clone());

        let err = engine
            .generate(setup.campaign.id, &GenerationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OutreachError::InvalidState(_)));
        assert_eq!(llm.calls(), 0);

        let err = engine
            .generate(
                setup.campaign.id,
                &GenerationRequest {
                    regenerate: true,
                    contact_ids: Some(vec![12345]),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OutreachError::InvalidState(_)));
    }

    #[tokio::test]
    async fn llm_outage_still_generates_fallbacks() {
        let (db, setup) = setup(1).await;
        let engine = engine(db, Arc::new(ScriptedLlm::new(vec![])));

        let emails = engine
            .generate(setup.campaign.id, &GenerationRequest::default())
            .await
            .unwrap();
        assert_eq!(emails.len(), 3);
        assert!(emails.iter().all(|e| e.subject == "Hello C0,"));
    }
}
