//! Reply pipeline: classify, draft, and conditionally send.
//!
//! The control flow is fixed: every inbound reply is classified, a reply is
//! always drafted and stored at `awaiting_review`, and only a reply classified
//! as simple is dispatched without review.

use std::sync::Arc;

use tracing::{info, warn};

use crate::compose::ContentGenerator;
use crate::error::OutreachError;
use crate::outreach::Dispatcher;
use crate::pipeline::types::{InboundReply, ReplyOutcome};
use crate::store::Database;
use crate::store::model::NewReplyEmail;

pub struct ReplyPipeline {
    db: Arc<dyn Database>,
    generator: Arc<ContentGenerator>,
    dispatcher: Arc<Dispatcher>,
}

fn reply_subject(original: &str) -> String {
    let trimmed = original.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

impl ReplyPipeline {
    pub fn new(
        db: Arc<dyn Database>,
        generator: Arc<ContentGenerator>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            db,
            generator,
            dispatcher,
        }
    }

    /// Handle one inbound reply.
    pub async fn handle(&self, inbound: &InboundReply) -> Result<ReplyOutcome, OutreachError> {
        if let Some(delivery_id) = inbound.delivery_id.as_deref() {
            if let Some(existing) = self.db.find_reply_by_delivery(delivery_id).await? {
                info!(delivery_id, reply_id = existing.id, "Reply delivery already handled");
                return Ok(ReplyOutcome {
                    reply: existing,
                    classification: None,
                    auto_sent: false,
                    send_error: None,
                    duplicate: true,
                });
            }
        }

        let original = self
            .db
            .get_email(inbound.original_email_id)
            .await?
            .ok_or_else(|| OutreachError::not_found("email", inbound.original_email_id))?;
        let contact = self
            .db
            .get_contact(original.contact_id)
            .await?
            .ok_or_else(|| OutreachError::not_found("contact", original.contact_id))?;

        if !contact.email.eq_ignore_ascii_case(inbound.from_email.trim()) {
            warn!(
                original_email_id = original.id,
                from = %inbound.from_email,
                "Reply sender differs from the contact address"
            );
        }

        let classification = self
            .generator
            .classify_reply(&original.body_text, &inbound.incoming_text)
            .await;
        let body = self
            .generator
            .draft_reply(&original, &contact, &inbound.incoming_text)
            .await;

        let (draft, created) = self
            .db
            .insert_reply_email(&NewReplyEmail {
                parent_email_id: original.id,
                subject: reply_subject(&original.subject),
                body_text: body,
                delivery_id: inbound.delivery_id.clone(),
            })
            .await?;

        if !created {
            // A concurrent delivery with the same id won the insert
            return Ok(ReplyOutcome {
                reply: draft,
                classification: Some(classification),
                auto_sent: false,
                send_error: None,
                duplicate: true,
            });
        }

        info!(
            original_email_id = original.id,
            reply_id = draft.id,
            is_simple = classification.is_simple,
            "Reply drafted"
        );

        if !classification.is_simple {
            return Ok(ReplyOutcome {
                reply: draft,
                classification: Some(classification),
                auto_sent: false,
                send_error: None,
                duplicate: false,
            });
        }

        match self.dispatcher.dispatch_email(&draft).await {
            Ok(sent) => Ok(ReplyOutcome {
                reply: sent,
                classification: Some(classification),
                auto_sent: true,
                send_error: None,
                duplicate: false,
            }),
            Err(e) => {
                warn!(reply_id = draft.id, error = %e, "Auto-send failed, reply left for review");
                Ok(ReplyOutcome {
                    reply: draft,
                    classification: Some(classification),
                    auto_sent: false,
                    send_error: Some(e.to_string()),
                    duplicate: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::tests::ScriptedLlm;
    use crate::compose::{CallLimiter, GeneratorConfig};
    use crate::error::LlmError;
    use crate::gateway::tests::RecordingGateway;
    use crate::store::LibSqlBackend;
    use crate::store::model::{
        EmailInstance, EmailStatus, NewCampaign, NewContact, NewRootEmail,
    };
    use chrono::Utc;

    const SIMPLE: &str = r#"{"is_simple": true, "reason": "asks for pricing link"}"#;
    const NOT_SIMPLE: &str = r#"{"is_simple": false, "reason": "negotiation"}"#;
    const DRAFT: &str = "Dear Ann,\n\nHere is the link you asked for.\n\nBest regards,\nAlex";

    struct Harness {
        db: Arc<LibSqlBackend>,
        llm: Arc<ScriptedLlm>,
        gateway: Arc<RecordingGateway>,
        pipeline: ReplyPipeline,
        original: EmailInstance,
    }

    async fn harness(script: Vec<Result<String, LlmError>>, gateway: RecordingGateway) -> Harness {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let setup = db
            .create_campaign(
                &NewCampaign {
                    name: "Launch".into(),
                    ..Default::default()
                },
                &[NewContact {
                    email: "ann@x.com".into(),
                    first_name: Some("Ann".into()),
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
                subject: "Widget for you".into(),
                body_text: "Our widget helps.".into(),
            })
            .await
            .unwrap();
        let original = db.mark_sent(email.id, "m-1", Utc::now()).await.unwrap();

        let llm = Arc::new(ScriptedLlm::new(script));
        let gateway = Arc::new(gateway);
        let generator = Arc::new(ContentGenerator::new(
            llm.clone(),
            CallLimiter::unlimited(),
            GeneratorConfig::default(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(db.clone(), gateway.clone()));
        let pipeline = ReplyPipeline::new(db.clone(), generator, dispatcher);

        Harness {
            db,
            llm,
            gateway,
            pipeline,
            original,
        }
    }

    fn inbound(original_email_id: i64, delivery_id: Option<&str>) -> InboundReply {
        InboundReply {
            original_email_id,
            incoming_text: "Can you send the pricing link?".into(),
            from_email: "ann@x.com".into(),
            delivery_id: delivery_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn simple_reply_is_sent_automatically() {
        let h = harness(
            vec![Ok(SIMPLE.into()), Ok(DRAFT.into())],
            RecordingGateway::default(),
        )
        .await;

        let outcome = h.pipeline.handle(&inbound(h.original.id, None)).await.unwrap();
        assert!(outcome.auto_sent);
        assert!(!outcome.duplicate);
        assert_eq!(outcome.reply.status, EmailStatus::Sent);
        assert!(outcome.reply.is_reply);
        assert_eq!(outcome.reply.parent_email_id, Some(h.original.id));
        assert_eq!(outcome.reply.sequence_step_id, None);
        assert_eq!(outcome.reply.subject, "Re: Widget for you");

        let sent = h.gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ann@x.com");
        assert_eq!(sent[0].correlation_id, outcome.reply.id.to_string());
    }

    #[tokio::test]
    async fn non_simple_reply_waits_for_review() {
        let h = harness(
            vec![Ok(NOT_SIMPLE.into()), Ok(DRAFT.into())],
            RecordingGateway::default(),
        )
        .await;

        let outcome = h.pipeline.handle(&inbound(h.original.id, None)).await.unwrap();
        assert!(!outcome.auto_sent);
        assert_eq!(outcome.reply.status, EmailStatus::AwaitingReview);
        assert!(outcome.reply.body_text.starts_with("Dear Ann,"));
        assert!(h.gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn malformed_classification_never_sends() {
        let h = harness(
            vec![Ok("sure, looks simple!".into()), Ok(DRAFT.into())],
            RecordingGateway::default(),
        )
        .await;

        let outcome = h.pipeline.handle(&inbound(h.original.id, None)).await.unwrap();
        let classification = outcome.classification.unwrap();
        assert!(!classification.is_simple);
        assert_eq!(outcome.reply.status, EmailStatus::AwaitingReview);
        assert!(h.gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn llm_outage_still_drafts_for_review() {
        let h = harness(vec![], RecordingGateway::default()).await;

        let outcome = h.pipeline.handle(&inbound(h.original.id, None)).await.unwrap();
        assert!(!outcome.auto_sent);
        assert_eq!(outcome.reply.status, EmailStatus::AwaitingReview);
        assert!(outcome.reply.body_text.contains("Best regards,\nAlex"));
    }

    #[tokio::test]
    async fn failed_auto_send_keeps_draft_in_review() {
        let h = harness(
            vec![Ok(SIMPLE.into()), Ok(DRAFT.into())],
            RecordingGateway::rejecting(&["ann@x.com"]),
        )
        .await;

        let outcome = h.pipeline.handle(&inbound(h.original.id, None)).await.unwrap();
        assert!(!outcome.auto_sent);
        assert!(outcome.send_error.is_some());
        let stored = h.db.get_email(outcome.reply.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EmailStatus::AwaitingReview);
        assert!(stored.sent_at.is_none());
    }

    #[tokio::test]
    async fn missing_original_aborts_before_drafting() {
        let h = harness(
            vec![Ok(SIMPLE.into()), Ok(DRAFT.into())],
            RecordingGateway::default(),
        )
        .await;

        let err = h.pipeline.handle(&inbound(4242, None)).await.unwrap_err();
        assert!(matches!(err, OutreachError::NotFound { .. }));
        assert_eq!(h.llm.calls(), 0);
        let all = h.db.list_emails(h.original.campaign_id, None).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn repeated_delivery_id_returns_earlier_reply() {
        let h = harness(
            vec![Ok(NOT_SIMPLE.into()), Ok(DRAFT.into())],
            RecordingGateway::default(),
        )
        .await;

        let first = h
            .pipeline
            .handle(&inbound(h.original.id, Some("in-1")))
            .await
            .unwrap();
        let second = h
            .pipeline
            .handle(&inbound(h.original.id, Some("in-1")))
            .await
            .unwrap();

        assert!(second.duplicate);
        assert_eq!(second.reply.id, first.reply.id);
        assert_eq!(h.llm.calls(), 2, "second delivery runs no LLM calls");
    }

    #[tokio::test]
    async fn without_delivery_id_each_call_drafts() {
        let h = harness(
            vec![
                Ok(NOT_SIMPLE.into()),
                Ok(DRAFT.into()),
                Ok(NOT_SIMPLE.into()),
                Ok(DRAFT.into()),
            ],
            RecordingGateway::default(),
        )
        .await;

        let a = h.pipeline.handle(&inbound(h.original.id, None)).await.unwrap();
        let b = h.pipeline.handle(&inbound(h.original.id, None)).await.unwrap();
        assert_ne!(a.reply.id, b.reply.id);
    }

    #[test]
    fn subject_prefix_is_not_doubled() {
        assert_eq!(reply_subject("Hello"), "Re: Hello");
        assert_eq!(reply_subject("RE: Hello"), "RE: Hello");
        assert_eq!(reply_subject(" re: x "), "re: x");
    }
}
