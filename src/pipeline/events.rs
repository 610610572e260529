//! Event ingestion: provider delivery and engagement callbacks.
//!
//! A batch is a JSON array. Each element names an event type and references an
//! email either at the top level (`email_instance_id`) or inside
//! `custom_args`. Elements that cannot be resolved are skipped one by one;
//! everything else is applied in a single transaction.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::gateway::sendgrid::CORRELATION_ARG;
use crate::pipeline::types::{IngestReport, SkipReason};
use crate::store::Database;
use crate::store::model::{EventApplication, EventType, ResolvedEvent};

/// Provider spellings that differ from our event names.
fn event_type_from_provider(name: &str) -> Option<EventType> {
    match name {
        "spamreport" => Some(EventType::Spam),
        "replied" => Some(EventType::Reply),
        other => other.parse().ok(),
    }
}

/// Accepts `7` or `"7"`.
fn id_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn email_reference(item: &Value) -> Option<i64> {
    item.get(CORRELATION_ARG)
        .and_then(id_value)
        .or_else(|| {
            item.get("custom_args")
                .and_then(|args| args.get(CORRELATION_ARG))
                .and_then(id_value)
        })
}

fn external_id(item: &Value) -> Option<String> {
    ["sg_event_id", "event_id"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Turn one raw element into a resolved event plus its provider timestamp.
pub fn resolve_event(item: &Value) -> Result<(ResolvedEvent, i64), SkipReason> {
    if !item.is_object() {
        return Err(SkipReason::NotAnObject);
    }
    let email_id = email_reference(item).ok_or(SkipReason::MissingReference)?;
    let name = item
        .get("event")
        .and_then(Value::as_str)
        .ok_or(SkipReason::MissingEventType)?;
    let event_type = event_type_from_provider(name).ok_or(SkipReason::UnknownEventType)?;
    let timestamp = item.get("timestamp").and_then(Value::as_i64).unwrap_or(0);

    Ok((
        ResolvedEvent {
            email_id,
            event_type,
            external_id: external_id(item),
            metadata: item.clone(),
        },
        timestamp,
    ))
}

pub struct EventIngestor {
    db: Arc<dyn Database>,
}

impl EventIngestor {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Ingest one provider batch.
    ///
    /// Events are applied oldest first by provider timestamp, keeping arrival
    /// order among equal timestamps. Safe to repeat: status changes are
    /// idempotent and events with an external id are recorded once.
    pub async fn ingest(&self, items: &[Value]) -> Result<IngestReport, DatabaseError> {
        let mut report = IngestReport::default();
        let mut resolved = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            match resolve_event(item) {
                Ok(event) => resolved.push(event),
                Err(reason) => {
                    warn!(index, reason = reason.label(), "Skipping provider event");
                    report.skipped += 1;
                }
            }
        }

        // Stable: equal timestamps keep arrival order
        resolved.sort_by_key(|(_, timestamp)| *timestamp);
        let events: Vec<ResolvedEvent> = resolved.into_iter().map(|(event, _)| event).collect();

        let outcomes = self.db.apply_events(&events).await?;

        for (event, outcome) in events.iter().zip(&outcomes) {
            match outcome {
                EventApplication::Applied => report.applied += 1,
                EventApplication::Duplicate => {
                    debug!(email_id = event.email_id, external_id = ?event.external_id, "Duplicate provider event");
                    report.duplicates += 1;
                }
                EventApplication::RejectedTransition => {
                    warn!(
                        email_id = event.email_id,
                        event = %event.event_type,
                        "Event recorded without status change"
                    );
                    report.rejected_transitions += 1;
                }
                EventApplication::MissingEmail => {
                    warn!(
                        email_id = event.email_id,
                        reason = SkipReason::UnknownEmail.label(),
                        "Skipping provider event"
                    );
                    report.skipped += 1;
                }
            }
        }

        info!(
            received = items.len(),
            applied = report.applied,
            duplicates = report.duplicates,
            rejected = report.rejected_transitions,
            skipped = report.skipped,
            "Provider events ingested"
        );
        Ok(report)
    }
}
