//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Reads go straight to the
//! shared connection; every write runs as one transaction while holding the
//! write lock, so units of work never interleave.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Transaction, params};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{
    Campaign, Contact, DEFAULT_STEPS, EmailEngagement, EmailEvent, EmailInstance, EmailStatus,
    EventApplication, EventType, NewCampaign, NewContact, NewReplyEmail, NewRootEmail,
    ResolvedEvent, SequenceStep, StatusCounts,
};
use crate::store::traits::{CampaignSetup, Database, EmailPatch};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Start a unit of work: take the write lock and open a transaction.
    async fn begin(&self) -> Result<(MutexGuard<'_, ()>, Transaction), DatabaseError> {
        let guard = self.write_lock.lock().await;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("begin transaction: {e}")))?;
        Ok((guard, tx))
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(tx: Transaction, result: Result<T, DatabaseError>) -> Result<T, DatabaseError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| DatabaseError::Query(format!("commit: {e}")))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn parse_status(s: &str) -> Result<EmailStatus, DatabaseError> {
    s.parse().map_err(DatabaseError::Serialization)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn row_err(context: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Query(format!("{context}: {e}"))
}

const CONTACT_COLUMNS: &str =
    "id, email, first_name, company, role, hobbies, mbti_type, created_at";

const CAMPAIGN_COLUMNS: &str =
    "id, name, product_name, product_description, base_prompt_template, created_at";

const STEP_COLUMNS: &str = "id, campaign_id, step_number, offset_days, name";

const EMAIL_COLUMNS: &str = "id, campaign_id, contact_id, sequence_step_id, is_reply, parent_email_id, subject, body_text, status, sent_at, provider_message_id, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, email_id, event_type, metadata, external_id, created_at";

fn row_to_contact(row: &libsql::Row) -> Result<Contact, libsql::Error> {
    let created_str: String = row.get(7)?;
    Ok(Contact {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2).ok(),
        company: row.get(3).ok(),
        role: row.get(4).ok(),
        hobbies: row.get(5).ok(),
        mbti_type: row.get(6).ok(),
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_campaign(row: &libsql::Row) -> Result<Campaign, libsql::Error> {
    let created_str: String = row.get(5)?;
    Ok(Campaign {
        id: row.get(0)?,
        name: row.get(1)?,
        product_name: row.get(2).ok(),
        product_description: row.get(3).ok(),
        base_prompt_template: row.get(4).ok(),
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_step(row: &libsql::Row) -> Result<SequenceStep, libsql::Error> {
    Ok(SequenceStep {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        step_number: row.get(2)?,
        offset_days: row.get(3)?,
        name: row.get(4)?,
    })
}

/// Map a libsql Row to an EmailInstance.
///
/// Column order matches EMAIL_COLUMNS.
fn row_to_email(row: &libsql::Row) -> Result<EmailInstance, DatabaseError> {
    let parse = row_err("email row parse");
    let is_reply: i64 = row.get(4).map_err(&parse)?;
    let status_str: String = row.get(8).map_err(&parse)?;
    let sent_at_str: Option<String> = row.get(9).ok();
    let created_str: String = row.get(11).map_err(&parse)?;
    let updated_str: String = row.get(12).map_err(&parse)?;

    Ok(EmailInstance {
        id: row.get(0).map_err(&parse)?,
        campaign_id: row.get(1).map_err(&parse)?,
        contact_id: row.get(2).map_err(&parse)?,
        sequence_step_id: row.get(3).ok(),
        is_reply: is_reply != 0,
        parent_email_id: row.get(5).ok(),
        subject: row.get(6).map_err(&parse)?,
        body_text: row.get(7).map_err(&parse)?,
        status: parse_status(&status_str)?,
        sent_at: parse_optional_datetime(&sent_at_str),
        provider_message_id: row.get(10).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_event(row: &libsql::Row) -> Result<EmailEvent, DatabaseError> {
    let parse = row_err("event row parse");
    let type_str: String = row.get(2).map_err(&parse)?;
    let metadata_str: String = row.get(3).map_err(&parse)?;
    let created_str: String = row.get(5).map_err(&parse)?;

    Ok(EmailEvent {
        id: row.get(0).map_err(&parse)?,
        email_id: row.get(1).map_err(&parse)?,
        event_type: type_str
            .parse::<EventType>()
            .map_err(DatabaseError::Serialization)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Null),
        external_id: row.get(4).ok(),
        created_at: parse_datetime(&created_str),
    })
}

async fn collect_emails(
    mut rows: libsql::Rows,
    context: &str,
) -> Result<Vec<EmailInstance>, DatabaseError> {
    let mut emails = Vec::new();
    while let Some(row) = rows.next().await.map_err(row_err(context))? {
        emails.push(row_to_email(&row)?);
    }
    Ok(emails)
}

async fn collect_contacts(
    mut rows: libsql::Rows,
    context: &str,
) -> Result<Vec<Contact>, DatabaseError> {
    let mut contacts = Vec::new();
    while let Some(row) = rows.next().await.map_err(row_err(context))? {
        contacts.push(row_to_contact(&row).map_err(row_err(context))?);
    }
    Ok(contacts)
}

// ── Statements shared by units of work ──────────────────────────────

async fn fetch_email(conn: &Connection, id: i64) -> Result<Option<EmailInstance>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {EMAIL_COLUMNS} FROM email_instances WHERE id = ?1"),
            params![id],
        )
        .await
        .map_err(row_err("get_email"))?;

    match rows.next().await.map_err(row_err("get_email"))? {
        Some(row) => Ok(Some(row_to_email(&row)?)),
        None => Ok(None),
    }
}

async fn fetch_root_email(
    conn: &Connection,
    campaign_id: i64,
    contact_id: i64,
    sequence_step_id: i64,
) -> Result<Option<EmailInstance>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {EMAIL_COLUMNS} FROM email_instances
                 WHERE campaign_id = ?1 AND contact_id = ?2 AND sequence_step_id = ?3 AND is_reply = 0"
            ),
            params![campaign_id, contact_id, sequence_step_id],
        )
        .await
        .map_err(row_err("find_root_email"))?;

    match rows.next().await.map_err(row_err("find_root_email"))? {
        Some(row) => Ok(Some(row_to_email(&row)?)),
        None => Ok(None),
    }
}

async fn fetch_reply_by_delivery(
    conn: &Connection,
    delivery_id: &str,
) -> Result<Option<EmailInstance>, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT reply_email_id FROM reply_deliveries WHERE delivery_id = ?1",
            params![delivery_id],
        )
        .await
        .map_err(row_err("find_reply_by_delivery"))?;

    match rows.next().await.map_err(row_err("find_reply_by_delivery"))? {
        Some(row) => {
            let reply_id: i64 = row.get(0).map_err(row_err("find_reply_by_delivery"))?;
            fetch_email(conn, reply_id).await
        }
        None => Ok(None),
    }
}

async fn create_campaign_in(
    conn: &Connection,
    new: &NewCampaign,
    contacts: &[NewContact],
) -> Result<CampaignSetup, DatabaseError> {
    let now = Utc::now();
    let now_str = now.to_rfc3339();

    conn.execute(
        "INSERT INTO campaigns (name, product_name, product_description, base_prompt_template, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            new.name.as_str(),
            opt_text(new.product_name.as_deref()),
            opt_text(new.product_description.as_deref()),
            opt_text(new.base_prompt_template.as_deref()),
            now_str.as_str(),
        ],
    )
    .await
    .map_err(row_err("insert campaign"))?;
    let campaign_id = conn.last_insert_rowid();

    let mut steps = Vec::with_capacity(DEFAULT_STEPS.len());
    for &(step_number, offset_days, name) in DEFAULT_STEPS {
        conn.execute(
            "INSERT INTO sequence_steps (campaign_id, step_number, offset_days, name)
             VALUES (?1, ?2, ?3, ?4)",
            params![campaign_id, step_number, offset_days, name],
        )
        .await
        .map_err(row_err("insert sequence step"))?;
        steps.push(SequenceStep {
            id: conn.last_insert_rowid(),
            campaign_id,
            step_number,
            offset_days,
            name: name.to_string(),
        });
    }

    let mut stored = Vec::with_capacity(contacts.len());
    for contact in contacts {
        conn.execute(
            "INSERT INTO contacts (email, first_name, company, role, hobbies, mbti_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                contact.email.as_str(),
                opt_text(contact.first_name.as_deref()),
                opt_text(contact.company.as_deref()),
                opt_text(contact.role.as_deref()),
                opt_text(contact.hobbies.as_deref()),
                opt_text(contact.mbti_type.as_deref()),
                now_str.as_str(),
            ],
        )
        .await
        .map_err(row_err("insert contact"))?;
        let contact_id = conn.last_insert_rowid();

        conn.execute(
            "INSERT INTO campaign_contacts (campaign_id, contact_id) VALUES (?1, ?2)",
            params![campaign_id, contact_id],
        )
        .await
        .map_err(row_err("enroll contact"))?;

        stored.push(Contact {
            id: contact_id,
            email: contact.email.clone(),
            first_name: contact.first_name.clone(),
            company: contact.company.clone(),
            role: contact.role.clone(),
            hobbies: contact.hobbies.clone(),
            mbti_type: contact.mbti_type.clone(),
            created_at: now,
        });
    }

    Ok(CampaignSetup {
        campaign: Campaign {
            id: campaign_id,
            name: new.name.clone(),
            product_name: new.product_name.clone(),
            product_description: new.product_description.clone(),
            base_prompt_template: new.base_prompt_template.clone(),
            created_at: now,
        },
        steps,
        contacts: stored,
    })
}

async fn insert_root_in(
    conn: &Connection,
    email: &NewRootEmail,
) -> Result<(EmailInstance, bool), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    let inserted = conn
        .execute(
            "INSERT INTO email_instances (campaign_id, contact_id, sequence_step_id, is_reply,
                subject, body_text, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?5, 'draft', ?6, ?6)
             ON CONFLICT DO NOTHING",
            params![
                email.campaign_id,
                email.contact_id,
                email.sequence_step_id,
                email.subject.as_str(),
                email.body_text.as_str(),
                now,
            ],
        )
        .await
        .map_err(row_err("insert_root_email"))?;

    let stored = fetch_root_email(conn, email.campaign_id, email.contact_id, email.sequence_step_id)
        .await?
        .ok_or_else(|| {
            DatabaseError::Constraint(format!(
                "root email for campaign {} contact {} step {} vanished after insert",
                email.campaign_id, email.contact_id, email.sequence_step_id
            ))
        })?;
    Ok((stored, inserted > 0))
}

async fn delete_root_emails_in(conn: &Connection, campaign_id: i64) -> Result<usize, DatabaseError> {
    conn.execute(
        "DELETE FROM email_events WHERE email_id IN
            (SELECT id FROM email_instances WHERE campaign_id = ?1 AND is_reply = 0)",
        params![campaign_id],
    )
    .await
    .map_err(row_err("delete root email events"))?;

    let deleted = conn
        .execute(
            "DELETE FROM email_instances WHERE campaign_id = ?1 AND is_reply = 0",
            params![campaign_id],
        )
        .await
        .map_err(row_err("delete_root_emails"))?;
    Ok(deleted as usize)
}

async fn insert_reply_in(
    conn: &Connection,
    reply: &NewReplyEmail,
) -> Result<(EmailInstance, bool), DatabaseError> {
    if let Some(delivery_id) = reply.delivery_id.as_deref()
        && let Some(existing) = fetch_reply_by_delivery(conn, delivery_id).await?
    {
        return Ok((existing, false));
    }

    let parent = fetch_email(conn, reply.parent_email_id)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "email".into(),
            id: reply.parent_email_id.to_string(),
        })?;

    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO email_instances (campaign_id, contact_id, sequence_step_id, is_reply,
            parent_email_id, subject, body_text, status, created_at, updated_at)
         VALUES (?1, ?2, NULL, 1, ?3, ?4, ?5, 'awaiting_review', ?6, ?6)",
        params![
            parent.campaign_id,
            parent.contact_id,
            parent.id,
            reply.subject.as_str(),
            reply.body_text.as_str(),
            now.as_str(),
        ],
    )
    .await
    .map_err(row_err("insert_reply_email"))?;
    let reply_id = conn.last_insert_rowid();

    if let Some(delivery_id) = reply.delivery_id.as_deref() {
        conn.execute(
            "INSERT INTO reply_deliveries (delivery_id, original_email_id, reply_email_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![delivery_id, parent.id, reply_id, now.as_str()],
        )
        .await
        .map_err(row_err("record reply delivery"))?;
    }

    let stored = fetch_email(conn, reply_id)
        .await?
        .ok_or_else(|| DatabaseError::Constraint(format!("reply {reply_id} vanished after insert")))?;
    Ok((stored, true))
}

async fn mark_sent_in(
    conn: &Connection,
    id: i64,
    provider_message_id: &str,
    sent_at: DateTime<Utc>,
) -> Result<EmailInstance, DatabaseError> {
    let sent_at_str = sent_at.to_rfc3339();
    let updated = conn
        .execute(
            "UPDATE email_instances
             SET status = 'sent', sent_at = ?1, provider_message_id = ?2, updated_at = ?1
             WHERE id = ?3 AND status IN ('draft', 'awaiting_review', 'queued')",
            params![sent_at_str.as_str(), provider_message_id, id],
        )
        .await
        .map_err(row_err("mark_sent"))?;

    if updated == 0 {
        return match fetch_email(conn, id).await? {
            Some(email) => Err(DatabaseError::Constraint(format!(
                "email {id} is {}, not sendable",
                email.status
            ))),
            None => Err(DatabaseError::NotFound {
                entity: "email".into(),
                id: id.to_string(),
            }),
        };
    }

    let metadata = serde_json::json!({ "provider_message_id": provider_message_id });
    conn.execute(
        "INSERT INTO email_events (email_id, event_type, metadata, created_at)
         VALUES (?1, 'sent', ?2, ?3)",
        params![id, metadata.to_string(), sent_at_str.as_str()],
    )
    .await
    .map_err(row_err("record sent event"))?;

    fetch_email(conn, id).await?.ok_or_else(|| DatabaseError::NotFound {
        entity: "email".into(),
        id: id.to_string(),
    })
}

async fn update_review_in(
    conn: &Connection,
    id: i64,
    expected: EmailStatus,
    patch: &EmailPatch,
) -> Result<Option<EmailInstance>, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    let updated = conn
        .execute(
            "UPDATE email_instances
             SET subject = COALESCE(?1, subject),
                 body_text = COALESCE(?2, body_text),
                 status = COALESCE(?3, status),
                 updated_at = ?4
             WHERE id = ?5 AND status = ?6",
            params![
                opt_text(patch.subject.as_deref()),
                opt_text(patch.body_text.as_deref()),
                opt_text(patch.status.as_ref().map(EmailStatus::as_str)),
                now,
                id,
                expected.as_str(),
            ],
        )
        .await
        .map_err(row_err("update_email_review"))?;

    match fetch_email(conn, id).await? {
        Some(email) if updated > 0 => Ok(Some(email)),
        Some(_) => Ok(None),
        None => Err(DatabaseError::NotFound {
            entity: "email".into(),
            id: id.to_string(),
        }),
    }
}

async fn apply_event_in(
    conn: &Connection,
    event: &ResolvedEvent,
    now: &str,
) -> Result<EventApplication, DatabaseError> {
    let Some(email) = fetch_email(conn, event.email_id).await? else {
        return Ok(EventApplication::MissingEmail);
    };

    let inserted = conn
        .execute(
            "INSERT INTO email_events (email_id, event_type, metadata, external_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT DO NOTHING",
            params![
                event.email_id,
                event.event_type.as_str(),
                event.metadata.to_string(),
                opt_text(event.external_id.as_deref()),
                now,
            ],
        )
        .await
        .map_err(row_err("insert email event"))?;
    if inserted == 0 {
        return Ok(EventApplication::Duplicate);
    }

    let Some(target) = event.event_type.target_status() else {
        return Ok(EventApplication::Applied);
    };
    if email.status == target {
        return Ok(EventApplication::Applied);
    }
    if !email.status.can_transition_to(target) {
        return Ok(EventApplication::RejectedTransition);
    }

    conn.execute(
        "UPDATE email_instances SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![target.as_str(), now, email.id],
    )
    .await
    .map_err(row_err("apply event transition"))?;
    debug!(email_id = email.id, from = %email.status, to = %target, "Email status updated");
    Ok(EventApplication::Applied)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Setup ───────────────────────────────────────────────────────

    async fn create_campaign(
        &self,
        campaign: &NewCampaign,
        contacts: &[NewContact],
    ) -> Result<CampaignSetup, DatabaseError> {
        let (_guard, tx) = self.begin().await?;
        let result = create_campaign_in(&tx, campaign, contacts).await;
        let setup = finish(tx, result).await?;
        info!(
            campaign_id = setup.campaign.id,
            contacts = setup.contacts.len(),
            steps = setup.steps.len(),
            "Campaign created"
        );
        Ok(setup)
    }

    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(row_err("get_campaign"))?;

        match rows.next().await.map_err(row_err("get_campaign"))? {
            Some(row) => Ok(Some(row_to_campaign(&row).map_err(row_err("get_campaign"))?)),
            None => Ok(None),
        }
    }

    async fn get_contact(&self, id: i64) -> Result<Option<Contact>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(row_err("get_contact"))?;
        Ok(collect_contacts(rows, "get_contact").await?.into_iter().next())
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY id ASC"),
                (),
            )
            .await
            .map_err(row_err("list_contacts"))?;
        collect_contacts(rows, "list_contacts").await
    }

    async fn list_campaign_contacts(
        &self,
        campaign_id: i64,
        only: Option<&[i64]>,
    ) -> Result<Vec<Contact>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "SELECT c.id, c.email, c.first_name, c.company, c.role, c.hobbies, c.mbti_type, c.created_at
                 FROM contacts c
                 JOIN campaign_contacts cc ON cc.contact_id = c.id
                 WHERE cc.campaign_id = ?1
                 ORDER BY c.id ASC",
                params![campaign_id],
            )
            .await
            .map_err(row_err("list_campaign_contacts"))?;

        let mut contacts = collect_contacts(rows, "list_campaign_contacts").await?;
        if let Some(ids) = only {
            contacts.retain(|c| ids.contains(&c.id));
        }
        Ok(contacts)
    }

    async fn list_steps(&self, campaign_id: i64) -> Result<Vec<SequenceStep>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {STEP_COLUMNS} FROM sequence_steps WHERE campaign_id = ?1 ORDER BY step_number ASC"
                ),
                params![campaign_id],
            )
            .await
            .map_err(row_err("list_steps"))?;

        let mut steps = Vec::new();
        while let Some(row) = rows.next().await.map_err(row_err("list_steps"))? {
            steps.push(row_to_step(&row).map_err(row_err("list_steps"))?);
        }
        Ok(steps)
    }

    async fn get_step_by_number(
        &self,
        campaign_id: i64,
        step_number: i64,
    ) -> Result<Option<SequenceStep>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {STEP_COLUMNS} FROM sequence_steps WHERE campaign_id = ?1 AND step_number = ?2"
                ),
                params![campaign_id, step_number],
            )
            .await
            .map_err(row_err("get_step_by_number"))?;

        match rows.next().await.map_err(row_err("get_step_by_number"))? {
            Some(row) => Ok(Some(row_to_step(&row).map_err(row_err("get_step_by_number"))?)),
            None => Ok(None),
        }
    }

    // ── Emails ──────────────────────────────────────────────────────

    async fn get_email(&self, id: i64) -> Result<Option<EmailInstance>, DatabaseError> {
        fetch_email(self.conn(), id).await
    }

    async fn find_root_email(
        &self,
        campaign_id: i64,
        contact_id: i64,
        sequence_step_id: i64,
    ) -> Result<Option<EmailInstance>, DatabaseError> {
        fetch_root_email(self.conn(), campaign_id, contact_id, sequence_step_id).await
    }

    async fn insert_root_email(
        &self,
        email: &NewRootEmail,
    ) -> Result<(EmailInstance, bool), DatabaseError> {
        let (_guard, tx) = self.begin().await?;
        let result = insert_root_in(&tx, email).await;
        let (stored, created) = finish(tx, result).await?;
        debug!(
            email_id = stored.id,
            campaign_id = stored.campaign_id,
            contact_id = stored.contact_id,
            created,
            "Root email stored"
        );
        Ok((stored, created))
    }

    async fn delete_root_emails(&self, campaign_id: i64) -> Result<usize, DatabaseError> {
        let (_guard, tx) = self.begin().await?;
        let result = delete_root_emails_in(&tx, campaign_id).await;
        let deleted = finish(tx, result).await?;
        info!(campaign_id, deleted, "Deleted root emails for regeneration");
        Ok(deleted)
    }

    async fn insert_reply_email(
        &self,
        reply: &NewReplyEmail,
    ) -> Result<(EmailInstance, bool), DatabaseError> {
        let (_guard, tx) = self.begin().await?;
        let result = insert_reply_in(&tx, reply).await;
        let (stored, created) = finish(tx, result).await?;
        debug!(
            email_id = stored.id,
            parent_email_id = reply.parent_email_id,
            created,
            "Reply email stored"
        );
        Ok((stored, created))
    }

    async fn find_reply_by_delivery(
        &self,
        delivery_id: &str,
    ) -> Result<Option<EmailInstance>, DatabaseError> {
        fetch_reply_by_delivery(self.conn(), delivery_id).await
    }

    async fn list_emails(
        &self,
        campaign_id: i64,
        status: Option<EmailStatus>,
    ) -> Result<Vec<EmailInstance>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM email_instances
                     WHERE campaign_id = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY id DESC"
                ),
                params![
                    campaign_id,
                    opt_text(status.as_ref().map(EmailStatus::as_str))
                ],
            )
            .await
            .map_err(row_err("list_emails"))?;
        collect_emails(rows, "list_emails").await
    }

    async fn list_sendable_step_emails(
        &self,
        campaign_id: i64,
        sequence_step_id: i64,
    ) -> Result<Vec<EmailInstance>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM email_instances
                     WHERE campaign_id = ?1 AND sequence_step_id = ?2 AND is_reply = 0
                       AND status IN ('draft', 'awaiting_review')
                     ORDER BY id ASC"
                ),
                params![campaign_id, sequence_step_id],
            )
            .await
            .map_err(row_err("list_sendable_step_emails"))?;
        collect_emails(rows, "list_sendable_step_emails").await
    }

    async fn mark_sent(
        &self,
        id: i64,
        provider_message_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<EmailInstance, DatabaseError> {
        let (_guard, tx) = self.begin().await?;
        let result = mark_sent_in(&tx, id, provider_message_id, sent_at).await;
        let email = finish(tx, result).await?;
        debug!(email_id = id, provider_message_id, "Email marked sent");
        Ok(email)
    }

    async fn update_email_review(
        &self,
        id: i64,
        expected: EmailStatus,
        patch: &EmailPatch,
    ) -> Result<Option<EmailInstance>, DatabaseError> {
        let (_guard, tx) = self.begin().await?;
        let result = update_review_in(&tx, id, expected, patch).await;
        finish(tx, result).await
    }

    // ── Events ──────────────────────────────────────────────────────

    async fn apply_events(
        &self,
        events: &[ResolvedEvent],
    ) -> Result<Vec<EventApplication>, DatabaseError> {
        let (_guard, tx) = self.begin().await?;
        let now = Utc::now().to_rfc3339();
        let result = async {
            let mut outcomes = Vec::with_capacity(events.len());
            for event in events {
                outcomes.push(apply_event_in(&tx, event, &now).await?);
            }
            Ok(outcomes)
        }
        .await;
        finish(tx, result).await
    }

    async fn list_events(&self, email_id: i64) -> Result<Vec<EmailEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EVENT_COLUMNS} FROM email_events WHERE email_id = ?1 ORDER BY id ASC"),
                params![email_id],
            )
            .await
            .map_err(row_err("list_events"))?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await.map_err(row_err("list_events"))? {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }

    // ── Summary ─────────────────────────────────────────────────────

    async fn status_counts(&self, campaign_id: i64) -> Result<StatusCounts, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT status, COUNT(*) FROM email_instances WHERE campaign_id = ?1 GROUP BY status",
                params![campaign_id],
            )
            .await
            .map_err(row_err("status_counts"))?;

        let mut counts = StatusCounts::default();
        while let Some(row) = rows.next().await.map_err(row_err("status_counts"))? {
            let status_str: String = row.get(0).map_err(row_err("status_counts"))?;
            let count: i64 = row.get(1).map_err(row_err("status_counts"))?;
            counts.add(parse_status(&status_str)?, count);
        }
        Ok(counts)
    }

    async fn sent_engagement(
        &self,
        campaign_id: i64,
    ) -> Result<Vec<EmailEngagement>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT e.id, e.subject, c.email, COALESCE(c.first_name, ''), e.status, e.sent_at,
                    (SELECT COUNT(*) FROM email_events v WHERE v.email_id = e.id AND v.event_type = 'open'),
                    (SELECT COUNT(*) FROM email_events v WHERE v.email_id = e.id AND v.event_type = 'click'),
                    (SELECT COUNT(*) FROM email_events v WHERE v.email_id = e.id AND v.event_type IN ('bounce', 'spam'))
                 FROM email_instances e
                 JOIN contacts c ON c.id = e.contact_id
                 WHERE e.campaign_id = ?1 AND e.sent_at IS NOT NULL
                 ORDER BY e.sent_at DESC, e.id DESC",
                params![campaign_id],
            )
            .await
            .map_err(row_err("sent_engagement"))?;

        let parse = row_err("sent_engagement");
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(&parse)? {
            let status_str: String = row.get(4).map_err(&parse)?;
            let sent_at_str: Option<String> = row.get(5).ok();
            let bounces: i64 = row.get(8).map_err(&parse)?;
            out.push(EmailEngagement {
                id: row.get(0).map_err(&parse)?,
                subject: row.get(1).map_err(&parse)?,
                recipient_email: row.get(2).map_err(&parse)?,
                recipient_name: row.get(3).map_err(&parse)?,
                status: parse_status(&status_str)?,
                sent_at: parse_optional_datetime(&sent_at_str),
                open_count: row.get(6).map_err(&parse)?,
                click_count: row.get(7).map_err(&parse)?,
                bounce: bounces > 0,
            });
        }
        Ok(out)
    }
}
