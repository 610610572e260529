//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL,
                first_name TEXT,
                company TEXT,
                role TEXT,
                hobbies TEXT,
                mbti_type TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_contacts_email ON contacts(email);

            CREATE TABLE IF NOT EXISTS campaigns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                product_name TEXT,
                product_description TEXT,
                base_prompt_template TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sequence_steps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                step_number INTEGER NOT NULL,
                offset_days INTEGER NOT NULL DEFAULT 0,
                name TEXT NOT NULL,
                UNIQUE (campaign_id, step_number)
            );

            CREATE TABLE IF NOT EXISTS campaign_contacts (
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                contact_id INTEGER NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
                PRIMARY KEY (campaign_id, contact_id)
            );

            CREATE TABLE IF NOT EXISTS email_instances (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
                contact_id INTEGER NOT NULL REFERENCES contacts(id),
                sequence_step_id INTEGER REFERENCES sequence_steps(id),
                is_reply INTEGER NOT NULL DEFAULT 0,
                parent_email_id INTEGER,
                subject TEXT NOT NULL,
                body_text TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                sent_at TEXT,
                provider_message_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK (is_reply = 0 OR sequence_step_id IS NULL)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_email_instances_root_key
                ON email_instances(campaign_id, contact_id, sequence_step_id)
                WHERE is_reply = 0;
            CREATE INDEX IF NOT EXISTS idx_email_instances_campaign
                ON email_instances(campaign_id, status);
            CREATE INDEX IF NOT EXISTS idx_email_instances_parent
                ON email_instances(parent_email_id);

            CREATE TABLE IF NOT EXISTS email_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email_id INTEGER NOT NULL REFERENCES email_instances(id) ON DELETE CASCADE,
                event_type TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                external_id TEXT UNIQUE,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_email_events_email ON email_events(email_id, event_type);
        "#,
    },
    Migration {
        version: 2,
        name: "reply_deliveries",
        sql: r#"
            CREATE TABLE IF NOT EXISTS reply_deliveries (
                delivery_id TEXT PRIMARY KEY,
                original_email_id INTEGER NOT NULL,
                reply_email_id INTEGER NOT NULL REFERENCES email_instances(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL
            );
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, name: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                libsql::params![name],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        row.get::<i64>(0).unwrap() == 1
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in [
            "contacts",
            "campaigns",
            "sequence_steps",
            "campaign_contacts",
            "email_instances",
            "email_events",
            "reply_deliveries",
        ] {
            assert!(table_exists(&conn, table).await, "missing table {table}");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();
        assert_eq!(get_current_version(&conn).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn migrations_run_on_spawned_tasks() {
        let conn = test_conn().await;
        let version = tokio::spawn(async move {
            run_migrations(&conn).await?;
            get_current_version(&conn).await
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn root_email_key_is_unique() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        conn.execute_batch(
            "INSERT INTO contacts (email, created_at) VALUES ('a@x.com', 'now');
             INSERT INTO campaigns (name, created_at) VALUES ('c', 'now');
             INSERT INTO sequence_steps (campaign_id, step_number, name) VALUES (1, 1, 'Initial');
             INSERT INTO email_instances (campaign_id, contact_id, sequence_step_id, subject, body_text, created_at, updated_at)
                 VALUES (1, 1, 1, 's', 'b', 'now', 'now');",
        )
        .await
        .unwrap();

        let dup = conn
            .execute(
                "INSERT INTO email_instances (campaign_id, contact_id, sequence_step_id, subject, body_text, created_at, updated_at)
                 VALUES (1, 1, 1, 's2', 'b2', 'now', 'now')",
                (),
            )
            .await;
        assert!(dup.is_err());

        // Replies are outside the root key
        conn.execute(
            "INSERT INTO email_instances (campaign_id, contact_id, is_reply, parent_email_id, subject, body_text, created_at, updated_at)
             VALUES (1, 1, 1, 1, 'Re: s', 'b', 'now', 'now')",
            (),
        )
        .await
        .unwrap();
    }
}
