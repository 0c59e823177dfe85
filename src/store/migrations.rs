//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `init_schema()` checks
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
        name: "ledger_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS tickets (
                ticket_id TEXT PRIMARY KEY,
                period TEXT NOT NULL,
                is_open INTEGER NOT NULL DEFAULT 1,
                contact_id TEXT NOT NULL,
                last_message_id TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_tickets_contact ON tickets(contact_id);

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                contact_id TEXT NOT NULL,
                contact_number TEXT NOT NULL,
                period TEXT NOT NULL,
                status INTEGER NOT NULL,
                ticket_id TEXT NOT NULL REFERENCES tickets(ticket_id),
                message_type TEXT NOT NULL,
                is_from_me INTEGER NOT NULL DEFAULT 0,
                text TEXT NOT NULL,
                retries INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (contact_id, message_id)
            );
            CREATE INDEX IF NOT EXISTS idx_messages_message_id ON messages(message_id);
            CREATE INDEX IF NOT EXISTS idx_messages_ticket ON messages(ticket_id);

            CREATE TABLE IF NOT EXISTS controls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticket_id TEXT NOT NULL REFERENCES tickets(ticket_id),
                pendencies INTEGER NOT NULL DEFAULT 0,
                contact_number TEXT NOT NULL,
                contact_id TEXT NOT NULL,
                period TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                client_needs_help INTEGER NOT NULL DEFAULT 0,
                retries INTEGER NOT NULL DEFAULT 1,
                check_count INTEGER NOT NULL DEFAULT 0,
                UNIQUE (contact_id, period)
            );
            CREATE INDEX IF NOT EXISTS idx_controls_status ON controls(status);
        "#,
    },
    Migration {
        version: 2,
        name: "ticket_links",
        sql: r#"
            CREATE TABLE IF NOT EXISTS ticket_links (
                control_id INTEGER PRIMARY KEY REFERENCES controls(id),
                last_ticket_id TEXT REFERENCES tickets(ticket_id)
            );

            CREATE TABLE IF NOT EXISTS ticket_link_tickets (
                control_id INTEGER NOT NULL REFERENCES ticket_links(control_id),
                ticket_id TEXT NOT NULL REFERENCES tickets(ticket_id),
                added_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (control_id, ticket_id)
            );
        "#,
    },
    Migration {
        version: 3,
        name: "das_groupings",
        sql: r#"
            CREATE TABLE IF NOT EXISTS das_groupings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                contact_id TEXT NOT NULL,
                period TEXT NOT NULL,
                was_sent INTEGER NOT NULL DEFAULT 0,
                UNIQUE (contact_id, period)
            );
            CREATE INDEX IF NOT EXISTS idx_das_groupings_sent ON das_groupings(was_sent);

            CREATE TABLE IF NOT EXISTS das_grouping_documents (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                grouping_id INTEGER NOT NULL REFERENCES das_groupings(id),
                cnpj TEXT NOT NULL,
                company_name TEXT NOT NULL,
                pdf TEXT NOT NULL,
                UNIQUE (grouping_id, cnpj)
            );
        "#,
    },
];

/// Create the version table and apply every migration newer than the
/// recorded version.
pub async fn init_schema(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("create _migrations: {e}")))?;

    let current = get_current_version(conn).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.sql).await.map_err(|e| {
            DatabaseError::Migration(format!(
                "V{} ({}) failed: {e}",
                migration.version, migration.name
            ))
        })?;
        seed_version(conn, migration.version, migration.name).await?;
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applied migration"
        );
    }

    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("read version: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(format!("read version: {e}"))),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Migration(format!("read version: {e}"))),
    }
}

async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("record V{version}: {e}")))?;
    Ok(())
}
