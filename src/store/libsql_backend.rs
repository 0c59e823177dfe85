//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Status guards and counters
//! are expressed in SQL so concurrent handlers never overwrite each other
//! with stale reads.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::ledger::{
    Control, ControlStatus, DasGrouping, GroupedDocument, Message, MessageStatus, NewControl,
    Period, Ticket, TicketLink,
};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
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

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
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

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Attach the stored documents to a grouping header.
    async fn load_documents(&self, mut grouping: DasGrouping) -> Result<DasGrouping, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT cnpj, company_name, pdf FROM das_grouping_documents
                 WHERE grouping_id = ?1 ORDER BY seq",
                params![grouping.id],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("load_documents", e))?;

        while let Ok(Some(row)) = rows.next().await {
            match row_to_document(&row) {
                Ok(document) => grouping.documents.push(document),
                Err(e) => tracing::warn!("Skipping grouped document row: {e}"),
            }
        }
        Ok(grouping)
    }

    /// Run a query expected to yield at most one row and map it.
    async fn query_one<T>(
        &self,
        context: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
        map: fn(&libsql::Row) -> Result<T, libsql::Error>,
    ) -> Result<Option<T>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::from_libsql(context, e))?;

        match rows.next().await {
            Ok(Some(row)) => map(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("{context}: row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::from_libsql(context, e)),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn parse_period(s: &str) -> Result<Period, libsql::Error> {
    Period::parse(s).ok_or_else(|| libsql::Error::InvalidColumnType)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const TICKET_COLUMNS: &str = "ticket_id, period, is_open, contact_id, last_message_id";

const MESSAGE_COLUMNS: &str = "message_id, contact_id, contact_number, period, status, ticket_id, message_type, is_from_me, text, retries";

const CONTROL_COLUMNS: &str = "id, ticket_id, pendencies, contact_number, contact_id, period, status, client_needs_help, retries, check_count";

const GROUPING_COLUMNS: &str = "id, contact_id, period, was_sent";

/// Column order matches TICKET_COLUMNS.
fn row_to_ticket(row: &libsql::Row) -> Result<Ticket, libsql::Error> {
    let period: String = row.get(1)?;
    Ok(Ticket {
        ticket_id: row.get(0)?,
        period: parse_period(&period)?,
        is_open: row.get::<i64>(2)? != 0,
        contact_id: row.get(3)?,
        last_message_id: row.get::<String>(4).ok(),
    })
}

/// Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<Message, libsql::Error> {
    let period: String = row.get(3)?;
    let status: i64 = row.get(4)?;
    Ok(Message {
        message_id: row.get(0)?,
        contact_id: row.get(1)?,
        contact_number: row.get(2)?,
        period: parse_period(&period)?,
        status: MessageStatus::from_i64(status).ok_or(libsql::Error::InvalidColumnType)?,
        ticket_id: row.get(5)?,
        message_type: row.get(6)?,
        is_from_me: row.get::<i64>(7)? != 0,
        text: row.get(8)?,
        retries: row.get(9)?,
    })
}

/// Column order matches CONTROL_COLUMNS.
fn row_to_control(row: &libsql::Row) -> Result<Control, libsql::Error> {
    let period: String = row.get(5)?;
    Ok(Control {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        pendencies: row.get::<i64>(2)? != 0,
        contact_number: row.get(3)?,
        contact_id: row.get(4)?,
        period: parse_period(&period)?,
        status: ControlStatus::from_i64(row.get(6)?),
        client_needs_help: row.get::<i64>(7)? != 0,
        retries: row.get(8)?,
        check_count: row.get(9)?,
    })
}

/// Column order matches GROUPING_COLUMNS. Documents are loaded separately.
fn row_to_grouping(row: &libsql::Row) -> Result<DasGrouping, libsql::Error> {
    let period: String = row.get(2)?;
    Ok(DasGrouping {
        id: row.get(0)?,
        contact_id: row.get(1)?,
        period: parse_period(&period)?,
        was_sent: row.get::<i64>(3)? != 0,
        documents: Vec::new(),
    })
}

fn row_to_document(row: &libsql::Row) -> Result<GroupedDocument, libsql::Error> {
    Ok(GroupedDocument {
        cnpj: row.get(0)?,
        company_name: row.get(1)?,
        pdf: row.get(2)?,
    })
}

fn row_to_count(row: &libsql::Row) -> Result<i64, libsql::Error> {
    row.get(0)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::init_schema(self.conn()).await
    }

    // ── Tickets ─────────────────────────────────────────────────────

    async fn get_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>, DatabaseError> {
        self.query_one(
            "get_ticket",
            &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE ticket_id = ?1"),
            params![ticket_id],
            row_to_ticket,
        )
        .await
    }

    async fn get_or_create_ticket(&self, ticket: &Ticket) -> Result<(Ticket, bool), DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO tickets (ticket_id, period, is_open, contact_id, last_message_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (ticket_id) DO NOTHING",
                params![
                    ticket.ticket_id.as_str(),
                    ticket.period.to_string(),
                    ticket.is_open as i64,
                    ticket.contact_id.as_str(),
                    opt_text(ticket.last_message_id.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("get_or_create_ticket", e))?;

        let stored = self
            .get_ticket(&ticket.ticket_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "ticket".into(),
                id: ticket.ticket_id.clone(),
            })?;

        if inserted > 0 {
            debug!(ticket_id = %ticket.ticket_id, "Ticket inserted into DB");
        }
        Ok((stored, inserted > 0))
    }

    async fn set_ticket_open(&self, ticket_id: &str, is_open: bool) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE tickets SET is_open = ?2 WHERE ticket_id = ?1 AND is_open <> ?2",
                params![ticket_id, is_open as i64],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("set_ticket_open", e))?;
        Ok(changed > 0)
    }

    async fn advance_ticket_last_message(
        &self,
        ticket_id: &str,
        message_id: &str,
    ) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE tickets SET last_message_id = ?2
                 WHERE ticket_id = ?1
                   AND (last_message_id IS NULL OR last_message_id <> ?2)
                   AND NOT EXISTS (
                       SELECT 1 FROM messages incoming, messages held
                       WHERE incoming.message_id = ?2
                         AND held.message_id = tickets.last_message_id
                         AND incoming.seq < held.seq
                   )",
                params![ticket_id, message_id],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("advance_ticket_last_message", e))?;

        if changed > 0 {
            debug!(ticket_id, message_id, "Ticket last message advanced");
        }
        Ok(changed > 0)
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>, DatabaseError> {
        self.query_one(
            "get_message",
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1 ORDER BY seq LIMIT 1"),
            params![message_id],
            row_to_message,
        )
        .await
    }

    async fn insert_message(&self, message: &Message) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO messages (message_id, contact_id, contact_number, period, status,
                    ticket_id, message_type, is_from_me, text, retries)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    message.message_id.as_str(),
                    message.contact_id.as_str(),
                    message.contact_number.as_str(),
                    message.period.to_string(),
                    message.status.as_i64(),
                    message.ticket_id.as_str(),
                    message.message_type.as_str(),
                    message.is_from_me as i64,
                    message.text.as_str(),
                    message.retries,
                ],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("insert_message", e))?;

        debug!(message_id = %message.message_id, "Message inserted into DB");
        Ok(())
    }

    async fn advance_message_status(
        &self,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE messages SET status = ?2 WHERE message_id = ?1 AND status < ?2",
                params![message_id, status.as_i64()],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("advance_message_status", e))?;
        Ok(changed > 0)
    }

    // ── Controls ────────────────────────────────────────────────────

    async fn get_control(
        &self,
        contact_id: &str,
        period: &str,
    ) -> Result<Option<Control>, DatabaseError> {
        self.query_one(
            "get_control",
            &format!("SELECT {CONTROL_COLUMNS} FROM controls WHERE contact_id = ?1 AND period = ?2"),
            params![contact_id, period],
            row_to_control,
        )
        .await
    }

    async fn get_or_create_control(
        &self,
        control: &NewControl,
    ) -> Result<(Control, bool), DatabaseError> {
        let period = control.period.to_string();
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO controls (ticket_id, contact_number, contact_id, period)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (contact_id, period) DO NOTHING",
                params![
                    control.ticket_id.as_str(),
                    control.contact_number.as_str(),
                    control.contact_id.as_str(),
                    period.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("get_or_create_control", e))?;

        let stored = self
            .get_control(&control.contact_id, &period)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "control".into(),
                id: format!("{}@{}", control.contact_id, period),
            })?;

        if inserted > 0 {
            info!(contact_id = %control.contact_id, period = %period, "Control opened");
        }
        Ok((stored, inserted > 0))
    }

    async fn list_controls_by_status(
        &self,
        status: ControlStatus,
    ) -> Result<Vec<Control>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONTROL_COLUMNS} FROM controls WHERE status = ?1 ORDER BY id"),
                params![status.as_i64()],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("list_controls_by_status", e))?;

        let mut controls = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_control(&row) {
                Ok(control) => controls.push(control),
                Err(e) => {
                    tracing::warn!("Skipping control row: {e}");
                }
            }
        }
        Ok(controls)
    }

    async fn set_control_status(
        &self,
        control_id: i64,
        status: ControlStatus,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE controls SET status = ?2 WHERE id = ?1",
                params![control_id, status.as_i64()],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("set_control_status", e))?;
        debug!(control_id, status = ?status, "Control status updated");
        Ok(())
    }

    async fn set_client_needs_help(
        &self,
        control_id: i64,
        value: bool,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE controls SET client_needs_help = ?2 WHERE id = ?1",
                params![control_id, value as i64],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("set_client_needs_help", e))?;
        Ok(())
    }

    async fn set_pendencies(&self, control_id: i64, value: bool) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE controls SET pendencies = ?2 WHERE id = ?1",
                params![control_id, value as i64],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("set_pendencies", e))?;
        Ok(())
    }

    async fn increment_retries(&self, control_id: i64) -> Result<i64, DatabaseError> {
        self.query_one(
            "increment_retries",
            "UPDATE controls SET retries = retries + 1 WHERE id = ?1 RETURNING retries",
            params![control_id],
            row_to_count,
        )
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "control".into(),
            id: control_id.to_string(),
        })
    }

    async fn increment_check_count(&self, control_id: i64) -> Result<i64, DatabaseError> {
        self.query_one(
            "increment_check_count",
            "UPDATE controls SET check_count = check_count + 1 WHERE id = ?1 RETURNING check_count",
            params![control_id],
            row_to_count,
        )
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "control".into(),
            id: control_id.to_string(),
        })
    }

    // ── Ticket links ────────────────────────────────────────────────

    async fn get_ticket_link(&self, control_id: i64) -> Result<Option<TicketLink>, DatabaseError> {
        let last_ticket = self
            .query_one(
                "get_ticket_link",
                "SELECT last_ticket_id FROM ticket_links WHERE control_id = ?1",
                params![control_id],
                |row| Ok(row.get::<String>(0).ok()),
            )
            .await?;

        let Some(last_ticket) = last_ticket else {
            return Ok(None);
        };

        let mut rows = self
            .conn()
            .query(
                "SELECT ticket_id FROM ticket_link_tickets WHERE control_id = ?1",
                params![control_id],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("get_ticket_link", e))?;

        let mut additional_tickets = BTreeSet::new();
        while let Ok(Some(row)) = rows.next().await {
            match row.get::<String>(0) {
                Ok(id) => {
                    additional_tickets.insert(id);
                }
                Err(e) => tracing::warn!("Skipping ticket link row: {e}"),
            }
        }

        Ok(Some(TicketLink {
            control_id,
            additional_tickets,
            last_ticket,
        }))
    }

    async fn append_linked_ticket(
        &self,
        control_id: i64,
        ticket_id: &str,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO ticket_links (control_id) VALUES (?1) ON CONFLICT (control_id) DO NOTHING",
            params![control_id],
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("append_linked_ticket", e))?;

        let added = conn
            .execute(
                "INSERT INTO ticket_link_tickets (control_id, ticket_id) VALUES (?1, ?2)
                 ON CONFLICT (control_id, ticket_id) DO NOTHING",
                params![control_id, ticket_id],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("append_linked_ticket", e))?;

        if added == 0 {
            return Ok(false);
        }

        conn.execute(
            "UPDATE ticket_links SET last_ticket_id = ?2 WHERE control_id = ?1",
            params![control_id, ticket_id],
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("append_linked_ticket", e))?;

        info!(control_id, ticket_id, "Reopened ticket linked to control");
        Ok(true)
    }

    // ── DAS groupings ───────────────────────────────────────────────

    async fn get_grouping(&self, grouping_id: i64) -> Result<Option<DasGrouping>, DatabaseError> {
        let header = self
            .query_one(
                "get_grouping",
                &format!("SELECT {GROUPING_COLUMNS} FROM das_groupings WHERE id = ?1"),
                params![grouping_id],
                row_to_grouping,
            )
            .await?;
        match header {
            Some(grouping) => self.load_documents(grouping).await.map(Some),
            None => Ok(None),
        }
    }

    async fn get_or_create_grouping(
        &self,
        contact_id: &str,
        period: Period,
    ) -> Result<(DasGrouping, bool), DatabaseError> {
        let period = period.to_string();
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO das_groupings (contact_id, period) VALUES (?1, ?2)
                 ON CONFLICT (contact_id, period) DO NOTHING",
                params![contact_id, period.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("get_or_create_grouping", e))?;

        let header = self
            .query_one(
                "get_or_create_grouping",
                &format!(
                    "SELECT {GROUPING_COLUMNS} FROM das_groupings WHERE contact_id = ?1 AND period = ?2"
                ),
                params![contact_id, period.as_str()],
                row_to_grouping,
            )
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "das grouping".into(),
                id: format!("{contact_id}@{period}"),
            })?;

        if inserted > 0 {
            info!(contact_id, period = %period, "DAS grouping opened");
        }
        Ok((self.load_documents(header).await?, inserted > 0))
    }

    async fn add_grouped_document(
        &self,
        grouping_id: i64,
        document: &GroupedDocument,
    ) -> Result<bool, DatabaseError> {
        let added = self
            .conn()
            .execute(
                "INSERT INTO das_grouping_documents (grouping_id, cnpj, company_name, pdf)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (grouping_id, cnpj) DO NOTHING",
                params![
                    grouping_id,
                    document.cnpj.as_str(),
                    document.company_name.as_str(),
                    document.pdf.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("add_grouped_document", e))?;

        if added > 0 {
            debug!(grouping_id, cnpj = %document.cnpj, "Document added to grouping");
        }
        Ok(added > 0)
    }

    async fn list_unsent_groupings(&self) -> Result<Vec<DasGrouping>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {GROUPING_COLUMNS} FROM das_groupings WHERE was_sent = 0 ORDER BY id"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("list_unsent_groupings", e))?;

        let mut headers = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_grouping(&row) {
                Ok(grouping) => headers.push(grouping),
                Err(e) => tracing::warn!("Skipping grouping row: {e}"),
            }
        }

        let mut groupings = Vec::with_capacity(headers.len());
        for header in headers {
            groupings.push(self.load_documents(header).await?);
        }
        Ok(groupings)
    }

    async fn mark_grouping_sent(&self, grouping_id: i64) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE das_groupings SET was_sent = 1 WHERE id = ?1 AND was_sent = 0",
                params![grouping_id],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("mark_grouping_sent", e))?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn period() -> Period {
        Period::containing(NaiveDate::from_ymd_opt(2026, 3, 10).unwrap())
    }

    fn make_ticket(id: &str) -> Ticket {
        Ticket {
            ticket_id: id.into(),
            period: period(),
            is_open: true,
            contact_id: "contact-1".into(),
            last_message_id: None,
        }
    }

    fn make_message(id: &str, ticket_id: &str, status: MessageStatus) -> Message {
        Message {
            message_id: id.into(),
            contact_id: "contact-1".into(),
            contact_number: "5588999990000".into(),
            period: period(),
            status,
            ticket_id: ticket_id.into(),
            message_type: "chat".into(),
            is_from_me: false,
            text: "sim".into(),
            retries: 0,
        }
    }

    async fn make_control(db: &LibSqlBackend, ticket_id: &str) -> Control {
        db.get_or_create_ticket(&make_ticket(ticket_id)).await.unwrap();
        let (control, _) = db
            .get_or_create_control(&NewControl {
                ticket_id: ticket_id.into(),
                contact_number: "5588999990000".into(),
                contact_id: "contact-1".into(),
                period: period(),
            })
            .await
            .unwrap();
        control
    }

    // ── Ticket tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn get_or_create_ticket_is_idempotent() {
        let db = test_db().await;
        let (first, created) = db.get_or_create_ticket(&make_ticket("t-1")).await.unwrap();
        assert!(created);
        assert!(first.is_open);

        let mut replay = make_ticket("t-1");
        replay.is_open = false;
        let (second, created) = db.get_or_create_ticket(&replay).await.unwrap();
        assert!(!created);
        assert!(second.is_open, "replay must not overwrite the stored row");
    }

    #[tokio::test]
    async fn get_ticket_not_found() {
        let db = test_db().await;
        assert!(db.get_ticket("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_ticket_open_reports_change() {
        let db = test_db().await;
        db.get_or_create_ticket(&make_ticket("t-1")).await.unwrap();
        assert!(db.set_ticket_open("t-1", false).await.unwrap());
        assert!(!db.set_ticket_open("t-1", false).await.unwrap());
        assert!(!db.get_ticket("t-1").await.unwrap().unwrap().is_open);
    }

    #[tokio::test]
    async fn last_message_never_regresses() {
        let db = test_db().await;
        db.get_or_create_ticket(&make_ticket("t-1")).await.unwrap();
        db.insert_message(&make_message("m-old", "t-1", MessageStatus::Sent))
            .await
            .unwrap();
        db.insert_message(&make_message("m-new", "t-1", MessageStatus::Sent))
            .await
            .unwrap();

        assert!(db.advance_ticket_last_message("t-1", "m-new").await.unwrap());
        assert!(!db.advance_ticket_last_message("t-1", "m-old").await.unwrap());
        assert!(!db.advance_ticket_last_message("t-1", "m-new").await.unwrap());

        let ticket = db.get_ticket("t-1").await.unwrap().unwrap();
        assert_eq!(ticket.last_message_id.as_deref(), Some("m-new"));
    }

    #[tokio::test]
    async fn last_message_accepts_unknown_message() {
        let db = test_db().await;
        db.get_or_create_ticket(&make_ticket("t-1")).await.unwrap();
        db.insert_message(&make_message("m-1", "t-1", MessageStatus::Sent))
            .await
            .unwrap();
        db.advance_ticket_last_message("t-1", "m-1").await.unwrap();

        // Not ingested yet, so it cannot be proven older.
        assert!(db.advance_ticket_last_message("t-1", "m-2").await.unwrap());
    }

    // ── Message tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_get_message() {
        let db = test_db().await;
        db.get_or_create_ticket(&make_ticket("t-1")).await.unwrap();
        let message = make_message("m-1", "t-1", MessageStatus::Sent);
        db.insert_message(&message).await.unwrap();

        let loaded = db.get_message("m-1").await.unwrap().unwrap();
        assert_eq!(loaded, message);
    }

    #[tokio::test]
    async fn duplicate_message_is_constraint_error() {
        let db = test_db().await;
        db.get_or_create_ticket(&make_ticket("t-1")).await.unwrap();
        let message = make_message("m-1", "t-1", MessageStatus::Sent);
        db.insert_message(&message).await.unwrap();

        let result = db.insert_message(&message).await;
        assert!(matches!(result, Err(DatabaseError::Constraint(_))));
    }

    #[tokio::test]
    async fn status_only_moves_forward() {
        let db = test_db().await;
        db.get_or_create_ticket(&make_ticket("t-1")).await.unwrap();
        db.insert_message(&make_message("m-1", "t-1", MessageStatus::Created))
            .await
            .unwrap();

        assert!(db
            .advance_message_status("m-1", MessageStatus::Delivered)
            .await
            .unwrap());
        assert!(!db
            .advance_message_status("m-1", MessageStatus::Sent)
            .await
            .unwrap());
        assert!(!db
            .advance_message_status("m-1", MessageStatus::Delivered)
            .await
            .unwrap());
        assert!(db
            .advance_message_status("m-1", MessageStatus::Visualized)
            .await
            .unwrap());

        let loaded = db.get_message("m-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Visualized);
    }

    // ── Control tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn control_defaults() {
        let db = test_db().await;
        let control = make_control(&db, "t-1").await;
        assert_eq!(control.status, ControlStatus::AwaitingResponse);
        assert_eq!(control.retries, 1);
        assert_eq!(control.check_count, 0);
        assert!(!control.pendencies);
        assert!(!control.client_needs_help);
    }

    #[tokio::test]
    async fn one_control_per_contact_and_period() {
        let db = test_db().await;
        let first = make_control(&db, "t-1").await;
        db.get_or_create_ticket(&make_ticket("t-2")).await.unwrap();
        let (second, created) = db
            .get_or_create_control(&NewControl {
                ticket_id: "t-2".into(),
                contact_number: "5588999990000".into(),
                contact_id: "contact-1".into(),
                period: period(),
            })
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.ticket_id, "t-1");
    }

    #[tokio::test]
    async fn counters_are_atomic_increments() {
        let db = test_db().await;
        let control = make_control(&db, "t-1").await;
        assert_eq!(db.increment_retries(control.id).await.unwrap(), 2);
        assert_eq!(db.increment_retries(control.id).await.unwrap(), 3);
        assert_eq!(db.increment_check_count(control.id).await.unwrap(), 1);
        assert!(db.increment_retries(9999).await.is_err());
    }

    #[tokio::test]
    async fn flags_and_status_updates() {
        let db = test_db().await;
        let control = make_control(&db, "t-1").await;
        db.set_control_status(control.id, ControlStatus::Closed)
            .await
            .unwrap();
        db.set_client_needs_help(control.id, true).await.unwrap();
        db.set_pendencies(control.id, true).await.unwrap();

        let loaded = db
            .get_control("contact-1", &period().to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, ControlStatus::Closed);
        assert!(loaded.client_needs_help);
        assert!(loaded.pendencies);

        let awaiting = db
            .list_controls_by_status(ControlStatus::AwaitingResponse)
            .await
            .unwrap();
        assert!(awaiting.is_empty());
        let closed = db
            .list_controls_by_status(ControlStatus::Closed)
            .await
            .unwrap();
        assert_eq!(closed.len(), 1);
    }

    // ── Ticket link tests ───────────────────────────────────────────

    #[tokio::test]
    async fn ticket_link_created_lazily() {
        let db = test_db().await;
        let control = make_control(&db, "t-1").await;
        assert!(db.get_ticket_link(control.id).await.unwrap().is_none());

        db.get_or_create_ticket(&make_ticket("t-2")).await.unwrap();
        assert!(db.append_linked_ticket(control.id, "t-2").await.unwrap());

        let link = db.get_ticket_link(control.id).await.unwrap().unwrap();
        assert_eq!(link.last_ticket.as_deref(), Some("t-2"));
        assert_eq!(link.additional_tickets.len(), 1);
    }

    #[tokio::test]
    async fn append_same_ticket_twice_is_noop() {
        let db = test_db().await;
        let control = make_control(&db, "t-1").await;
        db.get_or_create_ticket(&make_ticket("t-2")).await.unwrap();
        db.get_or_create_ticket(&make_ticket("t-3")).await.unwrap();

        assert!(db.append_linked_ticket(control.id, "t-2").await.unwrap());
        assert!(db.append_linked_ticket(control.id, "t-3").await.unwrap());
        assert!(!db.append_linked_ticket(control.id, "t-2").await.unwrap());

        let link = db.get_ticket_link(control.id).await.unwrap().unwrap();
        assert_eq!(link.additional_tickets.len(), 2);
        assert_eq!(link.last_ticket.as_deref(), Some("t-3"));
    }

    // ── DAS grouping tests ──────────────────────────────────────────

    fn document(cnpj: &str, name: &str) -> GroupedDocument {
        GroupedDocument {
            cnpj: cnpj.into(),
            company_name: name.into(),
            pdf: "JVBERi0xLjQK".into(),
        }
    }

    #[tokio::test]
    async fn grouping_is_one_per_contact_and_period() {
        let db = test_db().await;
        let (first, created) = db.get_or_create_grouping("contact-1", period()).await.unwrap();
        assert!(created);
        assert!(!first.was_sent);
        assert!(first.documents.is_empty());

        let (again, created) = db.get_or_create_grouping("contact-1", period()).await.unwrap();
        assert!(!created);
        assert_eq!(again.id, first.id);

        let (other, created) = db
            .get_or_create_grouping("contact-1", period().previous())
            .await
            .unwrap();
        assert!(created);
        assert_ne!(other.id, first.id);
    }

    #[tokio::test]
    async fn grouped_cnpj_is_kept_once() {
        let db = test_db().await;
        let (grouping, _) = db.get_or_create_grouping("contact-1", period()).await.unwrap();

        assert!(db.add_grouped_document(grouping.id, &document("111", "Padaria")).await.unwrap());
        assert!(db.add_grouped_document(grouping.id, &document("222", "Oficina")).await.unwrap());
        assert!(!db.add_grouped_document(grouping.id, &document("111", "Renamed")).await.unwrap());

        let stored = db.get_grouping(grouping.id).await.unwrap().unwrap();
        assert_eq!(stored.cnpjs().collect::<Vec<_>>(), vec!["111", "222"]);
        assert_eq!(stored.documents[0].company_name, "Padaria");
    }

    #[tokio::test]
    async fn unsent_groupings_and_send_flag() {
        let db = test_db().await;
        let (a, _) = db.get_or_create_grouping("contact-1", period()).await.unwrap();
        let (b, _) = db.get_or_create_grouping("contact-2", period()).await.unwrap();
        db.add_grouped_document(b.id, &document("333", "Mercado")).await.unwrap();

        let unsent = db.list_unsent_groupings().await.unwrap();
        assert_eq!(unsent.iter().map(|g| g.id).collect::<Vec<_>>(), vec![a.id, b.id]);
        assert_eq!(unsent[1].documents.len(), 1);

        assert!(db.mark_grouping_sent(a.id).await.unwrap());
        assert!(!db.mark_grouping_sent(a.id).await.unwrap());
        assert!(db.get_grouping(a.id).await.unwrap().unwrap().was_sent);

        let unsent = db.list_unsent_groupings().await.unwrap();
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].id, b.id);
        assert!(db.get_grouping(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_local_file_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("ledger.db");
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(path.exists());
        drop(db);
    }
}
