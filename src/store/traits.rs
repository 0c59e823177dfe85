//! `Database` trait — single async interface for all ledger persistence.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::ledger::{
    Control, ControlStatus, DasGrouping, GroupedDocument, Message, MessageStatus, NewControl,
    Period, Ticket, TicketLink,
};

/// Backend-agnostic store for tickets, messages, controls and ticket links.
///
/// Every mutation is a single statement against the current row, so callers
/// never write back values they read earlier.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Tickets ─────────────────────────────────────────────────────

    async fn get_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>, DatabaseError>;

    /// Insert the ticket unless one with the same id exists.
    /// Returns the stored ticket and whether it was created by this call.
    async fn get_or_create_ticket(&self, ticket: &Ticket) -> Result<(Ticket, bool), DatabaseError>;

    /// Returns `true` if the stored flag changed.
    async fn set_ticket_open(&self, ticket_id: &str, is_open: bool) -> Result<bool, DatabaseError>;

    /// Point the ticket at `message_id` unless that message is locally known
    /// to be older than the one already recorded. Returns `true` on change.
    async fn advance_ticket_last_message(
        &self,
        ticket_id: &str,
        message_id: &str,
    ) -> Result<bool, DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    async fn get_message(&self, message_id: &str) -> Result<Option<Message>, DatabaseError>;

    /// Insert a message. A second insert of the same (contact, message) pair
    /// fails with `DatabaseError::Constraint`.
    async fn insert_message(&self, message: &Message) -> Result<(), DatabaseError>;

    /// Compare-and-set: raise the status only if it is strictly greater than
    /// the stored one. Returns `true` if the row changed.
    async fn advance_message_status(
        &self,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<bool, DatabaseError>;

    // ── Controls ────────────────────────────────────────────────────

    async fn get_control(
        &self,
        contact_id: &str,
        period: &str,
    ) -> Result<Option<Control>, DatabaseError>;

    async fn get_or_create_control(
        &self,
        control: &NewControl,
    ) -> Result<(Control, bool), DatabaseError>;

    async fn list_controls_by_status(
        &self,
        status: ControlStatus,
    ) -> Result<Vec<Control>, DatabaseError>;

    async fn set_control_status(
        &self,
        control_id: i64,
        status: ControlStatus,
    ) -> Result<(), DatabaseError>;

    async fn set_client_needs_help(&self, control_id: i64, value: bool)
    -> Result<(), DatabaseError>;

    async fn set_pendencies(&self, control_id: i64, value: bool) -> Result<(), DatabaseError>;

    /// Atomically add one retry. Returns the new count.
    async fn increment_retries(&self, control_id: i64) -> Result<i64, DatabaseError>;

    /// Atomically add one audit check. Returns the new count.
    async fn increment_check_count(&self, control_id: i64) -> Result<i64, DatabaseError>;

    // ── Ticket links ────────────────────────────────────────────────

    async fn get_ticket_link(&self, control_id: i64) -> Result<Option<TicketLink>, DatabaseError>;

    /// Attach a reopened ticket to a control, creating the link on first use.
    /// Re-appending a known ticket is a no-op. Returns `true` if added.
    async fn append_linked_ticket(
        &self,
        control_id: i64,
        ticket_id: &str,
    ) -> Result<bool, DatabaseError>;

    // ── DAS groupings ───────────────────────────────────────────────

    async fn get_grouping(&self, grouping_id: i64) -> Result<Option<DasGrouping>, DatabaseError>;

    /// The contact's grouping for the period, created empty on first use.
    async fn get_or_create_grouping(
        &self,
        contact_id: &str,
        period: Period,
    ) -> Result<(DasGrouping, bool), DatabaseError>;

    /// Add a company's document. A CNPJ already in the grouping is kept as
    /// is. Returns `true` if added.
    async fn add_grouped_document(
        &self,
        grouping_id: i64,
        document: &GroupedDocument,
    ) -> Result<bool, DatabaseError>;

    async fn list_unsent_groupings(&self) -> Result<Vec<DasGrouping>, DatabaseError>;

    /// Compare-and-set `was_sent` from false to true. Returns `true` if this
    /// call flipped it.
    async fn mark_grouping_sent(&self, grouping_id: i64) -> Result<bool, DatabaseError>;
}
