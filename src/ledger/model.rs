//! Ledger records: tickets, messages, controls and ticket links.

use std::collections::BTreeSet;

use serde::Serialize;

use super::period::Period;

/// Delivery lifecycle of a message. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum MessageStatus {
    Created = 0,
    Sent = 1,
    Delivered = 2,
    Visualized = 3,
}

impl MessageStatus {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(MessageStatus::Created),
            1 => Some(MessageStatus::Sent),
            2 => Some(MessageStatus::Delivered),
            3 => Some(MessageStatus::Visualized),
            _ => None,
        }
    }
}

/// One upstream conversation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub ticket_id: String,
    pub period: Period,
    pub is_open: bool,
    pub contact_id: String,
    pub last_message_id: Option<String>,
}

/// A message observed on a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_id: String,
    pub contact_id: String,
    pub contact_number: String,
    pub period: Period,
    pub status: MessageStatus,
    pub ticket_id: String,
    pub message_type: String,
    /// Sent by the operator side rather than the customer.
    pub is_from_me: bool,
    pub text: String,
    pub retries: i64,
}

/// Workflow status of a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    AwaitingResponse = 0,
    Closed = 1,
}

impl ControlStatus {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Self {
        if value == 1 {
            ControlStatus::Closed
        } else {
            ControlStatus::AwaitingResponse
        }
    }
}

/// Per (contact, period) workflow state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Control {
    pub id: i64,
    pub ticket_id: String,
    pub pendencies: bool,
    pub contact_number: String,
    pub contact_id: String,
    #[serde(serialize_with = "serialize_period")]
    pub period: Period,
    pub status: ControlStatus,
    pub client_needs_help: bool,
    pub retries: i64,
    pub check_count: i64,
}

impl Control {
    pub fn key(&self) -> ControlKey {
        ControlKey {
            contact_id: self.contact_id.clone(),
            period: self.period,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == ControlStatus::Closed
    }

    /// The ticket the conversation currently lives on.
    pub fn active_ticket_id<'a>(&'a self, link: Option<&'a TicketLink>) -> &'a str {
        link.and_then(|l| l.last_ticket.as_deref())
            .unwrap_or(&self.ticket_id)
    }
}

/// Identity of a control: one per contact and period.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ControlKey {
    pub contact_id: String,
    pub period: Period,
}

impl ControlKey {
    pub fn new(contact_id: impl Into<String>, period: Period) -> Self {
        Self {
            contact_id: contact_id.into(),
            period,
        }
    }
}

/// Fields needed to open a control.
#[derive(Debug, Clone)]
pub struct NewControl {
    pub ticket_id: String,
    pub contact_number: String,
    pub contact_id: String,
    pub period: Period,
}

/// Tickets a control was reopened on, plus the most recent one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketLink {
    pub control_id: i64,
    pub additional_tickets: BTreeSet<String>,
    pub last_ticket: Option<String>,
}

/// A document waiting to be sent with the rest of a contact's batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedDocument {
    pub cnpj: String,
    pub company_name: String,
    /// Base64 PDF.
    pub pdf: String,
}

/// Documents of every company one contact answers for, sent together once
/// per period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DasGrouping {
    pub id: i64,
    pub contact_id: String,
    pub period: Period,
    pub was_sent: bool,
    /// One entry per CNPJ, in the order they were added.
    pub documents: Vec<GroupedDocument>,
}

impl DasGrouping {
    pub fn cnpjs(&self) -> impl Iterator<Item = &str> {
        self.documents.iter().map(|d| d.cnpj.as_str())
    }
}

fn serialize_period<S: serde::Serializer>(period: &Period, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(period)
}
