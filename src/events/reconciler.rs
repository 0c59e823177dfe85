//! Event reconciler — applies webhook events to the ledger exactly once.
//!
//! Events may arrive duplicated and in any order. Before touching a message
//! the reconciler checks once whether it exists on the platform and locally,
//! then routes to either the create or the update handler. Neither handler
//! calls the other.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::FixedOffset;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{DatabaseError, FlowError};
use crate::events::payload::{Envelope, Event, MessagePayload, TicketPayload};
use crate::ledger::{ControlKey, Message, MessageStatus, NewControl, Period, Ticket};
use crate::scheduler::{Action, ActionQueue};
use crate::store::Lookup;
use crate::upstream::{ChatPlatform, Directory, RemoteMessage};

/// What happened to one inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Applied(String),
    Ignored(String),
    Stale(String),
    Failed(String),
}

impl Outcome {
    pub fn detail(&self) -> &str {
        match self {
            Outcome::Applied(d) | Outcome::Ignored(d) | Outcome::Stale(d) | Outcome::Failed(d) => d,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageEventKind {
    Created,
    Updated,
}

/// Where a message currently exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    /// Known to the platform and already sent.
    pub remote: bool,
    /// Stored in the ledger.
    pub local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePath {
    Create,
    Update,
}

/// Pick the handler for a message event given where the message exists.
pub fn route(kind: MessageEventKind, presence: Presence) -> MessagePath {
    match kind {
        MessageEventKind::Created if presence.remote && presence.local => MessagePath::Update,
        MessageEventKind::Created => MessagePath::Create,
        MessageEventKind::Updated if presence.remote && !presence.local => MessagePath::Create,
        MessageEventKind::Updated => MessagePath::Update,
    }
}

pub struct Reconciler {
    lookup: Lookup,
    chat: Arc<dyn ChatPlatform>,
    directory: Arc<dyn Directory>,
    queue: ActionQueue,
    ignored_ids: HashSet<String>,
    offset: FixedOffset,
}

impl Reconciler {
    pub fn new(
        lookup: Lookup,
        chat: Arc<dyn ChatPlatform>,
        directory: Arc<dyn Directory>,
        queue: ActionQueue,
        ignored_ids: HashSet<String>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            lookup,
            chat,
            directory,
            queue,
            ignored_ids,
            offset,
        }
    }

    /// Apply one envelope. Never fails: every error becomes an `Outcome`.
    pub async fn handle(&self, envelope: Envelope) -> Outcome {
        let name = envelope.event.clone();
        let result = match Event::parse(envelope) {
            Ok(Event::MessageCreated(p)) => self.message_event(MessageEventKind::Created, p).await,
            Ok(Event::MessageUpdated(p)) => self.message_event(MessageEventKind::Updated, p).await,
            Ok(Event::TicketCreated(p)) => self.ticket_created(p).await,
            Ok(Event::TicketUpdated(p)) => self.ticket_updated(p).await,
            Ok(Event::TicketTypedMessage) => Ok(Outcome::Ignored(
                "message.created with ticket type dropped".into(),
            )),
            Ok(Event::Unknown(event)) => {
                debug!(event = %event, "Unhandled event");
                Ok(Outcome::Ignored(format!("event {event} is not handled")))
            }
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(FlowError::Duplicate(id)) => Outcome::Applied(format!("{id} already stored")),
            Err(e @ FlowError::NotFound { .. }) => {
                info!(event = %name, error = %e, "Nothing to reconcile yet");
                Outcome::Ignored(e.to_string())
            }
            Err(e @ FlowError::UpstreamBug(_)) => {
                warn!(event = %name, error = %e, "Inconsistent upstream event dropped");
                Outcome::Ignored(e.to_string())
            }
            Err(e @ FlowError::Validation(_)) => {
                warn!(event = %name, error = %e, "Event rejected");
                Outcome::Failed(e.to_string())
            }
            Err(e) => {
                error!(event = %name, error = %e, "Event failed");
                Outcome::Failed(e.to_string())
            }
        };

        debug!(event = %name, outcome = ?outcome, "Event handled");
        outcome
    }

    fn period(&self) -> Period {
        Period::current(self.offset)
    }

    fn is_ignored(&self, id: &str) -> bool {
        self.ignored_ids.contains(id)
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn message_event(
        &self,
        kind: MessageEventKind,
        payload: MessagePayload,
    ) -> Result<Outcome, FlowError> {
        let remote = match self.chat.fetch_message(&payload.id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(message_id = %payload.id, error = %e, "Could not check message on platform");
                None
            }
        };
        let presence = Presence {
            remote: remote.as_ref().is_some_and(|m| m.sent),
            local: self.lookup.db().get_message(&payload.id).await?.is_some(),
        };

        match route(kind, presence) {
            MessagePath::Create => self.create_message(payload, remote).await,
            MessagePath::Update => {
                self.update_message(payload, kind == MessageEventKind::Created)
                    .await
            }
        }
    }

    async fn create_message(
        &self,
        payload: MessagePayload,
        remote: Option<RemoteMessage>,
    ) -> Result<Outcome, FlowError> {
        let contact_id = payload
            .contact_id
            .clone()
            .ok_or_else(|| FlowError::Validation(format!("message {} has no contactId", payload.id)))?;

        if self.is_ignored(&contact_id) {
            return Ok(Outcome::Ignored(format!("contact {contact_id} is ignored")));
        }

        let ticket_id = payload
            .ticket_id
            .clone()
            .or_else(|| remote.and_then(|m| m.ticket_id))
            .ok_or_else(|| {
                FlowError::UpstreamBug(format!("message {} has no ticket", payload.id))
            })?;

        let contact_number = self.contact_number(&contact_id).await?;

        if self.lookup.ticket(&ticket_id).await?.is_none() {
            return Err(FlowError::UpstreamBug(format!(
                "message {} references unknown ticket {ticket_id}",
                payload.id
            )));
        }

        let period = self.period();
        let message = Message {
            message_id: payload.id.clone(),
            contact_id: contact_id.clone(),
            contact_number,
            period,
            status: payload.status()?.unwrap_or(MessageStatus::Created),
            ticket_id: ticket_id.clone(),
            message_type: payload.message_type().to_string(),
            is_from_me: payload.is_from_me,
            text: payload.stored_text(),
            retries: 0,
        };

        match self.lookup.db().insert_message(&message).await {
            Ok(()) => {}
            Err(DatabaseError::Constraint(_)) => {
                return Err(FlowError::Duplicate(format!("message {}", payload.id)));
            }
            Err(e) => return Err(e.into()),
        }

        self.lookup
            .db()
            .advance_ticket_last_message(&ticket_id, &message.message_id)
            .await?;

        if !message.is_from_me {
            self.queue.enqueue(Action::CheckResponse {
                control: ControlKey::new(contact_id.clone(), period),
            });
        }
        self.queue.enqueue(Action::RefreshTicket {
            ticket_id: ticket_id.clone(),
        });

        info!(
            message_id = %message.message_id,
            ticket_id = %ticket_id,
            contact_id = %contact_id,
            from_me = message.is_from_me,
            "Message stored"
        );
        Ok(Outcome::Applied(format!("message {} stored", message.message_id)))
    }

    /// `redirected` is set when a repeated create landed here.
    async fn update_message(
        &self,
        payload: MessagePayload,
        redirected: bool,
    ) -> Result<Outcome, FlowError> {
        let status = match payload.status()? {
            Some(status) => status,
            None if redirected => {
                return Ok(Outcome::Stale(format!("message {} already stored", payload.id)));
            }
            None => {
                return Err(FlowError::Validation(format!(
                    "message.updated for {} has no ack",
                    payload.id
                )));
            }
        };

        let stored = self
            .lookup
            .message(&payload.id)
            .await?
            .ok_or_else(|| FlowError::not_found("message", &payload.id))?;

        if self
            .lookup
            .db()
            .advance_message_status(&payload.id, status)
            .await?
        {
            debug!(message_id = %payload.id, status = ?status, "Message status advanced");
            return Ok(Outcome::Applied(format!(
                "message {} status {:?}",
                payload.id, status
            )));
        }

        Ok(Outcome::Stale(format!(
            "status {:?} is not above stored {:?} for message {}",
            status, stored.status, payload.id
        )))
    }

    // ── Tickets ─────────────────────────────────────────────────────

    async fn ticket_created(&self, payload: TicketPayload) -> Result<Outcome, FlowError> {
        let contact_id = payload
            .contact_id
            .clone()
            .ok_or_else(|| FlowError::Validation(format!("ticket {} has no contactId", payload.id)))?;

        if self.is_ignored(&payload.id) || self.is_ignored(&contact_id) {
            return Ok(Outcome::Ignored(format!("ticket {} is ignored", payload.id)));
        }

        let period = self.period();
        let (ticket, created) = self
            .lookup
            .db()
            .get_or_create_ticket(&Ticket {
                ticket_id: payload.id.clone(),
                period,
                is_open: true,
                contact_id: contact_id.clone(),
                last_message_id: payload.last_message_id().map(str::to_string),
            })
            .await?;
        if created {
            info!(ticket_id = %ticket.ticket_id, contact_id = %contact_id, "Ticket stored");
        }

        let control = match self.lookup.control(&contact_id, period).await? {
            Some(control) => control,
            None => {
                let contact_number = self.contact_number(&contact_id).await?;
                let (control, created) = self
                    .lookup
                    .db()
                    .get_or_create_control(&NewControl {
                        ticket_id: ticket.ticket_id.clone(),
                        contact_number,
                        contact_id: contact_id.clone(),
                        period,
                    })
                    .await?;
                if created {
                    return Ok(Outcome::Applied(format!(
                        "ticket {} and control created",
                        ticket.ticket_id
                    )));
                }
                control
            }
        };

        if control.ticket_id == ticket.ticket_id {
            return Ok(Outcome::Applied(format!(
                "ticket {} already tracked",
                ticket.ticket_id
            )));
        }

        let linked = self
            .lookup
            .db()
            .append_linked_ticket(control.id, &ticket.ticket_id)
            .await?;
        Ok(Outcome::Applied(if linked {
            format!("ticket {} linked to control {}", ticket.ticket_id, control.id)
        } else {
            format!("ticket {} already linked", ticket.ticket_id)
        }))
    }

    async fn ticket_updated(&self, payload: TicketPayload) -> Result<Outcome, FlowError> {
        if self.is_ignored(&payload.id) {
            return Ok(Outcome::Ignored(format!("ticket {} is ignored", payload.id)));
        }
        if payload.is_open != Some(false) {
            return Ok(Outcome::Ignored(format!("ticket {} not closed", payload.id)));
        }

        // A close can overtake the create of the same ticket.
        let ticket = self.lookup.await_ticket(&payload.id).await?;
        if !ticket.is_open {
            return Ok(Outcome::Ignored(format!("ticket {} already closed", payload.id)));
        }

        let db = self.lookup.db();
        db.set_ticket_open(&payload.id, false).await?;
        if let Some(last) = payload.last_message_id() {
            db.advance_ticket_last_message(&payload.id, last).await?;
        }

        info!(ticket_id = %payload.id, "Ticket closed");
        Ok(Outcome::Applied(format!("ticket {} closed", payload.id)))
    }

    async fn contact_number(&self, contact_id: &str) -> Result<String, FlowError> {
        let contact = self
            .directory
            .contact_by_chat_id(contact_id)
            .await
            .map_err(|e| {
                FlowError::Validation(format!("phone lookup for contact {contact_id} failed: {e}"))
            })?;
        contact.phone().ok_or_else(|| {
            FlowError::Validation(format!("contact {contact_id} has no phone number"))
        })
    }
}
