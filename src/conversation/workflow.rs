//! Conversation workflow — reads control state, runs the decision procedure
//! and executes deferred actions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::FixedOffset;
use tracing::{debug, info, warn};

use super::classifier::{MatchMode, is_clear_positive};
use super::machine::{self, Decision, Effect, Inputs};
use super::texts::{self, TransferReason};
use crate::error::FlowError;
use crate::events::payload::real_message_id;
use crate::ledger::{Control, ControlKey, ControlStatus, Message, Period, Ticket};
use crate::scheduler::{Action, ActionHandler, ActionQueue};
use crate::store::Lookup;
use crate::upstream::{ChatPlatform, Directory, OutboundMessage};

/// Delay between confirming a control and closing its ticket.
pub const CLOSE_AFTER_CONFIRM: Duration = Duration::from_secs(30);

const PROTOCOL_UNAVAILABLE: &str = "indisponível";

pub struct Workflow {
    pub(super) lookup: Lookup,
    pub(super) chat: Arc<dyn ChatPlatform>,
    pub(super) directory: Arc<dyn Directory>,
    pub(super) queue: ActionQueue,
    pub(super) ops_channel: Option<String>,
    pub(super) offset: FixedOffset,
}

impl Workflow {
    pub fn new(
        lookup: Lookup,
        chat: Arc<dyn ChatPlatform>,
        directory: Arc<dyn Directory>,
        queue: ActionQueue,
        ops_channel: Option<String>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            lookup,
            chat,
            directory,
            queue,
            ops_channel,
            offset,
        }
    }

    pub fn period(&self) -> Period {
        Period::current(self.offset)
    }

    // ── State reads ─────────────────────────────────────────────────

    pub(super) async fn control(&self, key: &ControlKey) -> Result<Control, FlowError> {
        self.lookup
            .control(&key.contact_id, key.period)
            .await?
            .ok_or_else(|| FlowError::not_found("control", &key.contact_id))
    }

    /// The ticket the conversation currently lives on.
    pub(super) async fn active_ticket(&self, control: &Control) -> Result<Ticket, FlowError> {
        let link = self.lookup.ticket_link(control.id).await?;
        let ticket_id = control.active_ticket_id(link.as_ref());
        self.lookup
            .ticket(ticket_id)
            .await?
            .ok_or_else(|| FlowError::not_found("ticket", ticket_id))
    }

    pub(super) async fn last_message(&self, ticket: &Ticket) -> Result<Option<Message>, FlowError> {
        let Some(message_id) = real_message_id(ticket.last_message_id.as_deref()) else {
            return Ok(None);
        };
        self.lookup
            .message(message_id)
            .await?
            .map(Some)
            .ok_or_else(|| FlowError::not_found("message", message_id))
    }

    // ── Response check ──────────────────────────────────────────────

    /// Evaluate the latest customer reply on the control's active ticket.
    pub async fn check_response(&self, key: &ControlKey) -> Result<String, FlowError> {
        let control = self.control(key).await?;
        let ticket = self.active_ticket(&control).await?;

        let Some(message) = self.last_message(&ticket).await? else {
            return Ok("no messages on ticket yet".into());
        };
        if message.is_from_me {
            return Ok("awaiting customer reply".into());
        }

        let db = self.lookup.db();
        let mut client_needs_help = control.client_needs_help;
        match control.status {
            ControlStatus::AwaitingResponse => {
                let retries = db.increment_retries(control.id).await?;
                debug!(contact_id = %key.contact_id, retries, "Retry counted");
            }
            ControlStatus::Closed => {
                if is_clear_positive(&message.text, MatchMode::Fuzzy) && !client_needs_help {
                    db.set_client_needs_help(control.id, true).await?;
                    client_needs_help = true;
                }
            }
        }

        let decision = machine::decide(&Inputs {
            text: &message.text,
            retries: control.retries,
            pendencies: control.pendencies,
            mode: MatchMode::Fuzzy,
            chat_confirmed: control.is_confirmed(),
            ticket_closed: !ticket.is_open,
            client_needs_help,
        });

        info!(
            contact_id = %key.contact_id,
            rule = ?decision.rule,
            retries = control.retries,
            "Reply evaluated"
        );
        self.apply(key, &decision).await?;
        Ok(decision.rule.outcome().to_string())
    }

    /// Run a decision's effects: texts go out now, the rest is queued.
    pub async fn apply(&self, key: &ControlKey, decision: &Decision) -> Result<(), FlowError> {
        for effect in &decision.effects {
            match effect {
                Effect::SendText(text) => {
                    self.chat
                        .send_message(&OutboundMessage::text(&key.contact_id, text))
                        .await?;
                }
                Effect::Confirm => self.queue.enqueue(Action::ConfirmControl {
                    control: key.clone(),
                    close_ticket: true,
                }),
                Effect::SetClientNeedsHelp(value) => {
                    self.queue.enqueue(Action::SetClientNeedsHelp {
                        control: key.clone(),
                        value: *value,
                    })
                }
                Effect::Transfer(reason) => self.queue.enqueue(Action::TransferTicket {
                    control: key.clone(),
                    reason: *reason,
                }),
                Effect::CloseTicketAfter {
                    delay,
                    expect_needs_help,
                } => self.queue.schedule(
                    Action::CloseTicket {
                        control: key.clone(),
                        expect_needs_help: *expect_needs_help,
                    },
                    *delay,
                ),
            }
        }
        Ok(())
    }

    // ── Deferred actions ────────────────────────────────────────────

    /// Mark the control closed, optionally closing the ticket shortly after.
    pub async fn confirm(&self, control: &Control, close_ticket: bool) -> Result<(), FlowError> {
        self.lookup
            .db()
            .set_control_status(control.id, ControlStatus::Closed)
            .await?;
        if close_ticket {
            self.queue.schedule(
                Action::CloseTicket {
                    control: control.key(),
                    expect_needs_help: false,
                },
                CLOSE_AFTER_CONFIRM,
            );
        }
        info!(contact_id = %control.contact_id, close_ticket, "Control confirmed");
        Ok(())
    }

    async fn close_ticket(
        &self,
        key: &ControlKey,
        expect_needs_help: bool,
    ) -> Result<String, FlowError> {
        let control = self.control(key).await?;
        if control.client_needs_help != expect_needs_help {
            return Ok("superseded: needs-help flag changed".into());
        }
        if control.status != ControlStatus::Closed {
            return Ok("superseded: control reopened".into());
        }
        let ticket = self.active_ticket(&control).await?;
        if !ticket.is_open {
            return Ok("ticket already closed".into());
        }

        self.chat.close_ticket(&key.contact_id).await?;
        info!(contact_id = %key.contact_id, ticket_id = %ticket.ticket_id, "Ticket closed");
        Ok("ticket closed".into())
    }

    async fn transfer(&self, key: &ControlKey, reason: TransferReason) -> Result<String, FlowError> {
        let Some(ops_channel) = self.ops_channel.as_deref() else {
            warn!(contact_id = %key.contact_id, reason = %reason, "No operations channel, transfer alert skipped");
            return Ok("no operations channel configured".into());
        };

        let customer = match self.directory.contact_by_chat_id(&key.contact_id).await {
            Ok(contact) => contact.display_name().to_string(),
            Err(e) => {
                warn!(contact_id = %key.contact_id, error = %e, "Contact name unavailable");
                key.contact_id.clone()
            }
        };

        let control = self.control(key).await?;
        let ticket = self.active_ticket(&control).await?;
        let protocol = match self.chat.fetch_ticket(&ticket.ticket_id).await {
            Ok(Some(remote)) => remote.protocol,
            Ok(None) => None,
            Err(e) => {
                warn!(ticket_id = %ticket.ticket_id, error = %e, "Protocol lookup failed");
                None
            }
        };
        let protocol = protocol.unwrap_or_else(|| PROTOCOL_UNAVAILABLE.to_string());

        self.chat
            .send_message(&OutboundMessage::text(
                ops_channel,
                texts::transfer_alert(&customer, reason, &protocol),
            ))
            .await?;

        info!(contact_id = %key.contact_id, reason = %reason, protocol = %protocol, "Transfer requested");
        Ok(format!("transfer requested ({reason})"))
    }

    /// Pull open flag and last message of a ticket from the platform.
    async fn refresh_ticket(&self, ticket_id: &str) -> Result<String, FlowError> {
        let Some(remote) = self.chat.fetch_ticket(ticket_id).await? else {
            return Ok("ticket not on platform yet".into());
        };
        let local = self.lookup.await_ticket(ticket_id).await?;

        let db = self.lookup.db();
        if local.is_open != remote.is_open {
            db.set_ticket_open(ticket_id, remote.is_open).await?;
        }
        if let Some(last) = real_message_id(remote.last_message_id.as_deref()) {
            db.advance_ticket_last_message(ticket_id, last).await?;
        }
        Ok("ticket refreshed".into())
    }
}

#[async_trait]
impl ActionHandler for Workflow {
    async fn handle(&self, action: &Action) -> Result<String, FlowError> {
        match action {
            Action::SendMessages {
                contact_id,
                messages,
            } => {
                self.deliver(messages).await?;
                Ok(format!("{} messages sent to {contact_id}", messages.len()))
            }
            Action::SendGrouping { grouping_id } => self.send_grouping(*grouping_id).await,
            Action::CloseTicket {
                control,
                expect_needs_help,
            } => self.close_ticket(control, *expect_needs_help).await,
            Action::ConfirmControl {
                control,
                close_ticket,
            } => {
                let current = self.control(control).await?;
                self.confirm(&current, *close_ticket).await?;
                Ok("control confirmed".into())
            }
            Action::SetClientNeedsHelp { control, value } => {
                let current = self.control(control).await?;
                self.lookup
                    .db()
                    .set_client_needs_help(current.id, *value)
                    .await?;
                Ok(format!("client_needs_help = {value}"))
            }
            Action::SetPendencies { control, value } => {
                let current = self.control(control).await?;
                self.lookup.db().set_pendencies(current.id, *value).await?;
                Ok(format!("pendencies = {value}"))
            }
            Action::TransferTicket { control, reason } => self.transfer(control, *reason).await,
            Action::CheckResponse { control } => self.check_response(control).await,
            Action::RefreshTicket { ticket_id } => self.refresh_ticket(ticket_id).await,
        }
    }
}
