//! Deferred action queue — `(action, not-before)` messages over an mpsc channel.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::conversation::texts::TransferReason;
use crate::ledger::ControlKey;
use crate::upstream::OutboundMessage;

/// A side effect to run outside the request that triggered it.
///
/// Control-targeted actions carry the control's key; handlers re-read the
/// control when they run instead of trusting values captured here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Deliver messages to one contact in order. A retry starts over from
    /// the first message.
    SendMessages {
        contact_id: String,
        messages: Vec<OutboundMessage>,
    },
    /// Deliver a multi-company DAS grouping and mark it sent.
    SendGrouping {
        grouping_id: i64,
    },
    CloseTicket {
        control: ControlKey,
        expect_needs_help: bool,
    },
    ConfirmControl {
        control: ControlKey,
        close_ticket: bool,
    },
    SetClientNeedsHelp {
        control: ControlKey,
        value: bool,
    },
    SetPendencies {
        control: ControlKey,
        value: bool,
    },
    TransferTicket {
        control: ControlKey,
        reason: TransferReason,
    },
    CheckResponse {
        control: ControlKey,
    },
    RefreshTicket {
        ticket_id: String,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::SendMessages { .. } => "send_messages",
            Action::SendGrouping { .. } => "send_grouping",
            Action::CloseTicket { .. } => "close_ticket",
            Action::ConfirmControl { .. } => "confirm_control",
            Action::SetClientNeedsHelp { .. } => "set_client_needs_help",
            Action::SetPendencies { .. } => "set_pendencies",
            Action::TransferTicket { .. } => "transfer_ticket",
            Action::CheckResponse { .. } => "check_response",
            Action::RefreshTicket { .. } => "refresh_ticket",
        }
    }

    /// Contact, ticket or grouping the action is about, for logs.
    pub fn target(&self) -> String {
        match self {
            Action::SendMessages { contact_id, .. } => contact_id.clone(),
            Action::SendGrouping { grouping_id } => format!("grouping {grouping_id}"),
            Action::CloseTicket { control, .. }
            | Action::ConfirmControl { control, .. }
            | Action::SetClientNeedsHelp { control, .. }
            | Action::SetPendencies { control, .. }
            | Action::TransferTicket { control, .. }
            | Action::CheckResponse { control } => control.contact_id.clone(),
            Action::RefreshTicket { ticket_id } => ticket_id.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledAction {
    pub action: Action,
    pub not_before: Instant,
    /// Executions already attempted.
    pub attempt: u32,
}

/// Producer handle. Cheap to clone.
#[derive(Clone)]
pub struct ActionQueue {
    tx: mpsc::UnboundedSender<ScheduledAction>,
}

impl ActionQueue {
    pub fn channel() -> (ActionQueue, ActionReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ActionQueue { tx }, ActionReceiver { rx })
    }

    /// Run as soon as a worker is free.
    pub fn enqueue(&self, action: Action) {
        self.schedule(action, Duration::ZERO);
    }

    /// Run no earlier than `delay` from now.
    pub fn schedule(&self, action: Action, delay: Duration) {
        self.push(ScheduledAction {
            action,
            not_before: Instant::now() + delay,
            attempt: 0,
        });
    }

    pub(crate) fn push(&self, scheduled: ScheduledAction) {
        let name = scheduled.action.name();
        if self.tx.send(scheduled).is_err() {
            tracing::error!(action = name, "Action queue closed, dropping action");
        }
    }
}

pub struct ActionReceiver {
    rx: mpsc::UnboundedReceiver<ScheduledAction>,
}

impl ActionReceiver {
    pub async fn recv(&mut self) -> Option<ScheduledAction> {
        self.rx.recv().await
    }

    /// Next queued action without waiting.
    pub fn try_next(&mut self) -> Option<ScheduledAction> {
        self.rx.try_recv().ok()
    }

    /// Everything queued so far.
    pub fn drain(&mut self) -> Vec<ScheduledAction> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}
