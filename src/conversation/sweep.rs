//! Periodic passes over open controls: the recheck ticker and the
//! visualization audit.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::texts;
use super::workflow::Workflow;
use crate::error::{DatabaseError, FlowError};
use crate::ledger::{Control, ControlStatus, MessageStatus};
use crate::scheduler::{Action, ActionQueue};
use crate::store::Database;
use crate::upstream::OutboundMessage;

/// Checks after which the audit gives up on the remaining controls.
pub const AUDIT_CHECK_LIMIT: i64 = 3;

/// Enqueue a response check for every control still awaiting a reply.
pub async fn enqueue_rechecks(
    db: &dyn Database,
    queue: &ActionQueue,
) -> Result<usize, DatabaseError> {
    let open = db
        .list_controls_by_status(ControlStatus::AwaitingResponse)
        .await?;
    for control in &open {
        queue.enqueue(Action::CheckResponse {
            control: control.key(),
        });
    }
    Ok(open.len())
}

/// Spawn the recheck ticker background task.
pub fn spawn_recheck_ticker(
    db: Arc<dyn Database>,
    queue: ActionQueue,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match enqueue_rechecks(db.as_ref(), &queue).await {
                Ok(count) => debug!(count, "Rechecks enqueued"),
                Err(e) => error!(error = %e, "Recheck pass failed"),
            }
        }
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AuditReport {
    /// Check limit reached: every open control was closed and the companies
    /// that never confirmed were reported.
    Escalated { companies: Vec<String> },
    Checked {
        total: usize,
        visualized: usize,
        not_visualized: usize,
    },
}

impl Workflow {
    pub async fn audit(&self) -> Result<AuditReport, FlowError> {
        let open = self
            .lookup
            .db()
            .list_controls_by_status(ControlStatus::AwaitingResponse)
            .await?;

        if open.iter().any(|c| c.check_count >= AUDIT_CHECK_LIMIT) {
            return self.escalate_unconfirmed(&open).await;
        }

        let mut visualized = 0;
        for control in &open {
            self.lookup.db().increment_check_count(control.id).await?;

            if self.last_message_visualized(control).await {
                self.confirm(control, true).await?;
                visualized += 1;
                continue;
            }

            let reminder = OutboundMessage::text(&control.contact_id, texts::VISUALIZE_REMINDER);
            if let Err(e) = self.chat.send_message(&reminder).await {
                warn!(contact_id = %control.contact_id, error = %e, "Reminder not sent");
            }
        }

        info!(total = open.len(), visualized, "Visualization audit done");
        Ok(AuditReport::Checked {
            total: open.len(),
            visualized,
            not_visualized: open.len() - visualized,
        })
    }

    async fn escalate_unconfirmed(&self, open: &[Control]) -> Result<AuditReport, FlowError> {
        let mut companies = Vec::new();
        for control in open {
            match self.directory.companies_for_contact(&control.contact_id).await {
                Ok(found) => companies.extend(found.into_iter().map(|c| {
                    format!("{} - {}", c.cnpj, c.company_name.unwrap_or_default())
                })),
                Err(e) => {
                    warn!(contact_id = %control.contact_id, error = %e, "Companies unavailable for report")
                }
            }
            self.confirm(control, true).await?;
        }

        let report = format!("{}{}", texts::AUDIT_REPORT_HEADER, companies.join(",\n"));
        match self.ops_channel.as_deref() {
            Some(channel) => {
                self.chat
                    .send_message(&OutboundMessage::text(channel, report))
                    .await?
            }
            None => warn!("No operations channel, audit report not sent"),
        }

        info!(controls = open.len(), companies = companies.len(), "Unconfirmed controls escalated");
        Ok(AuditReport::Escalated { companies })
    }

    /// Whether the latest message on the control's active ticket was seen.
    async fn last_message_visualized(&self, control: &Control) -> bool {
        let message = match self.active_ticket(control).await {
            Ok(ticket) => self.last_message(&ticket).await,
            Err(e) => Err(e),
        };
        match message {
            Ok(Some(message)) => message.status == MessageStatus::Visualized,
            Ok(None) => false,
            Err(e) => {
                debug!(contact_id = %control.contact_id, error = %e, "Visualization unknown");
                false
            }
        }
    }
}
