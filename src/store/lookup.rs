//! Lookups that tolerate rows written by a concurrent, still in-flight event.
//!
//! Bounded lookups give up after a fixed number of attempts with a fixed
//! backoff and report "not found". `await_ticket` and `await_grouping` poll
//! until the row appears, for callers that already know it is being created.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::LookupPolicy;
use crate::error::DatabaseError;
use crate::ledger::{Control, DasGrouping, Message, Period, Ticket, TicketLink};
use crate::store::traits::Database;

/// Log a warning every this many attempts of an unbounded poll.
const POLL_WARN_EVERY: u32 = 20;

#[derive(Clone)]
pub struct Lookup {
    db: Arc<dyn Database>,
    policy: LookupPolicy,
    ticket_poll: LookupPolicy,
}

impl Lookup {
    pub fn new(db: Arc<dyn Database>, policy: LookupPolicy, ticket_poll: LookupPolicy) -> Self {
        Self {
            db,
            policy,
            ticket_poll,
        }
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub async fn message(&self, message_id: &str) -> Result<Option<Message>, DatabaseError> {
        poll(self.policy, "message", message_id, || {
            self.db.get_message(message_id)
        })
        .await
    }

    pub async fn control(
        &self,
        contact_id: &str,
        period: Period,
    ) -> Result<Option<Control>, DatabaseError> {
        let period = period.to_string();
        poll(self.policy, "control", contact_id, || {
            self.db.get_control(contact_id, &period)
        })
        .await
    }

    pub async fn ticket(&self, ticket_id: &str) -> Result<Option<Ticket>, DatabaseError> {
        poll(self.policy, "ticket", ticket_id, || self.db.get_ticket(ticket_id)).await
    }

    pub async fn ticket_link(&self, control_id: i64) -> Result<Option<TicketLink>, DatabaseError> {
        let id = control_id.to_string();
        poll(self.policy, "ticket_link", &id, || {
            self.db.get_ticket_link(control_id)
        })
        .await
    }

    /// Poll until the ticket exists. Never returns "not found".
    pub async fn await_ticket(&self, ticket_id: &str) -> Result<Ticket, DatabaseError> {
        let found = poll(self.ticket_poll, "ticket", ticket_id, || {
            self.db.get_ticket(ticket_id)
        })
        .await?;

        found.ok_or_else(|| DatabaseError::NotFound {
            entity: "ticket".into(),
            id: ticket_id.to_string(),
        })
    }

    /// Poll until the grouping exists.
    pub async fn await_grouping(&self, grouping_id: i64) -> Result<DasGrouping, DatabaseError> {
        let id = grouping_id.to_string();
        let found = poll(self.ticket_poll, "das_grouping", &id, || {
            self.db.get_grouping(grouping_id)
        })
        .await?;

        found.ok_or(DatabaseError::NotFound {
            entity: "das grouping".into(),
            id,
        })
    }
}

async fn poll<T, F, Fut>(
    policy: LookupPolicy,
    entity: &str,
    id: &str,
    mut fetch: F,
) -> Result<Option<T>, DatabaseError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, DatabaseError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if let Some(found) = fetch().await? {
            return Ok(Some(found));
        }
        attempt += 1;

        match policy.max_attempts {
            Some(max) if attempt >= max => {
                debug!(entity, id, attempts = attempt, "Lookup gave up");
                return Ok(None);
            }
            None if attempt % POLL_WARN_EVERY == 0 => {
                warn!(entity, id, attempts = attempt, "Still waiting for row");
            }
            _ => {}
        }

        tokio::time::sleep(policy.backoff).await;
    }
}
