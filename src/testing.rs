//! In-memory fakes of the external collaborators, shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::FixedOffset;

use crate::config::{LookupPolicy, REPORTING_GROUP_ID};
use crate::conversation::Workflow;
use crate::error::{DirectoryError, UpstreamError};
use crate::events::Reconciler;
use crate::ledger::{Control, ControlKey, Period};
use crate::scheduler::{Action, ActionHandler, ActionQueue, ActionReceiver};
use crate::store::{Database, LibSqlBackend, Lookup};
use crate::upstream::{
    ChatContact, ChatPlatform, Company, CompanyContact, Directory, OutboundMessage, RemoteMessage,
    RemoteTicket,
};

pub const OPS_CHANNEL: &str = "ops-group";

// ── Chat platform ───────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeChat {
    sent: Mutex<Vec<OutboundMessage>>,
    closed: Mutex<Vec<String>>,
    tickets: Mutex<HashMap<String, RemoteTicket>>,
    messages: Mutex<HashMap<String, RemoteMessage>>,
    fail_sends: AtomicBool,
}

impl FakeChat {
    pub fn add_message(&self, id: &str, ticket_id: &str, sent: bool) {
        self.messages.lock().unwrap().insert(
            id.to_string(),
            RemoteMessage {
                id: id.to_string(),
                ticket_id: Some(ticket_id.to_string()),
                sent,
            },
        );
    }

    pub fn add_ticket(&self, ticket: RemoteTicket) {
        self.tickets
            .lock()
            .unwrap()
            .insert(ticket.id.clone(), ticket);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// (contact, text) of every message sent.
    pub fn sent_texts(&self) -> Vec<(String, String)> {
        self.sent()
            .into_iter()
            .map(|m| (m.contact_id, m.text))
            .collect()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatPlatform for FakeChat {
    async fn send_message(&self, message: &OutboundMessage) -> Result<(), UpstreamError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(UpstreamError::RequestFailed {
                endpoint: "/messages".into(),
                status: 500,
                body: "fake failure".into(),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn close_ticket(&self, contact_id: &str) -> Result<(), UpstreamError> {
        self.closed.lock().unwrap().push(contact_id.to_string());
        Ok(())
    }

    async fn fetch_ticket(&self, ticket_id: &str) -> Result<Option<RemoteTicket>, UpstreamError> {
        Ok(self.tickets.lock().unwrap().get(ticket_id).cloned())
    }

    async fn fetch_message(
        &self,
        message_id: &str,
    ) -> Result<Option<RemoteMessage>, UpstreamError> {
        Ok(self.messages.lock().unwrap().get(message_id).cloned())
    }
}

// ── Directory ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeDirectory {
    contacts: Mutex<HashMap<String, ChatContact>>,
    by_cnpj: Mutex<HashMap<String, CompanyContact>>,
    companies: Mutex<HashMap<String, Company>>,
}

impl FakeDirectory {
    pub fn add_contact(&self, id: &str, name: &str, number: &str) {
        self.contacts.lock().unwrap().insert(
            id.to_string(),
            ChatContact {
                digisac_id: id.to_string(),
                responsible_name: Some(name.to_string()),
                country_code: "55".into(),
                ddd: "88".into(),
                contact_number: number.to_string(),
            },
        );
    }

    /// Register a company answered for by the chat contact `contact_id`.
    pub fn add_company(&self, cnpj: &str, company_id: &str, name: &str, contact_id: &str) {
        let contact = self.contacts.lock().unwrap().get(contact_id).cloned();
        self.by_cnpj.lock().unwrap().insert(
            cnpj.to_string(),
            CompanyContact {
                cnpj: cnpj.to_string(),
                company: company_id.to_string(),
                company_name: Some(name.to_string()),
                digisac_contact: contact,
            },
        );
        self.companies.lock().unwrap().insert(
            company_id.to_string(),
            Company {
                fantasy_name: Some(name.to_string()),
            },
        );
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn contact_by_cnpj(&self, cnpj: &str) -> Result<CompanyContact, DirectoryError> {
        self.by_cnpj
            .lock()
            .unwrap()
            .get(cnpj)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(cnpj.to_string()))
    }

    async fn contact_by_chat_id(&self, contact_id: &str) -> Result<ChatContact, DirectoryError> {
        self.contacts
            .lock()
            .unwrap()
            .get(contact_id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(contact_id.to_string()))
    }

    async fn company_by_id(&self, company_id: &str) -> Result<Company, DirectoryError> {
        self.companies
            .lock()
            .unwrap()
            .get(company_id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(company_id.to_string()))
    }

    async fn companies_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Vec<CompanyContact>, DirectoryError> {
        Ok(self
            .by_cnpj
            .lock()
            .unwrap()
            .values()
            .filter(|c| {
                c.digisac_contact
                    .as_ref()
                    .is_some_and(|d| d.digisac_id == contact_id)
            })
            .cloned()
            .collect())
    }
}

// ── Harness ─────────────────────────────────────────────────────────

/// In-memory ledger wired to fakes, with the action queue left undrained.
pub struct Harness {
    pub db: Arc<LibSqlBackend>,
    pub lookup: Lookup,
    pub chat: Arc<FakeChat>,
    pub directory: Arc<FakeDirectory>,
    pub queue: ActionQueue,
    pub actions: ActionReceiver,
    pub offset: FixedOffset,
}

impl Harness {
    /// Contact `c-1` (phone 5588999990000) is known to the directory.
    pub async fn new() -> Self {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let lookup = Lookup::new(
            db.clone(),
            LookupPolicy::bounded(2, Duration::from_millis(1)),
            LookupPolicy::unbounded(Duration::from_millis(1)),
        );
        let directory = Arc::new(FakeDirectory::default());
        directory.add_contact("c-1", "Maria Souza", "999990000");
        let (queue, actions) = ActionQueue::channel();

        Self {
            db,
            lookup,
            chat: Arc::new(FakeChat::default()),
            directory,
            queue,
            actions,
            offset: FixedOffset::west_opt(3 * 3600).unwrap(),
        }
    }

    pub fn period(&self) -> Period {
        Period::current(self.offset)
    }

    pub fn key(&self, contact_id: &str) -> ControlKey {
        ControlKey::new(contact_id, self.period())
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.lookup.clone(),
            self.chat.clone(),
            self.directory.clone(),
            self.queue.clone(),
            HashSet::from([REPORTING_GROUP_ID.to_string()]),
            self.offset,
        )
    }

    pub fn workflow(&self) -> Workflow {
        Workflow::new(
            self.lookup.clone(),
            self.chat.clone(),
            self.directory.clone(),
            self.queue.clone(),
            Some(OPS_CHANNEL.to_string()),
            self.offset,
        )
    }

    pub async fn control(&self, contact_id: &str) -> Control {
        self.db
            .get_control(contact_id, &self.period().to_string())
            .await
            .unwrap()
            .expect("control exists")
    }

    pub fn drain_actions(&mut self) -> Vec<Action> {
        self.actions.drain().into_iter().map(|s| s.action).collect()
    }

    /// Run everything queued so far, including actions queued while
    /// running, ignoring delays. Returns the action names in run order.
    pub async fn run_queued(&mut self) -> Vec<&'static str> {
        let workflow = self.workflow();
        let mut names = Vec::new();
        while let Some(scheduled) = self.actions.try_next() {
            names.push(scheduled.action.name());
            workflow.handle(&scheduled.action).await.unwrap();
        }
        names
    }
}
