//! Integration tests for the webhook + operator HTTP surface.
//!
//! Each test spins up an Axum server on a random port with an in-memory
//! ledger, stub upstream adapters and a running action worker, then drives
//! it over HTTP with reqwest.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::FixedOffset;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use support_ledger::config::{LookupPolicy, SchedulerConfig};
use support_ledger::conversation::Workflow;
use support_ledger::conversation::texts;
use support_ledger::error::{DirectoryError, UpstreamError};
use support_ledger::events::Reconciler;
use support_ledger::ledger::{ControlStatus, Period};
use support_ledger::routes::{AppState, app_routes};
use support_ledger::scheduler::{ActionQueue, spawn_worker};
use support_ledger::store::{Database, LibSqlBackend, Lookup};
use support_ledger::upstream::{
    ChatContact, ChatPlatform, Company, CompanyContact, Directory, OutboundMessage, RemoteMessage,
    RemoteTicket,
};

/// Time given to the worker to drain immediate actions.
const SETTLE: Duration = Duration::from_millis(200);

/// Chat platform stub that records outbound messages.
#[derive(Default)]
struct RecordingChat {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingChat {
    fn texts_to(&self, contact: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.contact_id == contact)
            .map(|m| m.text.clone())
            .collect()
    }
}

#[async_trait]
impl ChatPlatform for RecordingChat {
    async fn send_message(&self, message: &OutboundMessage) -> Result<(), UpstreamError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn close_ticket(&self, _contact_id: &str) -> Result<(), UpstreamError> {
        Ok(())
    }

    async fn fetch_ticket(&self, _ticket_id: &str) -> Result<Option<RemoteTicket>, UpstreamError> {
        Ok(None)
    }

    async fn fetch_message(
        &self,
        _message_id: &str,
    ) -> Result<Option<RemoteMessage>, UpstreamError> {
        Ok(None)
    }
}

const CNPJ: &str = "11222333000144";
const SECOND_CNPJ: &str = "55666777000188";

/// Directory stub that knows a single contact, answering for one company or,
/// when `several` is set, for two.
#[derive(Default)]
struct OneContactDirectory {
    several: bool,
}

impl OneContactDirectory {
    fn company(&self, cnpj: &str) -> Option<CompanyContact> {
        let (company, name) = match cnpj {
            CNPJ => ("co-1", "Padaria Central"),
            SECOND_CNPJ if self.several => ("co-2", "Oficina Norte"),
            _ => return None,
        };
        Some(CompanyContact {
            cnpj: cnpj.to_string(),
            company: company.into(),
            company_name: Some(name.into()),
            digisac_contact: Some(contact()),
        })
    }
}

fn contact() -> ChatContact {
    ChatContact {
        digisac_id: "c-1".into(),
        responsible_name: Some("Maria Souza".into()),
        country_code: "55".into(),
        ddd: "88".into(),
        contact_number: "999990000".into(),
    }
}

#[async_trait]
impl Directory for OneContactDirectory {
    async fn contact_by_cnpj(&self, cnpj: &str) -> Result<CompanyContact, DirectoryError> {
        self.company(cnpj)
            .ok_or_else(|| DirectoryError::NotFound(cnpj.to_string()))
    }

    async fn contact_by_chat_id(&self, contact_id: &str) -> Result<ChatContact, DirectoryError> {
        if contact_id == "c-1" {
            Ok(contact())
        } else {
            Err(DirectoryError::NotFound(contact_id.to_string()))
        }
    }

    async fn company_by_id(&self, company_id: &str) -> Result<Company, DirectoryError> {
        let name = match company_id {
            "co-2" => "Oficina Norte",
            _ => "Padaria Central",
        };
        Ok(Company {
            fantasy_name: Some(name.into()),
        })
    }

    async fn companies_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Vec<CompanyContact>, DirectoryError> {
        if contact_id != "c-1" {
            return Ok(Vec::new());
        }
        Ok([CNPJ, SECOND_CNPJ]
            .into_iter()
            .filter_map(|cnpj| self.company(cnpj))
            .collect())
    }
}

struct TestServer {
    base: String,
    db: Arc<LibSqlBackend>,
    chat: Arc<RecordingChat>,
    offset: FixedOffset,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        Self::with_directory(OneContactDirectory::default()).await
    }

    async fn with_directory(directory: OneContactDirectory) -> Self {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let lookup = Lookup::new(
            db.clone(),
            LookupPolicy::bounded(3, Duration::from_millis(5)),
            LookupPolicy::unbounded(Duration::from_millis(5)),
        );
        let chat = Arc::new(RecordingChat::default());
        let directory = Arc::new(directory);
        let offset = FixedOffset::west_opt(3 * 3600).unwrap();
        let (queue, receiver) = ActionQueue::channel();

        let workflow = Arc::new(Workflow::new(
            lookup.clone(),
            chat.clone(),
            directory.clone(),
            queue.clone(),
            Some("ops-group".into()),
            offset,
        ));
        let reconciler = Arc::new(Reconciler::new(
            lookup,
            chat.clone(),
            directory,
            queue.clone(),
            HashSet::new(),
            offset,
        ));
        spawn_worker(
            workflow.clone(),
            queue,
            receiver,
            SchedulerConfig {
                retry_backoff: Duration::from_millis(10),
                ..Default::default()
            },
        );

        let app = app_routes(AppState {
            reconciler,
            workflow,
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            base: format!("http://127.0.0.1:{port}"),
            db,
            chat,
            offset,
            client: reqwest::Client::new(),
        }
    }

    async fn webhook(&self, event: &str, data: Value) -> Value {
        self.client
            .post(format!("{}/webhook", self.base))
            .json(&json!({"event": event, "data": data}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn outreach(&self, cnpj: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/api/outreach?cnpj={cnpj}", self.base))
            .json(&json!({"pdf": "JVBERi0xLjQK"}))
            .send()
            .await
            .unwrap()
    }

    fn period(&self) -> String {
        Period::current(self.offset).to_string()
    }
}

#[tokio::test]
async fn health_answers_ok() {
    let server = TestServer::start().await;
    let resp = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn confirmation_flows_through_webhook() {
    let server = TestServer::start().await;

    let outcome = server
        .webhook("ticket.created", json!({"id": "t-1", "contactId": "c-1"}))
        .await;
    assert_eq!(outcome["status"], "applied");

    let outcome = server
        .webhook(
            "message.created",
            json!({
                "id": "m-1",
                "isFromMe": false,
                "contactId": "c-1",
                "ticketId": "t-1",
                "type": "chat",
                "text": "Sim, recebi",
                "data": {"ack": 1}
            }),
        )
        .await;
    assert_eq!(outcome["status"], "applied");

    tokio::time::sleep(SETTLE).await;

    assert_eq!(
        server.chat.texts_to("c-1"),
        vec![texts::MESSAGE_CONFIRMED.to_string()]
    );
    let control = server
        .db
        .get_control("c-1", &server.period())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(control.status, ControlStatus::Closed);
}

#[tokio::test]
async fn stale_update_is_reported() {
    let server = TestServer::start().await;
    server
        .webhook("ticket.created", json!({"id": "t-1", "contactId": "c-1"}))
        .await;
    server
        .webhook(
            "message.created",
            json!({
                "id": "m-1", "isFromMe": true, "contactId": "c-1",
                "ticketId": "t-1", "text": "Segue o DAS", "data": {"ack": 3}
            }),
        )
        .await;

    let outcome = server
        .webhook("message.updated", json!({"id": "m-1", "data": {"ack": 2}}))
        .await;
    assert_eq!(outcome["status"], "stale");

    let outcome = server.webhook("contact.updated", json!({})).await;
    assert_eq!(outcome["status"], "ignored");
}

#[tokio::test]
async fn operator_endpoints_map_errors() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .put(format!("{}/api/controls/c-1/pendencies", server.base))
        .json(&json!({"pendencies": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = server
        .client
        .post(format!("{}/api/outreach?cnpj={CNPJ}", server.base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = server.outreach("99999999000199").await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn outreach_sends_three_messages() {
    let server = TestServer::start().await;
    let resp = server.outreach(CNPJ).await;
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["contact_id"], "c-1");
    assert_eq!(body["grouped"], false);

    tokio::time::sleep(SETTLE).await;
    assert_eq!(server.chat.texts_to("c-1").len(), 3);

    let resp = server
        .client
        .post(format!("{}/api/controls/audit", server.base))
        .send()
        .await
        .unwrap();
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["result"], "checked");
    assert_eq!(report["total"], 0);
}

#[tokio::test]
async fn several_companies_are_sent_as_one_grouping() {
    let server = TestServer::with_directory(OneContactDirectory { several: true }).await;

    for cnpj in [CNPJ, SECOND_CNPJ] {
        let body: Value = server.outreach(cnpj).await.json().await.unwrap();
        assert_eq!(body["grouped"], true);
    }
    tokio::time::sleep(SETTLE).await;
    assert!(server.chat.texts_to("c-1").is_empty());

    let send = || async {
        server
            .client
            .post(format!("{}/api/outreach/groupings/send", server.base))
            .send()
            .await
            .unwrap()
            .json::<Value>()
            .await
            .unwrap()
    };
    assert_eq!(send().await["queued"], 1);
    tokio::time::sleep(SETTLE).await;

    // Greeting, two documents, disclaimer.
    let sent = server.chat.texts_to("c-1");
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[1], "PDF");
    assert_eq!(sent[2], "PDF");

    assert_eq!(send().await["queued"], 0);
}
