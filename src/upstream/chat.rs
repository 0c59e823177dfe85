//! Chat platform adapter — Digisac REST API over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ChatPlatformConfig;
use crate::error::UpstreamError;

/// Attempts for idempotent GET calls before giving up.
const GET_ATTEMPTS: u32 = 3;
const GET_BACKOFF: Duration = Duration::from_millis(300);

const DEFAULT_SUBJECT: &str = "Sem Assunto";
const PDF_MIMETYPE: &str = "application/pdf";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Chat,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub base64: String,
    pub mimetype: String,
    pub name: String,
}

/// Body of `POST /messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub contact_id: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<Attachment>,
}

impl OutboundMessage {
    pub fn text(contact_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: MessageKind::Chat,
            contact_id: contact_id.into(),
            subject: DEFAULT_SUBJECT.to_string(),
            file: None,
        }
    }

    /// A PDF attachment. The platform requires some text, so it carries `PDF`.
    pub fn pdf(
        contact_id: impl Into<String>,
        name: impl Into<String>,
        base64: impl Into<String>,
    ) -> Self {
        Self {
            text: "PDF".to_string(),
            kind: MessageKind::Chat,
            contact_id: contact_id.into(),
            subject: DEFAULT_SUBJECT.to_string(),
            file: Some(Attachment {
                base64: base64.into(),
                mimetype: PDF_MIMETYPE.to_string(),
                name: name.into(),
            }),
        }
    }
}

/// Ticket as reported by `GET /tickets/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTicket {
    pub id: String,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub is_open: bool,
    #[serde(default)]
    pub last_message_id: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
}

/// Message as reported by `GET /messages/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMessage {
    pub id: String,
    #[serde(default)]
    pub ticket_id: Option<String>,
    #[serde(default)]
    pub sent: bool,
}

/// Operations the ledger needs from the chat platform.
///
/// POST calls fail with `RequestFailed` on any non-2xx answer and are never
/// repeated. GET calls retry transport errors and 5xx answers a few times
/// and report a 4xx answer as `None`.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn send_message(&self, message: &OutboundMessage) -> Result<(), UpstreamError>;

    /// Close whatever ticket is open for the contact.
    async fn close_ticket(&self, contact_id: &str) -> Result<(), UpstreamError>;

    async fn fetch_ticket(&self, ticket_id: &str) -> Result<Option<RemoteTicket>, UpstreamError>;

    async fn fetch_message(&self, message_id: &str)
    -> Result<Option<RemoteMessage>, UpstreamError>;
}

pub struct DigisacClient {
    base_url: String,
    config: ChatPlatformConfig,
    client: reqwest::Client,
}

impl DigisacClient {
    pub fn new(config: ChatPlatformConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| UpstreamError::Transport {
                endpoint: config.base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post(&self, path: &str, body: Option<&OutboundMessage>) -> Result<(), UpstreamError> {
        let mut request = self
            .client
            .post(self.url(path))
            .bearer_auth(self.config.token.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request.send().await.map_err(|e| UpstreamError::Transport {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if status.is_success() {
            debug!(endpoint = path, "Chat platform POST succeeded");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(UpstreamError::RequestFailed {
            endpoint: path.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, UpstreamError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let failure = match self
                .client
                .get(self.url(path))
                .bearer_auth(self.config.token.expose_secret())
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json::<T>().await.map(Some).map_err(|e| {
                        UpstreamError::InvalidResponse {
                            endpoint: path.to_string(),
                            reason: e.to_string(),
                        }
                    });
                }
                Ok(resp) if resp.status().is_client_error() => {
                    debug!(endpoint = path, status = %resp.status(), "Chat platform GET found nothing");
                    return Ok(None);
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    UpstreamError::RequestFailed {
                        endpoint: path.to_string(),
                        status,
                        body: resp.text().await.unwrap_or_default(),
                    }
                }
                Err(e) => UpstreamError::Transport {
                    endpoint: path.to_string(),
                    reason: e.to_string(),
                },
            };

            if attempt >= GET_ATTEMPTS {
                return Err(failure);
            }
            warn!(endpoint = path, attempt, error = %failure, "Chat platform GET failed, retrying");
            tokio::time::sleep(GET_BACKOFF).await;
        }
    }
}

#[async_trait]
impl ChatPlatform for DigisacClient {
    async fn send_message(&self, message: &OutboundMessage) -> Result<(), UpstreamError> {
        self.post("/messages", Some(message)).await
    }

    async fn close_ticket(&self, contact_id: &str) -> Result<(), UpstreamError> {
        self.post(&format!("/contacts/{contact_id}/ticket/close"), None)
            .await
    }

    async fn fetch_ticket(&self, ticket_id: &str) -> Result<Option<RemoteTicket>, UpstreamError> {
        self.get(&format!("/tickets/{ticket_id}")).await
    }

    async fn fetch_message(
        &self,
        message_id: &str,
    ) -> Result<Option<RemoteMessage>, UpstreamError> {
        self.get(&format!("/messages/{message_id}")).await
    }
}
