//! Typed webhook payloads.
//!
//! The platform posts `{ "event": ..., "data": {...} }`. Each known event
//! kind gets its own struct; required fields are checked here so handlers
//! never deal with half-formed data.

use serde::Deserialize;

use crate::error::FlowError;
use crate::ledger::MessageStatus;

/// Placeholder the platform uses for a ticket with no messages yet.
const NO_MESSAGE_SENTINEL: &str = "FIRST_MESSAGE";

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Delivery acknowledgement: a single value or a sequence whose first
/// element counts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Ack {
    One(i64),
    Many(Vec<i64>),
}

impl Ack {
    pub fn first(&self) -> Option<i64> {
        match self {
            Ack::One(v) => Some(*v),
            Ack::Many(values) => values.first().copied(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MessageMeta {
    #[serde(default)]
    pub ack: Option<Ack>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    #[serde(default)]
    pub is_from_me: bool,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub ticket_id: Option<String>,
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub data: MessageMeta,
}

impl MessagePayload {
    /// Status carried by the event, if any.
    pub fn status(&self) -> Result<Option<MessageStatus>, FlowError> {
        let Some(raw) = self.data.ack.as_ref().and_then(Ack::first) else {
            return Ok(None);
        };
        MessageStatus::from_i64(raw)
            .map(Some)
            .ok_or_else(|| FlowError::Validation(format!("message {} has unknown ack {raw}", self.id)))
    }

    pub fn message_type(&self) -> &str {
        self.message_type.as_deref().unwrap_or("chat")
    }

    /// Text to store. Media messages have none, so their type stands in.
    pub fn stored_text(&self) -> String {
        match self.text.as_deref() {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => self.message_type().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPayload {
    pub id: String,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub last_message_id: Option<String>,
    #[serde(default)]
    pub is_open: Option<bool>,
}

impl TicketPayload {
    pub fn last_message_id(&self) -> Option<&str> {
        real_message_id(self.last_message_id.as_deref())
    }
}

/// Filter out the platform's "no message yet" placeholder.
pub fn real_message_id(id: Option<&str>) -> Option<&str> {
    id.filter(|id| !id.is_empty() && *id != NO_MESSAGE_SENTINEL)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    MessageCreated(MessagePayload),
    MessageUpdated(MessagePayload),
    TicketCreated(TicketPayload),
    TicketUpdated(TicketPayload),
    /// `message.created` describing a ticket; the platform emits these by mistake.
    TicketTypedMessage,
    Unknown(String),
}

impl Event {
    pub fn parse(envelope: Envelope) -> Result<Self, FlowError> {
        let Envelope { event, data } = envelope;
        match event.as_str() {
            "message.created" => {
                if data.get("type").and_then(|t| t.as_str()) == Some("ticket") {
                    return Ok(Event::TicketTypedMessage);
                }
                Ok(Event::MessageCreated(decode(&event, data)?))
            }
            "message.updated" => Ok(Event::MessageUpdated(decode(&event, data)?)),
            "ticket.created" => Ok(Event::TicketCreated(decode(&event, data)?)),
            "ticket.updated" => Ok(Event::TicketUpdated(decode(&event, data)?)),
            _ => Ok(Event::Unknown(event)),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    event: &str,
    data: serde_json::Value,
) -> Result<T, FlowError> {
    serde_json::from_value(data)
        .map_err(|e| FlowError::Validation(format!("malformed {event} payload: {e}")))
}
