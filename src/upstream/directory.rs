//! Company/contact directory adapter.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::DirectoryError;

/// A chat contact as the directory knows it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatContact {
    #[serde(deserialize_with = "id_string")]
    pub digisac_id: String,
    #[serde(default)]
    pub responsible_name: Option<String>,
    #[serde(default, deserialize_with = "id_string")]
    pub country_code: String,
    #[serde(default, deserialize_with = "id_string")]
    pub ddd: String,
    #[serde(default, deserialize_with = "id_string")]
    pub contact_number: String,
}

impl ChatContact {
    /// Full phone number, or `None` when the directory has no number.
    pub fn phone(&self) -> Option<String> {
        if self.contact_number.trim().is_empty() {
            return None;
        }
        Some(format!(
            "{}{}{}",
            self.country_code, self.ddd, self.contact_number
        ))
    }

    pub fn display_name(&self) -> &str {
        self.responsible_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.digisac_id)
    }
}

/// Link between a company (by CNPJ) and the contact that answers for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CompanyContact {
    #[serde(deserialize_with = "id_string")]
    pub cnpj: String,
    #[serde(default, deserialize_with = "id_string")]
    pub company: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub digisac_contact: Option<ChatContact>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Company {
    #[serde(default)]
    pub fantasy_name: Option<String>,
}

/// Lookups against the company directory. Any non-2xx answer is `NotFound`.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn contact_by_cnpj(&self, cnpj: &str) -> Result<CompanyContact, DirectoryError>;

    async fn contact_by_chat_id(&self, contact_id: &str) -> Result<ChatContact, DirectoryError>;

    async fn company_by_id(&self, company_id: &str) -> Result<Company, DirectoryError>;

    async fn companies_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Vec<CompanyContact>, DirectoryError>;
}

pub struct HttpDirectory {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, DirectoryError> {
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(format!("{path}: {e}")))?;

        if !resp.status().is_success() {
            debug!(path, status = %resp.status(), "Directory lookup missed");
            return Err(DirectoryError::NotFound(path.to_string()));
        }

        resp.json::<T>()
            .await
            .map_err(|e| DirectoryError::InvalidResponse(format!("{path}: {e}")))
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn contact_by_cnpj(&self, cnpj: &str) -> Result<CompanyContact, DirectoryError> {
        self.get(&format!("/contacts/{cnpj}")).await
    }

    async fn contact_by_chat_id(&self, contact_id: &str) -> Result<ChatContact, DirectoryError> {
        self.get(&format!("/contacts/digisac/{contact_id}")).await
    }

    async fn company_by_id(&self, company_id: &str) -> Result<Company, DirectoryError> {
        self.get(&format!("/companies/id/{company_id}")).await
    }

    async fn companies_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Vec<CompanyContact>, DirectoryError> {
        self.get(&format!("/contacts/digisac/all/{contact_id}"))
            .await
    }
}

/// Accept identifiers sent either as JSON strings or numbers.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
