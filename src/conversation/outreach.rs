//! Monthly outreach: greeting, the DAS document and the closing notice.
//!
//! Contacts answering for several companies get a single grouped delivery
//! instead: each company's document is parked in the contact's grouping for
//! the period until an operator triggers the grouped send.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::texts;
use super::workflow::Workflow;
use crate::error::{DirectoryError, FlowError};
use crate::ledger::{ControlKey, GroupedDocument};
use crate::scheduler::Action;
use crate::upstream::{CompanyContact, OutboundMessage};

const DOCUMENT_PREFIX: &str = "DAS MEI";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutreachRequest {
    /// Base64 PDF of the document.
    #[serde(default)]
    pub pdf: Option<String>,
    /// Periods with outstanding documents.
    #[serde(default)]
    pub pendencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutreachSummary {
    pub contact_id: String,
    pub document: String,
    pub pendencies: bool,
    /// Parked in the contact's grouping instead of sent.
    pub grouped: bool,
}

impl Workflow {
    /// Queue this month's document for the contact answering for `cnpj`.
    pub async fn outreach(
        &self,
        cnpj: &str,
        request: &OutreachRequest,
    ) -> Result<OutreachSummary, FlowError> {
        let pdf = request
            .pdf
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| FlowError::Validation("pdf (base64) is required".into()))?;

        let company_contact = match self.directory.contact_by_cnpj(cnpj).await {
            Ok(found) => found,
            Err(DirectoryError::NotFound(_)) => {
                return Err(FlowError::not_found("company contact", cnpj));
            }
            Err(e) => return Err(e.into()),
        };
        let contact_id = company_contact
            .digisac_contact
            .as_ref()
            .map(|c| c.digisac_id.clone())
            .ok_or_else(|| FlowError::not_found("chat contact", cnpj))?;

        if self.handles_several_companies(&contact_id).await {
            return self.group_document(&company_contact, contact_id, pdf, request).await;
        }

        let period = self.period();
        let document = format!("{DOCUMENT_PREFIX} {}", period.label_previous());
        let mut messages = vec![
            OutboundMessage::text(&contact_id, texts::greeting(&period.label_previous())),
            OutboundMessage::pdf(&contact_id, &document, pdf),
        ];

        let pendencies = !request.pendencies.is_empty();
        if pendencies {
            messages.push(OutboundMessage::text(
                &contact_id,
                texts::pendencies_notice(&request.pendencies),
            ));
        } else {
            messages.push(OutboundMessage::text(&contact_id, texts::disclaimer()));
        }

        self.queue.enqueue(Action::SendMessages {
            contact_id: contact_id.clone(),
            messages,
        });
        if pendencies {
            // The control appears once the platform reports the new ticket.
            self.queue.enqueue(Action::SetPendencies {
                control: ControlKey::new(&contact_id, period),
                value: true,
            });
        }

        info!(cnpj, contact_id = %contact_id, document = %document, pendencies, "Outreach queued");
        Ok(OutreachSummary {
            contact_id,
            document,
            pendencies,
            grouped: false,
        })
    }

    async fn group_document(
        &self,
        company_contact: &CompanyContact,
        contact_id: String,
        pdf: &str,
        request: &OutreachRequest,
    ) -> Result<OutreachSummary, FlowError> {
        if !request.pendencies.is_empty() {
            warn!(contact_id = %contact_id, "Pendencies are not sent with grouped documents");
        }

        let company_name = self.company_name(company_contact).await;
        let db = self.lookup.db();
        let (grouping, _) = db.get_or_create_grouping(&contact_id, self.period()).await?;
        let added = db
            .add_grouped_document(
                grouping.id,
                &GroupedDocument {
                    cnpj: company_contact.cnpj.clone(),
                    company_name: company_name.clone(),
                    pdf: pdf.to_string(),
                },
            )
            .await?;

        info!(
            cnpj = %company_contact.cnpj,
            contact_id = %contact_id,
            grouping_id = grouping.id,
            added,
            "Document grouped"
        );
        Ok(OutreachSummary {
            contact_id,
            document: format!("{DOCUMENT_PREFIX} {company_name}"),
            pendencies: false,
            grouped: true,
        })
    }

    /// Queue delivery of every grouping not sent yet. Returns how many.
    pub async fn send_groupings(&self) -> Result<usize, FlowError> {
        let pending = self.lookup.db().list_unsent_groupings().await?;
        for grouping in &pending {
            self.queue.enqueue(Action::SendGrouping {
                grouping_id: grouping.id,
            });
        }
        info!(count = pending.len(), "Grouped deliveries queued");
        Ok(pending.len())
    }

    /// Greeting, one document per company, disclaimer; then mark it sent.
    pub(super) async fn send_grouping(&self, grouping_id: i64) -> Result<String, FlowError> {
        let grouping = self.lookup.await_grouping(grouping_id).await?;
        if grouping.was_sent {
            return Ok(format!("grouping {grouping_id} already sent"));
        }
        if grouping.documents.is_empty() {
            return Ok(format!("grouping {grouping_id} has no documents"));
        }

        let contact = grouping.contact_id.as_str();
        let mut messages = Vec::with_capacity(grouping.documents.len() + 2);
        messages.push(OutboundMessage::text(
            contact,
            texts::greeting(&grouping.period.label_previous()),
        ));
        messages.extend(grouping.documents.iter().map(|d| {
            OutboundMessage::pdf(contact, format!("{DOCUMENT_PREFIX} {}", d.company_name), &d.pdf)
        }));
        messages.push(OutboundMessage::text(contact, texts::disclaimer()));

        self.deliver(&messages).await?;
        self.lookup.db().mark_grouping_sent(grouping_id).await?;

        info!(grouping_id, contact_id = %contact, documents = grouping.documents.len(), "Grouping sent");
        Ok(format!(
            "grouping {grouping_id}: {} documents sent",
            grouping.documents.len()
        ))
    }

    /// Send messages one after another, stopping at the first failure.
    pub(super) async fn deliver(&self, messages: &[OutboundMessage]) -> Result<(), FlowError> {
        for message in messages {
            self.chat.send_message(message).await?;
        }
        Ok(())
    }

    /// Toggle the pendencies flag on the contact's control for this period.
    pub async fn set_pendencies(&self, contact_id: &str, value: bool) -> Result<(), FlowError> {
        let control = self
            .control(&ControlKey::new(contact_id, self.period()))
            .await?;
        self.lookup.db().set_pendencies(control.id, value).await?;
        info!(contact_id, value, "Pendencies updated");
        Ok(())
    }

    async fn handles_several_companies(&self, contact_id: &str) -> bool {
        match self.directory.companies_for_contact(contact_id).await {
            Ok(companies) => companies.len() > 1,
            Err(e) => {
                warn!(contact_id, error = %e, "Company count unavailable");
                false
            }
        }
    }

    async fn company_name(&self, contact: &CompanyContact) -> String {
        let fantasy = match self.directory.company_by_id(&contact.company).await {
            Ok(company) => company.fantasy_name,
            Err(e) => {
                warn!(company = %contact.company, error = %e, "Company name unavailable");
                None
            }
        };
        fantasy
            .or_else(|| contact.company_name.clone())
            .unwrap_or_else(|| contact.cnpj.clone())
    }
}
