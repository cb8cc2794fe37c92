use super::{CallTicket, CredentialManager, FiledTicket, TicketFiler};
use crate::config::HelpdeskConfig;
use crate::error::HelpdeskError;
use crate::utils::last_digits;
use crate::version::get_useragent;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const CONTACT_DESCRIPTION: &str = "Auto-created from call processing";

#[derive(Deserialize)]
struct ContactSearch {
    #[serde(default)]
    data: Vec<Record>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Record {
    id: String,
    #[serde(default)]
    ticket_number: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewContact<'a> {
    last_name: String,
    phone: &'a str,
    description: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewTicket<'a> {
    subject: String,
    department_id: &'a str,
    description: String,
    priority: &'a str,
    channel: &'static str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    contact_id: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewComment {
    content: String,
    is_public: bool,
    content_type: &'static str,
}

/// Zoho Desk ticket filer. Every request goes through
/// [`CredentialManager::send_authorized`].
pub struct ZohoDeskFiler {
    client: reqwest::Client,
    api_domain: String,
    org_id: String,
    department_id: String,
    priority: String,
    auto_create_contact: bool,
    credentials: Arc<CredentialManager>,
}

impl ZohoDeskFiler {
    pub fn new(config: &HelpdeskConfig, credentials: Arc<CredentialManager>) -> Result<Self> {
        let required = |value: &Option<String>, name: &str| {
            value
                .clone()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("helpdesk.{} is required", name))
        };
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(get_useragent())
            .build()?;
        Ok(Self {
            client,
            api_domain: config.api_domain.trim_end_matches('/').to_string(),
            org_id: required(&config.org_id, "org_id")?,
            department_id: required(&config.department_id, "department_id")?,
            priority: config.default_priority.clone(),
            auto_create_contact: config.auto_create_contact,
            credentials,
        })
    }

    async fn send<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<Response, HelpdeskError> {
        let url = format!("{}{}", self.api_domain, path);
        self.credentials
            .send_authorized(|token| {
                let mut request: RequestBuilder = self
                    .client
                    .request(method.clone(), &url)
                    .header("Authorization", format!("Zoho-oauthtoken {}", token))
                    .header("orgId", &self.org_id)
                    .query(query);
                if let Some(body) = body {
                    request = request.json(body);
                }
                request
            })
            .await
    }

    async fn find_contact(&self, phone: &str) -> Result<Option<String>, HelpdeskError> {
        let response = self
            .send::<()>(Method::GET, "/api/v1/contacts/search", &[("phone", phone)], None)
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let found: ContactSearch = read_json(response).await?;
        Ok(found.data.into_iter().next().map(|c| c.id))
    }

    async fn create_contact(&self, phone: &str) -> Result<String, HelpdeskError> {
        let contact = NewContact {
            last_name: format!("Customer {}", last_digits(phone, 4)),
            phone,
            description: CONTACT_DESCRIPTION,
        };
        let response = self
            .send(Method::POST, "/api/v1/contacts", &[], Some(&contact))
            .await?;
        let created: Record = read_json(response).await?;
        Ok(created.id)
    }

    /// Search then create. Never fails the filing; problems are logged.
    async fn resolve_contact(&self, ticket: &CallTicket) -> Option<String> {
        let phone = ticket.customer_number.as_str();
        match self.find_contact(phone).await {
            Ok(Some(id)) => {
                debug!(call_id = %ticket.call_id, contact_id = %id, "reusing helpdesk contact");
                return Some(id);
            }
            Ok(None) if !self.auto_create_contact => return None,
            Ok(None) => {}
            Err(e) => {
                warn!(call_id = %ticket.call_id, error = %e, "contact search failed");
                return None;
            }
        }
        match self.create_contact(phone).await {
            Ok(id) => {
                info!(call_id = %ticket.call_id, contact_id = %id, "created helpdesk contact");
                Some(id)
            }
            Err(e) => {
                warn!(call_id = %ticket.call_id, error = %e, "contact creation failed");
                None
            }
        }
    }

    async fn create_ticket(
        &self,
        ticket: &CallTicket,
        contact_id: Option<&str>,
    ) -> Result<Record, HelpdeskError> {
        let body = NewTicket {
            subject: ticket.subject(),
            department_id: &self.department_id,
            description: ticket.description(),
            priority: &self.priority,
            channel: "Phone",
            status: "Open",
            contact_id,
        };
        let response = self
            .send(Method::POST, "/api/v1/tickets", &[], Some(&body))
            .await?;
        read_json(response).await
    }

    async fn add_note(&self, ticket_id: &str, ticket: &CallTicket) -> Result<(), HelpdeskError> {
        let comment = NewComment {
            content: ticket.note(),
            is_public: false,
            content_type: "plainText",
        };
        let path = format!("/api/v1/tickets/{}/comments", ticket_id);
        let response = self.send(Method::POST, &path, &[], Some(&comment)).await?;
        // any 2xx counts, with or without a body
        ensure_success(response).await.map(|_| ())
    }
}

async fn ensure_success(response: Response) -> Result<Response, HelpdeskError> {
    let status = response.status();
    if !status.is_success() {
        return Err(HelpdeskError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        });
    }
    Ok(response)
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, HelpdeskError> {
    ensure_success(response)
        .await?
        .json()
        .await
        .map_err(|e| HelpdeskError::Decode(e.to_string()))
}

#[async_trait]
impl TicketFiler for ZohoDeskFiler {
    async fn file(&self, ticket: &CallTicket) -> Result<FiledTicket, HelpdeskError> {
        let start = Instant::now();
        let contact_id = self.resolve_contact(ticket).await;

        let created = self.create_ticket(ticket, contact_id.as_deref()).await?;
        info!(
            call_id = %ticket.call_id,
            ticket_id = %created.id,
            ticket_number = created.ticket_number.as_deref().unwrap_or("-"),
            "helpdesk ticket created"
        );

        let note_attached = match self.add_note(&created.id, ticket).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    call_id = %ticket.call_id,
                    ticket_id = %created.id,
                    error = %e,
                    "ticket created without transcript note"
                );
                false
            }
        };
        debug!(
            call_id = %ticket.call_id,
            elapsed = start.elapsed().as_millis(),
            "filing finished"
        );
        Ok(FiledTicket {
            id: created.id,
            number: created.ticket_number,
            contact_id,
            note_attached,
        })
    }
}
