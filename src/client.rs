//! Gmail REST client and the traits the pipeline stages depend on

use async_trait::async_trait;
use google_gmail1::api::{ListMessagesResponse, Message as ApiMessage, ModifyMessageRequest};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::Credential;
use crate::error::{NewsletterError, Result};
use crate::models::{Message, MimePart, SendOutcome};

/// Email provider operations used by the fetcher and notifier
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Message ids matching a search query, most recent first
    async fn search_messages(&self, query: &str, max_results: u32) -> Result<Vec<String>>;

    /// Full message with its MIME parts
    async fn get_message(&self, id: &str) -> Result<Message>;

    /// Send a base64url-encoded RFC 5322 message
    async fn send_raw(&self, raw: &str) -> Result<SendOutcome>;

    /// Remove the UNREAD label from a message
    async fn mark_as_read(&self, id: &str) -> Result<()>;
}

/// Builds an authenticated [`MailClient`] from a credential
#[async_trait]
pub trait MailConnector: Send + Sync {
    async fn connect(&self, credential: &Credential) -> Result<Box<dyn MailClient>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    id: String,
    payload: Option<WirePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<WireHeader>,
    body: Option<WireBody>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
struct WireHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct WireBody {
    #[serde(default)]
    data: Option<String>,
}

/// Collect leaf parts depth-first; a part without children is a leaf
fn flatten_parts(part: WirePart, out: &mut Vec<MimePart>) {
    if part.parts.is_empty() {
        out.push(MimePart {
            mime_type: part.mime_type.to_ascii_lowercase(),
            encoded_body: part.body.and_then(|b| b.data).filter(|d| !d.is_empty()),
        });
        return;
    }
    for child in part.parts {
        flatten_parts(child, out);
    }
}

fn into_message(wire: WireMessage) -> Message {
    let mut parts = Vec::new();
    let mut sender = String::new();

    if let Some(payload) = wire.payload {
        if let Some(from) = payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("from"))
        {
            sender = from.value.clone();
        }
        flatten_parts(payload, &mut parts);
    }

    Message {
        id: wire.id,
        sender,
        parts,
    }
}

/// Reject ids that would change the request path
fn validate_message_id(id: &str) -> Result<()> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(NewsletterError::ApiError {
            status: 400,
            message: format!("invalid message id: {:?}", id),
        });
    }
    Ok(())
}

/// Gmail API client authenticated with one bearer token
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    timeout: Duration,
}

impl GmailClient {
    pub fn new(http: reqwest::Client, base_url: &str, access_token: String, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
            timeout,
        }
    }

    /// Bound an API call by the configured timeout
    async fn bounded<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Gmail API {} call timed out after {:?}", operation, self.timeout);
                Err(NewsletterError::Timeout(self.timeout.as_secs()))
            }
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(NewsletterError::from_status(status.as_u16(), &body))
    }
}

#[async_trait]
impl MailClient for GmailClient {
    async fn search_messages(&self, query: &str, max_results: u32) -> Result<Vec<String>> {
        let url = format!("{}/messages", self.base_url);
        let max_results = max_results.to_string();

        let listing: ListMessagesResponse = self
            .bounded("messages.list", async {
                let response = self
                    .http
                    .get(&url)
                    .bearer_auth(&self.access_token)
                    .query(&[("q", query), ("maxResults", max_results.as_str())])
                    .send()
                    .await?;
                Ok(Self::check(response).await?.json().await?)
            })
            .await?;

        let ids: Vec<String> = listing
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();

        debug!("Search {:?} matched {} message(s)", query, ids.len());
        Ok(ids)
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        validate_message_id(id)?;
        let url = format!("{}/messages/{}", self.base_url, id);

        let wire: WireMessage = self
            .bounded("messages.get", async {
                let response = self
                    .http
                    .get(&url)
                    .bearer_auth(&self.access_token)
                    .query(&[("format", "full")])
                    .send()
                    .await?;
                Ok(Self::check(response).await?.json().await?)
            })
            .await?;

        let message = into_message(wire);
        debug!(
            message_id = %message.id,
            parts = message.parts.len(),
            "Fetched full message"
        );
        Ok(message)
    }

    async fn send_raw(&self, raw: &str) -> Result<SendOutcome> {
        let url = format!("{}/messages/send", self.base_url);

        let sent: ApiMessage = self
            .bounded("messages.send", async {
                let response = self
                    .http
                    .post(&url)
                    .bearer_auth(&self.access_token)
                    .json(&serde_json::json!({ "raw": raw }))
                    .send()
                    .await?;
                Ok(Self::check(response).await?.json().await?)
            })
            .await?;

        let message_id = sent.id.ok_or_else(|| NewsletterError::ApiError {
            status: 200,
            message: "send response carried no message id".to_string(),
        })?;

        Ok(SendOutcome {
            message_id,
            thread_id: sent.thread_id,
        })
    }

    async fn mark_as_read(&self, id: &str) -> Result<()> {
        validate_message_id(id)?;
        let url = format!("{}/messages/{}/modify", self.base_url, id);
        let request = ModifyMessageRequest {
            add_label_ids: None,
            remove_label_ids: Some(vec!["UNREAD".to_string()]),
        };

        self.bounded("messages.modify", async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.access_token)
                .json(&request)
                .send()
                .await?;
            Self::check(response).await?;
            Ok(())
        })
        .await
    }
}

/// Connects to the Gmail REST API at a configurable base URL
pub struct GmailConnector {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl GmailConnector {
    pub fn new(http: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl MailConnector for GmailConnector {
    async fn connect(&self, credential: &Credential) -> Result<Box<dyn MailClient>> {
        let token = credential.bearer()?.to_string();
        Ok(Box::new(GmailClient::new(
            self.http.clone(),
            &self.base_url,
            token,
            self.timeout,
        )))
    }
}
