//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use mockall::mock;
use newsletter_analyst::auth::{
    Credential, CredentialProvider, TokenRefresher, TokenResponse, GOOGLE_TOKEN_URI, REQUIRED_SCOPES,
};
use newsletter_analyst::client::{MailClient, MailConnector};
use newsletter_analyst::error::Result;
use newsletter_analyst::llm::{CompletionClient, CompletionRequest, CompletionResponse};
use newsletter_analyst::models::{Message, MimePart, NewsletterBody, BodyKind, SendOutcome};
use newsletter_analyst::secrets::{self, SecretStore, StaticSecretStore};
use serde_json::json;
use std::io;
use std::sync::{Arc, Mutex};

pub const SENDER: &str = "desk@futures.example";
pub const RECIPIENT: &str = "trader@example.com";
pub const NEWSLETTER_TEXT: &str = "ES futures: support at 6066-70, resistance at 6200.";

pub const FIXED_REPORT: &str = "## Session Recap\nBuyers held the lows.\n\n## Key Levels\n| Level | Type | Significance |\n|---|---|---|\n| 6200 | Resistance | Prior high |\n| 6066-70 | Support | Overnight low |\n\n## Quick Reference\n6200 - Resistance\n6066-70 - Support";

/// Base64url without padding, as Gmail returns part bodies
pub fn encode_body(text: &str) -> String {
    URL_SAFE_NO_PAD.encode(text)
}

/// Message with a single decodable plain-text part
pub fn create_plain_message(id: &str, text: &str) -> Message {
    Message {
        id: id.to_string(),
        sender: format!("Futures Desk <{}>", SENDER),
        parts: vec![MimePart::new("text/plain", Some(encode_body(text)))],
    }
}

/// Message with an html part followed by a plain-text part
pub fn create_alternative_message(id: &str, html: &str, plain: &str) -> Message {
    Message {
        id: id.to_string(),
        sender: SENDER.to_string(),
        parts: vec![
            MimePart::new("text/html", Some(encode_body(html))),
            MimePart::new("text/plain", Some(encode_body(plain))),
        ],
    }
}

pub fn create_body(text: &str) -> NewsletterBody {
    NewsletterBody {
        message_id: "18c2f1a9e0b7d3c4".to_string(),
        kind: BodyKind::PlainText,
        text: text.to_string(),
    }
}

pub fn completion(text: &str, total_tokens: u64) -> CompletionResponse {
    CompletionResponse {
        text: text.to_string(),
        total_tokens,
    }
}

pub fn send_outcome(id: &str) -> SendOutcome {
    SendOutcome {
        message_id: id.to_string(),
        thread_id: Some(format!("thread_{}", id)),
    }
}

/// Secrets for the full pipeline, without Google credentials
pub fn pipeline_secrets() -> StaticSecretStore {
    StaticSecretStore::new()
        .with(secrets::SENDER_EMAIL, SENDER)
        .with(secrets::RECIPIENT_EMAIL, RECIPIENT)
        .with(secrets::OPENAI_API_KEY, "sk-test-key")
}

/// Secrets including the three Google OAuth values
pub fn google_secrets() -> StaticSecretStore {
    pipeline_secrets()
        .with(secrets::GOOGLE_CLIENT_ID, "1234567890-test.apps.googleusercontent.com")
        .with(secrets::GOOGLE_CLIENT_SECRET, "GOCSPX-test-secret")
        .with(secrets::GOOGLE_REFRESH_TOKEN, "1//test-refresh-token")
}

/// Credential with a live access token and the read+send scopes
pub fn valid_credential() -> Credential {
    let mut credential = Credential::new(
        "client-id".to_string(),
        "client-secret".to_string(),
        "refresh-token".to_string(),
        GOOGLE_TOKEN_URI.to_string(),
        REQUIRED_SCOPES,
    );
    credential.access_token = Some("ya29.test-access-token".to_string());
    credential.expiry = Some(Utc::now() + Duration::hours(1));
    credential
}

/// Provider that already holds a valid credential and must never refresh
pub fn ready_credentials() -> CredentialProvider {
    let mut refresher = MockTokenRefresher::new();
    refresher.expect_refresh().never();
    let store: Arc<dyn SecretStore> = Arc::new(StaticSecretStore::new());
    CredentialProvider::with_credential(valid_credential(), store, Arc::new(refresher))
}

/// Gmail list response (JSON)
pub fn mock_gmail_list_response(message_ids: &[&str]) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = message_ids
        .iter()
        .map(|id| json!({"id": id, "threadId": format!("thread_{}", id)}))
        .collect();

    json!({
        "messages": messages,
        "resultSizeEstimate": messages.len()
    })
}

/// Gmail `format=full` response with a multipart/alternative payload
pub fn mock_gmail_full_message(id: &str, from: &str, plain: &str) -> serde_json::Value {
    json!({
        "id": id,
        "threadId": format!("thread_{}", id),
        "labelIds": ["INBOX", "UNREAD"],
        "snippet": plain.chars().take(40).collect::<String>(),
        "payload": {
            "mimeType": "multipart/alternative",
            "headers": [
                {"name": "From", "value": from},
                {"name": "Subject", "value": "Daily ES Plan"},
                {"name": "To", "value": RECIPIENT}
            ],
            "parts": [
                {"mimeType": "text/plain", "body": {"size": plain.len(), "data": encode_body(plain)}},
                {"mimeType": "text/html", "body": {"size": 0}}
            ]
        },
        "internalDate": "1704124800000",
        "sizeEstimate": 1234
    })
}

/// Chat-completions response (JSON)
pub fn mock_chat_response(content: &str, total_tokens: u64) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": total_tokens / 2, "completion_tokens": total_tokens - total_tokens / 2, "total_tokens": total_tokens}
    })
}

/// Token endpoint response (JSON)
pub fn mock_token_response(scope: &str) -> serde_json::Value {
    json!({
        "access_token": "ya29.fresh-access-token",
        "expires_in": 3599,
        "scope": scope,
        "token_type": "Bearer"
    })
}

/// Forwards to a shared client so one mock can serve several connections
pub struct SharedMail(pub Arc<dyn MailClient>);

#[async_trait]
impl MailClient for SharedMail {
    async fn search_messages(&self, query: &str, max_results: u32) -> Result<Vec<String>> {
        self.0.search_messages(query, max_results).await
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        self.0.get_message(id).await
    }

    async fn send_raw(&self, raw: &str) -> Result<SendOutcome> {
        self.0.send_raw(raw).await
    }

    async fn mark_as_read(&self, id: &str) -> Result<()> {
        self.0.mark_as_read(id).await
    }
}

/// Connector that hands out `mail` on every connect
pub fn connector_for(mail: Arc<dyn MailClient>) -> MockMailConnector {
    let mut connector = MockMailConnector::new();
    connector
        .expect_connect()
        .returning(move |_| Ok(Box::new(SharedMail(mail.clone())) as Box<dyn MailClient>));
    connector
}

/// In-memory sink for formatted log output
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Subscriber writing plain-text events at DEBUG and above into this buffer
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// Mock implementation of MailClient for testing
mock! {
    pub MailClient {}

    #[async_trait::async_trait]
    impl MailClient for MailClient {
        async fn search_messages(&self, query: &str, max_results: u32) -> Result<Vec<String>>;
        async fn get_message(&self, id: &str) -> Result<Message>;
        async fn send_raw(&self, raw: &str) -> Result<SendOutcome>;
        async fn mark_as_read(&self, id: &str) -> Result<()>;
    }
}

mock! {
    pub MailConnector {}

    #[async_trait::async_trait]
    impl MailConnector for MailConnector {
        async fn connect(&self, credential: &Credential) -> Result<Box<dyn MailClient>>;
    }
}

mock! {
    pub CompletionClient {}

    #[async_trait::async_trait]
    impl CompletionClient for CompletionClient {
        async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;
    }
}

mock! {
    pub TokenRefresher {}

    #[async_trait::async_trait]
    impl TokenRefresher for TokenRefresher {
        async fn refresh(&self, credential: &Credential) -> Result<TokenResponse>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_plain_message() {
        let msg = create_plain_message("msg1", NEWSLETTER_TEXT);
        assert_eq!(msg.id, "msg1");
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.parts[0].mime_type, "text/plain");
    }

    #[test]
    fn test_valid_credential_is_valid() {
        assert!(valid_credential().is_valid(Utc::now()));
    }

    #[test]
    fn test_mock_gmail_list_response() {
        let response = mock_gmail_list_response(&["msg1", "msg2"]);
        assert_eq!(response["messages"].as_array().unwrap().len(), 2);
        assert_eq!(response["messages"][0]["id"], "msg1");
    }

    #[test]
    fn test_mock_chat_response_usage() {
        let response = mock_chat_response("report", 101);
        assert_eq!(response["usage"]["total_tokens"], 101);
        assert_eq!(response["choices"][0]["message"]["content"], "report");
    }
}
