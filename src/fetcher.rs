//! Locates the latest unread newsletter and extracts its body

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use tracing::{error, info, warn};

use crate::client::MailClient;
use crate::config::{BodyPreference, FetchConfig};
use crate::error::{NewsletterError, Result};
use crate::models::{BodyKind, FetchOutcome, Message, MimePart, NewsletterBody};

/// Gmail search for unread mail from one sender
pub fn unread_from_query(sender: &str) -> String {
    format!("from:{} is:unread", sender.trim())
}

/// Decode a base64url body (padded or not) into UTF-8 text
///
/// Returns `None` for anything that is not usable newsletter content:
/// missing data, bad encoding, invalid UTF-8 or whitespace only.
pub fn decode_part(part: &MimePart) -> Option<String> {
    let encoded = part.encoded_body.as_deref()?.trim();
    let bytes = if encoded.ends_with('=') {
        URL_SAFE.decode(encoded).ok()?
    } else {
        URL_SAFE_NO_PAD.decode(encoded).ok()?
    };
    let text = String::from_utf8(bytes).ok()?;
    if text.trim().is_empty() {
        return None;
    }
    Some(text)
}

fn kind_order(preference: BodyPreference) -> [BodyKind; 2] {
    match preference {
        BodyPreference::Html => [BodyKind::Html, BodyKind::PlainText],
        BodyPreference::Plain => [BodyKind::PlainText, BodyKind::Html],
    }
}

/// Pick the first decodable part of the preferred type, falling back to the other text type
pub fn extract_body(message: &Message, preference: BodyPreference) -> Result<NewsletterBody> {
    for kind in kind_order(preference) {
        let found = message
            .parts
            .iter()
            .filter(|part| part.mime_type == kind.mime_type())
            .find_map(decode_part);

        if let Some(text) = found {
            return Ok(NewsletterBody {
                message_id: message.id.clone(),
                kind,
                text,
            });
        }
    }

    let seen: Vec<&str> = message.parts.iter().map(|p| p.mime_type.as_str()).collect();
    Err(NewsletterError::ExtractionError(format!(
        "message {} has no decodable text/plain or text/html part (parts: [{}])",
        message.id,
        seen.join(", ")
    )))
}

/// Newsletter Fetcher stage
pub struct NewsletterFetcher {
    settings: FetchConfig,
}

impl NewsletterFetcher {
    pub fn new(settings: FetchConfig) -> Self {
        Self { settings }
    }

    /// Fetch the most recent unread message from `sender` and extract its body
    ///
    /// An empty search is [`FetchOutcome::NotFound`], not an error. Transport
    /// faults come back as `FetchError`, unusable bodies as `ExtractionError`.
    pub async fn fetch_latest_unread(
        &self,
        mail: &dyn MailClient,
        sender: &str,
    ) -> Result<FetchOutcome> {
        let query = unread_from_query(sender);
        info!(sender = %sender, "Searching for latest unread newsletter");

        let ids = mail.search_messages(&query, 1).await.map_err(|e| {
            error!(sender = %sender, error = %e, "Email search failed");
            NewsletterError::FetchError(format!("search for mail from {} failed: {}", sender, e))
        })?;

        info!(sender = %sender, found = ids.len(), "Search complete");
        let Some(message_id) = ids.into_iter().next() else {
            warn!(sender = %sender, "No unread messages found");
            return Ok(FetchOutcome::NotFound);
        };

        let message = mail.get_message(&message_id).await.map_err(|e| {
            error!(sender = %sender, message_id = %message_id, error = %e, "Email retrieval failed");
            NewsletterError::FetchError(format!("retrieving message {} failed: {}", message_id, e))
        })?;

        let body = extract_body(&message, self.settings.body_preference).map_err(|e| {
            error!(sender = %sender, message_id = %message_id, error = %e, "Body extraction failed");
            e
        })?;

        if self.settings.claim_after_fetch {
            mail.mark_as_read(&message_id).await.map_err(|e| {
                error!(sender = %sender, message_id = %message_id, error = %e, "Claiming message failed");
                NewsletterError::FetchError(format!("claiming message {} failed: {}", message_id, e))
            })?;
            info!(message_id = %message_id, "Claimed newsletter (UNREAD removed)");
        }

        info!(
            sender = %sender,
            message_id = %message_id,
            kind = ?body.kind,
            chars = body.char_count(),
            "Extracted newsletter body"
        );
        Ok(FetchOutcome::Found(body))
    }
}
