use serde::{Deserialize, Serialize};

/// A fetched email message, reduced to what the pipeline reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: String,
    /// Leaf MIME parts in depth-first order
    pub parts: Vec<MimePart>,
}

/// One leaf MIME part with its body still in transport (base64url) encoding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MimePart {
    pub mime_type: String,
    pub encoded_body: Option<String>,
}

impl MimePart {
    pub fn new(mime_type: &str, encoded_body: Option<String>) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            encoded_body,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BodyKind {
    PlainText,
    Html,
}

impl BodyKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            BodyKind::PlainText => "text/plain",
            BodyKind::Html => "text/html",
        }
    }
}

/// Decoded newsletter text extracted from one message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewsletterBody {
    pub message_id: String,
    pub kind: BodyKind,
    pub text: String,
}

impl NewsletterBody {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Result of looking for today's newsletter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(NewsletterBody),
    /// No unread message from the sender; a normal outcome, not an error
    NotFound,
}

/// Tagged result of the analysis stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AnalysisResult {
    Success {
        text: String,
        completion_calls: usize,
        total_tokens: u64,
    },
    Error {
        error_message: String,
    },
}

impl AnalysisResult {
    pub fn error(message: impl Into<String>) -> Self {
        AnalysisResult::Error {
            error_message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AnalysisResult::Success { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            AnalysisResult::Success { text, .. } => Some(text),
            AnalysisResult::Error { .. } => None,
        }
    }
}

/// A report email ready to be formatted for transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// Confirmation returned by the email provider after a send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub message_id: String,
    pub thread_id: Option<String>,
}
