use std::fmt;

use thiserror::Error;

/// Type alias for Result with NewsletterError
pub type Result<T> = std::result::Result<T, NewsletterError>;

/// Pipeline stage an error is fatal to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Config,
    Auth,
    Fetch,
    Analysis,
    Send,
    /// Failures of the task runner itself rather than a pipeline stage
    Runtime,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Auth => "auth",
            Stage::Fetch => "fetch",
            Stage::Analysis => "analysis",
            Stage::Send => "send",
            Stage::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

/// Error types for the newsletter analysis pipeline
#[derive(Error, Debug)]
pub enum NewsletterError {
    /// Credential construction, refresh or scope check failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// A required secret is missing from the secret store
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    /// Email search or retrieval failed
    #[error("Newsletter fetch failed: {0}")]
    FetchError(String),

    /// The fetched message has no usable body
    #[error("Could not extract newsletter body: {0}")]
    ExtractionError(String),

    /// The completion endpoint failed to produce an analysis
    #[error("Analysis failed: {0}")]
    AnalysisError(String),

    /// Sending the report failed
    #[error("Sending report failed: {0}")]
    SendError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Remote API returned a non-success status
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Network-related error (connection issues, DNS, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// An outbound call exceeded its deadline
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// A background task panicked or was cancelled
    #[error("Background task failed: {0}")]
    TaskError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl NewsletterError {
    /// Stage of the pipeline this error terminates
    pub fn stage(&self) -> Stage {
        match self {
            NewsletterError::AuthError(_) | NewsletterError::SecretNotFound(_) => Stage::Auth,
            NewsletterError::FetchError(_) | NewsletterError::ExtractionError(_) => Stage::Fetch,
            NewsletterError::AnalysisError(_) => Stage::Analysis,
            NewsletterError::SendError(_) => Stage::Send,
            NewsletterError::ConfigError(_)
            | NewsletterError::IoError(_)
            | NewsletterError::SerializationError(_) => Stage::Config,
            NewsletterError::ApiError { .. }
            | NewsletterError::NetworkError(_)
            | NewsletterError::Timeout(_) => Stage::Fetch,
            NewsletterError::TaskError(_) => Stage::Runtime,
        }
    }

    /// Build an API error from an HTTP status and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        NewsletterError::ApiError {
            status,
            message: describe_status(status, body),
        }
    }
}

/// Describe an HTTP failure, preferring the provider's own error message
fn describe_status(status: u16, body: &str) -> String {
    let reason = match status {
        400 => "bad request",
        401 => "unauthorized (access token rejected)",
        403 => "forbidden (missing scope or permission)",
        404 => "not found",
        429 => "rate limit exceeded",
        500..=599 => "server error",
        _ => "unexpected status",
    };

    match extract_error_message(body) {
        Some(detail) => format!("{}: {}", reason, detail),
        None => reason.to_string(),
    }
}

/// Pull a human readable message out of a Google/OpenAI style error body
///
/// Handles `{"error": {"message": ".."}}`, `{"error": "..", "error_description": ".."}`
/// and plain-text bodies.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => {
            if let Some(message) = value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
            {
                return Some(message.to_string());
            }

            let code = value.get("error").and_then(|e| e.as_str());
            let description = value.get("error_description").and_then(|d| d.as_str());
            match (code, description) {
                (Some(code), Some(description)) => Some(format!("{} ({})", code, description)),
                (Some(code), None) => Some(code.to_string()),
                (None, Some(description)) => Some(description.to_string()),
                (None, None) => None,
            }
        }
        Err(_) => Some(body.chars().take(200).collect()),
    }
}

impl From<reqwest::Error> for NewsletterError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return NewsletterError::NetworkError(format!("request timed out: {}", error));
        }
        if error.is_decode() {
            return NewsletterError::ApiError {
                status: error.status().map(|s| s.as_u16()).unwrap_or(200),
                message: format!("malformed response: {}", error),
            };
        }
        match error.status() {
            Some(status) => NewsletterError::ApiError {
                status: status.as_u16(),
                message: error.to_string(),
            },
            None => NewsletterError::NetworkError(format!("Connection error: {}", error)),
        }
    }
}
