//! OAuth2 credential management for the Gmail API
//!
//! The pipeline authenticates with a long-lived refresh token held in the
//! secret store. [`CredentialProvider`] turns that into a short-lived access
//! token, refreshing only when the cached one is absent or expired, and
//! verifies that the granted scopes cover reading and sending mail.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{extract_error_message, NewsletterError, Result};
use crate::secrets::{self, SecretStore};

/// Read access to messages
pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// Send messages on the user's behalf
pub const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";

/// Label changes; only needed to claim a message by clearing UNREAD
pub const GMAIL_MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

/// Scopes every pipeline run needs
pub const REQUIRED_SCOPES: &[&str] = &[GMAIL_READONLY_SCOPE, GMAIL_SEND_SCOPE];

/// Scopes the consent flow has to request for a given fetch mode
pub fn consent_scopes(claim_after_fetch: bool) -> Vec<&'static str> {
    let mut scopes = REQUIRED_SCOPES.to_vec();
    if claim_after_fetch {
        scopes.push(GMAIL_MODIFY_SCOPE);
    }
    scopes
}

/// Default Google token endpoint
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// A credential this close to expiry is treated as expired
const EXPIRY_SKEW_SECS: i64 = 60;

/// Resolved OAuth2 credential for the email API
#[derive(Clone)]
pub struct Credential {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub token_uri: String,
    pub granted_scopes: Vec<String>,
    pub access_token: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl Credential {
    /// Build a credential with no access token yet
    pub fn new(
        client_id: String,
        client_secret: String,
        refresh_token: String,
        token_uri: String,
        scopes: &[&str],
    ) -> Self {
        Self {
            client_id,
            client_secret,
            refresh_token,
            token_uri,
            granted_scopes: scopes.iter().map(|s| s.to_string()).collect(),
            access_token: None,
            expiry: None,
        }
    }

    /// A token with no known expiry is good for one use only
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => now + Duration::seconds(EXPIRY_SKEW_SECS) >= expiry,
            None => true,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.access_token.is_some() && !self.is_expired(now)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.granted_scopes.iter().any(|s| s == scope)
    }

    /// Required scopes absent from the granted set
    pub fn missing_scopes<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|scope| !self.has_scope(scope))
            .collect()
    }

    /// Bearer token for API calls
    pub fn bearer(&self) -> Result<&str> {
        self.access_token
            .as_deref()
            .ok_or_else(|| NewsletterError::AuthError("Credential has no access token".to_string()))
    }

    fn apply(&mut self, token: TokenResponse, now: DateTime<Utc>) {
        self.access_token = Some(token.access_token);
        self.expiry = token
            .expires_in
            .map(|secs| now + Duration::seconds(secs as i64));
        if let Some(scope) = token.scope {
            let granted: Vec<String> = scope.split_whitespace().map(str::to_string).collect();
            if !granted.is_empty() {
                self.granted_scopes = granted;
            }
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .field("granted_scopes", &self.granted_scopes)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Authorized-user JSON, the opaque pre-built credential form
#[derive(Debug, Deserialize)]
struct AuthorizedUserJson {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(default)]
    token_uri: Option<String>,
}

/// Token endpoint response for a refresh grant
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Exchanges a refresh token for a fresh access token
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, credential: &Credential) -> Result<TokenResponse>;
}

/// Refresh grant over HTTPS against `credential.token_uri`
pub struct HttpTokenRefresher {
    http: reqwest::Client,
    timeout: std::time::Duration,
}

impl HttpTokenRefresher {
    pub fn new(http: reqwest::Client, timeout: std::time::Duration) -> Self {
        Self { http, timeout }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, credential: &Credential) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.as_str()),
            ("refresh_token", credential.refresh_token.as_str()),
        ];

        let response = self
            .http
            .post(&credential.token_uri)
            .timeout(self.timeout)
            .form(&params)
            .send()
            .await
            .map_err(|e| NewsletterError::AuthError(format!("Token endpoint unreachable: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NewsletterError::AuthError(format!("Failed to read token response: {}", e)))?;

        if !status.is_success() {
            let detail = extract_error_message(&body).unwrap_or_else(|| status.to_string());
            return Err(NewsletterError::AuthError(format!(
                "Refreshing credentials failed (HTTP {}): {}. Reauthorize the app to obtain a new refresh token",
                status.as_u16(),
                detail
            )));
        }

        serde_json::from_str(&body).map_err(|e| {
            NewsletterError::AuthError(format!("Malformed token response: {}", e))
        })
    }
}

/// Produces a usable, auto-refreshing Gmail credential
pub struct CredentialProvider {
    secrets: Arc<dyn SecretStore>,
    refresher: Arc<dyn TokenRefresher>,
    token_uri: String,
    required_scopes: Vec<&'static str>,
    cached: Mutex<Option<Credential>>,
}

impl CredentialProvider {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        refresher: Arc<dyn TokenRefresher>,
        token_uri: &str,
    ) -> Self {
        Self {
            secrets,
            refresher,
            token_uri: token_uri.to_string(),
            required_scopes: REQUIRED_SCOPES.to_vec(),
            cached: Mutex::new(None),
        }
    }

    /// Start from an already constructed credential instead of the secret store
    pub fn with_credential(
        credential: Credential,
        secrets: Arc<dyn SecretStore>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        let token_uri = credential.token_uri.clone();
        Self {
            secrets,
            refresher,
            token_uri,
            required_scopes: REQUIRED_SCOPES.to_vec(),
            cached: Mutex::new(Some(credential)),
        }
    }

    /// Also demand gmail.modify (needed to claim messages)
    pub fn require_modify_scope(mut self) -> Self {
        if !self.required_scopes.contains(&GMAIL_MODIFY_SCOPE) {
            self.required_scopes.push(GMAIL_MODIFY_SCOPE);
        }
        self
    }

    pub fn required_scopes(&self) -> &[&'static str] {
        &self.required_scopes
    }

    /// Return a valid credential, refreshing only if needed
    pub async fn get_credential(&self) -> Result<Credential> {
        let mut cached = self.cached.lock().await;

        let mut credential = match cached.take() {
            Some(credential) => credential,
            None => {
                debug!("Retrieving Google credentials from secret store");
                self.build_from_secrets().map_err(|e| {
                    error!(error = %e, "Google credentials unavailable");
                    e
                })?
            }
        };

        let now = Utc::now();
        if !credential.is_valid(now) {
            if credential.access_token.is_some() {
                warn!("Refreshing expired Google credentials");
            } else {
                debug!("No access token yet, performing refresh exchange");
            }
            // cache stays empty if the refresh fails
            let token = self.refresher.refresh(&credential).await.map_err(|e| {
                error!(token_uri = %credential.token_uri, error = %e, "Refreshing Google credentials failed");
                e
            })?;
            credential.apply(token, now);
        }

        let missing = credential.missing_scopes(&self.required_scopes);
        if !missing.is_empty() {
            error!(missing = ?missing, granted = ?credential.granted_scopes, "Google credentials lack required scopes");
            return Err(NewsletterError::AuthError(format!(
                "Credential is missing required scope(s): {}. Reauthorize with the full scope set",
                missing.join(", ")
            )));
        }

        debug!(scopes = ?credential.granted_scopes, "Google credentials validated");
        *cached = Some(credential.clone());
        Ok(credential)
    }

    fn build_from_secrets(&self) -> Result<Credential> {
        let requested = self.required_scopes.clone();

        if let Some(blob) = self.secrets.get_optional(secrets::GOOGLE_CREDENTIALS) {
            let parsed: AuthorizedUserJson = serde_json::from_str(&blob).map_err(|e| {
                NewsletterError::AuthError(format!("Invalid {} secret: {}", secrets::GOOGLE_CREDENTIALS, e))
            })?;
            return Ok(Credential::new(
                parsed.client_id,
                parsed.client_secret,
                parsed.refresh_token,
                parsed.token_uri.unwrap_or_else(|| self.token_uri.clone()),
                &requested,
            ));
        }

        let client_id = self.secrets.get_secret(secrets::GOOGLE_CLIENT_ID)?;
        let client_secret = self.secrets.get_secret(secrets::GOOGLE_CLIENT_SECRET)?;
        let refresh_token = self.secrets.get_secret(secrets::GOOGLE_REFRESH_TOKEN)?;

        Ok(Credential::new(
            client_id,
            client_secret,
            refresh_token,
            self.token_uri.clone(),
            &requested,
        ))
    }
}

/// Run the installed-app consent flow and return the refresh token it yields
///
/// Opens a browser redirect flow for `scopes` (see [`consent_scopes`]),
/// listening on `port` when given and on an ephemeral port otherwise. The token
/// cache lives in a temporary directory removed on every exit path.
pub async fn authorize_installed_app(
    client_secrets_path: &Path,
    port: Option<u16>,
    scopes: &[&str],
) -> Result<String> {
    run_consent_flow(client_secrets_path, port, scopes, &std::env::temp_dir()).await
}

async fn run_consent_flow(
    client_secrets_path: &Path,
    port: Option<u16>,
    scopes: &[&str],
    cache_root: &Path,
) -> Result<String> {
    let secret = yup_oauth2::read_application_secret(client_secrets_path)
        .await
        .map_err(|e| NewsletterError::AuthError(format!("Failed to read client secrets: {}", e)))?;

    let cache_dir = tempfile::Builder::new()
        .prefix("newsletter-analyst-")
        .tempdir_in(cache_root)?;
    let token_cache = cache_dir.path().join("token.json");

    let return_method = match port {
        Some(port) => yup_oauth2::InstalledFlowReturnMethod::HTTPPortRedirect(port),
        None => yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    };

    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(secret, return_method)
        .persist_tokens_to_disk(&token_cache)
        .build()
        .await
        .map_err(|e| NewsletterError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    auth.token(scopes)
        .await
        .map_err(|e| NewsletterError::AuthError(format!("Failed to obtain token: {}", e)))?;

    let cached = tokio::fs::read_to_string(&token_cache).await?;

    let value: serde_json::Value = serde_json::from_str(&cached)?;
    let refresh_token = find_refresh_token(&value).ok_or_else(|| {
        NewsletterError::AuthError(
            "Consent flow returned no refresh token; revoke the app's access and retry".to_string(),
        )
    })?;

    info!("Obtained refresh token for scopes {:?}", scopes);
    Ok(refresh_token)
}

/// Locate the first non-empty `refresh_token` in a token cache document
fn find_refresh_token(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(token) = map.get("refresh_token").and_then(|t| t.as_str()) {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
            map.values().find_map(find_refresh_token)
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_refresh_token),
        _ => None,
    }
}
