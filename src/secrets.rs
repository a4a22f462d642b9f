//! Secret lookup by name
//!
//! Secrets (API keys, OAuth client data, addresses) never live in `config.toml`.
//! They are resolved through a [`SecretStore`], which can be backed by a flat
//! TOML file, by environment variables, or by an in-memory map.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{NewsletterError, Result};

pub const OPENAI_API_KEY: &str = "openai_api_key";
pub const GOOGLE_CLIENT_ID: &str = "google_client_id";
pub const GOOGLE_CLIENT_SECRET: &str = "google_client_secret";
pub const GOOGLE_REFRESH_TOKEN: &str = "google_refresh_token";
/// Authorized-user JSON blob, preferred over the three separate keys
pub const GOOGLE_CREDENTIALS: &str = "google_credentials";
pub const SENDER_EMAIL: &str = "sender_email";
pub const NEWSLETTER_SENDER_EMAIL: &str = "newsletter_sender_email";
pub const RECIPIENT_EMAIL: &str = "recipient_email";

/// Every key the pipeline knows how to use
pub const RECOGNIZED_KEYS: &[&str] = &[
    OPENAI_API_KEY,
    GOOGLE_CLIENT_ID,
    GOOGLE_CLIENT_SECRET,
    GOOGLE_REFRESH_TOKEN,
    GOOGLE_CREDENTIALS,
    SENDER_EMAIL,
    NEWSLETTER_SENDER_EMAIL,
    RECIPIENT_EMAIL,
];

/// Key -> string lookup
pub trait SecretStore: Send + Sync {
    /// Fetch a secret, failing with `SecretNotFound` if it is missing or blank
    fn get_secret(&self, name: &str) -> Result<String>;

    /// Fetch a secret that may legitimately be absent
    fn get_optional(&self, name: &str) -> Option<String> {
        self.get_secret(name).ok()
    }
}

impl<S: SecretStore + ?Sized> SecretStore for Arc<S> {
    fn get_secret(&self, name: &str) -> Result<String> {
        self.as_ref().get_secret(name)
    }
}

/// Resolve the newsletter sender address, accepting the legacy key name
pub fn sender_address(store: &dyn SecretStore) -> Result<String> {
    store
        .get_secret(SENDER_EMAIL)
        .or_else(|_| store.get_secret(NEWSLETTER_SENDER_EMAIL))
        .map_err(|_| {
            NewsletterError::SecretNotFound(format!(
                "{} (or {})",
                SENDER_EMAIL, NEWSLETTER_SENDER_EMAIL
            ))
        })
}

/// In-memory secret store
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    values: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    /// Load a flat TOML table of string values (e.g. `secrets.toml`)
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            NewsletterError::ConfigError(format!("Failed to read secrets file {:?}: {}", path, e))
        })?;

        let table: toml::Table = toml::from_str(&content).map_err(|e| {
            NewsletterError::ConfigError(format!("Failed to parse secrets file {:?}: {}", path, e))
        })?;

        let mut values = HashMap::new();
        for (key, value) in table {
            match value {
                toml::Value::String(s) => {
                    values.insert(key, s);
                }
                _ => {
                    return Err(NewsletterError::ConfigError(format!(
                        "Secret '{}' in {:?} must be a string",
                        key, path
                    )));
                }
            }
        }

        tracing::debug!("Loaded {} secrets from {:?}", values.len(), path);
        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SecretStore for StaticSecretStore {
    fn get_secret(&self, name: &str) -> Result<String> {
        match self.values.get(name) {
            Some(value) if !value.trim().is_empty() => Ok(value.clone()),
            _ => Err(NewsletterError::SecretNotFound(name.to_string())),
        }
    }
}

/// Secrets injected as environment variables, e.g. `NEWSLETTER_OPENAI_API_KEY`
#[derive(Debug, Clone)]
pub struct EnvSecretStore {
    prefix: String,
}

impl Default for EnvSecretStore {
    fn default() -> Self {
        Self::with_prefix("NEWSLETTER_")
    }
}

impl EnvSecretStore {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn variable_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name.to_uppercase())
    }
}

impl SecretStore for EnvSecretStore {
    fn get_secret(&self, name: &str) -> Result<String> {
        let variable = self.variable_name(name);
        match std::env::var(&variable) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(NewsletterError::SecretNotFound(format!("{} (env {})", name, variable))),
        }
    }
}

/// Consults each store in order; the first one holding the key wins
#[derive(Default, Clone)]
pub struct LayeredSecretStore {
    layers: Vec<Arc<dyn SecretStore>>,
}

impl LayeredSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.layers.push(store);
        self
    }
}

impl SecretStore for LayeredSecretStore {
    fn get_secret(&self, name: &str) -> Result<String> {
        self.layers
            .iter()
            .find_map(|layer| layer.get_secret(name).ok())
            .ok_or_else(|| NewsletterError::SecretNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::NamedTempFile;

    #[test]
    fn test_static_store_lookup() {
        let store = StaticSecretStore::new().with(RECIPIENT_EMAIL, "me@example.com");
        assert_eq!(store.get_secret(RECIPIENT_EMAIL).unwrap(), "me@example.com");

        let missing = store.get_secret(OPENAI_API_KEY);
        assert!(matches!(missing, Err(NewsletterError::SecretNotFound(_))));
    }

    #[test]
    fn test_blank_secret_is_missing() {
        let store = StaticSecretStore::new().with(OPENAI_API_KEY, "   ");
        assert!(store.get_secret(OPENAI_API_KEY).is_err());
        assert!(store.get_optional(OPENAI_API_KEY).is_none());
    }

    #[test]
    fn test_sender_address_fallback_key() {
        let store = StaticSecretStore::new().with(NEWSLETTER_SENDER_EMAIL, "desk@futures.example");
        assert_eq!(sender_address(&store).unwrap(), "desk@futures.example");

        let store = store.with(SENDER_EMAIL, "primary@futures.example");
        assert_eq!(sender_address(&store).unwrap(), "primary@futures.example");
    }

    #[test]
    fn test_sender_address_missing() {
        let store = StaticSecretStore::new();
        let err = sender_address(&store).unwrap_err();
        assert!(err.to_string().contains("newsletter_sender_email"));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(
            temp_file.path(),
            "openai_api_key = \"sk-test\"\nrecipient_email = \"me@example.com\"\n",
        )
        .await
        .unwrap();

        let store = StaticSecretStore::from_file(temp_file.path()).await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get_secret(OPENAI_API_KEY).unwrap(), "sk-test");
    }

    #[tokio::test]
    async fn test_load_from_file_rejects_non_string() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "openai_api_key = 42\n")
            .await
            .unwrap();

        let result = StaticSecretStore::from_file(temp_file.path()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("must be a string"));
    }

    #[test]
    #[serial]
    fn test_env_store() {
        let store = EnvSecretStore::default();
        assert_eq!(store.variable_name(RECIPIENT_EMAIL), "NEWSLETTER_RECIPIENT_EMAIL");

        std::env::set_var("NEWSLETTER_RECIPIENT_EMAIL", "env@example.com");
        assert_eq!(store.get_secret(RECIPIENT_EMAIL).unwrap(), "env@example.com");

        std::env::remove_var("NEWSLETTER_RECIPIENT_EMAIL");
        assert!(store.get_secret(RECIPIENT_EMAIL).is_err());
    }

    #[test]
    #[serial]
    fn test_layered_store_precedence() {
        std::env::set_var("NLTEST_OPENAI_API_KEY", "from-env");

        let file_layer = StaticSecretStore::new()
            .with(OPENAI_API_KEY, "from-file")
            .with(RECIPIENT_EMAIL, "file@example.com");

        let store = LayeredSecretStore::new()
            .push(Arc::new(EnvSecretStore::with_prefix("NLTEST_")))
            .push(Arc::new(file_layer));

        assert_eq!(store.get_secret(OPENAI_API_KEY).unwrap(), "from-env");
        assert_eq!(store.get_secret(RECIPIENT_EMAIL).unwrap(), "file@example.com");
        assert!(store.get_secret(GOOGLE_CLIENT_ID).is_err());

        std::env::remove_var("NLTEST_OPENAI_API_KEY");
    }
}
