//! Command-line interface

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::chunker::truncate_chars;
use crate::error::Result;
use crate::secrets::{self, EnvSecretStore, LayeredSecretStore, SecretStore, StaticSecretStore};

#[derive(Parser, Debug)]
#[command(name = "newsletter-analyst")]
#[command(version)]
#[command(about = "Analyze the latest market newsletter and email the report", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to a flat TOML file of secrets; NEWSLETTER_* environment variables take precedence
    #[arg(long, default_value = "secrets.toml")]
    pub secrets: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch, analyze and send the latest newsletter, then report the result
    Run,

    /// Start the analysis as a background task and wait for it
    Launch,

    /// Run the OAuth consent flow and print a refresh token
    Authorize {
        /// OAuth client secrets JSON downloaded from the Google Cloud console
        #[arg(long, default_value = "client_secret.json")]
        client_secrets: PathBuf,

        /// Local port for the redirect listener
        #[arg(long)]
        port: Option<u16>,

        /// Also request gmail.modify for claim_after_fetch (implied when the config enables it)
        #[arg(long)]
        claim: bool,
    },

    /// Show which secrets are configured and validate the config file
    CheckConfig,

    /// Generate example configuration file
    InitConfig {
        /// Where to write it (defaults to --config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Environment variables first, then the secrets file if it exists
pub async fn load_secret_store(secrets_file: &Path) -> Result<LayeredSecretStore> {
    let mut store = LayeredSecretStore::new().push(Arc::new(EnvSecretStore::default()));

    if secrets_file.exists() {
        let file_store = StaticSecretStore::from_file(secrets_file).await?;
        info!("Loaded {} secret(s) from {:?}", file_store.len(), secrets_file);
        store = store.push(Arc::new(file_store));
    } else {
        debug!("No secrets file at {:?}, using environment only", secrets_file);
    }

    Ok(store)
}

/// Presence of one recognized secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretStatus {
    pub key: &'static str,
    pub configured: bool,
    /// Leading characters, only for values that are safe to show
    pub preview: Option<String>,
}

/// Report every recognized secret without revealing values
///
/// Only the client id gets a preview (its first 6 characters).
pub fn secret_report(store: &dyn SecretStore) -> Vec<SecretStatus> {
    secrets::RECOGNIZED_KEYS
        .iter()
        .map(|&key| {
            let value = store.get_optional(key);
            let preview = match (&value, key) {
                (Some(v), secrets::GOOGLE_CLIENT_ID) => Some(format!("{}...", truncate_chars(v, 6))),
                _ => None,
            };
            SecretStatus {
                key,
                configured: value.is_some(),
                preview,
            }
        })
        .collect()
}

/// Problems that stop a run before it starts
pub fn missing_required_secrets(store: &dyn SecretStore) -> Vec<String> {
    let mut missing = Vec::new();

    for key in [secrets::OPENAI_API_KEY, secrets::RECIPIENT_EMAIL] {
        if store.get_optional(key).is_none() {
            missing.push(key.to_string());
        }
    }
    if secrets::sender_address(store).is_err() {
        missing.push(format!("{} (or {})", secrets::SENDER_EMAIL, secrets::NEWSLETTER_SENDER_EMAIL));
    }

    let has_blob = store.get_optional(secrets::GOOGLE_CREDENTIALS).is_some();
    if !has_blob {
        for key in [
            secrets::GOOGLE_CLIENT_ID,
            secrets::GOOGLE_CLIENT_SECRET,
            secrets::GOOGLE_REFRESH_TOKEN,
        ] {
            if store.get_optional(key).is_none() {
                missing.push(key.to_string());
            }
        }
    }

    missing
}
