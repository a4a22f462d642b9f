//! Newsletter Analyst
//!
//! Fetches the latest unread market newsletter from Gmail, has an LLM turn it
//! into a structured report and emails the report to a fixed recipient.
//!
//! # Overview
//!
//! One run is four sequential stages:
//! - **Credentials**: OAuth refresh-token credential with scope checks
//! - **Fetch**: newest unread message from the configured sender, body extraction
//! - **Analysis**: paragraph chunking, per-chunk completions and a synthesis pass
//! - **Delivery**: RFC 5322 report email sent through the Gmail API
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use newsletter_analyst::{config::Config, pipeline, secrets::EnvSecretStore, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let pipeline = Pipeline::from_secrets(&config, Arc::new(EnvSecretStore::default()))?;
//!
//!     let result = pipeline::analyze_newsletter(&pipeline).await;
//!     println!("{}: {}", result.success, result.message);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - Credentials, token refresh and the consent flow
//! - [`client`] - Gmail REST client behind the [`MailClient`] trait
//! - [`fetcher`] - Newsletter search and MIME body extraction
//! - [`chunker`] - Paragraph chunking and token estimates
//! - [`llm`] - Chat-completions client behind the [`CompletionClient`] trait
//! - [`analyzer`] - Report prompts, chunk analysis and synthesis
//! - [`notifier`] - Report email composition and sending
//! - [`pipeline`] - Orchestration and the callable/background entry points
//! - [`config`] - Configuration management
//! - [`secrets`] - Secret stores
//! - [`error`] - Error types and result aliases
//! - [`cli`] - Command-line interface

pub mod analyzer;
pub mod auth;
pub mod chunker;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod llm;
pub mod models;
pub mod notifier;
pub mod pipeline;
pub mod secrets;

// Re-export commonly used types for convenience
pub use error::{NewsletterError, Result, Stage};

// Core data models
pub use models::{
    AnalysisResult, BodyKind, FetchOutcome, Message, MimePart, NewsletterBody, OutboundEmail,
    SendOutcome,
};

// Config types
pub use config::{AnalysisConfig, BodyPreference, Config, FetchConfig, GmailConfig, ReportConfig};

// Stage components
pub use analyzer::Analyzer;
pub use auth::{Credential, CredentialProvider, TokenRefresher};
pub use fetcher::NewsletterFetcher;
pub use notifier::Notifier;

// Provider traits
pub use client::{GmailClient, GmailConnector, MailClient, MailConnector};
pub use llm::{CompletionClient, OpenAiClient};
pub use secrets::SecretStore;

// Orchestration
pub use pipeline::{BackgroundTask, CallResult, Outcome, Pipeline, RunReport};

// CLI types (for binary usage)
pub use cli::{Cli, Commands};
