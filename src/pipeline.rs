//! Orchestrator and the entry points the host invokes
//!
//! [`Pipeline::execute`] runs fetch, analysis and delivery in order and
//! propagates the first fatal error. [`Pipeline::run_pipeline`] folds that into
//! an [`Outcome`] for callers that never want an error. The two free functions
//! at the bottom are the synchronous callable and the launch/background-task
//! pair.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::analyzer::Analyzer;
use crate::auth::{CredentialProvider, HttpTokenRefresher};
use crate::client::{GmailConnector, MailConnector};
use crate::config::Config;
use crate::error::{NewsletterError, Result, Stage};
use crate::fetcher::NewsletterFetcher;
use crate::llm::{CompletionClient, OpenAiClient};
use crate::models::{AnalysisResult, FetchOutcome};
use crate::notifier::Notifier;
use crate::secrets::{self, SecretStore};

/// Details of a delivered report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Gmail id of the analyzed newsletter
    pub newsletter_id: String,
    /// Gmail id of the sent report
    pub report_message_id: String,
    pub thread_id: Option<String>,
    pub completion_calls: usize,
    pub total_tokens: u64,
}

/// Successful end states of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    Delivered(Delivery),
    /// No unread newsletter from the sender
    NothingToDo,
}

/// Every end state of one run, failures included
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered(Delivery),
    NothingToDo,
    Failed { stage: Stage, message: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Outcome::Failed { .. })
    }
}

impl From<Result<RunReport>> for Outcome {
    fn from(result: Result<RunReport>) -> Self {
        match result {
            Ok(RunReport::Delivered(delivery)) => Outcome::Delivered(delivery),
            Ok(RunReport::NothingToDo) => Outcome::NothingToDo,
            Err(e) => Outcome::Failed {
                stage: e.stage(),
                message: e.to_string(),
            },
        }
    }
}

/// Addresses one run works with
#[derive(Debug, Clone)]
pub struct Addresses {
    /// Newsletter sender to search for
    pub sender: String,
    /// Where the report goes
    pub recipient: String,
}

pub struct Pipeline {
    credentials: CredentialProvider,
    connector: Arc<dyn MailConnector>,
    fetcher: NewsletterFetcher,
    analyzer: Analyzer,
    notifier: Notifier,
    addresses: Addresses,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        credentials: CredentialProvider,
        connector: Arc<dyn MailConnector>,
        completions: Arc<dyn CompletionClient>,
        addresses: Addresses,
    ) -> Self {
        Self {
            credentials,
            connector,
            fetcher: NewsletterFetcher::new(config.fetch.clone()),
            analyzer: Analyzer::new(completions, config.analysis.clone()),
            notifier: Notifier::new(config.report.clone()),
            addresses,
        }
    }

    /// Wire every production dependency from configuration and secrets
    pub fn from_secrets(config: &Config, store: Arc<dyn SecretStore>) -> Result<Self> {
        config.validate()?;

        let addresses = Addresses {
            sender: secrets::sender_address(store.as_ref())?,
            recipient: store.get_secret(secrets::RECIPIENT_EMAIL)?,
        };
        let api_key = store.get_secret(secrets::OPENAI_API_KEY)?;

        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NewsletterError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        let refresher = Arc::new(HttpTokenRefresher::new(http.clone(), config.gmail.request_timeout()));
        let mut credentials = CredentialProvider::new(store, refresher, &config.gmail.token_uri);
        if config.fetch.claim_after_fetch {
            credentials = credentials.require_modify_scope();
        }

        let connector = Arc::new(GmailConnector::new(
            http.clone(),
            &config.gmail.api_base_url,
            config.gmail.request_timeout(),
        ));
        let completions = Arc::new(OpenAiClient::new(
            http,
            api_key,
            &config.analysis.api_base_url,
            config.analysis.request_timeout(),
        ));

        Ok(Self::new(config, credentials, connector, completions, addresses))
    }

    pub fn addresses(&self) -> &Addresses {
        &self.addresses
    }

    /// Fetch, analyze and deliver; the first fatal condition ends the run
    pub async fn execute(&self) -> Result<RunReport> {
        let sender = self.addresses.sender.as_str();

        info!(stage = %Stage::Auth, "Stage started");
        let credential = self.credentials.get_credential().await?;
        let mail = self.connector.connect(&credential).await?;

        info!(stage = %Stage::Fetch, sender = %sender, "Stage started");
        let body = match self.fetcher.fetch_latest_unread(mail.as_ref(), sender).await? {
            FetchOutcome::Found(body) => body,
            FetchOutcome::NotFound => {
                info!(sender = %sender, "No unread newsletter, nothing to do");
                return Ok(RunReport::NothingToDo);
            }
        };
        info!(stage = %Stage::Fetch, message_id = %body.message_id, chars = body.char_count(), "Stage finished");

        info!(stage = %Stage::Analysis, message_id = %body.message_id, "Stage started");
        let (text, completion_calls, total_tokens) = match self.analyzer.analyze(&body).await {
            AnalysisResult::Success {
                text,
                completion_calls,
                total_tokens,
            } => (text, completion_calls, total_tokens),
            AnalysisResult::Error { error_message } => {
                return Err(NewsletterError::AnalysisError(error_message));
            }
        };
        info!(stage = %Stage::Analysis, tokens = total_tokens, "Stage finished");

        info!(stage = %Stage::Send, recipient = %self.addresses.recipient, "Stage started");
        // cached unless it expired during analysis
        let credential = self.credentials.get_credential().await?;
        let mail = self.connector.connect(&credential).await?;
        let sent = self
            .notifier
            .send_report(mail.as_ref(), &self.addresses.recipient, &text)
            .await?;
        info!(stage = %Stage::Send, message_id = %sent.message_id, "Stage finished");

        Ok(RunReport::Delivered(Delivery {
            newsletter_id: body.message_id,
            report_message_id: sent.message_id,
            thread_id: sent.thread_id,
            completion_calls,
            total_tokens,
        }))
    }

    /// Run once and report the outcome; never returns an error
    pub async fn run_pipeline(&self) -> Outcome {
        let outcome = Outcome::from(self.execute().await);
        match &outcome {
            Outcome::Delivered(delivery) => {
                info!(message_id = %delivery.newsletter_id, "Newsletter analysis delivered")
            }
            Outcome::NothingToDo => info!("Newsletter pipeline finished: nothing to do"),
            Outcome::Failed { stage, message } => {
                error!(stage = %stage, error = %message, "Newsletter pipeline failed")
            }
        }
        outcome
    }
}

/// `(success, message)` answer of the synchronous callable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub success: bool,
    pub message: String,
}

impl From<&Outcome> for CallResult {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Delivered(delivery) => CallResult {
                success: true,
                message: format!(
                    "Analysis of newsletter {} sent (message id {})",
                    delivery.newsletter_id, delivery.report_message_id
                ),
            },
            Outcome::NothingToDo => CallResult {
                success: true,
                message: "No unread newsletter found; nothing to do".to_string(),
            },
            Outcome::Failed { stage, message } => CallResult {
                success: false,
                message: format!("{} stage failed: {}", stage, message),
            },
        }
    }
}

/// Synchronous callable: run the pipeline and summarize it
pub async fn analyze_newsletter(pipeline: &Pipeline) -> CallResult {
    CallResult::from(&pipeline.run_pipeline().await)
}

/// Handle to a pipeline run on the tokio runtime
pub struct BackgroundTask {
    id: Uuid,
    handle: JoinHandle<Result<RunReport>>,
}

impl BackgroundTask {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run's result
    ///
    /// Run failures were already logged by the task itself; only a task that
    /// panicked or was cancelled is logged here.
    pub async fn wait(self) -> Result<RunReport> {
        let task_id = self.id;
        match self.handle.await {
            Ok(result) => {
                if result.is_ok() {
                    info!(task_id = %task_id, "Background task completed");
                }
                result
            }
            Err(join_error) => {
                let e = NewsletterError::TaskError(join_error.to_string());
                error!(task_id = %task_id, stage = %e.stage(), error = %e, "Error in newsletter analysis");
                Err(e)
            }
        }
    }
}

/// Start the pipeline in the background and return without waiting
///
/// The task logs its own failure, so dropping the handle loses nothing.
pub fn launch_newsletter_analysis(pipeline: Arc<Pipeline>) -> BackgroundTask {
    let id = Uuid::new_v4();
    let span = info_span!("newsletter_task", task_id = %id);

    let handle = tokio::spawn(
        async move {
            let result = pipeline.execute().await;
            if let Err(e) = &result {
                error!(stage = %e.stage(), error = %e, "Error in newsletter analysis");
            }
            result
        }
        .instrument(span),
    );
    info!(task_id = %id, "Launched newsletter analysis task");

    BackgroundTask { id, handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery() -> Delivery {
        Delivery {
            newsletter_id: "n1".to_string(),
            report_message_id: "r1".to_string(),
            thread_id: None,
            completion_calls: 1,
            total_tokens: 10,
        }
    }

    #[test]
    fn test_outcome_from_result() {
        assert_eq!(
            Outcome::from(Ok(RunReport::Delivered(delivery()))),
            Outcome::Delivered(delivery())
        );
        assert_eq!(Outcome::from(Ok(RunReport::NothingToDo)), Outcome::NothingToDo);

        let failed = Outcome::from(Err(NewsletterError::SendError("quota".to_string())));
        match failed {
            Outcome::Failed { stage, message } => {
                assert_eq!(stage, Stage::Send);
                assert!(message.contains("quota"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_nothing_to_do_is_a_successful_call() {
        let result = CallResult::from(&Outcome::NothingToDo);
        assert!(result.success);
        assert!(result.message.contains("nothing to do"));
    }

    #[test]
    fn test_failed_call_names_stage() {
        let result = CallResult::from(&Outcome::Failed {
            stage: Stage::Fetch,
            message: "Newsletter fetch failed: boom".to_string(),
        });
        assert!(!result.success);
        assert_eq!(result.message, "fetch stage failed: Newsletter fetch failed: boom");
    }

    #[test]
    fn test_delivered_call_mentions_ids() {
        let result = CallResult::from(&Outcome::Delivered(delivery()));
        assert!(result.success);
        assert!(result.message.contains("n1"));
        assert!(result.message.contains("r1"));
    }

    #[test]
    fn test_from_secrets_requires_recipient() {
        let secrets = crate::secrets::StaticSecretStore::new()
            .with(secrets::SENDER_EMAIL, "desk@futures.example")
            .with(secrets::OPENAI_API_KEY, "sk-test");
        let err = Pipeline::from_secrets(&Config::default(), Arc::new(secrets))
            .err()
            .unwrap();
        assert!(matches!(err, NewsletterError::SecretNotFound(_)));
    }
}
