use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{NewsletterError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub gmail: GmailConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    #[serde(default = "default_gmail_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_gmail_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_gmail_api_base_url(),
            token_uri: default_token_uri(),
            request_timeout_secs: default_gmail_timeout_secs(),
        }
    }
}

impl GmailConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Which MIME type the fetcher tries first
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BodyPreference {
    Html,
    Plain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_body_preference")]
    pub body_preference: BodyPreference,
    /// Remove the UNREAD label right after a successful fetch
    #[serde(default)]
    pub claim_after_fetch: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            body_preference: default_body_preference(),
            claim_after_fetch: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_llm_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_chunk_char_budget")]
    pub chunk_char_budget: usize,
    #[serde(default = "default_synthesis_token_ceiling")]
    pub synthesis_token_ceiling: usize,
    #[serde(default = "default_synthesis_truncate_chars")]
    pub synthesis_truncate_chars: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_llm_api_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            request_timeout_secs: default_llm_timeout_secs(),
            chunk_char_budget: default_chunk_char_budget(),
            synthesis_token_ceiling: default_synthesis_token_ceiling(),
            synthesis_truncate_chars: default_synthesis_truncate_chars(),
        }
    }
}

impl AnalysisConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_report_sender")]
    pub sender: String,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            sender: default_report_sender(),
            subject_prefix: default_subject_prefix(),
        }
    }
}

fn default_gmail_api_base_url() -> String {
    "https://gmail.googleapis.com/gmail/v1/users/me".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_gmail_timeout_secs() -> u64 {
    30
}

fn default_body_preference() -> BodyPreference {
    BodyPreference::Html
}

fn default_llm_api_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_output_tokens() -> u32 {
    2000
}

fn default_llm_timeout_secs() -> u64 {
    120
}

fn default_chunk_char_budget() -> usize {
    12_000
}

fn default_synthesis_token_ceiling() -> usize {
    6000
}

fn default_synthesis_truncate_chars() -> usize {
    1500
}

fn default_report_sender() -> String {
    "Market Newsletter <noreply@market-newsletter.com>".to_string()
}

fn default_subject_prefix() -> String {
    "Market Analysis Report".to_string()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| NewsletterError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| NewsletterError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    NewsletterError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| NewsletterError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| NewsletterError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("gmail.api_base_url", &self.gmail.api_base_url),
            ("gmail.token_uri", &self.gmail.token_uri),
            ("analysis.api_base_url", &self.analysis.api_base_url),
        ] {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(NewsletterError::ConfigError(format!(
                    "{} must be an http(s) URL, got '{}'",
                    name, url
                )));
            }
        }

        if self.gmail.request_timeout_secs == 0 {
            return Err(NewsletterError::ConfigError(
                "gmail.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.analysis.model.trim().is_empty() {
            return Err(NewsletterError::ConfigError(
                "analysis.model cannot be empty".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.analysis.temperature) {
            return Err(NewsletterError::ConfigError(format!(
                "analysis.temperature must be between 0.0 and 2.0, got {}",
                self.analysis.temperature
            )));
        }

        if self.analysis.max_output_tokens == 0 {
            return Err(NewsletterError::ConfigError(
                "analysis.max_output_tokens must be greater than 0".to_string(),
            ));
        }

        if self.analysis.request_timeout_secs == 0 {
            return Err(NewsletterError::ConfigError(
                "analysis.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        // Below a few hundred characters every paragraph gets hard-split
        if self.analysis.chunk_char_budget < 500 {
            return Err(NewsletterError::ConfigError(
                "analysis.chunk_char_budget must be at least 500".to_string(),
            ));
        }

        if self.analysis.synthesis_token_ceiling == 0 {
            return Err(NewsletterError::ConfigError(
                "analysis.synthesis_token_ceiling must be greater than 0".to_string(),
            ));
        }

        if self.analysis.synthesis_truncate_chars == 0 {
            return Err(NewsletterError::ConfigError(
                "analysis.synthesis_truncate_chars must be greater than 0".to_string(),
            ));
        }

        if self.report.sender.trim().is_empty() {
            return Err(NewsletterError::ConfigError(
                "report.sender cannot be empty".to_string(),
            ));
        }

        if self.report.subject_prefix.contains(['\r', '\n']) {
            return Err(NewsletterError::ConfigError(
                "report.subject_prefix cannot contain line breaks".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(
            config.gmail.api_base_url,
            "https://gmail.googleapis.com/gmail/v1/users/me"
        );
        assert_eq!(config.gmail.token_uri, "https://oauth2.googleapis.com/token");
        assert_eq!(config.gmail.request_timeout_secs, 30);

        assert_eq!(config.fetch.body_preference, BodyPreference::Html);
        assert!(!config.fetch.claim_after_fetch);

        assert_eq!(config.analysis.model, "gpt-4o");
        assert_eq!(config.analysis.temperature, 0.7);
        assert_eq!(config.analysis.synthesis_token_ceiling, 6000);
        assert_eq!(config.analysis.synthesis_truncate_chars, 1500);

        assert_eq!(
            config.report.sender,
            "Market Newsletter <noreply@market-newsletter.com>"
        );
        assert_eq!(config.report.subject_prefix, "Market Analysis Report");
    }

    #[test]
    fn test_config_validation_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_bad_url() {
        let mut config = Config::default();
        config.analysis.api_base_url = "api.openai.com/v1".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("analysis.api_base_url"));
    }

    #[test]
    fn test_config_validation_temperature_range() {
        let mut config = Config::default();

        config.analysis.temperature = 0.0;
        assert!(config.validate().is_ok());

        config.analysis.temperature = 2.0;
        assert!(config.validate().is_ok());

        config.analysis.temperature = 2.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_timeouts() {
        let mut config = Config::default();
        config.gmail.request_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.analysis.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_chunk_budget() {
        let mut config = Config::default();
        config.analysis.chunk_char_budget = 100;
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("at least 500"));
    }

    #[test]
    fn test_config_validation_subject_prefix_newline() {
        let mut config = Config::default();
        config.report.subject_prefix = "Report\r\nBcc: someone@example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            [fetch]
            body_preference = "plain"
            claim_after_fetch = true

            [analysis]
            model = "gpt-4o-mini"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.fetch.body_preference, BodyPreference::Plain);
        assert!(config.fetch.claim_after_fetch);
        assert_eq!(config.analysis.model, "gpt-4o-mini");
        assert_eq!(config.analysis.max_output_tokens, 2000);
        assert_eq!(config.gmail.request_timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let config = Config::load(Path::new("/nonexistent/newsletter/config.toml"))
            .await
            .unwrap();
        assert_eq!(config.analysis.model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let temp_file = NamedTempFile::new().unwrap();

        let mut config = Config::default();
        config.analysis.model = "gpt-4.1".to_string();
        config.fetch.body_preference = BodyPreference::Plain;
        config.save(temp_file.path()).await.unwrap();

        let loaded = Config::load(temp_file.path()).await.unwrap();
        assert_eq!(loaded.analysis.model, "gpt-4.1");
        assert_eq!(loaded.fetch.body_preference, BodyPreference::Plain);
    }

    #[tokio::test]
    async fn test_load_invalid_toml() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "[analysis\nmodel = ")
            .await
            .unwrap();

        let result = Config::load(temp_file.path()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Failed to parse"));
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_values() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "[analysis]\ntemperature = 5.0\n")
            .await
            .unwrap();

        let result = Config::load(temp_file.path()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("temperature"));
    }
}
