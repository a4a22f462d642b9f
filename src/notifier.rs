//! Notifier stage: emails the finished report

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use chrono::NaiveDate;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use tracing::{error, info};

use crate::client::MailClient;
use crate::config::ReportConfig;
use crate::error::{NewsletterError, Result};
use crate::models::{OutboundEmail, SendOutcome};

/// `"<prefix> - YYYY-MM-DD"`
pub fn report_subject(prefix: &str, date: NaiveDate) -> String {
    format!("{} - {}", prefix, date.format("%Y-%m-%d"))
}

fn parse_mailbox(role: &str, address: &str) -> Result<Mailbox> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| NewsletterError::SendError(format!("invalid {} address {:?}: {}", role, address, e)))
}

/// Format an email as RFC 5322 and encode it the way `messages.send` expects
pub fn encode_raw(email: &OutboundEmail) -> Result<String> {
    let message = lettre::Message::builder()
        .from(parse_mailbox("sender", &email.from)?)
        .to(parse_mailbox("recipient", &email.to)?)
        .subject(email.subject.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(email.body.clone())
        .map_err(|e| NewsletterError::SendError(format!("failed to build report email: {}", e)))?;

    Ok(URL_SAFE.encode(message.formatted()))
}

pub struct Notifier {
    settings: ReportConfig,
}

impl Notifier {
    pub fn new(settings: ReportConfig) -> Self {
        Self { settings }
    }

    /// Build today's report email
    pub fn compose(&self, recipient: &str, analysis_text: &str) -> OutboundEmail {
        self.compose_for_date(recipient, analysis_text, chrono::Local::now().date_naive())
    }

    pub fn compose_for_date(&self, recipient: &str, analysis_text: &str, date: NaiveDate) -> OutboundEmail {
        OutboundEmail {
            to: recipient.trim().to_string(),
            from: self.settings.sender.clone(),
            subject: report_subject(&self.settings.subject_prefix, date),
            body: analysis_text.to_string(),
        }
    }

    /// Send the analysis to `recipient`
    ///
    /// Address problems fail before any network call. Every failure is a `SendError`.
    pub async fn send_report(
        &self,
        mail: &dyn MailClient,
        recipient: &str,
        analysis_text: &str,
    ) -> Result<SendOutcome> {
        let email = self.compose(recipient, analysis_text);
        let raw = encode_raw(&email)?;

        info!(
            recipient = %email.to,
            subject = %email.subject,
            chars = analysis_text.chars().count(),
            "Sending analysis report"
        );

        let outcome = mail.send_raw(&raw).await.map_err(|e| {
            error!(recipient = %email.to, error = %e, "Gmail API send failed");
            match e {
                NewsletterError::SendError(_) => e,
                other => NewsletterError::SendError(other.to_string()),
            }
        })?;

        info!(message_id = %outcome.message_id, "Report sent");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mail_parser::MessageParser;

    fn notifier() -> Notifier {
        Notifier::new(ReportConfig::default())
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 7).unwrap()
    }

    #[test]
    fn test_subject_contains_iso_date() {
        assert_eq!(
            report_subject("Market Analysis Report", date()),
            "Market Analysis Report - 2025-03-07"
        );
    }

    #[test]
    fn test_compose_uses_configured_sender() {
        let email = notifier().compose_for_date(" trader@example.com ", "report", date());
        assert_eq!(email.to, "trader@example.com");
        assert_eq!(email.from, "Market Newsletter <noreply@market-newsletter.com>");
        assert_eq!(email.subject, "Market Analysis Report - 2025-03-07");
    }

    #[test]
    fn test_raw_round_trip() {
        let text = "## Session Recap\nBuyers defended 6066–70.\n\n| Level | Type |\n|---|---|\n| 6200 | Resistance |";
        let email = notifier().compose_for_date("trader@example.com", text, date());
        let raw = encode_raw(&email).unwrap();

        assert!(!raw.contains('+') && !raw.contains('/'));
        let bytes = URL_SAFE.decode(&raw).unwrap();
        let parsed = MessageParser::default().parse(&bytes).unwrap();

        assert_eq!(parsed.subject(), Some("Market Analysis Report - 2025-03-07"));
        let to = parsed.to().and_then(|a| a.first()).and_then(|a| a.address());
        assert_eq!(to, Some("trader@example.com"));
        let from = parsed.from().and_then(|a| a.first());
        assert_eq!(from.and_then(|a| a.address()), Some("noreply@market-newsletter.com"));
        assert_eq!(from.and_then(|a| a.name()), Some("Market Newsletter"));

        let body = parsed.body_text(0).unwrap().replace("\r\n", "\n");
        assert_eq!(body.trim_end(), text);
    }

    #[test]
    fn test_invalid_recipient_is_send_error() {
        let email = notifier().compose_for_date("not an address", "report", date());
        let err = encode_raw(&email).unwrap_err();
        assert!(matches!(err, NewsletterError::SendError(_)));
        assert!(err.to_string().contains("recipient"));
    }
}
