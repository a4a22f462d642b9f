//! Analyzer stage: turns a newsletter body into a structured market report
//!
//! Short newsletters take one completion call. Longer ones are split by
//! [`chunk_newsletter`], each part is analyzed on its own, and a final
//! synthesis call merges the partial analyses. The stage never returns an
//! error; faults come back as [`AnalysisResult::Error`].

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::chunker::{chunk_newsletter, estimate_tokens, truncate_chars, PARAGRAPH_SEPARATOR};
use crate::config::AnalysisConfig;
use crate::error::{NewsletterError, Result};
use crate::llm::{ChatMessage, CompletionClient, CompletionRequest};
use crate::models::{AnalysisResult, NewsletterBody};

/// System prompt describing the report layout
pub const REPORT_SYSTEM_PROMPT: &str = "\
You are a professional futures market analyst. Read the market newsletter \
provided by the user and produce a report with exactly these sections:

## Session Recap
A short summary of what happened in the last session and the prevailing bias.

## Key Levels
A markdown table with the columns | Level | Type | Significance |. Type is \
one of Support, Resistance or Pivot. Keep level ranges (e.g. 6066-70) as written.

## Quick Reference
Every level from the table as a plain list sorted from highest to lowest, one \
per line, in the form `<level> - <type>`.

Use only information present in the newsletter. Do not invent levels.";

/// System prompt for the call that merges per-part analyses
pub const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a professional trading analyst. \
Synthesize the provided analyses into a cohesive final report.";

const SYNTHESIS_FORMAT: &str = "\
Please structure the final response in our standard format:
## Session Recap
## Key Levels (markdown table: Level | Type | Significance)
## Quick Reference (all levels sorted from highest to lowest)";

/// Synthesis prompt plus how it was built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisPrompt {
    pub text: String,
    pub estimated_tokens: usize,
    /// Intermediate analyses were cut to fit the token ceiling
    pub truncated: bool,
}

fn synthesis_text(wording: &str, combined: &str) -> String {
    format!(
        "Based on the following {} analyses of the newsletter sections, provide a cohesive final analysis and trading plan:\n\n{}\n\n{}",
        wording, combined, SYNTHESIS_FORMAT
    )
}

/// Build the synthesis prompt, truncating each analysis if the full prompt is too long
pub fn plan_synthesis_prompt(
    analyses: &[String],
    token_ceiling: usize,
    truncate_chars_to: usize,
) -> SynthesisPrompt {
    let combined = analyses.join(PARAGRAPH_SEPARATOR);
    let text = synthesis_text("combined", &combined);
    let estimated_tokens = estimate_tokens(&text);

    if estimated_tokens <= token_ceiling {
        return SynthesisPrompt {
            text,
            estimated_tokens,
            truncated: false,
        };
    }

    warn!(
        tokens = estimated_tokens,
        ceiling = token_ceiling,
        "Synthesis prompt too long, truncating intermediate analyses"
    );
    let shortened: Vec<&str> = analyses
        .iter()
        .map(|analysis| truncate_chars(analysis, truncate_chars_to))
        .collect();
    let text = synthesis_text("summarized", &shortened.join(PARAGRAPH_SEPARATOR));

    SynthesisPrompt {
        estimated_tokens: estimate_tokens(&text),
        text,
        truncated: true,
    }
}

#[derive(Debug, Default)]
struct Usage {
    calls: usize,
    tokens: u64,
}

pub struct Analyzer {
    client: Arc<dyn CompletionClient>,
    settings: AnalysisConfig,
}

impl Analyzer {
    pub fn new(client: Arc<dyn CompletionClient>, settings: AnalysisConfig) -> Self {
        Self { client, settings }
    }

    /// Analyze one newsletter body
    pub async fn analyze(&self, body: &NewsletterBody) -> AnalysisResult {
        if body.text.trim().is_empty() {
            warn!(message_id = %body.message_id, "Refusing to analyze an empty newsletter");
            return AnalysisResult::error("newsletter body is empty");
        }

        let chunks = chunk_newsletter(&body.text, self.settings.chunk_char_budget);
        info!(
            message_id = %body.message_id,
            chars = body.char_count(),
            tokens = estimate_tokens(&body.text),
            chunks = chunks.len(),
            "Starting newsletter analysis"
        );

        let mut usage = Usage::default();
        let outcome = if chunks.len() == 1 {
            self.complete(REPORT_SYSTEM_PROMPT, single_prompt(&chunks[0]), &mut usage)
                .await
        } else {
            self.analyze_chunks(&chunks, &mut usage).await
        };

        match outcome {
            Ok(text) => {
                info!(
                    message_id = %body.message_id,
                    calls = usage.calls,
                    tokens = usage.tokens,
                    chars = text.chars().count(),
                    "Newsletter analysis complete"
                );
                AnalysisResult::Success {
                    text,
                    completion_calls: usage.calls,
                    total_tokens: usage.tokens,
                }
            }
            Err(e) => {
                error!(message_id = %body.message_id, calls = usage.calls, error = %e, "Newsletter analysis failed");
                let message = match e {
                    NewsletterError::AnalysisError(message) => message,
                    other => other.to_string(),
                };
                AnalysisResult::error(message)
            }
        }
    }

    async fn analyze_chunks(&self, chunks: &[String], usage: &mut Usage) -> Result<String> {
        let total = chunks.len();
        let mut analyses = Vec::with_capacity(total);

        for (index, chunk) in chunks.iter().enumerate() {
            let part = index + 1;
            let analysis = self
                .complete(REPORT_SYSTEM_PROMPT, part_prompt(part, total, chunk), usage)
                .await
                .map_err(|e| {
                    NewsletterError::AnalysisError(format!("part {} of {}: {}", part, total, e))
                })?;
            info!(part, total, chars = analysis.chars().count(), "Analyzed newsletter part");
            analyses.push(analysis);
        }

        let prompt = plan_synthesis_prompt(
            &analyses,
            self.settings.synthesis_token_ceiling,
            self.settings.synthesis_truncate_chars,
        );
        info!(
            tokens = prompt.estimated_tokens,
            truncated = prompt.truncated,
            "Synthesizing final analysis"
        );

        self.complete(SYNTHESIS_SYSTEM_PROMPT, prompt.text, usage)
            .await
            .map_err(|e| NewsletterError::AnalysisError(format!("synthesis: {}", e)))
    }

    async fn complete(&self, system: &str, user: String, usage: &mut Usage) -> Result<String> {
        let request = CompletionRequest {
            model: self.settings.model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        };

        let response = self.client.complete(&request).await?;
        usage.calls += 1;
        usage.tokens += response.total_tokens;

        if response.text.trim().is_empty() {
            return Err(NewsletterError::AnalysisError(
                "completion endpoint returned an empty response".to_string(),
            ));
        }
        Ok(response.text)
    }
}

fn single_prompt(body: &str) -> String {
    format!("Analyze the following market newsletter:\n\n{}", body)
}

fn part_prompt(part: usize, total: usize, chunk: &str) -> String {
    format!(
        "This is part {} of {} of a market newsletter. Analyze this section:\n\n{}",
        part, total, chunk
    )
}
