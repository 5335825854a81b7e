//! Summarization stage: one summary and one citation per paper.

use crate::config::PipelineConfig;
use crate::error::DigestError;
use crate::output::{PaperReference, PaperSummary};
use crate::pipeline::citation::format_apa;
use crate::pipeline::clean::{clean_generated, clip_words, truncate_chars};
use crate::pipeline::generate::{GenerationRequest, TextGenerator, TokenUsage};
use crate::prompts::{summary_prompt, SUMMARY_SYSTEM_PROMPT};
use tracing::debug;

/// Summarise one paper.
///
/// Only the first `summary_input_chars` characters of the text are sent.
/// The returned summary never exceeds `summary_max_words()` words.
pub async fn summarize_paper(
    generator: &dyn TextGenerator,
    paper: &PaperReference,
    config: &PipelineConfig,
) -> Result<(PaperSummary, TokenUsage), DigestError> {
    let text = paper.text().ok_or_else(|| DigestError::EmptyText {
        source_name: paper.identifier.clone(),
    })?;
    let input = truncate_chars(text, config.summary_input_chars);
    let max_words = config.summary_max_words();

    let request = GenerationRequest {
        system: SUMMARY_SYSTEM_PROMPT.to_string(),
        prompt: summary_prompt(&paper.title, input, config.summary_min_words, max_words),
        max_tokens: config.summary_max_tokens,
        label: format!("Summary of '{}'", paper.title),
    };
    let generation = generator.generate(&request).await?;

    let summary = clip_words(&clean_generated(&generation.text), max_words);
    if summary.is_empty() {
        return Err(DigestError::LlmApiError {
            message: format!("empty summary returned for '{}'", paper.title),
        });
    }
    debug!(
        "Summary of '{}': {} words",
        paper.title,
        summary.split_whitespace().count()
    );

    Ok((
        PaperSummary {
            paper_id: paper.id.clone(),
            title: paper.title.clone(),
            summary,
            citation: format_apa(paper),
        },
        generation.usage(),
    ))
}
