//! Prompts for summary and synthesis generation.
//!
//! Every prompt lives here so wording changes touch exactly one file, and
//! unit tests can inspect the prompts without calling a model.

/// System prompt for per-paper summaries.
pub const SUMMARY_SYSTEM_PROMPT: &str = r#"You are a careful research assistant who summarises academic papers.

Rules:
1. Cover, in this order: the main research question or objective, the key methodology, the primary findings and results, the important conclusions and implications.
2. Use only information present in the supplied text. Do not invent numbers, datasets or citations.
3. Write plain prose paragraphs. No headings, bullet lists or Markdown fences.
4. Stay objective; do not praise or criticise the work."#;

/// System prompt for cross-paper topic syntheses.
pub const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You are a research analyst writing a literature synthesis across several papers on one topic.

Rules:
1. Identify common themes and consistent findings across the papers.
2. Highlight differences in methodology and any conflicting results.
3. Summarise the current state of knowledge on the topic.
4. Identify research gaps and future directions.
5. Refer to papers by title. Use only the supplied summaries.
6. Write plain prose. No Markdown fences."#;

/// User prompt asking for a summary of `text`.
///
/// `text` is expected to be truncated by the caller.
pub fn summary_prompt(title: &str, text: &str, min_words: usize, max_words: usize) -> String {
    format!(
        "Summarize the following paper in {min}–{max} words.\n\nTitle: {title}\n\n\"\"\"{text}\"\"\"",
        min = min_words,
        max = max_words,
        title = title,
        text = text.trim()
    )
}

/// User prompt asking for a synthesis of `(title, summary)` pairs on `topic`.
pub fn synthesis_prompt<'a, I>(topic: &str, papers: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let context = papers
        .into_iter()
        .map(|(title, summary)| format!("Title: {}\nSummary: {}", title, summary))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("Analyze these papers on {}:\n{}", topic, context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prompt_embeds_bounds_and_text() {
        let p = summary_prompt("Attention", "  body text ", 50, 375);
        assert!(p.contains("50–375 words"));
        assert!(p.contains("Title: Attention"));
        assert!(p.ends_with("\"\"\"body text\"\"\""));
    }

    #[test]
    fn synthesis_prompt_layout() {
        let p = synthesis_prompt("NLP", [("A", "first"), ("B", "second")]);
        assert_eq!(
            p,
            "Analyze these papers on NLP:\nTitle: A\nSummary: first\n\nTitle: B\nSummary: second"
        );
    }

    #[test]
    fn system_prompts_name_required_sections() {
        assert!(SUMMARY_SYSTEM_PROMPT.contains("methodology"));
        assert!(SYNTHESIS_SYSTEM_PROMPT.contains("research gaps"));
    }
}
