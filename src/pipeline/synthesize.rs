//! Synthesis stage: one cross-paper analysis per populated topic.

use crate::config::PipelineConfig;
use crate::error::DigestError;
use crate::output::{PaperReference, PaperSummary, TopicSynthesis};
use crate::pipeline::citation::format_apa;
use crate::pipeline::clean::clean_generated;
use crate::pipeline::generate::{GenerationRequest, TextGenerator, TokenUsage};
use crate::prompts::{synthesis_prompt, SYNTHESIS_SYSTEM_PROMPT};
use std::collections::BTreeMap;
use tracing::debug;

/// Synthesise the summaries of `papers` under `topic`, filed as `slug`.
///
/// Papers without a summary contribute their title and an empty summary line.
pub async fn synthesize_topic(
    generator: &dyn TextGenerator,
    topic: &str,
    slug: &str,
    papers: &[&PaperReference],
    summaries: &BTreeMap<String, PaperSummary>,
    config: &PipelineConfig,
) -> Result<(TopicSynthesis, TokenUsage), DigestError> {
    let prompt = synthesis_prompt(
        topic,
        papers.iter().map(|p| {
            let summary = summaries
                .get(&p.id)
                .map(|s| s.summary.as_str())
                .unwrap_or("");
            (p.title.as_str(), summary)
        }),
    );

    let request = GenerationRequest {
        system: SYNTHESIS_SYSTEM_PROMPT.to_string(),
        prompt,
        max_tokens: config.synthesis_max_tokens,
        label: format!("Synthesis of '{}'", topic),
    };
    let generation = generator.generate(&request).await?;
    let synthesis = clean_generated(&generation.text);
    if synthesis.is_empty() {
        return Err(DigestError::LlmApiError {
            message: format!("empty synthesis returned for topic '{}'", topic),
        });
    }
    debug!("Synthesis of '{}' over {} papers", topic, papers.len());

    Ok((
        TopicSynthesis {
            topic: topic.to_string(),
            slug: slug.to_string(),
            paper_ids: papers.iter().map(|p| p.id.clone()).collect(),
            synthesis,
            citations: papers.iter().map(|p| format_apa(p)).collect(),
        },
        generation.usage(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Citation, PaperSource};
    use crate::pipeline::generate::Generation;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EchoGenerator {
        seen: Mutex<Option<GenerationRequest>>,
    }

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<Generation, DigestError> {
            *self.seen.lock().unwrap() = Some(request.clone());
            Ok(Generation {
                text: "Both papers study attention.".into(),
                input_tokens: 10,
                output_tokens: 5,
            })
        }
    }

    fn paper(id: &str, title: &str) -> PaperReference {
        let mut p = PaperReference::new(id, title, PaperSource::Arxiv);
        p.id = id.into();
        p
    }

    #[tokio::test]
    async fn synthesis_covers_every_paper() {
        let a = paper("a", "Paper A");
        let b = paper("b", "Paper B");
        let mut summaries = BTreeMap::new();
        summaries.insert(
            "a".to_string(),
            PaperSummary {
                paper_id: "a".into(),
                title: "Paper A".into(),
                summary: "A studies attention.".into(),
                citation: Citation { apa: String::new() },
            },
        );

        let generator = EchoGenerator {
            seen: Mutex::new(None),
        };
        let (synthesis, usage) = synthesize_topic(
            &generator,
            "NLP",
            "nlp",
            &[&a, &b],
            &summaries,
            &PipelineConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(synthesis.topic, "NLP");
        assert_eq!(synthesis.slug, "nlp");
        assert_eq!(synthesis.paper_ids, vec!["a", "b"]);
        assert_eq!(synthesis.citations.len(), 2);
        assert_eq!(synthesis.synthesis, "Both papers study attention.");
        assert_eq!(usage.output_tokens, 5);

        let seen = generator.seen.lock().unwrap();
        let prompt = &seen.as_ref().unwrap().prompt;
        assert!(prompt.starts_with("Analyze these papers on NLP:\n"));
        assert!(prompt.contains("Title: Paper A\nSummary: A studies attention."));
        assert!(prompt.contains("Title: Paper B\nSummary: "));
    }
}
