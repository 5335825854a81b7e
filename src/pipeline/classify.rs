//! Classification stage: score each paper against the user's topic labels.
//!
//! Scores are cosine similarities between sentence embeddings of the paper
//! text and of each topic label. Topic labels are embedded once per run.

use crate::config::{EmbeddingBackend, PipelineConfig};
use crate::error::DigestError;
use crate::output::{Classification, PaperReference, TopicScore};
use crate::pipeline::clean::truncate_chars;
use crate::pipeline::input::build_http_client;
use async_trait::async_trait;
use edgequake_llm::EmbeddingProvider;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Label used when the request names no topics.
pub const GENERAL_TOPIC: &str = "General";

/// Turns texts into embedding vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed every text; the result has one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DigestError>;
}

/// [`Embedder`] backed by an edgequake-llm embedding provider.
pub struct ProviderEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    timeout_secs: u64,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, timeout_secs: u64) -> Self {
        Self {
            provider,
            timeout_secs,
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DigestError> {
        let call = self.provider.embed(texts);
        match tokio::time::timeout(Duration::from_secs(self.timeout_secs), call).await {
            Ok(Ok(vectors)) => Ok(vectors),
            Ok(Err(e)) => Err(DigestError::EmbeddingFailed {
                message: e.to_string(),
            }),
            Err(_) => Err(DigestError::ApiTimeout {
                operation: "Embedding request".into(),
                secs: self.timeout_secs,
            }),
        }
    }
}

/// [`Embedder`] calling a Hugging Face feature-extraction endpoint.
///
/// Sends `HF_TOKEN` as a bearer token when it is set.
pub struct HuggingFaceEmbedder {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

/// Feature-extraction output: pooled sentence vectors, or per-token vectors
/// for models without a pooling layer.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeatureExtraction {
    Sentences(Vec<Vec<f32>>),
    Tokens(Vec<Vec<Vec<f32>>>),
}

impl HuggingFaceEmbedder {
    pub fn new(config: &PipelineConfig, model: &str) -> Result<Self, DigestError> {
        Ok(Self {
            client: build_http_client(&config.user_agent, config.api_timeout_secs)?,
            url: format!(
                "{}/{}/pipeline/feature-extraction",
                config.endpoints.huggingface.trim_end_matches('/'),
                model
            ),
            token: std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }
}

#[async_trait]
impl Embedder for HuggingFaceEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DigestError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "inputs": texts }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let failed = |message: String| DigestError::EmbeddingFailed { message };
        let response = request.send().await.map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {}: {}", status, truncate_chars(&body, 200))));
        }

        let parsed: FeatureExtraction = response
            .json()
            .await
            .map_err(|e| failed(format!("unexpected response: {}", e)))?;
        Ok(match parsed {
            FeatureExtraction::Sentences(v) => v,
            FeatureExtraction::Tokens(v) => v.iter().map(|tokens| mean_pool(tokens)).collect(),
        })
    }
}

/// Average per-token vectors into one sentence vector.
fn mean_pool(tokens: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = tokens.first() else {
        return Vec::new();
    };
    let mut sum = vec![0.0f32; first.len()];
    for token in tokens {
        for (acc, x) in sum.iter_mut().zip(token) {
            *acc += x;
        }
    }
    let n = tokens.len() as f32;
    sum.iter_mut().for_each(|x| *x /= n);
    sum
}

/// Build the embedder selected by the configuration.
pub fn embedder_from_config(
    config: &PipelineConfig,
    provider: Option<Arc<dyn EmbeddingProvider>>,
) -> Result<Arc<dyn Embedder>, DigestError> {
    match &config.embedding {
        EmbeddingBackend::HuggingFace { model } => {
            Ok(Arc::new(HuggingFaceEmbedder::new(config, model)?))
        }
        EmbeddingBackend::Provider => {
            let provider = provider.ok_or_else(|| DigestError::ProviderNotConfigured {
                provider: "embedding".into(),
                hint: "Set OPENAI_API_KEY (or another edgequake-llm provider), \
                       or use --embedding huggingface."
                    .into(),
            })?;
            Ok(Arc::new(ProviderEmbedder::new(provider, config.api_timeout_secs)))
        }
    }
}

/// Cosine similarity between two vectors; 0 for empty, zero or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Classification used when no topics were supplied.
pub fn general(paper_id: &str) -> Classification {
    Classification {
        paper_id: paper_id.to_string(),
        primary_topic: GENERAL_TOPIC.to_string(),
        secondary_topics: Vec::new(),
        scores: vec![TopicScore {
            topic: GENERAL_TOPIC.to_string(),
            score: 1.0,
        }],
    }
}

/// Topic labels and their embeddings.
#[derive(Debug, Clone)]
pub struct TopicSpace {
    topics: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl TopicSpace {
    /// Embed the topic labels.
    pub async fn embed(embedder: &dyn Embedder, topics: &[String]) -> Result<Self, DigestError> {
        let vectors = embedder.embed_batch(topics).await?;
        if vectors.len() != topics.len() {
            return Err(DigestError::EmbeddingFailed {
                message: format!(
                    "expected {} topic vectors, got {}",
                    topics.len(),
                    vectors.len()
                ),
            });
        }
        debug!("Embedded {} topic labels", topics.len());
        Ok(Self {
            topics: topics.to_vec(),
            vectors,
        })
    }

    /// Embed a paper's text and score it against every topic.
    pub async fn classify(
        &self,
        embedder: &dyn Embedder,
        paper: &PaperReference,
        config: &PipelineConfig,
    ) -> Result<Classification, DigestError> {
        let text = paper.text().ok_or_else(|| DigestError::EmptyText {
            source_name: paper.identifier.clone(),
        })?;
        let input = truncate_chars(text, config.embedding_input_chars).to_string();
        let vector = embedder
            .embed_batch(std::slice::from_ref(&input))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DigestError::EmbeddingFailed {
                message: "no vector returned for paper text".into(),
            })?;
        if let Some(expected) = self.vectors.first().map(Vec::len) {
            if vector.len() != expected {
                return Err(DigestError::EmbeddingFailed {
                    message: format!(
                        "dimension mismatch: text {} vs topics {}",
                        vector.len(),
                        expected
                    ),
                });
            }
        }

        let classification = self.score(&paper.id, &vector, config.secondary_threshold);
        info!(
            "Classified '{}' as {}",
            paper.title, classification.primary_topic
        );
        Ok(classification)
    }

    /// Score a text vector: primary is the best topic (first listed wins
    /// ties), secondaries are the other topics above `threshold`, best first.
    pub fn score(&self, paper_id: &str, vector: &[f32], threshold: f32) -> Classification {
        let scores: Vec<TopicScore> = self
            .topics
            .iter()
            .zip(&self.vectors)
            .map(|(topic, v)| TopicScore {
                topic: topic.clone(),
                score: cosine_similarity(vector, v),
            })
            .collect();

        let mut primary = 0;
        for (i, s) in scores.iter().enumerate() {
            if s.score > scores[primary].score {
                primary = i;
            }
        }

        let mut secondary: Vec<&TopicScore> = scores
            .iter()
            .enumerate()
            .filter(|(i, s)| *i != primary && s.score > threshold)
            .map(|(_, s)| s)
            .collect();
        secondary.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Classification {
            paper_id: paper_id.to_string(),
            primary_topic: scores
                .get(primary)
                .map(|s| s.topic.clone())
                .unwrap_or_else(|| GENERAL_TOPIC.to_string()),
            secondary_topics: secondary.into_iter().map(|s| s.topic.clone()).collect(),
            scores,
        }
    }
}

/// Group papers by primary topic, in topic order, dropping empty topics.
///
/// With no topics, everything falls under [`GENERAL_TOPIC`].
pub fn group_by_topic<'a>(
    topics: &[String],
    papers: &'a [PaperReference],
    classifications: &[Classification],
) -> Vec<(String, Vec<&'a PaperReference>)> {
    let general = [GENERAL_TOPIC.to_string()];
    let topics = if topics.is_empty() { &general[..] } else { topics };

    topics
        .iter()
        .filter_map(|topic| {
            let members: Vec<&PaperReference> = papers
                .iter()
                .filter(|p| {
                    classifications
                        .iter()
                        .any(|c| c.paper_id == p.id && &c.primary_topic == topic)
                })
                .collect();
            (!members.is_empty()).then(|| (topic.clone(), members))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::PaperSource;

    /// Maps known words onto fixed axes.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DigestError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        t.matches("learning").count() as f32,
                        t.matches("protein").count() as f32,
                        t.matches("quantum").count() as f32,
                    ]
                })
                .collect())
        }
    }

    fn paper(id: &str, text: &str) -> PaperReference {
        let mut p = PaperReference::new(id, id, PaperSource::Arxiv);
        p.id = id.to_string();
        p.abstract_text = Some(text.to_string());
        p
    }

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn mean_pool_averages_tokens() {
        assert_eq!(mean_pool(&[vec![1.0, 2.0], vec![3.0, 4.0]]), vec![2.0, 3.0]);
        assert!(mean_pool(&[]).is_empty());
    }

    #[test]
    fn feature_extraction_shapes_deserialize() {
        let s: FeatureExtraction = serde_json::from_str("[[0.1, 0.2], [0.3, 0.4]]").unwrap();
        assert!(matches!(s, FeatureExtraction::Sentences(ref v) if v.len() == 2));
        let t: FeatureExtraction = serde_json::from_str("[[[0.1, 0.2], [0.3, 0.4]]]").unwrap();
        assert!(matches!(t, FeatureExtraction::Tokens(ref v) if v.len() == 1));
    }

    #[tokio::test]
    async fn two_topics_primary_is_one_of_them() {
        let embedder = KeywordEmbedder;
        let labels = topics(&["machine learning", "protein folding"]);
        let space = TopicSpace::embed(&embedder, &labels).await.unwrap();
        let config = PipelineConfig::default();

        let c = space
            .classify(&embedder, &paper("p1", "protein structure of a protein"), &config)
            .await
            .unwrap();
        assert!(labels.contains(&c.primary_topic));
        assert_eq!(c.primary_topic, "protein folding");
        assert_eq!(c.scores.len(), 2);
        assert!(c.secondary_topics.is_empty());
    }

    #[test]
    fn ties_go_to_first_topic_and_secondaries_are_sorted() {
        let space = TopicSpace {
            topics: topics(&["a", "b", "c"]),
            vectors: vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.6, 0.8]],
        };
        let c = space.score("p", &[1.0, 0.0], 0.5);
        assert_eq!(c.primary_topic, "a");
        assert_eq!(c.secondary_topics, vec!["b", "c"]);

        let strict = space.score("p", &[1.0, 0.0], 0.7);
        assert_eq!(strict.secondary_topics, vec!["b"]);
    }

    #[tokio::test]
    async fn paper_without_text_is_rejected() {
        let embedder = KeywordEmbedder;
        let space = TopicSpace::embed(&embedder, &topics(&["x"])).await.unwrap();
        let empty = PaperReference::new("id", "t", PaperSource::Url);
        let err = space
            .classify(&embedder, &empty, &PipelineConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DigestError::EmptyText { .. }));
    }

    #[test]
    fn grouping_preserves_topic_order_and_drops_empty() {
        let papers = vec![paper("p1", "a"), paper("p2", "b"), paper("p3", "c")];
        let mk = |id: &str, t: &str| Classification {
            paper_id: id.into(),
            primary_topic: t.into(),
            secondary_topics: vec![],
            scores: vec![],
        };
        let classifications = vec![mk("p1", "biology"), mk("p2", "ml"), mk("p3", "biology")];
        let groups = group_by_topic(&topics(&["ml", "physics", "biology"]), &papers, &classifications);

        let names: Vec<_> = groups.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(names, vec!["ml", "biology"]);
        let bio: Vec<_> = groups[1].1.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(bio, vec!["p1", "p3"]);
    }

    #[test]
    fn no_topics_means_general() {
        let papers = vec![paper("p1", "a")];
        let classifications = vec![general("p1")];
        let groups = group_by_topic(&[], &papers, &classifications);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, GENERAL_TOPIC);
        assert_eq!(classifications[0].scores[0].score, 1.0);
    }
}
