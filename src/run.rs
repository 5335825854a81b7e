//! Top-level digest run.
//!
//! [`Pipeline::run`] drives the six stages in order for one request and
//! writes the session directory. Any stage error aborts the run; nothing is
//! retried here (the generator has its own opt-in retry loop).

use crate::config::{EmbeddingBackend, PipelineConfig};
use crate::error::DigestError;
use crate::output::{
    AudioFile, AudioKind, Classification, DigestRequest, PaperReference, PaperSummary,
    ResultBundle, RunStats, TopicSynthesis,
};
use crate::pipeline::classify::{self, embedder_from_config, Embedder, TopicSpace};
use crate::pipeline::generate::{
    resolve_embedding_provider, resolve_provider, LlmGenerator, TextGenerator, TokenUsage,
};
use crate::pipeline::process::{process_paper, DocumentFetcher, DocumentProcessor};
use crate::pipeline::research::{gather_references, PaperIndex, ScholarlyIndex};
use crate::pipeline::speech::{estimate_duration_secs, prepare_for_speech, GoogleTts, SpeechSynthesizer};
use crate::pipeline::summarize::summarize_paper;
use crate::pipeline::synthesize::synthesize_topic;
use crate::progress::Stage;
use crate::store::{self, SessionLayout};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// The external capabilities a run needs.
///
/// Production code builds these with [`Pipeline::from_config`]; tests pass
/// in-process fakes through [`Pipeline::with_stages`].
#[derive(Clone)]
pub struct Stages {
    pub index: Arc<dyn PaperIndex>,
    pub processor: Arc<dyn DocumentProcessor>,
    /// None when no embedding backend could be configured; runs with topics
    /// then fail at classification.
    pub embedder: Option<Arc<dyn Embedder>>,
    pub generator: Arc<dyn TextGenerator>,
    pub speech: Arc<dyn SpeechSynthesizer>,
}

/// A configured pipeline, reusable across runs.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    stages: Stages,
}

impl Pipeline {
    /// Build the production pipeline: arXiv/Semantic Scholar/CrossRef,
    /// reqwest + pdfium + scraper, edgequake-llm (or Hugging Face) and Google TTS.
    pub fn from_config(config: PipelineConfig) -> Result<Self, DigestError> {
        let provider = resolve_provider(&config)?;

        let embedder = match config.embedding {
            EmbeddingBackend::HuggingFace { .. } => Some(embedder_from_config(&config, None)?),
            EmbeddingBackend::Provider => match resolve_embedding_provider(&config) {
                Ok(p) => Some(embedder_from_config(&config, Some(p))?),
                Err(e) => {
                    warn!("No embedding provider; topic classification unavailable: {}", e);
                    None
                }
            },
        };

        let stages = Stages {
            index: Arc::new(ScholarlyIndex::new(&config)?),
            processor: Arc::new(DocumentFetcher::new(&config)?),
            embedder,
            generator: Arc::new(LlmGenerator::new(provider, &config)),
            speech: Arc::new(GoogleTts::new(&config)?),
        };
        Ok(Self { config, stages })
    }

    /// Build a pipeline from explicit stage implementations.
    pub fn with_stages(config: PipelineConfig, stages: Stages) -> Self {
        Self { config, stages }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run a request under a fresh session id.
    pub async fn run(&self, request: &DigestRequest) -> Result<ResultBundle, DigestError> {
        self.run_session(&store::new_session_id(), request).await
    }

    /// Run a request under `session_id` (the web form allocates the id
    /// before saving uploads).
    pub async fn run_session(
        &self,
        session_id: &str,
        request: &DigestRequest,
    ) -> Result<ResultBundle, DigestError> {
        let run_start = Instant::now();
        let layout = SessionLayout::new(&self.config.results_dir, session_id);
        let topics = normalize_topics(&request.topics);
        let mut stats = RunStats::default();
        let mut usage = TokenUsage::default();

        info!("Session {}: {}", session_id, request.describe());
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_start(session_id);
        }

        // ── Stage 1: Research ────────────────────────────────────────────
        let started = self.begin(Stage::Research, 0);
        let mut papers =
            gather_references(self.stages.index.as_ref(), request, &self.config).await?;
        for (i, paper) in papers.iter().enumerate() {
            self.item(Stage::Research, i, papers.len(), &paper.title);
        }
        self.finish(Stage::Research, started, &mut stats);

        // ── Stage 2: Processing ──────────────────────────────────────────
        let started = self.begin(Stage::Processing, papers.len());
        let total = papers.len();
        for (i, paper) in papers.iter_mut().enumerate() {
            process_paper(self.stages.processor.as_ref(), paper, &self.config).await?;
            self.item(Stage::Processing, i, total, &paper.title);
        }
        self.finish(Stage::Processing, started, &mut stats);

        // ── Stage 3: Classification ──────────────────────────────────────
        let started = self.begin(Stage::Classification, papers.len());
        let classifications = self.classify_all(&papers, &topics).await?;
        self.finish(Stage::Classification, started, &mut stats);

        layout.create().await?;

        // ── Stage 4: Summarization ───────────────────────────────────────
        let started = self.begin(Stage::Summarization, papers.len());
        let mut summaries: BTreeMap<String, PaperSummary> = BTreeMap::new();
        for (i, paper) in papers.iter().enumerate() {
            let (summary, used) =
                summarize_paper(self.stages.generator.as_ref(), paper, &self.config).await?;
            usage += used;
            let classification = classifications.iter().find(|c| c.paper_id == paper.id);
            store::write_file(
                &layout.summary_file(&paper.id),
                store::summary_markdown(&summary, classification),
            )
            .await?;
            self.item(Stage::Summarization, i, papers.len(), &paper.title);
            summaries.insert(paper.id.clone(), summary);
        }
        self.finish(Stage::Summarization, started, &mut stats);

        // ── Stage 5: Synthesis ───────────────────────────────────────────
        let groups = classify::group_by_topic(&topics, &papers, &classifications);
        let started = self.begin(Stage::Synthesis, groups.len());
        let slugs = store::unique_topic_slugs(groups.iter().map(|(topic, _)| topic.as_str()));
        let mut syntheses: Vec<TopicSynthesis> = Vec::with_capacity(groups.len());
        for (i, ((topic, members), slug)) in groups.iter().zip(&slugs).enumerate() {
            let (synthesis, used) = synthesize_topic(
                self.stages.generator.as_ref(),
                topic,
                slug,
                members,
                &summaries,
                &self.config,
            )
            .await?;
            usage += used;
            store::write_file(
                &layout.synthesis_file(slug),
                store::synthesis_markdown(&synthesis),
            )
            .await?;
            self.item(Stage::Synthesis, i, groups.len(), topic);
            syntheses.push(synthesis);
        }
        self.finish(Stage::Synthesis, started, &mut stats);

        // ── Stage 6: Audio ───────────────────────────────────────────────
        let audio_files = if self.config.generate_audio {
            let narrations = narrations(&papers, &summaries, &syntheses);
            let started = self.begin(Stage::Audio, narrations.len());
            let mut files = Vec::with_capacity(narrations.len());
            for (i, narration) in narrations.iter().enumerate() {
                files.push(self.narrate(&layout, narration).await?);
                self.item(Stage::Audio, i, narrations.len(), &narration.file_name);
            }
            self.finish(Stage::Audio, started, &mut stats);
            files
        } else {
            info!("Audio generation disabled");
            Vec::new()
        };

        stats.total_duration_ms = run_start.elapsed().as_millis() as u64;
        stats.total_input_tokens = usage.input_tokens;
        stats.total_output_tokens = usage.output_tokens;

        let bundle = ResultBundle {
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            query: request.query().map(str::to_string),
            topics,
            papers,
            classifications,
            summaries,
            syntheses,
            audio_files,
            stats,
        };
        store::save_bundle(&layout, &bundle).await?;

        let counts = bundle.counts();
        info!(
            "Session {} complete: {} papers, {} summaries, {} syntheses, {} audio files in {}ms",
            session_id,
            counts.papers,
            counts.summaries,
            counts.syntheses,
            counts.audio_files,
            bundle.stats.total_duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_complete(session_id);
        }
        Ok(bundle)
    }

    async fn classify_all(
        &self,
        papers: &[PaperReference],
        topics: &[String],
    ) -> Result<Vec<Classification>, DigestError> {
        if topics.is_empty() {
            return Ok(papers
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    self.item(Stage::Classification, i, papers.len(), &p.title);
                    classify::general(&p.id)
                })
                .collect());
        }

        let embedder = self.stages.embedder.as_deref().ok_or_else(|| {
            DigestError::ProviderNotConfigured {
                provider: "embedding".into(),
                hint: "Topic classification needs embeddings. Set OPENAI_API_KEY \
                       or use --embedding huggingface."
                    .into(),
            }
        })?;
        let space = TopicSpace::embed(embedder, topics).await?;

        let mut out = Vec::with_capacity(papers.len());
        for (i, paper) in papers.iter().enumerate() {
            out.push(space.classify(embedder, paper, &self.config).await?);
            self.item(Stage::Classification, i, papers.len(), &paper.title);
        }
        Ok(out)
    }

    async fn narrate(
        &self,
        layout: &SessionLayout,
        narration: &Narration,
    ) -> Result<AudioFile, DigestError> {
        let text = prepare_for_speech(&narration.text, self.config.tts_max_chars);
        let audio = self.stages.speech.synthesize(&text).await?;
        store::write_file(&layout.audio_dir().join(&narration.file_name), &audio).await?;
        let bytes = audio.len() as u64;
        Ok(AudioFile {
            file_name: narration.file_name.clone(),
            kind: narration.kind,
            subject: narration.subject.clone(),
            bytes,
            estimated_duration_secs: estimate_duration_secs(bytes),
        })
    }

    fn begin(&self, stage: Stage, items: usize) -> Instant {
        info!("Stage {}: {} items", stage, items);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_start(stage, items);
        }
        Instant::now()
    }

    fn item(&self, stage: Stage, index: usize, total: usize, label: &str) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_item_complete(stage, index + 1, total, label);
        }
    }

    fn finish(&self, stage: Stage, started: Instant, stats: &mut RunStats) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        stats.stage_durations_ms.insert(stage, elapsed_ms);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_complete(stage, elapsed_ms);
        }
    }
}

/// Trimmed, non-empty topics with duplicates removed, in the given order.
fn normalize_topics(topics: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(topics.len());
    for t in topics.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !out.iter().any(|seen| seen == t) {
            out.push(t.to_string());
        }
    }
    out
}

/// One MP3 to produce.
struct Narration {
    file_name: String,
    kind: AudioKind,
    subject: String,
    text: String,
}

/// Summaries in paper order, then syntheses in topic order.
fn narrations(
    papers: &[PaperReference],
    summaries: &BTreeMap<String, PaperSummary>,
    syntheses: &[TopicSynthesis],
) -> Vec<Narration> {
    let summary_narrations = papers.iter().filter_map(|p| {
        summaries.get(&p.id).map(|s| Narration {
            file_name: format!("summary_{}.mp3", p.id),
            kind: AudioKind::Summary,
            subject: s.title.clone(),
            text: s.summary.clone(),
        })
    });
    let synthesis_narrations = syntheses.iter().map(|s| Narration {
        file_name: format!("synthesis_{}.mp3", s.slug),
        kind: AudioKind::Synthesis,
        subject: s.topic.clone(),
        text: format!("{}. {}", s.topic, s.synthesis),
    });
    summary_narrations.chain(synthesis_narrations).collect()
}
