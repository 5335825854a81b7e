//! Configuration types for a digest run.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The same config is shared by the CLI and the
//! web server; per-request inputs (query, topics, files) travel separately in
//! [`crate::output::DigestRequest`].

use crate::error::DigestError;
use crate::progress::ProgressCallback;
use edgequake_llm::{EmbeddingProvider, LLMProvider};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for a digest run.
///
/// # Example
/// ```rust
/// use paper_digest::{PipelineConfig, SortOrder};
///
/// let config = PipelineConfig::builder()
///     .max_results(3)
///     .sort_by(SortOrder::SubmittedDate)
///     .generate_audio(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_results, 3);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root directory for session results. Default: `results`.
    pub results_dir: PathBuf,

    /// Root directory for uploaded PDFs. Default: `uploads`.
    pub upload_dir: PathBuf,

    /// Papers requested from each search source. Range: 1–50. Default: 5.
    pub max_results: usize,

    /// Ordering of arXiv search results. Default: relevance.
    pub sort_by: SortOrder,

    /// Search sources queried for free-text queries. Default: arXiv + Semantic Scholar.
    pub sources: Vec<SearchSource>,

    /// Download and extract full text for search results. Default: true.
    ///
    /// When false, search results are summarised from their abstracts only,
    /// which avoids one PDF download per paper.
    pub fetch_full_text: bool,

    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Which backend computes embeddings for topic classification.
    pub embedding: EmbeddingBackend,

    /// Pre-constructed embedding provider, used with [`EmbeddingBackend::Provider`].
    pub embedding_provider: Option<Arc<dyn EmbeddingProvider>>,

    /// Characters of paper text that are embedded. Default: 2000.
    ///
    /// Sentence-embedding models truncate at a few hundred tokens anyway.
    pub embedding_input_chars: usize,

    /// Minimum score for a topic to be listed as secondary. Default: 0.5.
    pub secondary_threshold: f32,

    /// Sampling temperature for generation calls. Default: 0.0 (greedy).
    pub temperature: f32,

    /// Characters of paper text fed to the summariser. Default: 1024.
    pub summary_input_chars: usize,

    /// Output token bound for each summary. Default: 500.
    pub summary_max_tokens: usize,

    /// Lower bound requested from the summariser, in words. Default: 50.
    pub summary_min_words: usize,

    /// Output token bound for each topic synthesis. Default: 500.
    pub synthesis_max_tokens: usize,

    /// Write MP3 narrations of summaries and syntheses. Default: true.
    pub generate_audio: bool,

    /// Language code passed to the TTS endpoint. Default: "en".
    pub tts_lang: String,

    /// Characters of text narrated per file. Default: 5000.
    pub tts_max_chars: usize,

    /// Retry attempts on a failed LLM call. Default: 0.
    ///
    /// Every other external call fails fast; LLM retries are opt-in.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Timeout for downloads and index queries, in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Timeout for each model call (chat, embedding, TTS chunk), in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// User-Agent sent with every outbound request.
    pub user_agent: String,

    /// Base URLs of the external services.
    pub endpoints: Endpoints,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            upload_dir: PathBuf::from("uploads"),
            max_results: 5,
            sort_by: SortOrder::default(),
            sources: vec![SearchSource::Arxiv, SearchSource::SemanticScholar],
            fetch_full_text: true,
            model: None,
            provider_name: None,
            provider: None,
            embedding: EmbeddingBackend::default(),
            embedding_provider: None,
            embedding_input_chars: 2000,
            secondary_threshold: 0.5,
            temperature: 0.0,
            summary_input_chars: 1024,
            summary_max_tokens: 500,
            summary_min_words: 50,
            synthesis_max_tokens: 500,
            generate_audio: true,
            tts_lang: "en".to_string(),
            tts_max_chars: 5000,
            max_retries: 0,
            retry_backoff_ms: 500,
            download_timeout_secs: 120,
            api_timeout_secs: 60,
            user_agent: "Mozilla/5.0 (compatible; paper-digest/0.1)".to_string(),
            endpoints: Endpoints::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("results_dir", &self.results_dir)
            .field("upload_dir", &self.upload_dir)
            .field("max_results", &self.max_results)
            .field("sort_by", &self.sort_by)
            .field("sources", &self.sources)
            .field("fetch_full_text", &self.fetch_full_text)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("embedding", &self.embedding)
            .field("temperature", &self.temperature)
            .field("summary_max_tokens", &self.summary_max_tokens)
            .field("synthesis_max_tokens", &self.synthesis_max_tokens)
            .field("generate_audio", &self.generate_audio)
            .field("max_retries", &self.max_retries)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Upper bound on summary length in words, derived from the token bound.
    ///
    /// English text averages roughly four tokens per three words.
    pub fn summary_max_words(&self) -> usize {
        (self.summary_max_tokens * 3 / 4).max(1)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.results_dir = dir.into();
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn max_results(mut self, n: usize) -> Self {
        self.config.max_results = n.clamp(1, 50);
        self
    }

    pub fn sort_by(mut self, sort: SortOrder) -> Self {
        self.config.sort_by = sort;
        self
    }

    pub fn sources(mut self, sources: Vec<SearchSource>) -> Self {
        self.config.sources = sources;
        self
    }

    pub fn fetch_full_text(mut self, v: bool) -> Self {
        self.config.fetch_full_text = v;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn embedding(mut self, backend: EmbeddingBackend) -> Self {
        self.config.embedding = backend;
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.config.embedding_provider = Some(provider);
        self
    }

    pub fn embedding_input_chars(mut self, n: usize) -> Self {
        self.config.embedding_input_chars = n.max(16);
        self
    }

    pub fn secondary_threshold(mut self, t: f32) -> Self {
        self.config.secondary_threshold = t.clamp(-1.0, 1.0);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn summary_input_chars(mut self, n: usize) -> Self {
        self.config.summary_input_chars = n.max(64);
        self
    }

    pub fn summary_max_tokens(mut self, n: usize) -> Self {
        self.config.summary_max_tokens = n;
        self
    }

    pub fn summary_min_words(mut self, n: usize) -> Self {
        self.config.summary_min_words = n;
        self
    }

    pub fn synthesis_max_tokens(mut self, n: usize) -> Self {
        self.config.synthesis_max_tokens = n;
        self
    }

    pub fn generate_audio(mut self, v: bool) -> Self {
        self.config.generate_audio = v;
        self
    }

    pub fn tts_lang(mut self, lang: impl Into<String>) -> Self {
        self.config.tts_lang = lang.into();
        self
    }

    pub fn tts_max_chars(mut self, n: usize) -> Self {
        self.config.tts_max_chars = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.config.endpoints = endpoints;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, DigestError> {
        let c = &self.config;
        if c.max_results == 0 {
            return Err(DigestError::InvalidConfig(
                "max_results must be ≥ 1".into(),
            ));
        }
        if c.summary_max_tokens < c.summary_min_words {
            return Err(DigestError::InvalidConfig(format!(
                "summary_max_tokens ({}) must not be below summary_min_words ({})",
                c.summary_max_tokens, c.summary_min_words
            )));
        }
        if c.synthesis_max_tokens == 0 {
            return Err(DigestError::InvalidConfig(
                "synthesis_max_tokens must be ≥ 1".into(),
            ));
        }
        if c.generate_audio && c.tts_lang.trim().is_empty() {
            return Err(DigestError::InvalidConfig(
                "tts_lang must not be empty when audio is enabled".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Ordering requested from the arXiv API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    /// Best match first (default).
    #[default]
    Relevance,
    /// Most recently revised first.
    LastUpdatedDate,
    /// Most recently submitted first.
    SubmittedDate,
}

impl SortOrder {
    /// The value of arXiv's `sortBy` parameter.
    pub fn as_arxiv_param(&self) -> &'static str {
        match self {
            SortOrder::Relevance => "relevance",
            SortOrder::LastUpdatedDate => "lastUpdatedDate",
            SortOrder::SubmittedDate => "submittedDate",
        }
    }

    /// Parse a user-supplied sort name; unknown names fall back to relevance.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim() {
            "lastUpdatedDate" | "last_updated" | "updated" => SortOrder::LastUpdatedDate,
            "submittedDate" | "submitted" | "recent" => SortOrder::SubmittedDate,
            _ => SortOrder::Relevance,
        }
    }
}

/// A paper index queried for free-text searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    Arxiv,
    SemanticScholar,
}

/// Where topic-classification embeddings come from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmbeddingBackend {
    /// The embedding half of the edgequake-llm provider (default).
    #[default]
    Provider,
    /// A Hugging Face feature-extraction endpoint for a sentence-transformers model.
    HuggingFace {
        /// Model id, e.g. `sentence-transformers/all-MiniLM-L6-v2`.
        model: String,
    },
}

impl EmbeddingBackend {
    /// The small sentence-transformers model hosted on Hugging Face.
    pub fn minilm() -> Self {
        EmbeddingBackend::HuggingFace {
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
        }
    }
}

/// Base URLs of every external service the pipeline calls.
///
/// Overridable so a mirror, a proxy or a local stub can stand in for the
/// public endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// arXiv Atom query API.
    pub arxiv: String,
    /// Semantic Scholar Graph API paper search.
    pub semantic_scholar: String,
    /// CrossRef works API (DOI appended).
    pub crossref: String,
    /// Hugging Face inference router (model id and pipeline appended).
    pub huggingface: String,
    /// Google Translate TTS endpoint.
    pub tts: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            arxiv: "http://export.arxiv.org/api/query".to_string(),
            semantic_scholar: "https://api.semanticscholar.org/graph/v1/paper/search".to_string(),
            crossref: "https://api.crossref.org/works".to_string(),
            huggingface: "https://router.huggingface.co/hf-inference/models".to_string(),
            tts: "https://translate.google.com/translate_tts".to_string(),
        }
    }
}
