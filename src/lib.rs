//! # paper-digest
//!
//! Find research papers, read them, sort them into your topics, summarise
//! each one, synthesise each topic and narrate the lot as MP3.
//!
//! ## Pipeline Overview
//!
//! ```text
//! query / URLs / DOIs / PDFs
//!  │
//!  ├─ 1. Research        arXiv, Semantic Scholar, CrossRef
//!  ├─ 2. Processing      download, pdfium text extraction (spawn_blocking), HTML
//!  ├─ 3. Classification  embeddings + cosine similarity against the topics
//!  ├─ 4. Summarization   one LLM call per paper, APA citation
//!  ├─ 5. Synthesis       one LLM call per populated topic
//!  └─ 6. Audio           Google TTS, chunked, MP3
//!                         │
//!                         ▼
//!            results/<session>/{results.json, summaries/, syntheses/, audio/}
//! ```
//!
//! Stages run strictly in order and any failure aborts the run.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paper_digest::{DigestRequest, Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::builder().max_results(3).build()?;
//!     let pipeline = Pipeline::from_config(config)?;
//!     let request = DigestRequest {
//!         query: Some("attention is all you need".into()),
//!         topics: vec!["NLP".into(), "Vision".into()],
//!         ..Default::default()
//!     };
//!     let bundle = pipeline.run(&request).await?;
//!     println!("session {}: {:?}", bundle.session_id, bundle.counts());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | The `paperdigest` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | The web form (axum + minijinja + tower-http) |
//!
//! Disable both when using only the library:
//! ```toml
//! paper-digest = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod run;
#[cfg(feature = "server")]
pub mod server;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    EmbeddingBackend, Endpoints, PipelineConfig, PipelineConfigBuilder, SearchSource, SortOrder,
};
pub use error::DigestError;
pub use output::{
    AudioFile, Classification, DigestRequest, PaperReference, PaperSource, PaperSummary,
    ResultBundle, ResultCount, RunStats, TopicSynthesis,
};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback, Stage};
pub use run::{Pipeline, Stages};
