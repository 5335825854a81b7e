//! Request and result types.
//!
//! A run turns a [`DigestRequest`] into a [`ResultBundle`]. Everything in the
//! bundle is serialisable; the bundle is what ends up in
//! `results/<session>/results.json`. Paper full text is deliberately not
//! serialised: it only lives for the duration of the run.

use crate::config::SortOrder;
use crate::progress::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// What the user asked for: one query plus any number of explicit papers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestRequest {
    /// Free-text query, DOI, arXiv id or URL. Empty means "no search".
    pub query: Option<String>,
    /// User-defined topic labels for classification.
    pub topics: Vec<String>,
    /// Uploaded or local PDF files.
    pub pdf_paths: Vec<PathBuf>,
    /// Paper URLs (PDF or HTML).
    pub urls: Vec<String>,
    /// DOIs, with or without `doi:` / `https://doi.org/` prefixes.
    pub dois: Vec<String>,
    /// Results requested per search source. None uses the configured default.
    pub max_results: Option<usize>,
    /// arXiv result ordering. None uses the configured default.
    pub sort_by: Option<SortOrder>,
}

impl DigestRequest {
    /// The query, if one was given and is not blank.
    pub fn query(&self) -> Option<&str> {
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    /// A short description of the request for logs and error messages.
    pub fn describe(&self) -> String {
        match self.query() {
            Some(q) => q.to_string(),
            None => format!(
                "{} PDFs, {} URLs, {} DOIs",
                self.pdf_paths.len(),
                self.urls.len(),
                self.dois.len()
            ),
        }
    }
}

/// Split a comma-separated form field into trimmed, non-empty items.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Where a paper reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperSource {
    Arxiv,
    SemanticScholar,
    Doi,
    Url,
    Upload,
}

impl PaperSource {
    pub fn label(&self) -> &'static str {
        match self {
            PaperSource::Arxiv => "arXiv",
            PaperSource::SemanticScholar => "Semantic Scholar",
            PaperSource::Doi => "DOI",
            PaperSource::Url => "URL",
            PaperSource::Upload => "Upload",
        }
    }
}

/// One paper moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperReference {
    /// File-name safe id, unique within a session.
    pub id: String,
    /// The query, DOI, URL or path this reference was created from.
    pub identifier: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(rename = "abstract", default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    /// Landing page or the URL the user supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Direct link to the full-text PDF, when the index provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    /// Local file for uploaded papers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    pub source: PaperSource,
    /// Extracted full text, populated by the processing stage.
    #[serde(skip)]
    pub full_text: Option<String>,
}

impl PaperReference {
    /// A bare reference; `id` is assigned later by the pipeline.
    pub fn new(identifier: impl Into<String>, title: impl Into<String>, source: PaperSource) -> Self {
        Self {
            id: String::new(),
            identifier: identifier.into(),
            title: title.into(),
            authors: Vec::new(),
            abstract_text: None,
            year: None,
            published: None,
            journal: None,
            publisher: None,
            doi: None,
            url: None,
            pdf_url: None,
            local_path: None,
            source,
            full_text: None,
        }
    }

    /// The text downstream stages work on: full text, else the abstract.
    pub fn text(&self) -> Option<&str> {
        let non_blank = |t: &&str| !t.trim().is_empty();
        self.full_text
            .as_deref()
            .filter(non_blank)
            .or(self.abstract_text.as_deref().filter(non_blank))
    }
}

/// Similarity between a paper and one topic label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicScore {
    pub topic: String,
    pub score: f32,
}

/// Topic assignment for one paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub paper_id: String,
    /// Highest-scoring topic.
    pub primary_topic: String,
    /// Other topics scoring above the secondary threshold, best first.
    pub secondary_topics: Vec<String>,
    /// One score per topic, in the order the topics were given.
    pub scores: Vec<TopicScore>,
}

/// A formatted citation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub apa: String,
}

/// Summary of one paper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperSummary {
    pub paper_id: String,
    pub title: String,
    pub summary: String,
    pub citation: Citation,
}

/// Cross-paper synthesis for one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSynthesis {
    pub topic: String,
    /// File stem under `syntheses/` and `audio/`, unique within the session.
    pub slug: String,
    pub paper_ids: Vec<String>,
    pub synthesis: String,
    pub citations: Vec<Citation>,
}

/// What an audio file narrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioKind {
    Summary,
    Synthesis,
}

/// One generated MP3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFile {
    /// File name inside the session's `audio/` directory.
    pub file_name: String,
    pub kind: AudioKind,
    /// Paper title or topic narrated.
    pub subject: String,
    pub bytes: u64,
    /// Estimated from the byte size at the TTS bitrate.
    pub estimated_duration_secs: f64,
}

/// Timing and token statistics for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Wall-clock milliseconds per stage.
    pub stage_durations_ms: BTreeMap<Stage, u64>,
    pub total_duration_ms: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultBundle {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub topics: Vec<String>,
    pub papers: Vec<PaperReference>,
    pub classifications: Vec<Classification>,
    /// Keyed by paper id.
    pub summaries: BTreeMap<String, PaperSummary>,
    /// In topic order.
    pub syntheses: Vec<TopicSynthesis>,
    pub audio_files: Vec<AudioFile>,
    pub stats: RunStats,
}

impl ResultBundle {
    /// Item counts shown on the results page.
    pub fn counts(&self) -> ResultCount {
        ResultCount {
            papers: self.papers.len(),
            summaries: self.summaries.len(),
            syntheses: self.syntheses.len(),
            audio_files: self.audio_files.len(),
        }
    }

    /// Classification of a paper, if it has one.
    pub fn classification_of(&self, paper_id: &str) -> Option<&Classification> {
        self.classifications.iter().find(|c| c.paper_id == paper_id)
    }
}

/// Number of items of each kind in a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResultCount {
    pub papers: usize,
    pub summaries: usize,
    pub syntheses: usize,
    pub audio_files: usize,
}
