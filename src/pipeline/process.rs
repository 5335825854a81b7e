//! Processing stage: attach full text to each paper reference.
//!
//! The text source is chosen per paper, first match wins:
//! 1. an uploaded PDF;
//! 2. a URL: the user's URL, the index's PDF link, or the DOI landing page
//!    when CrossRef had no abstract (skipped when `fetch_full_text` is off,
//!    except for user URLs, which have nothing else to offer);
//! 3. the abstract.

use crate::config::PipelineConfig;
use crate::error::DigestError;
use crate::output::{PaperReference, PaperSource};
use crate::pipeline::clean::find_abstract;
use crate::pipeline::extract::{extract_html, extract_pdf_text, DocumentKind, ExtractedDocument};
use crate::pipeline::input::{build_http_client, fetch_url, resolve_local, FetchedDocument};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

/// Turns PDFs and web pages into text.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    /// Extract text from a local PDF.
    async fn extract_pdf(&self, path: &Path) -> Result<ExtractedDocument, DigestError>;

    /// Download a URL and extract its text, as PDF or HTML.
    async fn fetch_url(&self, url: &str) -> Result<ExtractedDocument, DigestError>;
}

/// [`DocumentProcessor`] using reqwest, pdfium and scraper.
pub struct DocumentFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl DocumentFetcher {
    pub fn new(config: &PipelineConfig) -> Result<Self, DigestError> {
        Ok(Self {
            client: build_http_client(&config.user_agent, config.download_timeout_secs)?,
            timeout_secs: config.download_timeout_secs,
        })
    }
}

#[async_trait]
impl DocumentProcessor for DocumentFetcher {
    async fn extract_pdf(&self, path: &Path) -> Result<ExtractedDocument, DigestError> {
        let resolved = resolve_local(path)?;
        extract_pdf_text(resolved.path()).await
    }

    async fn fetch_url(&self, url: &str) -> Result<ExtractedDocument, DigestError> {
        match fetch_url(&self.client, url, self.timeout_secs).await? {
            FetchedDocument::Pdf(resolved) => {
                let mut doc = extract_pdf_text(resolved.path()).await?;
                if doc.title.is_none() {
                    doc.title = title_from_url(url);
                }
                Ok(doc)
            }
            FetchedDocument::Html { html, .. } => {
                let mut doc = extract_html(&html);
                doc.title.get_or_insert_with(|| "Unknown Title".to_string());
                Ok(doc)
            }
        }
    }
}

/// `https://x.org/papers/deep_nets.pdf` → `deep nets`.
fn title_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let stem = Path::new(last).file_stem()?.to_string_lossy().replace('_', " ");
    let stem = stem.trim();
    (!stem.is_empty()).then(|| stem.to_string())
}

/// The URL to fetch for `paper`, if any.
fn link_to_fetch<'a>(paper: &'a PaperReference, config: &PipelineConfig) -> Option<&'a str> {
    if paper.source == PaperSource::Url {
        return paper.url.as_deref();
    }
    if !config.fetch_full_text {
        return None;
    }
    paper.pdf_url.as_deref().or_else(|| {
        (paper.source == PaperSource::Doi && paper.abstract_text.is_none())
            .then_some(paper.url.as_deref())
            .flatten()
    })
}

/// Fill in `full_text` (and missing metadata) for one paper.
///
/// Fails with [`DigestError::EmptyText`] when no text could be obtained.
pub async fn process_paper(
    processor: &dyn DocumentProcessor,
    paper: &mut PaperReference,
    config: &PipelineConfig,
) -> Result<(), DigestError> {
    let doc = if let Some(path) = paper.local_path.clone() {
        Some(processor.extract_pdf(&path).await?)
    } else if let Some(url) = link_to_fetch(paper, config) {
        let url = url.to_string();
        Some(processor.fetch_url(&url).await?)
    } else {
        debug!("Using the abstract of '{}'", paper.title);
        None
    };

    if let Some(doc) = doc {
        merge_document(paper, doc);
    }

    if paper.abstract_text.is_none() {
        paper.abstract_text = paper.full_text.as_deref().and_then(find_abstract);
    }

    match paper.text() {
        Some(text) => {
            info!("Processed '{}' ({} chars)", paper.title, text.len());
            Ok(())
        }
        None => Err(DigestError::EmptyText {
            source_name: paper.identifier.clone(),
        }),
    }
}

/// Copy extracted text and any metadata the reference is still missing.
fn merge_document(paper: &mut PaperReference, doc: ExtractedDocument) {
    // Search and DOI metadata is better than whatever the document declares;
    // uploads and bare URLs only know their file name or address.
    let owns_metadata = matches!(paper.source, PaperSource::Upload | PaperSource::Url);
    if owns_metadata {
        if let Some(title) = doc.title.filter(|t| !t.trim().is_empty()) {
            paper.title = title;
        }
    }
    if paper.authors.is_empty() {
        paper.authors = doc.authors;
    }
    if paper.abstract_text.is_none() && doc.kind == DocumentKind::Html {
        paper.abstract_text = doc.description;
    }
    paper.full_text = Some(doc.text).filter(|t| !t.trim().is_empty());
}
