//! In-process stand-ins for every external service.

#![allow(dead_code)]

use async_trait::async_trait;
use paper_digest::pipeline::classify::Embedder;
use paper_digest::pipeline::extract::{DocumentKind, ExtractedDocument};
use paper_digest::pipeline::generate::{Generation, GenerationRequest, TextGenerator};
use paper_digest::pipeline::process::DocumentProcessor;
use paper_digest::pipeline::research::PaperIndex;
use paper_digest::pipeline::speech::SpeechSynthesizer;
use paper_digest::{
    DigestError, PaperReference, PaperSource, PipelineConfig, PipelineConfigBuilder, SortOrder,
    Stages,
};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const ATTENTION_ABSTRACT: &str = "We propose a new language model architecture for machine \
    translation of natural language, based solely on attention. Language pairs English-German \
    and English-French show the model is superior in quality.";

pub const RESNET_ABSTRACT: &str = "Deeper neural networks are more difficult to train for vision. \
    We present a residual learning framework for image recognition in computer vision and \
    report results on the ImageNet vision benchmark.";

pub struct FakeIndex;

#[async_trait]
impl PaperIndex for FakeIndex {
    async fn search(
        &self,
        _query: &str,
        max_results: usize,
        _sort: SortOrder,
    ) -> Result<Vec<PaperReference>, DigestError> {
        let mut attention =
            PaperReference::new("1706.03762", "Attention Is All You Need", PaperSource::Arxiv);
        attention.authors = vec!["Ashish Vaswani".into(), "Noam Shazeer".into()];
        attention.abstract_text = Some(ATTENTION_ABSTRACT.into());
        attention.year = Some(2017);
        attention.pdf_url = Some("https://arxiv.org/pdf/1706.03762v7".into());

        let mut resnet = PaperReference::new(
            "1512.03385",
            "Deep Residual Learning for Image Recognition",
            PaperSource::Arxiv,
        );
        resnet.authors = vec!["Kaiming He".into()];
        resnet.abstract_text = Some(RESNET_ABSTRACT.into());
        resnet.year = Some(2015);
        resnet.pdf_url = Some("https://arxiv.org/pdf/1512.03385v1".into());

        Ok(vec![attention, resnet].into_iter().take(max_results).collect())
    }

    async fn lookup_arxiv(&self, arxiv_id: &str) -> Result<PaperReference, DigestError> {
        Err(DigestError::SearchFailed {
            service: "arXiv".into(),
            reason: format!("no fixture for {arxiv_id}"),
        })
    }

    async fn resolve_doi(&self, doi: &str) -> Result<PaperReference, DigestError> {
        let mut paper = PaperReference::new(doi, "Deep learning", PaperSource::Doi);
        paper.doi = Some(doi.to_string());
        paper.authors = vec!["Yann LeCun".into(), "Yoshua Bengio".into(), "Geoffrey Hinton".into()];
        paper.abstract_text =
            Some("Deep learning allows computational models to learn language and vision.".into());
        paper.journal = Some("Nature".into());
        paper.year = Some(2015);
        Ok(paper)
    }
}

/// Returns the same text for every document; records what it was asked for.
pub struct FakeProcessor {
    pub text: String,
    pub calls: Mutex<Vec<String>>,
}

impl FakeProcessor {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn doc(&self) -> ExtractedDocument {
        ExtractedDocument {
            kind: DocumentKind::Pdf,
            text: self.text.clone(),
            title: Some("Extracted Title".into()),
            authors: vec![],
            description: None,
            page_count: Some(1),
        }
    }
}

#[async_trait]
impl DocumentProcessor for FakeProcessor {
    async fn extract_pdf(&self, path: &Path) -> Result<ExtractedDocument, DigestError> {
        self.calls.lock().unwrap().push(path.display().to_string());
        Ok(self.doc())
    }

    async fn fetch_url(&self, url: &str) -> Result<ExtractedDocument, DigestError> {
        self.calls.lock().unwrap().push(url.to_string());
        Ok(self.doc())
    }
}

/// Bag-of-keywords vectors over a fixed vocabulary.
pub struct KeywordEmbedder;

/// One axis per entry; each axis counts any of its spellings.
const VOCABULARY: [&[&str]; 3] = [&["language", "语言"], &["vision", "视觉"], &["biology"]];

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DigestError> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                VOCABULARY
                    .iter()
                    .map(|words| words.iter().map(|w| lower.matches(w).count()).sum::<usize>() as f32)
                    .collect()
            })
            .collect())
    }
}

/// Answers summaries and syntheses with fixed text.
pub struct CannedGenerator {
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl CannedGenerator {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, DigestError> {
        self.requests.lock().unwrap().push(request.clone());
        let text = if request.prompt.starts_with("Analyze these papers on") {
            "**Common themes.** Both papers replace hand-built structure with learned \
             representations, e.g. attention or residual connections."
        } else {
            "The paper introduces an architecture and evaluates it on standard benchmarks, \
             reporting state-of-the-art results."
        };
        Ok(Generation {
            text: text.to_string(),
            input_tokens: 100,
            output_tokens: 20,
        })
    }
}

/// One byte of "audio" per character of narrated text.
pub struct FakeSpeech {
    pub texts: Mutex<Vec<String>>,
}

impl FakeSpeech {
    pub fn new() -> Self {
        Self {
            texts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, DigestError> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(vec![0xFF; text.chars().count()])
    }
}

pub struct Fakes {
    pub processor: Arc<FakeProcessor>,
    pub generator: Arc<CannedGenerator>,
    pub speech: Arc<FakeSpeech>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            processor: Arc::new(FakeProcessor::new(
                "Abstract\nA paper about language and vision.\n\n1 Introduction\nBody text.",
            )),
            generator: Arc::new(CannedGenerator::new()),
            speech: Arc::new(FakeSpeech::new()),
        }
    }

    pub fn stages(&self, with_embedder: bool) -> Stages {
        Stages {
            index: Arc::new(FakeIndex),
            processor: self.processor.clone(),
            embedder: with_embedder.then(|| Arc::new(KeywordEmbedder) as Arc<dyn Embedder>),
            generator: self.generator.clone(),
            speech: self.speech.clone(),
        }
    }
}

/// Abstract-only config writing into `root`.
pub fn config_builder(root: &Path) -> PipelineConfigBuilder {
    PipelineConfig::builder()
        .results_dir(root.join("results"))
        .upload_dir(root.join("uploads"))
        .fetch_full_text(false)
}
