//! Text extraction from PDFs (via pdfium) and HTML pages (via scraper).
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which is not safe
//! to call from async contexts. `tokio::task::spawn_blocking` moves the work
//! onto the blocking thread pool so Tokio worker threads keep serving the
//! web form while a long paper is being read.

use crate::error::DigestError;
use crate::pipeline::clean::clean_extracted_text;
use pdfium_render::prelude::*;
use scraper::{Html, Node, Selector};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// What kind of document the text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    Html,
}

/// Text and whatever metadata the document itself declares.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    pub kind: DocumentKind,
    /// Cleaned text; may be empty when the document has no text layer.
    pub text: String,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub description: Option<String>,
    pub page_count: Option<usize>,
}

/// Extract the text of every page of a PDF.
pub async fn extract_pdf_text(pdf_path: &Path) -> Result<ExtractedDocument, DigestError> {
    let path = pdf_path.to_path_buf();

    tokio::task::spawn_blocking(move || extract_pdf_text_blocking(&path))
        .await
        .map_err(|e| DigestError::Internal(format!("Extraction task panicked: {}", e)))?
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` first, then the system library.
fn bind_pdfium() -> Result<Pdfium, DigestError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(lib) if !lib.is_empty() => Pdfium::bind_to_library(&lib),
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| DigestError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of PDF text extraction.
fn extract_pdf_text_blocking(pdf_path: &Path) -> Result<ExtractedDocument, DigestError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium.load_pdf_from_file(pdf_path, None).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            DigestError::PasswordRequired {
                path: pdf_path.to_path_buf(),
            }
        } else {
            DigestError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })?;

    let pages = document.pages();
    let page_count = pages.len() as usize;

    let mut page_texts = Vec::with_capacity(page_count);
    for (idx, page) in pages.iter().enumerate() {
        let text = page.text().map_err(|e| DigestError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("page {}: {:?}", idx + 1, e),
        })?;
        page_texts.push(text.all());
    }

    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    let text = clean_extracted_text(&page_texts.join("\n"));
    info!(
        "Extracted {} chars from {} pages of {}",
        text.len(),
        page_count,
        pdf_path.display()
    );

    Ok(ExtractedDocument {
        kind: DocumentKind::Pdf,
        text,
        title: get_meta(PdfDocumentMetadataTagType::Title),
        authors: get_meta(PdfDocumentMetadataTagType::Author)
            .map(|a| split_authors(&a))
            .unwrap_or_default(),
        description: get_meta(PdfDocumentMetadataTagType::Subject),
        page_count: Some(page_count),
    })
}

/// Elements whose text is never visible.
const HIDDEN_ELEMENTS: [&str; 5] = ["script", "style", "noscript", "template", "head"];

/// Extract visible text and `<meta>` details from an HTML page.
pub fn extract_html(html: &str) -> ExtractedDocument {
    let document = Html::parse_document(html);

    let mut pieces: Vec<&str> = Vec::new();
    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| match a.value() {
            Node::Element(el) => HIDDEN_ELEMENTS.contains(&el.name()),
            _ => false,
        });
        let trimmed = text.trim();
        if !hidden && !trimmed.is_empty() {
            pieces.push(trimmed);
        }
    }
    let text = clean_extracted_text(&pieces.join("\n"));

    let title = Selector::parse("title").ok().and_then(|sel| {
        document
            .select(&sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    });

    let mut authors = Vec::new();
    let mut description = None;
    if let Ok(sel) = Selector::parse("meta[name][content]") {
        for el in document.select(&sel) {
            let (Some(name), Some(content)) = (el.value().attr("name"), el.value().attr("content"))
            else {
                continue;
            };
            match name.to_ascii_lowercase().as_str() {
                "author" if authors.is_empty() => authors = split_authors(content),
                "citation_author" => authors.push(content.trim().to_string()),
                "description" if description.is_none() => {
                    description = Some(content.trim().to_string())
                }
                _ => {}
            }
        }
    }

    debug!("Extracted {} chars of visible HTML text", text.len());

    ExtractedDocument {
        kind: DocumentKind::Html,
        text,
        title,
        authors,
        description: description.filter(|d| !d.is_empty()),
        page_count: None,
    }
}

/// Split an author string on `, ` / `;` / ` and `.
fn split_authors(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .flat_map(|part| part.split(" and "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
