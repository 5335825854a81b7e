//! Error type for the paper-digest library.
//!
//! A digest run has no partial-success mode: the first failing stage aborts
//! the run and its error reaches the caller (CLI or web form) unchanged.
//! [`DigestError`] therefore carries enough context in its message to tell
//! the user which external service or input caused the failure and what to
//! try next.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the paper-digest library.
#[derive(Debug, Error)]
pub enum DigestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password; uploaded papers are opened without one.
    #[error("PDF '{path}' is encrypted and cannot be read without a password.")]
    PasswordRequired { path: PathBuf },

    /// Processing finished but produced no usable text for a paper.
    #[error("No text could be extracted from '{source_name}'")]
    EmptyText { source_name: String },

    // ── Research errors ───────────────────────────────────────────────────
    /// A paper index (arXiv, Semantic Scholar) rejected or failed the query.
    #[error("{service} search failed: {reason}")]
    SearchFailed { service: String, reason: String },

    /// CrossRef could not resolve the DOI.
    #[error("Failed to resolve DOI '{doi}': {reason}")]
    DoiResolutionFailed { doi: String, reason: String },

    /// Searches, DOIs, URLs and uploads together yielded nothing to process.
    #[error("No papers found for '{query}'\nTry a broader query or supply a DOI, URL or PDF.")]
    NoPapers { query: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned an error.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// A model call exceeded the configured timeout.
    #[error("{operation} timed out after {secs}s")]
    ApiTimeout { operation: String, secs: u64 },

    /// The embedding backend failed or returned malformed vectors.
    #[error("Embedding failed: {message}")]
    EmbeddingFailed { message: String },

    /// The text-to-speech endpoint failed.
    #[error("Speech synthesis failed: {reason}")]
    SpeechFailed { reason: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write a result file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored session could not be read back.
    #[error("Failed to read results from '{path}': {detail}")]
    ResultsUnreadable { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDF text extraction needs the pdfium shared library.\n\
  • Install it system-wide (libpdfium.so / libpdfium.dylib / pdfium.dll), or\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DigestError {
    /// Build a [`DigestError::DownloadFailed`] or [`DigestError::DownloadTimeout`]
    /// from a reqwest error, depending on what went wrong.
    pub(crate) fn from_download(url: &str, timeout_secs: u64, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DigestError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            DigestError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}
