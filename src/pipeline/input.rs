//! Input resolution: normalise an uploaded path or a paper URL to something
//! the extractors can read.
//!
//! pdfium needs a file-system path, so downloaded PDFs land in a `TempDir`
//! owned by [`ResolvedInput`] and are removed when it is dropped. The `%PDF`
//! magic is checked before pdfium sees the file. Anything that is not a PDF
//! is treated as an HTML page and kept in memory.

use crate::error::DigestError;
use reqwest::header::CONTENT_TYPE;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// A PDF on local disk, uploaded or downloaded to a temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; PDF downloaded to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until processing completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the PDF file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// What a URL turned out to be.
#[derive(Debug)]
pub enum FetchedDocument {
    Pdf(ResolvedInput),
    Html { url: String, html: String },
}

/// Build the HTTP client shared by every outbound call of a run.
pub fn build_http_client(user_agent: &str, timeout_secs: u64) -> Result<reqwest::Client, DigestError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DigestError::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Validate a local PDF path: it must exist, be readable, and start with `%PDF`.
pub fn resolve_local(path: &Path) -> Result<ResolvedInput, DigestError> {
    let path = path.to_path_buf();

    if !path.exists() {
        return Err(DigestError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(DigestError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DigestError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(DigestError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Fetch a paper URL.
///
/// A response is handled as a PDF when its `Content-Type` says so or the URL
/// ends in `.pdf`; everything else is returned as HTML text.
pub async fn fetch_url(
    client: &reqwest::Client,
    url: &str,
    timeout_secs: u64,
) -> Result<FetchedDocument, DigestError> {
    if !is_url(url) {
        return Err(DigestError::InvalidInput {
            input: url.to_string(),
        });
    }
    info!("Fetching: {}", url);

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| DigestError::from_download(url, timeout_secs, e))?;

    if !response.status().is_success() {
        return Err(DigestError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if looks_like_pdf(url, &content_type) {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DigestError::from_download(url, timeout_secs, e))?;
        let resolved = write_pdf_to_temp(url, &bytes).await?;
        Ok(FetchedDocument::Pdf(resolved))
    } else {
        let html = response
            .text()
            .await
            .map_err(|e| DigestError::from_download(url, timeout_secs, e))?;
        debug!("Fetched {} bytes of HTML from {}", html.len(), url);
        Ok(FetchedDocument::Html {
            url: url.to_string(),
            html,
        })
    }
}

/// Decide from the URL and `Content-Type` whether a response is a PDF.
pub fn looks_like_pdf(url: &str, content_type: &str) -> bool {
    if content_type.contains("application/pdf") {
        return true;
    }
    let path = reqwest::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    path.ends_with(".pdf")
}

async fn write_pdf_to_temp(url: &str, bytes: &[u8]) -> Result<ResolvedInput, DigestError> {
    let filename = extract_filename(url);
    let temp_dir = TempDir::new().map_err(|e| DigestError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    tokio::fs::write(&file_path, bytes)
        .await
        .map_err(|e| DigestError::Internal(format!("Failed to write temp file: {}", e)))?;

    if bytes.len() >= 4 && &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(DigestError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.to_ascii_lowercase().ends_with(".pdf") {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn test_looks_like_pdf() {
        assert!(looks_like_pdf("https://x.org/a", "application/pdf"));
        assert!(looks_like_pdf("https://x.org/paper.PDF?dl=1", "application/octet-stream"));
        assert!(!looks_like_pdf("https://arxiv.org/abs/1706.03762", "text/html; charset=utf-8"));
    }

    #[test]
    fn test_extract_filename() {
        assert_eq!(extract_filename("https://arxiv.org/pdf/1706.03762v7.pdf"), "1706.03762v7.pdf");
        assert_eq!(extract_filename("https://arxiv.org/pdf/1706.03762v7"), "downloaded.pdf");
    }

    #[test]
    fn test_resolve_local_missing() {
        let err = resolve_local(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, DigestError::FileNotFound { .. }));
    }

    #[test]
    fn test_resolve_local_rejects_non_pdf() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"<html>not a pdf</html>").unwrap();
        let err = resolve_local(tmp.path()).unwrap_err();
        assert!(matches!(err, DigestError::NotAPdf { magic, .. } if &magic == b"<htm"));
    }

    #[test]
    fn test_resolve_local_accepts_pdf_magic() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"%PDF-1.7\n%fake body").unwrap();
        let resolved = resolve_local(tmp.path()).unwrap();
        assert_eq!(resolved.path(), tmp.path());
    }

    #[test]
    fn test_fetch_url_rejects_non_url() {
        let client = reqwest::Client::new();
        let result = tokio_test::block_on(fetch_url(&client, "ftp://x/y.pdf", 5));
        assert!(matches!(result, Err(DigestError::InvalidInput { .. })));
    }
}
