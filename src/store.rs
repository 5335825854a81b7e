//! Session directories and result files.
//!
//! ```text
//! results/<session>/results.json
//! results/<session>/summaries/<paper-id>.md
//! results/<session>/syntheses/<topic_slug>.md
//! results/<session>/audio/*.mp3
//! uploads/<session>/<sanitised>.pdf
//! ```
//!
//! Writes go to a temp file first and are renamed into place, so a reader
//! never sees a half-written `results.json`.

use crate::error::DigestError;
use crate::output::{Classification, PaperSummary, ResultBundle, TopicSynthesis};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sub-directories a download may be served from.
pub const FILE_TYPES: [&str; 3] = ["summaries", "syntheses", "audio"];

const RESULTS_FILE: &str = "results.json";

/// First 8 hex characters of a random v4 UUID.
pub fn new_session_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// True for exactly 8 lowercase hex characters.
pub fn is_valid_session_id(id: &str) -> bool {
    id.len() == 8 && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Make an uploaded file name safe to store.
///
/// Non-ASCII characters are dropped, path separators and whitespace become
/// `_`, anything outside `[A-Za-z0-9_.-]` is removed and leading/trailing
/// dots and underscores are trimmed. Returns None when nothing is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let ascii: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// File stem for a topic: lowercased, spaces → `_`, anything but ASCII
/// alphanumerics, `_` and `-` dropped.
pub fn topic_slug(topic: &str) -> String {
    let slug: String = topic
        .trim()
        .to_lowercase()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        .collect();
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "topic".to_string()
    } else {
        slug.to_string()
    }
}

/// Slugs for `topics`, in order, unique within the list. Collisions get a
/// numeric suffix (`c`, `c_2`, ...).
pub fn unique_topic_slugs<'a>(topics: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut used = HashSet::new();
    topics
        .into_iter()
        .map(|topic| {
            let base = topic_slug(topic);
            let mut slug = base.clone();
            let mut n = 2;
            while !used.insert(slug.clone()) {
                slug = format!("{}_{}", base, n);
                n += 1;
            }
            slug
        })
        .collect()
}

/// `name` with `_<n>` appended to its stem: `paper.pdf` → `paper_2.pdf`.
pub fn numbered_file_name(name: &str, n: usize) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, n, ext),
        _ => format!("{}_{}", name, n),
    }
}

/// Paths of one session's result files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    session_id: String,
    root: PathBuf,
}

impl SessionLayout {
    pub fn new(results_dir: &Path, session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            root: results_dir.join(session_id),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn results_json(&self) -> PathBuf {
        self.root.join(RESULTS_FILE)
    }

    pub fn summaries_dir(&self) -> PathBuf {
        self.root.join("summaries")
    }

    pub fn syntheses_dir(&self) -> PathBuf {
        self.root.join("syntheses")
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("audio")
    }

    pub fn summary_file(&self, paper_id: &str) -> PathBuf {
        self.summaries_dir().join(format!("{}.md", paper_id))
    }

    pub fn synthesis_file(&self, slug: &str) -> PathBuf {
        self.syntheses_dir().join(format!("{}.md", slug))
    }

    /// Path of a downloadable file, or None when the type is unknown or the
    /// name is not already in sanitised form.
    pub fn download_path(&self, file_type: &str, filename: &str) -> Option<PathBuf> {
        if !FILE_TYPES.contains(&file_type) {
            return None;
        }
        if sanitize_filename(filename).as_deref() != Some(filename) {
            return None;
        }
        Some(self.root.join(file_type).join(filename))
    }

    /// Create the session directory and its sub-directories.
    pub async fn create(&self) -> Result<(), DigestError> {
        for dir in [self.summaries_dir(), self.syntheses_dir(), self.audio_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| DigestError::OutputWriteFailed {
                    path: dir.clone(),
                    source: e,
                })?;
        }
        Ok(())
    }
}

/// Upload directory of a session.
pub fn session_upload_dir(upload_dir: &Path, session_id: &str) -> PathBuf {
    upload_dir.join(session_id)
}

/// Atomically write `contents` to `path`, creating parent directories.
pub async fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<(), DigestError> {
    let write_err = |e| DigestError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    debug!("Wrote {}", path.display());
    Ok(())
}

/// Write `results.json` for a finished run.
pub async fn save_bundle(layout: &SessionLayout, bundle: &ResultBundle) -> Result<(), DigestError> {
    let json = serde_json::to_vec_pretty(bundle)
        .map_err(|e| DigestError::Internal(format!("Failed to serialise results: {}", e)))?;
    write_file(&layout.results_json(), json).await
}

/// Read a session's `results.json`; Ok(None) when the session does not exist.
pub async fn load_bundle(
    results_dir: &Path,
    session_id: &str,
) -> Result<Option<ResultBundle>, DigestError> {
    if !is_valid_session_id(session_id) {
        return Ok(None);
    }
    let path = SessionLayout::new(results_dir, session_id).results_json();
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(DigestError::ResultsUnreadable {
                path,
                detail: e.to_string(),
            })
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| DigestError::ResultsUnreadable {
            path,
            detail: e.to_string(),
        })
}

/// Markdown file written for one paper summary.
pub fn summary_markdown(summary: &PaperSummary, classification: Option<&Classification>) -> String {
    let mut md = format!("# {}\n\n", summary.title);
    md.push_str(&format!("**Citation:** {}\n\n", summary.citation.apa));
    if let Some(c) = classification {
        md.push_str(&format!("**Primary topic:** {}", c.primary_topic));
        if !c.secondary_topics.is_empty() {
            md.push_str(&format!(" (also: {})", c.secondary_topics.join(", ")));
        }
        md.push_str("\n\n");
    }
    md.push_str("## Summary\n\n");
    md.push_str(summary.summary.trim());
    md.push('\n');
    md
}

/// Markdown file written for one topic synthesis.
pub fn synthesis_markdown(synthesis: &TopicSynthesis) -> String {
    let mut md = format!("# {}\n\n", synthesis.topic);
    md.push_str(synthesis.synthesis.trim());
    md.push_str("\n\n## References\n\n");
    for citation in &synthesis.citations {
        md.push_str(&format!("- {}\n", citation.apa));
    }
    md
}
