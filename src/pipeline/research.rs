//! Research stage: turn a request into a list of paper references.
//!
//! Free-text queries go to arXiv (Atom feed) and Semantic Scholar (Graph
//! API). DOIs are resolved through CrossRef. arXiv ids, arXiv URLs and
//! `doi.org` URLs are recognised wherever they appear, so a user can paste
//! any of them into the query box.
//!
//! ## De-duplication
//!
//! The same paper often comes back from both indexes. References are
//! de-duplicated by DOI first, then by normalised title; the first
//! occurrence wins, so uploads and explicit URLs beat search hits.

use crate::config::{Endpoints, PipelineConfig, SearchSource, SortOrder};
use crate::error::DigestError;
use crate::output::{DigestRequest, PaperReference, PaperSource};
use crate::pipeline::input::{build_http_client, is_url};
use async_trait::async_trait;
use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Fields requested from the Semantic Scholar Graph API.
const SEMANTIC_SCHOLAR_FIELDS: &str =
    "title,abstract,year,authors,externalIds,url,venue,openAccessPdf,publicationDate";

// ── Identifier classification ────────────────────────────────────────────

/// What a user-supplied string refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    ArxivId(String),
    Doi(String),
    Url(String),
    Query(String),
}

static RE_DOI: Lazy<Regex> = Lazy::new(|| Regex::new(r"^10\.\d{4,9}/\S+$").unwrap());

static RE_ARXIV_NEW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}\.\d{4,5}(v\d+)?$").unwrap());

static RE_ARXIV_OLD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z\-]+(\.[A-Z]{2})?/\d{7}(v\d+)?$").unwrap());

/// Decide whether `input` is an arXiv id, a DOI, a URL or a search query.
pub fn classify_identifier(input: &str) -> Identifier {
    let input = input.trim();
    if let Some(doi) = normalize_doi(input) {
        return Identifier::Doi(doi);
    }
    if let Some(id) = arxiv_id_from(input) {
        return Identifier::ArxivId(id);
    }
    if is_url(input) {
        return Identifier::Url(input.to_string());
    }
    Identifier::Query(input.to_string())
}

/// Strip `doi:` / `https://doi.org/` style prefixes and validate the rest.
pub fn normalize_doi(input: &str) -> Option<String> {
    let mut s = input.trim();
    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi:",
        "DOI:",
    ] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim();
            break;
        }
    }
    RE_DOI.is_match(s).then(|| s.to_string())
}

/// Extract an arXiv id from a bare id, an `arXiv:` id or an arxiv.org URL.
pub fn arxiv_id_from(input: &str) -> Option<String> {
    let s = input.trim();
    let s = s
        .strip_prefix("arXiv:")
        .or_else(|| s.strip_prefix("arxiv:"))
        .unwrap_or(s);

    let candidate = if is_url(s) {
        let url = reqwest::Url::parse(s).ok()?;
        let host = url.host_str()?;
        if !host.ends_with("arxiv.org") {
            return None;
        }
        let path = url.path();
        let rest = path
            .strip_prefix("/abs/")
            .or_else(|| path.strip_prefix("/pdf/"))?;
        rest.trim_end_matches(".pdf").trim_end_matches('/').to_string()
    } else {
        s.to_string()
    };

    (RE_ARXIV_NEW.is_match(&candidate) || RE_ARXIV_OLD.is_match(&candidate)).then_some(candidate)
}

// ── Index trait ──────────────────────────────────────────────────────────

/// A searchable paper index.
#[async_trait]
pub trait PaperIndex: Send + Sync {
    /// Search every enabled source for `query`, `max_results` per source.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        sort: SortOrder,
    ) -> Result<Vec<PaperReference>, DigestError>;

    /// Fetch a single arXiv entry by id.
    async fn lookup_arxiv(&self, arxiv_id: &str) -> Result<PaperReference, DigestError>;

    /// Resolve a DOI to its metadata.
    async fn resolve_doi(&self, doi: &str) -> Result<PaperReference, DigestError>;
}

/// [`PaperIndex`] backed by arXiv, Semantic Scholar and CrossRef.
pub struct ScholarlyIndex {
    client: reqwest::Client,
    endpoints: Endpoints,
    sources: Vec<SearchSource>,
    semantic_scholar_key: Option<String>,
    timeout_secs: u64,
}

impl ScholarlyIndex {
    pub fn new(config: &PipelineConfig) -> Result<Self, DigestError> {
        let client = build_http_client(&config.user_agent, config.download_timeout_secs)?;
        Ok(Self::with_client(client, config))
    }

    /// Reuse an existing client.
    pub fn with_client(client: reqwest::Client, config: &PipelineConfig) -> Self {
        Self {
            client,
            endpoints: config.endpoints.clone(),
            sources: config.sources.clone(),
            semantic_scholar_key: std::env::var("SEMANTIC_SCHOLAR_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            timeout_secs: config.download_timeout_secs,
        }
    }

    async fn get_text(
        &self,
        service: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<String, DigestError> {
        let response = request.send().await.map_err(|e| DigestError::SearchFailed {
            service: service.to_string(),
            reason: if e.is_timeout() {
                format!("timed out after {}s", self.timeout_secs)
            } else {
                e.to_string()
            },
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::SearchFailed {
                service: service.to_string(),
                reason: format!("HTTP {}", status),
            });
        }
        response.text().await.map_err(|e| DigestError::SearchFailed {
            service: service.to_string(),
            reason: e.to_string(),
        })
    }

    async fn query_arxiv(&self, params: &[(&str, String)]) -> Result<Vec<PaperReference>, DigestError> {
        let body = self
            .get_text("arXiv", self.client.get(&self.endpoints.arxiv).query(params))
            .await?;
        parse_arxiv_feed(body.as_bytes())
    }

    async fn search_arxiv(
        &self,
        query: &str,
        max_results: usize,
        sort: SortOrder,
    ) -> Result<Vec<PaperReference>, DigestError> {
        let papers = self
            .query_arxiv(&[
                ("search_query", format!("all:{}", query)),
                ("start", "0".to_string()),
                ("max_results", max_results.to_string()),
                ("sortBy", sort.as_arxiv_param().to_string()),
                ("sortOrder", "descending".to_string()),
            ])
            .await?;
        debug!("arXiv returned {} papers for '{}'", papers.len(), query);
        Ok(papers)
    }

    async fn search_semantic_scholar(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<PaperReference>, DigestError> {
        let mut request = self.client.get(&self.endpoints.semantic_scholar).query(&[
            ("query", query.to_string()),
            ("limit", max_results.to_string()),
            ("fields", SEMANTIC_SCHOLAR_FIELDS.to_string()),
        ]);
        if let Some(key) = &self.semantic_scholar_key {
            request = request.header("x-api-key", key);
        }
        let body = self.get_text("Semantic Scholar", request).await?;
        let papers = parse_semantic_scholar(&body)?;
        debug!("Semantic Scholar returned {} papers for '{}'", papers.len(), query);
        Ok(papers)
    }
}

#[async_trait]
impl PaperIndex for ScholarlyIndex {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        sort: SortOrder,
    ) -> Result<Vec<PaperReference>, DigestError> {
        let mut papers = Vec::new();
        for source in &self.sources {
            let found = match source {
                SearchSource::Arxiv => self.search_arxiv(query, max_results, sort).await?,
                SearchSource::SemanticScholar => {
                    self.search_semantic_scholar(query, max_results).await?
                }
            };
            papers.extend(found);
        }
        Ok(papers)
    }

    async fn lookup_arxiv(&self, arxiv_id: &str) -> Result<PaperReference, DigestError> {
        let papers = self
            .query_arxiv(&[
                ("id_list", arxiv_id.to_string()),
                ("max_results", "1".to_string()),
            ])
            .await?;
        papers.into_iter().next().ok_or_else(|| DigestError::NoPapers {
            query: format!("arXiv:{}", arxiv_id),
        })
    }

    async fn resolve_doi(&self, doi: &str) -> Result<PaperReference, DigestError> {
        let url = format!("{}/{}", self.endpoints.crossref.trim_end_matches('/'), doi);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DigestError::DoiResolutionFailed {
                doi: doi.to_string(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(DigestError::DoiResolutionFailed {
                doi: doi.to_string(),
                reason: format!("CrossRef returned HTTP {}", response.status()),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| DigestError::DoiResolutionFailed {
                doi: doi.to_string(),
                reason: e.to_string(),
            })?;
        parse_crossref(doi, &body)
    }
}

// ── Response parsing ─────────────────────────────────────────────────────

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse an arXiv Atom response.
///
/// arXiv reports query errors as a feed with a single entry whose id points
/// at `/api/errors`; that is turned into [`DigestError::SearchFailed`].
pub fn parse_arxiv_feed(body: &[u8]) -> Result<Vec<PaperReference>, DigestError> {
    let feed = feed_rs::parser::parse(body).map_err(|e| DigestError::SearchFailed {
        service: "arXiv".into(),
        reason: format!("unreadable Atom feed: {}", e),
    })?;

    let mut papers = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        if entry.id.contains("/api/errors") {
            let reason = entry
                .summary
                .map(|s| collapse_whitespace(&s.content))
                .unwrap_or_else(|| "unknown error".into());
            return Err(DigestError::SearchFailed {
                service: "arXiv".into(),
                reason,
            });
        }

        let arxiv_id = entry
            .id
            .split("/abs/")
            .nth(1)
            .unwrap_or(&entry.id)
            .to_string();
        let title = entry
            .title
            .as_ref()
            .map(|t| collapse_whitespace(&t.content))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Unknown Title".into());

        let mut paper = PaperReference::new(&arxiv_id, title, PaperSource::Arxiv);
        paper.authors = entry.authors.iter().map(|a| a.name.trim().to_string()).collect();
        paper.abstract_text = entry
            .summary
            .as_ref()
            .map(|s| collapse_whitespace(&s.content))
            .filter(|s| !s.is_empty());
        if let Some(published) = entry.published {
            paper.year = Some(published.year());
            paper.published = Some(published.date_naive().to_string());
        }

        for link in &entry.links {
            match (link.title.as_deref(), link.rel.as_deref()) {
                (Some("pdf"), _) => paper.pdf_url = Some(link.href.clone()),
                (Some("doi"), _) => paper.doi = normalize_doi(&link.href),
                (_, Some("alternate")) => paper.url = Some(link.href.clone()),
                _ => {}
            }
        }
        if paper.url.is_none() && is_url(&entry.id) {
            paper.url = Some(entry.id.clone());
        }
        papers.push(paper);
    }
    Ok(papers)
}

#[derive(Debug, Deserialize)]
struct SemanticScholarResponse {
    #[serde(default)]
    data: Vec<SemanticScholarPaper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SemanticScholarPaper {
    #[serde(default)]
    paper_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "abstract", default)]
    abstract_text: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    authors: Vec<SemanticScholarAuthor>,
    #[serde(default)]
    external_ids: Option<SemanticScholarIds>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    venue: Option<String>,
    #[serde(default)]
    open_access_pdf: Option<SemanticScholarPdf>,
    #[serde(default)]
    publication_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SemanticScholarAuthor {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SemanticScholarIds {
    #[serde(rename = "DOI", default)]
    doi: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SemanticScholarPdf {
    #[serde(default)]
    url: Option<String>,
}

/// Parse a Semantic Scholar paper-search response. Untitled hits are skipped.
pub fn parse_semantic_scholar(body: &str) -> Result<Vec<PaperReference>, DigestError> {
    let response: SemanticScholarResponse =
        serde_json::from_str(body).map_err(|e| DigestError::SearchFailed {
            service: "Semantic Scholar".into(),
            reason: format!("unexpected response: {}", e),
        })?;

    Ok(response
        .data
        .into_iter()
        .filter_map(|p| {
            let title = p.title.map(|t| collapse_whitespace(&t)).filter(|t| !t.is_empty())?;
            let identifier = p.paper_id.clone().unwrap_or_else(|| title.clone());
            let mut paper = PaperReference::new(identifier, title, PaperSource::SemanticScholar);
            paper.authors = p.authors.into_iter().filter_map(|a| a.name).collect();
            paper.abstract_text = p.abstract_text.filter(|a| !a.trim().is_empty());
            paper.year = p.year;
            paper.published = p.publication_date;
            paper.journal = p.venue.filter(|v| !v.is_empty());
            paper.doi = p
                .external_ids
                .and_then(|ids| ids.doi)
                .and_then(|d| normalize_doi(&d));
            paper.url = p.url;
            paper.pdf_url = p.open_access_pdf.and_then(|o| o.url).filter(|u| !u.is_empty());
            Some(paper)
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct CrossRefResponse {
    message: CrossRefWork,
}

#[derive(Debug, Deserialize)]
struct CrossRefWork {
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<CrossRefAuthor>,
    #[serde(rename = "abstract", default)]
    abstract_text: Option<String>,
    #[serde(default)]
    published: Option<CrossRefDate>,
    #[serde(default)]
    issued: Option<CrossRefDate>,
    #[serde(rename = "container-title", default)]
    container_title: Vec<String>,
    #[serde(default)]
    publisher: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossRefAuthor {
    #[serde(default)]
    given: Option<String>,
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossRefDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i64>>>,
}

impl CrossRefDate {
    fn year(&self) -> Option<i32> {
        self.date_parts
            .first()
            .and_then(|parts| parts.first().copied().flatten())
            .and_then(|y| i32::try_from(y).ok())
    }
}

static RE_MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Remove JATS/XML tags from a CrossRef abstract.
pub fn strip_markup(text: &str) -> String {
    let plain = collapse_whitespace(&RE_MARKUP.replace_all(text, " "));
    plain
        .strip_prefix("Abstract ")
        .map(str::to_string)
        .unwrap_or(plain)
}

/// Parse a CrossRef `/works/{doi}` response.
pub fn parse_crossref(doi: &str, body: &str) -> Result<PaperReference, DigestError> {
    let response: CrossRefResponse =
        serde_json::from_str(body).map_err(|e| DigestError::DoiResolutionFailed {
            doi: doi.to_string(),
            reason: format!("unexpected CrossRef response: {}", e),
        })?;
    let work = response.message;

    let title = work
        .title
        .first()
        .map(|t| collapse_whitespace(t))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Unknown Title".into());

    let mut paper = PaperReference::new(doi, title, PaperSource::Doi);
    paper.authors = work
        .author
        .into_iter()
        .filter_map(|a| {
            let joined = [a.given, a.family]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            if joined.is_empty() {
                a.name
            } else {
                Some(joined)
            }
        })
        .collect();
    paper.abstract_text = work
        .abstract_text
        .map(|a| strip_markup(&a))
        .filter(|a| !a.is_empty());
    paper.year = work
        .published
        .as_ref()
        .and_then(CrossRefDate::year)
        .or_else(|| work.issued.as_ref().and_then(CrossRefDate::year));
    paper.journal = work.container_title.into_iter().next().filter(|j| !j.is_empty());
    paper.publisher = work.publisher.filter(|p| !p.is_empty());
    paper.doi = Some(doi.to_string());
    paper.url = Some(format!("https://doi.org/{}", doi));
    Ok(paper)
}

// ── Gathering ────────────────────────────────────────────────────────────

/// Resolve one user-supplied identifier into references.
async fn resolve_identifier(
    index: &dyn PaperIndex,
    input: &str,
    max_results: usize,
    sort: SortOrder,
) -> Result<Vec<PaperReference>, DigestError> {
    match classify_identifier(input) {
        Identifier::ArxivId(id) => Ok(vec![index.lookup_arxiv(&id).await?]),
        Identifier::Doi(doi) => Ok(vec![index.resolve_doi(&doi).await?]),
        Identifier::Url(url) => {
            let mut paper = PaperReference::new(&url, &url, PaperSource::Url);
            paper.url = Some(url);
            Ok(vec![paper])
        }
        Identifier::Query(q) if q.is_empty() => Ok(Vec::new()),
        Identifier::Query(q) => index.search(&q, max_results, sort).await,
    }
}

/// Collect references for every input of a request.
///
/// Order: uploads, URLs, DOIs, then the query. The result is de-duplicated
/// and every reference carries a unique `id`.
pub async fn gather_references(
    index: &dyn PaperIndex,
    request: &DigestRequest,
    config: &PipelineConfig,
) -> Result<Vec<PaperReference>, DigestError> {
    let max_results = request.max_results.unwrap_or(config.max_results).clamp(1, 50);
    let sort = request.sort_by.unwrap_or(config.sort_by);
    let mut papers = Vec::new();

    for path in &request.pdf_paths {
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().replace('_', " "))
            .unwrap_or_else(|| "Uploaded paper".into());
        let mut paper =
            PaperReference::new(path.display().to_string(), title, PaperSource::Upload);
        paper.local_path = Some(path.clone());
        papers.push(paper);
    }

    for url in &request.urls {
        papers.extend(resolve_identifier(index, url, max_results, sort).await?);
    }

    for raw in &request.dois {
        let doi = normalize_doi(raw).ok_or_else(|| DigestError::InvalidInput {
            input: raw.clone(),
        })?;
        papers.push(index.resolve_doi(&doi).await?);
    }

    if let Some(query) = request.query() {
        let found = resolve_identifier(index, query, max_results, sort).await?;
        if found.is_empty() {
            warn!("No search results for '{}'", query);
        }
        papers.extend(found);
    }

    let before = papers.len();
    let mut papers = dedupe_references(papers);
    if papers.is_empty() {
        return Err(DigestError::NoPapers {
            query: request.describe(),
        });
    }
    assign_ids(&mut papers);

    info!(
        "Research found {} papers ({} duplicates dropped)",
        papers.len(),
        before - papers.len()
    );
    Ok(papers)
}

/// Lowercase alphanumeric words of a title, for duplicate detection.
fn title_key(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop later references with an already-seen DOI or title.
pub fn dedupe_references(papers: Vec<PaperReference>) -> Vec<PaperReference> {
    let mut seen_dois = HashSet::new();
    let mut seen_titles = HashSet::new();
    papers
        .into_iter()
        .filter(|p| {
            if let Some(doi) = &p.doi {
                if !seen_dois.insert(doi.to_lowercase()) {
                    return false;
                }
            }
            let key = title_key(&p.title);
            if key.is_empty() || key == "unknown title" || p.source == PaperSource::Url {
                return true;
            }
            seen_titles.insert(key)
        })
        .collect()
}

/// File-name safe slug: lowercase ASCII alphanumerics joined by `_`.
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(text.len().min(max_len));
    let mut pending_sep = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
            if slug.len() >= max_len {
                break;
            }
        } else {
            pending_sep = true;
        }
    }
    slug.trim_end_matches('_').to_string()
}

/// Give every reference an id unique within the run.
///
/// arXiv papers use their arXiv id, DOI papers their DOI, everything else
/// its title; collisions get a numeric suffix.
pub fn assign_ids(papers: &mut [PaperReference]) {
    let mut used = HashSet::new();
    for paper in papers.iter_mut() {
        let basis = match (paper.source, &paper.doi) {
            (PaperSource::Arxiv, _) => paper.identifier.clone(),
            (_, Some(doi)) => doi.clone(),
            _ => paper.title.clone(),
        };
        let mut base = slugify(&basis, 48);
        if base.is_empty() {
            base = "paper".into();
        }
        let mut id = base.clone();
        let mut n = 2;
        while !used.insert(id.clone()) {
            id = format!("{}_{}", base, n);
            n += 1;
        }
        paper.id = id;
    }
}
