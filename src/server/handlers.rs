use super::{render, AppError, AppState};
use crate::config::SortOrder;
use crate::output::{
    parse_list, AudioFile, Classification, DigestRequest, PaperReference, PaperSummary,
    ResultBundle, TopicSynthesis,
};
use crate::store::{self, SessionLayout, FILE_TYPES};
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use minijinja::context;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path as FsPath, PathBuf};
use tracing::{debug, info, warn};

pub async fn health() -> &'static str {
    "OK"
}

pub async fn index(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let config = state.pipeline.config();
    Ok(Html(render(
        "index.html",
        context! {
            max_results => config.max_results,
            sort_options => [
                ("relevance", "Relevance"),
                ("lastUpdatedDate", "Last updated"),
                ("submittedDate", "Submitted"),
            ],
        },
    )?))
}

/// Text fields of the submitted form.
#[derive(Debug, Default)]
struct FormFields {
    query: String,
    topics: String,
    urls: String,
    dois: String,
    max_results: String,
    sort_by: String,
}

impl FormFields {
    fn set(&mut self, name: &str, value: String) {
        match name {
            "query" => self.query = value,
            "topics" => self.topics = value,
            "urls" => self.urls = value,
            "dois" => self.dois = value,
            "max_results" => self.max_results = value,
            "sort_by" => self.sort_by = value,
            other => debug!("Ignoring form field '{}'", other),
        }
    }

    fn into_request(self, pdf_paths: Vec<PathBuf>) -> DigestRequest {
        let query = self.query.trim();
        DigestRequest {
            query: (!query.is_empty()).then(|| query.to_string()),
            topics: parse_list(&self.topics),
            pdf_paths,
            urls: parse_list(&self.urls),
            dois: parse_list(&self.dois),
            max_results: self.max_results.trim().parse().ok(),
            sort_by: (!self.sort_by.trim().is_empty())
                .then(|| SortOrder::parse_lenient(&self.sort_by)),
        }
    }
}

pub async fn submit(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Html<String>, AppError> {
    let session_id = store::new_session_id();
    let upload_dir = store::session_upload_dir(&state.pipeline.config().upload_dir, &session_id);

    let outcome = run_submission(&state, &session_id, &upload_dir, multipart).await;
    if outcome.is_err() {
        discard_uploads(&upload_dir).await;
    }
    let bundle = outcome?;

    Ok(Html(render(
        "done.html",
        context! {
            session_id => &bundle.session_id,
            counts => bundle.counts(),
        },
    )?))
}

async fn run_submission(
    state: &AppState,
    session_id: &str,
    upload_dir: &FsPath,
    mut multipart: Multipart,
) -> Result<ResultBundle, AppError> {
    let mut fields = FormFields::default();
    let mut pdf_paths: Vec<PathBuf> = Vec::new();
    let mut saved_names: HashSet<String> = HashSet::new();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name != "pdf_files" {
            let value = field.text().await?;
            fields.set(&name, value);
            continue;
        }

        let original = field.file_name().unwrap_or_default().to_string();
        if original.is_empty() {
            continue;
        }
        let safe = store::sanitize_filename(&original).ok_or_else(|| {
            AppError::BadRequest(format!("Unusable upload file name '{}'", original))
        })?;
        let mut unique = safe.clone();
        let mut n = 2;
        while !saved_names.insert(unique.clone()) {
            unique = store::numbered_file_name(&safe, n);
            n += 1;
        }
        let data = field.bytes().await?;
        let path = upload_dir.join(&unique);
        store::write_file(&path, &data).await?;
        debug!("Saved upload {} ({} bytes)", path.display(), data.len());
        pdf_paths.push(path);
    }

    let request = fields.into_request(pdf_paths);
    if request.query().is_none()
        && request.pdf_paths.is_empty()
        && request.urls.is_empty()
        && request.dois.is_empty()
    {
        return Err(AppError::BadRequest(
            "Enter a query, a URL or a DOI, or upload a PDF.".into(),
        ));
    }

    let _running = state.run_lock.lock().await;
    info!("Session {} accepted: {}", session_id, request.describe());
    Ok(state.pipeline.run_session(session_id, &request).await?)
}

/// Remove a failed session's uploads.
async fn discard_uploads(upload_dir: &FsPath) {
    match tokio::fs::remove_dir_all(upload_dir).await {
        Ok(()) => debug!("Removed uploads in {}", upload_dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", upload_dir.display(), e),
    }
}

#[derive(Serialize)]
struct PaperView<'a> {
    paper: &'a PaperReference,
    summary: Option<&'a PaperSummary>,
    classification: Option<&'a Classification>,
    audio: Option<&'a AudioFile>,
}

#[derive(Serialize)]
struct SynthesisView<'a> {
    synthesis: &'a TopicSynthesis,
    file_name: String,
    audio: Option<&'a AudioFile>,
}

pub async fn results(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Html<String>, AppError> {
    let bundle = store::load_bundle(&state.pipeline.config().results_dir, &session_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Results not found".into()))?;

    let audio_named = |name: String| bundle.audio_files.iter().find(|a| a.file_name == name);
    let papers: Vec<PaperView> = bundle
        .papers
        .iter()
        .map(|paper| PaperView {
            paper,
            summary: bundle.summaries.get(&paper.id),
            classification: bundle.classification_of(&paper.id),
            audio: audio_named(format!("summary_{}.mp3", paper.id)),
        })
        .collect();
    let syntheses: Vec<SynthesisView> = bundle
        .syntheses
        .iter()
        .map(|synthesis| SynthesisView {
            synthesis,
            file_name: format!("{}.md", synthesis.slug),
            audio: audio_named(format!("synthesis_{}.mp3", synthesis.slug)),
        })
        .collect();

    Ok(Html(render(
        "results.html",
        context! {
            session_id => &bundle.session_id,
            created_at => bundle.created_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            query => &bundle.query,
            topics => &bundle.topics,
            counts => bundle.counts(),
            stats => &bundle.stats,
            papers => papers,
            syntheses => syntheses,
        },
    )?))
}

pub async fn download(
    State(state): State<AppState>,
    Path((session_id, file_type, filename)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    if !FILE_TYPES.contains(&file_type.as_str()) {
        return Err(AppError::BadRequest("Invalid file type".into()));
    }
    let not_found = || AppError::NotFound("File not found".into());
    if !store::is_valid_session_id(&session_id) {
        return Err(not_found());
    }

    let layout = SessionLayout::new(&state.pipeline.config().results_dir, &session_id);
    let path = layout
        .download_path(&file_type, &filename)
        .ok_or_else(not_found)?;
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => {
            return Err(AppError::Pipeline(crate::error::DigestError::Internal(
                format!("reading {}: {}", path.display(), e),
            )))
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type(&filename).to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        data,
    )
        .into_response())
}

fn content_type(filename: &str) -> &'static str {
    match filename.rsplit_once('.').map(|(_, ext)| ext) {
        Some("md") => "text/markdown; charset=utf-8",
        Some("mp3") => "audio/mpeg",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
