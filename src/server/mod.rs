//! Web form over the pipeline.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /` | the request form |
//! | `POST /` | run a session from the submitted form |
//! | `GET /results/:session_id` | rendered `results.json` |
//! | `GET /download/:session_id/:file_type/:filename` | one result file |
//! | `GET /health` | liveness |
//!
//! Runs are serialised: a single lock is held for the whole pipeline run, so
//! concurrent submissions queue behind one another.

mod error;
mod handlers;

pub use error::AppError;

use crate::run::Pipeline;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use minijinja::Environment;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Largest accepted request body (the PDF uploads).
pub const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    run_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            run_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index).post(handlers::submit))
        .route("/results/:session_id", get(handlers::results))
        .route(
            "/download/:session_id/:file_type/:filename",
            get(handlers::download),
        )
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, build_router(state)).await
}

static TEMPLATES: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    for (name, source) in [
        ("base.html", include_str!("templates/base.html")),
        ("index.html", include_str!("templates/index.html")),
        ("done.html", include_str!("templates/done.html")),
        ("results.html", include_str!("templates/results.html")),
        ("error.html", include_str!("templates/error.html")),
    ] {
        if let Err(e) = env.add_template(name, source) {
            tracing::error!("Template {} failed to parse: {}", name, e);
        }
    }
    env
});

/// Render a named template.
pub(crate) fn render(name: &str, ctx: minijinja::Value) -> Result<String, minijinja::Error> {
    TEMPLATES.get_template(name)?.render(ctx)
}
