//! CLI binary for paper-digest.
//!
//! `serve` runs the web form; `run` digests one request from the command
//! line. Both map their flags onto `PipelineConfig`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use paper_digest::server::{serve, AppState};
use paper_digest::{
    DigestRequest, EmbeddingBackend, Pipeline, PipelineConfig, PipelineProgressCallback,
    ProgressCallback, SortOrder, Stage,
};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar, re-styled at the start of every stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(Self::spinner_style());
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&TICKS)
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&TICKS)
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, session_id: &str) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Session {session_id}"))
        ));
    }

    fn on_stage_start(&self, stage: Stage, items: usize) {
        self.bar.reset();
        if items == 0 {
            self.bar.set_style(Self::spinner_style());
        } else {
            self.bar.set_style(Self::bar_style());
            self.bar.set_length(items as u64);
        }
        self.bar.set_prefix(stage.label());
        self.bar.set_message("");
    }

    fn on_item_complete(&self, _stage: Stage, index: usize, _total: usize, label: &str) {
        self.bar.set_position(index as u64);
        let label: String = label.chars().take(60).collect();
        self.bar.set_message(label);
    }

    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<15} {}",
            green("✓"),
            stage.label(),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_run_complete(&self, _session_id: &str) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Web form on http://127.0.0.1:5000
  paperdigest serve

  # Search, classify into two topics, summarise and narrate
  paperdigest run --query "graph neural networks" --topics "chemistry,social networks"

  # Explicit papers, no audio, JSON bundle on stdout
  paperdigest run --doi 10.1038/nature14539 --url https://arxiv.org/abs/1706.03762 \
      --pdf paper.pdf --no-audio --json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (chat + embeddings)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  HF_TOKEN                Hugging Face token for --embedding huggingface
  SEMANTIC_SCHOLAR_API_KEY  Raises the Semantic Scholar rate limit
  PDFIUM_LIB_PATH         Path to libpdfium (default: system library)

  Every flag below also reads PAPERDIGEST_<FLAG>. A .env file is loaded first.
"#;

/// Search, read, classify, summarise and narrate research papers.
#[derive(Parser, Debug)]
#[command(
    name = "paperdigest",
    version,
    about = "Search, read, classify, summarise and narrate research papers",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    shared: SharedArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the web form.
    Serve {
        /// Address to bind.
        #[arg(long, env = "PAPERDIGEST_BIND", default_value = "127.0.0.1:5000")]
        bind: SocketAddr,

        /// Directory for uploaded PDFs.
        #[arg(long, env = "PAPERDIGEST_UPLOAD_DIR", default_value = "uploads")]
        upload_dir: PathBuf,
    },

    /// Digest one request and print the result counts.
    Run {
        /// Search query, arXiv id, DOI or URL.
        #[arg(long, env = "PAPERDIGEST_QUERY")]
        query: Option<String>,

        /// Comma-separated topic labels.
        #[arg(long, env = "PAPERDIGEST_TOPICS", default_value = "")]
        topics: String,

        /// Local PDF file (repeatable, or comma-separated).
        #[arg(long = "pdf", env = "PAPERDIGEST_PDF", value_delimiter = ',')]
        pdfs: Vec<PathBuf>,

        /// Paper URL (repeatable, or comma-separated).
        #[arg(long = "url", env = "PAPERDIGEST_URL", value_delimiter = ',')]
        urls: Vec<String>,

        /// DOI (repeatable, or comma-separated).
        #[arg(long = "doi", env = "PAPERDIGEST_DOI", value_delimiter = ',')]
        dois: Vec<String>,

        /// Print the whole result bundle as JSON.
        #[arg(long, env = "PAPERDIGEST_JSON")]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct SharedArgs {
    /// LLM model ID (e.g. gpt-4.1-nano, claude-sonnet-4-20250514).
    #[arg(long, global = true, env = "PAPERDIGEST_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "PAPERDIGEST_PROVIDER")]
    provider: Option<String>,

    /// Embedding backend for topic classification.
    #[arg(long, global = true, env = "PAPERDIGEST_EMBEDDING", value_enum, default_value = "provider")]
    embedding: EmbeddingArg,

    /// Root directory for session results.
    #[arg(long, global = true, env = "PAPERDIGEST_RESULTS_DIR", default_value = "results")]
    results_dir: PathBuf,

    /// Papers requested per search source (1–50).
    #[arg(long, global = true, env = "PAPERDIGEST_MAX_RESULTS", default_value_t = 5,
          value_parser = clap::value_parser!(u32).range(1..=50))]
    max_results: u32,

    /// arXiv ordering: relevance, lastUpdatedDate, submittedDate.
    #[arg(long, global = true, env = "PAPERDIGEST_SORT", default_value = "relevance")]
    sort: String,

    /// Skip MP3 generation.
    #[arg(long, global = true, env = "PAPERDIGEST_NO_AUDIO")]
    no_audio: bool,

    /// Summarise search results from their abstracts, without downloading PDFs.
    #[arg(long, global = true, env = "PAPERDIGEST_ABSTRACTS_ONLY")]
    abstracts_only: bool,

    /// Retries per LLM call.
    #[arg(long, global = true, env = "PAPERDIGEST_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// HTTP download and index query timeout in seconds.
    #[arg(long, global = true, env = "PAPERDIGEST_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-call model timeout (chat, embedding, TTS chunk) in seconds.
    #[arg(long, global = true, env = "PAPERDIGEST_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PAPERDIGEST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PAPERDIGEST_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum EmbeddingArg {
    Provider,
    Huggingface,
}

impl From<EmbeddingArg> for EmbeddingBackend {
    fn from(v: EmbeddingArg) -> Self {
        match v {
            EmbeddingArg::Provider => EmbeddingBackend::Provider,
            EmbeddingArg::Huggingface => EmbeddingBackend::minilm(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is the normal case.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let shared = &cli.shared;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs for a terminal `run`.
    let show_progress =
        !shared.quiet && matches!(cli.command, Command::Run { json: false, .. });
    let filter = if shared.verbose {
        "debug"
    } else if shared.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve {
            bind,
            ref upload_dir,
        } => {
            let config = build_config(shared, Some(upload_dir.clone()), None)?;
            let pipeline = Pipeline::from_config(config).context("Failed to set up the pipeline")?;
            if !shared.quiet {
                eprintln!("{} Serving on {}", cyan("◆"), bold(&format!("http://{bind}")));
            }
            serve(bind, AppState::new(pipeline))
                .await
                .with_context(|| format!("Server on {bind} failed"))?;
        }
        Command::Run {
            ref query,
            ref topics,
            ref pdfs,
            ref urls,
            ref dois,
            json,
        } => {
            let progress: Option<ProgressCallback> = if show_progress {
                Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
            } else {
                None
            };
            let config = build_config(shared, None, progress)?;
            let pipeline = Pipeline::from_config(config).context("Failed to set up the pipeline")?;

            let request = DigestRequest {
                query: query.clone(),
                topics: paper_digest::output::parse_list(topics),
                pdf_paths: pdfs.clone(),
                urls: urls.clone(),
                dois: dois.clone(),
                max_results: None,
                sort_by: None,
            };
            let bundle = pipeline.run(&request).await.context("Digest failed")?;

            if json {
                let out =
                    serde_json::to_string_pretty(&bundle).context("Failed to serialise results")?;
                println!("{out}");
            } else if !shared.quiet {
                let counts = bundle.counts();
                let session_dir = shared.results_dir.join(&bundle.session_id);
                eprintln!(
                    "{}  {} papers, {} summaries, {} syntheses, {} audio files  {}ms  →  {}",
                    green("✔"),
                    counts.papers,
                    counts.summaries,
                    counts.syntheses,
                    counts.audio_files,
                    bundle.stats.total_duration_ms,
                    bold(&session_dir.display().to_string()),
                );
                eprintln!(
                    "   {} tokens in  /  {} tokens out",
                    dim(&bundle.stats.total_input_tokens.to_string()),
                    dim(&bundle.stats.total_output_tokens.to_string()),
                );
            }
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(
    shared: &SharedArgs,
    upload_dir: Option<PathBuf>,
    progress: Option<ProgressCallback>,
) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .results_dir(&shared.results_dir)
        .max_results(shared.max_results as usize)
        .sort_by(SortOrder::parse_lenient(&shared.sort))
        .embedding(shared.embedding.into())
        .generate_audio(!shared.no_audio)
        .fetch_full_text(!shared.abstracts_only)
        .max_retries(shared.max_retries)
        .download_timeout_secs(shared.download_timeout)
        .api_timeout_secs(shared.api_timeout);

    if let Some(dir) = upload_dir {
        builder = builder.upload_dir(dir);
    }
    if let Some(ref model) = shared.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = shared.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(cli: Cli) -> (Vec<PathBuf>, Vec<String>, Vec<String>) {
        match cli.command {
            Command::Run { pdfs, urls, dois, .. } => (pdfs, urls, dois),
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn paper_lists_come_from_flags_or_environment() {
        let cli = Cli::try_parse_from([
            "paperdigest", "run", "--pdf", "a.pdf", "--pdf", "b.pdf", "--doi", "10.1/x,10.2/y",
        ])
        .unwrap();
        let (pdfs, _, dois) = run_args(cli);
        assert_eq!(pdfs, vec![PathBuf::from("a.pdf"), PathBuf::from("b.pdf")]);
        assert_eq!(dois, vec!["10.1/x", "10.2/y"]);

        std::env::set_var("PAPERDIGEST_URL", "https://a.org/p.pdf,https://b.org/q");
        let parsed = Cli::try_parse_from(["paperdigest", "run"]);
        std::env::remove_var("PAPERDIGEST_URL");
        let (_, urls, _) = run_args(parsed.unwrap());
        assert_eq!(urls, vec!["https://a.org/p.pdf", "https://b.org/q"]);
    }
}
