//! Text generation: call the chat provider for summaries and syntheses.
//!
//! This module is deliberately thin. Prompt wording lives in
//! [`crate::prompts`]; here we only build messages, apply the timeout and
//! the optional retry loop, and count tokens.
//!
//! ## Retry Strategy
//!
//! Retries are off by default (`max_retries = 0`): a failed call fails the
//! run. When enabled, the wait before attempt `n` is
//! `retry_backoff_ms * 2^(n-1)`, so with a 500 ms base and 3 retries the
//! sequence is 500 ms → 1 s → 2 s.

use crate::config::PipelineConfig;
use crate::error::DigestError;
use async_trait::async_trait;
use edgequake_llm::{
    ChatMessage, CompletionOptions, EmbeddingProvider, LLMProvider, ProviderFactory,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// One generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: usize,
    /// Shown in logs and timeout errors, e.g. "Summary of 'Attention'".
    pub label: String,
}

/// Generated text and its token usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Generation {
    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }
}

/// Token counts accumulated over a stage or a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// Produces text from a prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, DigestError>;
}

/// [`TextGenerator`] backed by an edgequake-llm chat provider.
pub struct LlmGenerator {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout_secs: u64,
}

impl LlmGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
        }
    }
}

/// Build `CompletionOptions` for one call.
fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

#[async_trait]
impl TextGenerator for LlmGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, DigestError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(&request.system),
            ChatMessage::user(&request.prompt),
        ];
        let options = build_options(self.temperature, request.max_tokens);

        let mut last_err: Option<DigestError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    request.label, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let call = self.provider.chat(&messages, Some(&options));
            match timeout(Duration::from_secs(self.timeout_secs), call).await {
                Ok(Ok(response)) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        request.label,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(Generation {
                        text: response.content,
                        input_tokens: response.prompt_tokens as u64,
                        output_tokens: response.completion_tokens as u64,
                    });
                }
                Ok(Err(e)) => {
                    warn!("{}: attempt {} failed: {}", request.label, attempt + 1, e);
                    last_err = Some(DigestError::LlmApiError {
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(
                        "{}: attempt {} timed out after {}s",
                        request.label,
                        attempt + 1,
                        self.timeout_secs
                    );
                    last_err = Some(DigestError::ApiTimeout {
                        operation: request.label.clone(),
                        secs: self.timeout_secs,
                    });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| DigestError::LlmApiError {
            message: "Unknown error".into(),
        }))
    }
}

fn create_llm_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, DigestError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DigestError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the chat provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`), via
///    [`ProviderFactory::create_llm_provider`], which reads the matching API
///    key from the environment.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **`OPENAI_API_KEY`** with the configured model or `gpt-4.1-nano`.
/// 5. **Auto-detection** with [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, DigestError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_llm_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_llm_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
            return create_llm_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(auto_detect_failed)?;
    Ok(llm_provider)
}

/// Resolve the embedding provider: `config.embedding_provider`, else the
/// embedding half of [`ProviderFactory::from_env`].
pub fn resolve_embedding_provider(
    config: &PipelineConfig,
) -> Result<Arc<dyn EmbeddingProvider>, DigestError> {
    if let Some(ref provider) = config.embedding_provider {
        return Ok(Arc::clone(provider));
    }
    let (_llm, embedding) = ProviderFactory::from_env().map_err(auto_detect_failed)?;
    Ok(embedding)
}

fn auto_detect_failed(e: impl std::fmt::Display) -> DigestError {
    DigestError::ProviderNotConfigured {
        provider: "auto".to_string(),
        hint: format!(
            "No provider could be auto-detected from environment.\n\
            Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
            Error: {}",
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_defaults() {
        let config = PipelineConfig::default();
        let opts = build_options(config.temperature, config.summary_max_tokens);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(500));
    }

    #[test]
    fn resolve_prefers_configured_provider_name() {
        // An unknown provider name must fail rather than fall through to
        // auto-detection.
        let config = PipelineConfig::builder()
            .provider_name("no-such-provider")
            .build()
            .unwrap();
        let err = resolve_provider(&config).err().expect("unknown provider");
        assert!(matches!(
            err,
            DigestError::ProviderNotConfigured { ref provider, .. } if provider == "no-such-provider"
        ));
    }
}
