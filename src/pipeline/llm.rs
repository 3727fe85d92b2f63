//! Transcription Client: one page image in, one Markdown transcript out.
//!
//! [`Transcriber`] is the seam the batch core calls through. It performs a
//! single request/response exchange and never retries on its own; failed
//! calls come back as a [`TranscribeError`] whose [`ErrorClass`] tells the
//! retry policy whether another attempt is worth it.
//!
//! [`VlmTranscriber`] is the production implementation over an
//! `edgequake-llm` vision provider. All prompt text lives in
//! [`crate::prompts`] so it can be changed without touching this module.
//!
//! [`ErrorClass`]: crate::error::ErrorClass

use crate::config::ConversionConfig;
use crate::error::{classify_message, ErrorClass, PipelineError, TranscribeError};
use crate::output::{PageImage, Transcript};
use crate::pipeline::{encode, postprocess};
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError, ProviderFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Model used when an OpenAI key is found and no model was named.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1-nano";

/// Turns one page image into Markdown.
///
/// Implementations must be safe to call from many tasks at once and must
/// not retry internally.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, page: &PageImage) -> Result<Transcript, TranscribeError>;
}

/// [`Transcriber`] backed by a vision-capable LLM provider.
///
/// ## Message Layout
///
/// 1. **System message**: the transcription prompt (or user override)
/// 2. **User message**: the page PNG as a base64 image attachment, empty text
///
/// The empty user text is intentional: VLM APIs require at least one user
/// turn to respond to, but the image carries all the actual content.
pub struct VlmTranscriber {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
    call_timeout: Duration,
}

impl VlmTranscriber {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ConversionConfig) -> Self {
        Self {
            provider,
            system_prompt: system_prompt_for(config).to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            call_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Resolve the provider from `config` and the environment.
    pub fn from_config(config: &ConversionConfig) -> Result<Self, PipelineError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

/// The prompt override, or [`DEFAULT_SYSTEM_PROMPT`].
fn system_prompt_for(config: &ConversionConfig) -> &str {
    config
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYSTEM_PROMPT)
}

fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

impl std::fmt::Debug for VlmTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VlmTranscriber")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

#[async_trait]
impl Transcriber for VlmTranscriber {
    async fn transcribe(&self, page: &PageImage) -> Result<Transcript, TranscribeError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images("", vec![encode::to_image_data(page)]),
        ];
        let options = build_options(self.temperature, self.max_tokens);

        let response = match tokio::time::timeout(
            self.call_timeout,
            self.provider.chat(&messages, Some(&options)),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(classify_llm_error(e)),
            Err(_) => {
                return Err(TranscribeError::transient(format!(
                    "model call timed out after {}s",
                    self.call_timeout.as_secs()
                )))
            }
        };

        debug!(
            "Page {}: {} input tokens, {} output tokens, {:?}",
            page.page_number,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        Ok(Transcript {
            markdown: postprocess::clean_markdown(&response.content),
            input_tokens: response.prompt_tokens as usize,
            output_tokens: response.completion_tokens as usize,
        })
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PipelineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`). The factory reads
///    the matching API key (`OPENAI_API_KEY`, etc.) from the environment.
/// 3. **`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`**, when both are set.
/// 4. **`OPENAI_API_KEY`** present: OpenAI with `config.model` or
///    [`DEFAULT_OPENAI_MODEL`].
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &ConversionConfig) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or_default();
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Classify a provider error by its variant. Only the free-text variants
/// fall back to message matching.
fn classify_llm_error(err: LlmError) -> TranscribeError {
    let class = match &err {
        LlmError::RateLimited(_) | LlmError::NetworkError(_) | LlmError::Timeout => {
            ErrorClass::Transient
        }
        LlmError::AuthError(_)
        | LlmError::InvalidRequest(_)
        | LlmError::ModelNotFound(_)
        | LlmError::TokenLimitExceeded { .. }
        | LlmError::ConfigError(_)
        | LlmError::NotSupported(_) => ErrorClass::Permanent,
        LlmError::ApiError(msg) | LlmError::ProviderError(msg) | LlmError::Unknown(msg) => {
            classify_message(msg)
        }
        LlmError::SerializationError(_) => ErrorClass::Unknown,
    };
    TranscribeError::new(class, err.to_string())
}
