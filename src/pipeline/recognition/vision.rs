//! Recognition backend that asks a vision LLM to transcribe the page.
//!
//! Useful where tesseract lacks a script model or the scan is handwritten.
//! The model reports its own confidence; no word geometry is available, so
//! results carry an empty word list.

use super::{PageRecognition, ProgressReporter, RecognitionBackend};
use crate::config::{ExtractionConfig, LanguageSet};
use crate::error::RecognitionError;
use crate::pipeline::encode::encode_page;
use crate::pipeline::retry::{retry, Failure, RetryPolicy};
use crate::prompts::{transcription_request, TRANSCRIPTION_PROMPT};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use futures::FutureExt;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_VISION_MODEL: &str = "gpt-4.1-nano";

pub struct VisionBackend {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    policy: RetryPolicy,
}

impl VisionBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(config.temperature),
                max_tokens: Some(config.max_tokens),
                ..Default::default()
            },
            policy: config.retry_policy(),
        }
    }

    /// Resolve the provider from `config` and build the backend.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, RecognitionError> {
        Ok(Self::new(resolve_provider(config)?, config))
    }

    async fn transcribe(
        &self,
        image: &DynamicImage,
        languages: &LanguageSet,
        progress: &ProgressReporter,
    ) -> Result<PageRecognition, String> {
        let image_data = encode_page(image).map_err(|e| format!("cannot encode page image: {e}"))?;
        let messages = vec![
            ChatMessage::system(TRANSCRIPTION_PROMPT),
            ChatMessage::user_with_images(&transcription_request(languages), vec![image_data]),
        ];
        progress.report(10);

        let (provider, options, messages) = (&self.provider, &self.options, &messages);
        let response = retry(&self.policy, "vision transcription", |_| async move {
            provider
                .chat(messages, Some(options))
                .await
                .map_err(|e| Failure::Transient(e.to_string()))
        })
        .await
        .map_err(|exhausted| {
            format!(
                "vision model failed after {} attempt(s): {}",
                exhausted.attempts, exhausted.error
            )
        })?;

        debug!(
            "vision page: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        progress.report(100);
        Ok(parse_transcription(&response.content))
    }
}

impl RecognitionBackend for VisionBackend {
    fn name(&self) -> &str {
        "vision"
    }

    fn initialize<'a>(&'a self, _languages: &'a LanguageSet) -> BoxFuture<'a, Result<(), String>> {
        // The provider was resolved at construction; there are no models to load.
        async { Ok(()) }.boxed()
    }

    fn recognize<'a>(
        &'a self,
        image: &'a DynamicImage,
        languages: &'a LanguageSet,
        progress: &'a ProgressReporter,
    ) -> BoxFuture<'a, Result<PageRecognition, String>> {
        self.transcribe(image, languages, progress).boxed()
    }
}

#[derive(Deserialize)]
struct Transcription {
    text: String,
    #[serde(default)]
    confidence: Option<f32>,
}

static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```(?:json)?\s*\n?(.*?)\n?\s*```\s*$").expect("valid regex")
});

/// Read the model's `{"text", "confidence"}` answer.
///
/// A reply that is not the expected JSON is kept as plain text with zero
/// confidence rather than failing the page.
pub fn parse_transcription(content: &str) -> PageRecognition {
    let body = FENCE
        .captures(content)
        .and_then(|c| c.get(1))
        .map_or(content, |m| m.as_str())
        .trim();

    match serde_json::from_str::<Transcription>(body) {
        Ok(t) => PageRecognition {
            text: t.text.trim().to_string(),
            confidence: t.confidence.unwrap_or(0.0).clamp(0.0, 100.0),
            words: Vec::new(),
        },
        Err(e) => {
            warn!("vision reply was not JSON ({}); using raw text", e);
            PageRecognition {
                text: content.trim().to_string(),
                confidence: 0.0,
                words: Vec::new(),
            }
        }
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, RecognitionError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        RecognitionError::InitializationFailed {
            message: format!("provider '{provider_name}' is not configured: {e}"),
        }
    })
}

/// Resolve the vision provider, most specific first:
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` with `config.model`.
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 4. OpenAI when `OPENAI_API_KEY` is present.
/// 5. Whatever [`ProviderFactory::from_env`] detects.
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, RecognitionError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_VISION_MODEL);
    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_vision_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| RecognitionError::InitializationFailed {
            message: format!(
                "No vision provider could be auto-detected from environment.\n\
Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\nError: {e}"
            ),
        })?;
    Ok(llm_provider)
}
