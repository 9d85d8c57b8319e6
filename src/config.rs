//! Configuration types for patta extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Setters clamp out-of-range values;
//! [`ExtractionConfigBuilder::build`] rejects combinations that cannot work.

use crate::error::PattaError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::retry::RetryPolicy;

/// Configuration for extracting patta records.
///
/// # Example
/// ```rust
/// use patta_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(200)
///     .max_pages(5)
///     .ner_endpoint("http://localhost:8000/api")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 5);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    // ── Rasterization ────────────────────────────────────────────────────
    /// Rendering DPI for PDF pages. Range: 72–400. Default: 150.
    ///
    /// Pages are scaled by `dpi / 72` from their native 72-point viewport.
    pub dpi: u32,

    /// Maximum number of PDF pages processed. Default: 20.
    ///
    /// Longer documents are truncated silently.
    pub max_pages: usize,

    /// Thumbnail size relative to the rendered page. Default: 0.2.
    pub thumbnail_scale: f32,

    /// Cap on either rendered dimension in pixels. Default: 4000.
    ///
    /// An A0 sheet at 300 DPI would otherwise allocate hundreds of megabytes.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Path to libpdfium (file or containing directory). If None, looks in
    /// the working directory and then the system library path.
    pub pdfium_library_path: Option<PathBuf>,

    // ── Input ────────────────────────────────────────────────────────────
    /// Largest accepted upload in bytes. Default: 25 MiB.
    pub max_file_size_bytes: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    // ── Recognition ──────────────────────────────────────────────────────
    /// OCR language set applied to every job. Default: eng, hin, tam, tel.
    pub languages: LanguageSet,

    /// Which recognition backend drives the OCR worker. Default: Tesseract.
    pub recognizer: RecognizerKind,

    /// Tesseract executable. Default: `tesseract` on `PATH`.
    pub tesseract_binary: PathBuf,

    /// Upper bound on a single OCR job in seconds. Default: 120.
    ///
    /// A job that has not produced a terminal event by then is rejected so a
    /// stuck worker cannot hang the orchestrator.
    pub ocr_job_timeout_secs: u64,

    /// Vision model identifier for [`RecognizerKind::Vision`].
    pub model: Option<String>,

    /// Vision provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed vision provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for vision transcription. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens generated per page by the vision backend. Default: 4096.
    pub max_tokens: usize,

    // ── Entity extraction ────────────────────────────────────────────────
    /// Base URL of the NER service (e.g. `http://localhost:8000/api`).
    /// If None, extraction is skipped and records are normaliser-only.
    pub ner_endpoint: Option<String>,

    /// Bearer token sent to the NER service.
    pub ner_api_key: Option<String>,

    /// Locale sent with general extraction requests. Default: "en".
    pub ner_locale: String,

    /// Domain schema requested first (falls back to the general call on
    /// failure). Default: `Some("patta")`. None skips the specialised call.
    pub ner_schema: Option<String>,

    /// Per-request timeout for NER calls in seconds. Default: 30.
    pub ner_timeout_secs: u64,

    // ── Retry ────────────────────────────────────────────────────────────
    /// Total attempts for retried network calls (NER, persistence, vision).
    /// Default: 3.
    pub max_attempts: u32,

    /// Initial backoff in milliseconds, doubled after each failed attempt.
    /// Default: 500 (500 ms → 1 s → 2 s).
    pub retry_backoff_ms: u64,

    // ── Reporting ────────────────────────────────────────────────────────
    /// Receives per-document and per-page events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_pages: 20,
            thumbnail_scale: 0.2,
            max_rendered_pixels: 4000,
            password: None,
            pdfium_library_path: None,
            max_file_size_bytes: 25 * 1024 * 1024,
            download_timeout_secs: 120,
            languages: LanguageSet::default(),
            recognizer: RecognizerKind::default(),
            tesseract_binary: PathBuf::from("tesseract"),
            ocr_job_timeout_secs: 120,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            ner_endpoint: None,
            ner_api_key: None,
            ner_locale: "en".to_string(),
            ner_schema: Some("patta".to_string()),
            ner_timeout_secs: 30,
            max_attempts: 3,
            retry_backoff_ms: 500,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_pages", &self.max_pages)
            .field("thumbnail_scale", &self.thumbnail_scale)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("max_file_size_bytes", &self.max_file_size_bytes)
            .field("languages", &self.languages)
            .field("recognizer", &self.recognizer)
            .field("tesseract_binary", &self.tesseract_binary)
            .field("ocr_job_timeout_secs", &self.ocr_job_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("ner_endpoint", &self.ner_endpoint)
            .field("ner_api_key", &self.ner_api_key.as_ref().map(|_| "<redacted>"))
            .field("ner_locale", &self.ner_locale)
            .field("ner_schema", &self.ner_schema)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Retry policy shared by every retried network call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }

    pub fn ocr_job_timeout(&self) -> Option<Duration> {
        (self.ocr_job_timeout_secs > 0).then(|| Duration::from_secs(self.ocr_job_timeout_secs))
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n.max(1);
        self
    }

    pub fn thumbnail_scale(mut self, scale: f32) -> Self {
        self.config.thumbnail_scale = scale.clamp(0.01, 1.0);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn max_file_size_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_size_bytes = bytes;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn languages(mut self, languages: LanguageSet) -> Self {
        self.config.languages = languages;
        self
    }

    pub fn recognizer(mut self, kind: RecognizerKind) -> Self {
        self.config.recognizer = kind;
        self
    }

    pub fn tesseract_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_binary = path.into();
        self
    }

    pub fn ocr_job_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_job_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn ner_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.ner_endpoint = Some(url.into());
        self
    }

    pub fn ner_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.ner_api_key = Some(key.into());
        self
    }

    pub fn ner_locale(mut self, locale: impl Into<String>) -> Self {
        self.config.ner_locale = locale.into();
        self
    }

    /// `None` disables the domain-schema request.
    pub fn ner_schema(mut self, schema: Option<String>) -> Self {
        self.config.ner_schema = schema;
        self
    }

    pub fn ner_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ner_timeout_secs = secs.max(1);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, PattaError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(PattaError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_file_size_bytes == 0 {
            return Err(PattaError::InvalidConfig(
                "Maximum file size must be > 0".into(),
            ));
        }
        c.languages.validate()?;
        if let Some(ref url) = c.ner_endpoint {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(PattaError::InvalidConfig(format!(
                    "NER endpoint must be an http(s) URL, got '{url}'"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Language set ─────────────────────────────────────────────────────────

/// Ordered set of Tesseract language codes applied to every OCR job.
///
/// Must contain English plus at least three further scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageSet(Vec<String>);

/// Minimum number of languages in a set, English included.
pub const MIN_LANGUAGES: usize = 4;

impl Default for LanguageSet {
    fn default() -> Self {
        Self(vec![
            "eng".to_string(),
            "hin".to_string(),
            "tam".to_string(),
            "tel".to_string(),
        ])
    }
}

impl LanguageSet {
    /// Build a set, dropping blanks and duplicates while keeping order.
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for code in codes {
            let code = code.into().trim().to_ascii_lowercase();
            if !code.is_empty() && !out.contains(&code) {
                out.push(code);
            }
        }
        Self(out)
    }

    /// Parse `eng,hin,tam,tel` or `eng+hin+tam+tel`.
    pub fn parse(s: &str) -> Self {
        Self::new(s.split([',', '+']))
    }

    pub fn codes(&self) -> &[String] {
        &self.0
    }

    /// Tesseract `-l` argument: `eng+hin+tam+tel`.
    pub fn tesseract_arg(&self) -> String {
        self.0.join("+")
    }

    /// Two-letter codes for services that expect ISO 639-1 (`en`, `hi`, …).
    pub fn iso_codes(&self) -> Vec<String> {
        self.0.iter().map(|c| to_iso_639_1(c).to_string()).collect()
    }

    pub fn validate(&self) -> Result<(), PattaError> {
        if !self.0.iter().any(|c| c == "eng") {
            return Err(PattaError::InvalidConfig(
                "Language set must include 'eng'".into(),
            ));
        }
        if self.0.len() < MIN_LANGUAGES {
            return Err(PattaError::InvalidConfig(format!(
                "Language set needs English plus at least {} more scripts, got '{}'",
                MIN_LANGUAGES - 1,
                self.tesseract_arg()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for LanguageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tesseract_arg())
    }
}

fn to_iso_639_1(code: &str) -> &str {
    match code {
        "eng" => "en",
        "hin" => "hi",
        "tam" => "ta",
        "tel" => "te",
        "ben" => "bn",
        "mar" => "mr",
        "guj" => "gu",
        "kan" => "kn",
        "mal" => "ml",
        "ori" => "or",
        "pan" => "pa",
        "urd" => "ur",
        other => other,
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Recognition backend behind the OCR worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognizerKind {
    /// Local `tesseract` executable (TSV output with word boxes). (default)
    #[default]
    Tesseract,
    /// Vision LLM transcription via edgequake-llm. No word geometry.
    Vision,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.dpi, 150);
        assert_eq!(c.max_pages, 20);
        assert_eq!(c.max_file_size_bytes, 26_214_400);
        assert_eq!(c.languages.tesseract_arg(), "eng+hin+tam+tel");
        assert_eq!(c.ner_schema.as_deref(), Some("patta"));
        assert_eq!(c.max_attempts, 3);
    }

    #[test]
    fn builder_clamps() {
        let c = ExtractionConfig::builder()
            .dpi(1000)
            .max_pages(0)
            .max_attempts(0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 400);
        assert_eq!(c.max_pages, 1);
        assert_eq!(c.max_attempts, 1);
    }

    #[test]
    fn language_set_requires_english() {
        let err = ExtractionConfig::builder()
            .languages(LanguageSet::parse("hin,tam,tel,ben"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("eng"), "got: {err}");
    }

    #[test]
    fn language_set_requires_three_more_scripts() {
        let err = ExtractionConfig::builder()
            .languages(LanguageSet::parse("eng+hin"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("at least 3"), "got: {err}");
    }

    #[test]
    fn language_set_parse_dedups_and_orders() {
        let set = LanguageSet::parse(" eng, HIN ,tam,eng,tel ");
        assert_eq!(set.codes(), ["eng", "hin", "tam", "tel"]);
        assert_eq!(set.iso_codes(), vec!["en", "hi", "ta", "te"]);
    }

    #[test]
    fn ner_endpoint_must_be_http() {
        assert!(ExtractionConfig::builder()
            .ner_endpoint("ftp://ner")
            .build()
            .is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = ExtractionConfig::builder()
            .ner_api_key("secret-token")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret-token"));
    }
}
