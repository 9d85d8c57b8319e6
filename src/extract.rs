//! Single-document extraction: rasterize → OCR → NER → normalize → fuse.
//!
//! [`Pipeline`] owns the long-lived pieces (the OCR engine and its worker, the
//! NER client, the pattern tables) so a batch of documents reuses them.
//! [`extract`] is the one-shot convenience wrapper.
//!
//! Stage failures map onto the document as follows:
//!
//! | Stage          | On failure                                        |
//! |----------------|---------------------------------------------------|
//! | rasterize      | `Err(Rasterization)`, document goes to `error`    |
//! | OCR            | `Err(Recognition)`, document goes to `error`      |
//! | NER            | logged, `entity_error` set, record is normaliser-only |
//! | normalize/fuse | infallible                                        |

use crate::config::{ExtractionConfig, RecognizerKind};
use crate::error::{PattaError, RecognitionError};
use crate::output::{ExtractionOutput, ExtractionStats, PageText, RecognitionResult};
use crate::pipeline::fusion::FusionEngine;
use crate::pipeline::input::{self, Document};
use crate::pipeline::ner::{EntitySource, HttpEntityExtractor};
use crate::pipeline::normalize::Normalizer;
use crate::pipeline::rasterize;
use crate::pipeline::recognition::{
    JobProgress, RecognitionBackend, RecognitionEngine, TesseractBackend, VisionBackend,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Reusable extraction pipeline.
///
/// Must be constructed inside a Tokio runtime: the OCR worker is spawned
/// immediately and starts loading its language models.
pub struct Pipeline {
    config: ExtractionConfig,
    engine: Arc<RecognitionEngine>,
    entities: Option<Arc<dyn EntitySource>>,
    normalizer: Normalizer,
    fusion: FusionEngine,
}

impl Pipeline {
    /// Assemble a pipeline from explicit parts.
    pub fn new(
        config: ExtractionConfig,
        backend: Arc<dyn RecognitionBackend>,
        entities: Option<Arc<dyn EntitySource>>,
    ) -> Self {
        let engine = RecognitionEngine::start(
            backend,
            config.languages.clone(),
            config.ocr_job_timeout(),
        );
        let normalizer = Normalizer::default();
        Self {
            config,
            engine: Arc::new(engine),
            entities,
            fusion: FusionEngine::new(normalizer.clone()),
            normalizer,
        }
    }

    /// Pick the OCR backend and NER client described by `config`.
    pub fn from_config(config: ExtractionConfig) -> Result<Self, PattaError> {
        let backend: Arc<dyn RecognitionBackend> = match config.recognizer {
            RecognizerKind::Tesseract => {
                Arc::new(TesseractBackend::new(config.tesseract_binary.clone()))
            }
            RecognizerKind::Vision => Arc::new(VisionBackend::from_config(&config)?),
        };
        let entities = HttpEntityExtractor::from_config(&config)?
            .map(|client| Arc::new(client) as Arc<dyn EntitySource>);
        if entities.is_none() {
            info!("No NER endpoint configured; records will come from pattern rules only");
        }
        Ok(Self::new(config, backend, entities))
    }

    /// Replace the pattern tables used by both the normaliser and fusion.
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.fusion = FusionEngine::new(normalizer.clone());
        self.normalizer = normalizer;
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn engine(&self) -> &RecognitionEngine {
        &self.engine
    }

    /// Run one document through every stage.
    ///
    /// Returns `Ok` whenever a record was produced, including when entity
    /// extraction degraded (see [`ExtractionOutput::entity_error`]).
    pub async fn run(&self, document: &Document) -> Result<ExtractionOutput, PattaError> {
        let total_start = Instant::now();
        let callback = self.config.progress_callback.clone();
        info!(
            "Extracting '{}' ({}, {} bytes)",
            document.name,
            document.id,
            document.size()
        );

        // ── Step 1: Rasterize ────────────────────────────────────────────
        let render_start = Instant::now();
        let progress = {
            let callback = callback.clone();
            let id = document.id.clone();
            move |fraction: f32| {
                if let Some(ref cb) = callback {
                    cb.on_rasterize_progress(&id, fraction);
                }
            }
        };
        let pages = rasterize::rasterize(document, &self.config, progress).await?;
        let rasterize_duration_ms = render_start.elapsed().as_millis() as u64;
        info!("Rasterized {} page(s) in {}ms", pages.len(), rasterize_duration_ms);

        // ── Step 2: Recognize pages, one job at a time ───────────────────
        let ocr_start = Instant::now();
        let total = pages.len();
        let mut page_texts = Vec::with_capacity(total);
        for page in pages {
            let index = page.index;
            let job = self.engine.new_job(Arc::new(page.image), Some(index));
            let job_progress: Option<JobProgress> = callback.clone().map(|cb| {
                let id = document.id.clone();
                Arc::new(move |percent: u8| cb.on_ocr_progress(&id, index, percent)) as JobProgress
            });

            let output = match self.engine.submit(job, job_progress).await {
                Ok(output) => output,
                Err(e) => {
                    self.recover_engine(&e);
                    return Err(e.into());
                }
            };
            debug!(
                "Page {}/{}: {} chars, confidence {:.1}",
                index,
                total,
                output.text.len(),
                output.confidence
            );
            if let Some(ref cb) = callback {
                cb.on_page_recognized(&document.id, index, total, output.confidence);
            }
            page_texts.push(PageText {
                page_index: index,
                text: output.text,
                confidence: output.confidence,
            });
        }
        let recognition = RecognitionResult::from_pages(page_texts);
        let ocr_duration_ms = ocr_start.elapsed().as_millis() as u64;

        // ── Step 3: Entity extraction (never fatal) ──────────────────────
        let ner_start = Instant::now();
        let (entities, entity_error) = match self.entities {
            Some(ref source) if !recognition.full_text.trim().is_empty() => {
                match source
                    .extract(&recognition.full_text, &self.config.ner_locale)
                    .await
                {
                    Ok(spans) => (spans, None),
                    Err(e) => {
                        warn!(
                            "Entity extraction failed for '{}': {}; using pattern rules only",
                            document.name, e
                        );
                        if let Some(ref cb) = callback {
                            cb.on_extraction_degraded(&document.id, &e.to_string());
                        }
                        (Vec::new(), Some(e.to_string()))
                    }
                }
            }
            _ => (Vec::new(), None),
        };
        let ner_duration_ms = ner_start.elapsed().as_millis() as u64;

        // ── Step 4: Normalize, then fuse ─────────────────────────────────
        let first_pass = self
            .normalizer
            .normalize(&recognition.full_text, recognition.overall_confidence);
        let record = self.fusion.merge(first_pass, &entities);

        let stats = ExtractionStats {
            pages: recognition.pages.len(),
            entities: entities.len(),
            rasterize_duration_ms,
            ocr_duration_ms,
            ner_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };
        info!(
            "Extraction complete for '{}': {} page(s), confidence {:.1}, {} entities, {}ms",
            document.name,
            stats.pages,
            recognition.overall_confidence,
            stats.entities,
            stats.total_duration_ms
        );

        Ok(ExtractionOutput {
            record,
            recognition,
            entities,
            entity_error,
            stats,
        })
    }

    /// A dead or stuck worker would fail every later job too; start a fresh
    /// one so later documents are not affected.
    fn recover_engine(&self, error: &RecognitionError) {
        if matches!(
            error,
            RecognitionError::WorkerFailed { .. } | RecognitionError::Timeout { .. }
        ) {
            warn!("OCR worker unusable ({}); reinitialising", error);
            self.engine.reinitialize();
        }
    }
}

/// Load `input` (path or URL) and extract it with a one-off pipeline.
pub async fn extract(
    input: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, PattaError> {
    let document = input::load_document(input.as_ref(), config).await?;
    let pipeline = Pipeline::from_config(config.clone())?;
    let output = pipeline.run(&document).await;
    pipeline.engine().shutdown();
    output
}

/// Extract `input` and write the output JSON to `output_path`.
pub async fn extract_to_file(
    input: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionStats, PattaError> {
    let output = extract(input, config).await?;
    write_json_atomic(output_path.as_ref(), &output).await?;
    Ok(output.stats)
}

/// Pretty-print `value` to `path` through a temp file and rename, so readers
/// never see a partial file.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PattaError> {
    let write_failed = |e: std::io::Error| PattaError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| PattaError::Internal(format!("cannot serialise output: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
    Ok(())
}
