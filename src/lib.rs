//! # patta-extract
//!
//! Turn scanned land-rights documents (pattas, forest-rights claims) into
//! structured records.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image / PDF
//!  │
//!  ├─ 1. Input      resolve local file or download from URL, validate
//!  ├─ 2. Rasterize  render pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. OCR        one job per page through the recognition worker
//!  │                (tesseract eng+hin+tam+tel, or a vision LLM)
//!  ├─ 4. NER        remote entity extraction, retried; failure degrades
//!  ├─ 5. Normalize  ordered regex rules → first-pass record
//!  └─ 6. Fuse       confident entity spans fill or overwrite fields
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use patta_extract::{extract, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder()
//!         .ner_endpoint("http://localhost:8000/api")
//!         .build()?;
//!     let output = extract("patta.pdf", &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&output.record)?);
//!     Ok(())
//! }
//! ```
//!
//! For batches, build one [`Pipeline`] and drive it through an
//! [`Orchestrator`] (lifecycle tracking, requeue) or [`extract_stream`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `patta-extract` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, LanguageSet, RecognizerKind};
pub use error::{
    ExtractionError, PattaError, PersistenceError, RasterizationError, RecognitionError,
    ValidationError,
};
pub use extract::{extract, extract_to_file, write_json_atomic, Pipeline};
pub use orchestrator::{BatchSummary, DocumentEntry, Orchestrator};
pub use output::{
    ClaimType, Coordinates, DocumentKind, DocumentStatus, EntityLabel, EntitySpan,
    ExtractionOutput, ExtractionStats, PageText, PattaRecord, RecognitionResult,
};
pub use pipeline::fusion::FusionEngine;
pub use pipeline::input::{load_document, Document};
pub use pipeline::ner::{EntitySource, HttpEntityExtractor};
pub use pipeline::normalize::{Normalizer, PatternTable};
pub use pipeline::recognition::{RecognitionBackend, RecognitionEngine};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{HealthReport, PattaStore, SearchFilters};
pub use stream::{extract_stream, DocumentOutcome, DocumentStream};
