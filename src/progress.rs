//! Progress-callback trait for per-document and per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the orchestrator drives each document through the pipeline.
//!
//! # Example
//!
//! ```rust
//! use patta_extract::{ExtractionProgressCallback, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter {
//!     pages: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for PageCounter {
//!     fn on_page_recognized(&self, document_id: &str, page: usize, total: usize, confidence: f32) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{document_id}: page {page}/{total} ({confidence:.0}%)");
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(PageCounter { pages: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::DocumentStatus;
use std::sync::Arc;

/// Called by the pipeline and orchestrator as documents move through stages.
///
/// Documents are processed one at a time, but implementations must still be
/// `Send + Sync`: OCR progress is reported from the recognition router task.
/// All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// A document entered `processing`.
    fn on_document_start(&self, document_id: &str, name: &str) {
        let _ = (document_id, name);
    }

    /// Any lifecycle transition, including requeues back to `pending`.
    fn on_status_change(&self, document_id: &str, from: DocumentStatus, to: DocumentStatus) {
        let _ = (document_id, from, to);
    }

    /// Fraction of pages rendered so far, in `(0, 1]`. Non-decreasing per document.
    fn on_rasterize_progress(&self, document_id: &str, fraction: f32) {
        let _ = (document_id, fraction);
    }

    /// OCR progress for a single page, 0–100. Non-decreasing per page.
    ///
    /// # Arguments
    /// * `page`: 1-indexed page number
    fn on_ocr_progress(&self, document_id: &str, page: usize, percent: u8) {
        let _ = (document_id, page, percent);
    }

    /// A page finished OCR.
    ///
    /// # Arguments
    /// * `page`: 1-indexed page number
    /// * `total`: pages being recognized for this document
    /// * `confidence`: page confidence, 0–100
    fn on_page_recognized(&self, document_id: &str, page: usize, total: usize, confidence: f32) {
        let _ = (document_id, page, total, confidence);
    }

    /// Entity extraction failed; the record is built from the normaliser alone.
    fn on_extraction_degraded(&self, document_id: &str, error: &str) {
        let _ = (document_id, error);
    }

    /// The document reached `completed`.
    fn on_document_complete(&self, document_id: &str, pages: usize, confidence: f32) {
        let _ = (document_id, pages, confidence);
    }

    /// The document reached `error`.
    fn on_document_error(&self, document_id: &str, error: &str) {
        let _ = (document_id, error);
    }

    /// A "process all" pass finished.
    fn on_batch_complete(&self, attempted: usize, completed: usize) {
        let _ = (attempted, completed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
