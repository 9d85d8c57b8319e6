//! Pipeline stages for land-record extraction.
//!
//! Each submodule implements one step, so stages can be tested alone and a
//! backend swapped without touching its neighbours.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ rasterize ──▶ recognition ──▶ ner ──▶ normalize ──▶ fusion
//! (path/URL)  (pdfium)     (OCR worker)   (HTTP)   (patterns)    (merge)
//! ```
//!
//! 1. [`input`]: load a path or URL, check size and magic bytes
//! 2. [`rasterize`]: render pages in `spawn_blocking`; pdfium is not
//!    async-safe
//! 3. [`recognition`]: OCR job protocol over a single worker task, with
//!    tesseract and vision-LLM backends
//! 4. [`ner`]: remote entity extraction with bounded retry
//! 5. [`normalize`]: ordered pattern rules, first match wins
//! 6. [`fusion`]: merge confident NER spans into the record
//!
//! [`encode`] and [`retry`] are shared helpers.

pub mod encode;
pub mod fusion;
pub mod input;
pub mod ner;
pub mod normalize;
pub mod rasterize;
pub mod recognition;
pub mod retry;
