//! Error types for the patta-extract library.
//!
//! Each pipeline stage has its own error family so the orchestrator can
//! decide, per family, whether a failure is fatal for the document:
//!
//! * [`ValidationError`]: the input never enters the pipeline.
//! * [`RasterizationError`] / [`RecognitionError`]: fatal for the document.
//!   A recognition *transport* failure is fatal for every outstanding job
//!   until the engine is reinitialised.
//! * [`ExtractionError`]: **non-fatal**. The pipeline degrades to
//!   normaliser-only output and records the message on the result.
//! * [`PersistenceError`]: surfaced to the caller after retries; the record
//!   stays available for another attempt.
//!
//! [`PattaError`] wraps all of them for the top-level entry points.
//!
//! The fusion step is a pure function over well-typed inputs and has no
//! error type.

use crate::output::DocumentStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error returned by the pipeline, orchestrator and CLI-facing APIs.
#[derive(Debug, Error)]
pub enum PattaError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Rasterization(#[from] RasterizationError),

    #[error(transparent)]
    Recognition(#[from] RecognitionError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No document with this id is held by the orchestrator.
    #[error("Unknown document '{id}'")]
    UnknownDocument { id: String },

    #[error("A document with id '{id}' is already queued")]
    DuplicateDocument { id: String },

    /// The requested action is not allowed from the document's current state.
    #[error("Cannot {action} document '{id}' while it is {from}")]
    InvalidTransition {
        id: String,
        from: DocumentStatus,
        action: &'static str,
    },

    /// Writing a result file failed.
    #[error("Failed to write output to '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Input rejected before entering the pipeline.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Document '{name}' is empty")]
    Empty { name: String },

    #[error("Document '{name}' is {size} bytes; the limit is {limit} bytes")]
    TooLarge { name: String, size: u64, limit: u64 },

    /// Neither a PDF nor a PNG/JPEG image.
    #[error("Unsupported document type for '{name}'\nFirst bytes: {magic:?}\nSupported: PDF, PNG, JPEG.")]
    UnsupportedType { name: String, magic: Vec<u8> },

    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },
}

/// The document could not be paginated or rendered.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RasterizationError {
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumUnavailable(String),

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{name}' is corrupt: {detail}")]
    CorruptDocument { name: String, detail: String },

    #[error("PDF '{name}' is encrypted and requires a password.")]
    PasswordRequired { name: String },

    #[error("Wrong password for PDF '{name}'")]
    WrongPassword { name: String },

    #[error("PDF '{name}' has no pages")]
    NoPages { name: String },

    #[error("Rasterization failed for page {page}: {detail}")]
    PageFailed { page: usize, detail: String },

    #[error("Image '{name}' could not be decoded: {detail}")]
    ImageDecode { name: String, detail: String },

    #[error("Rasterization task panicked: {0}")]
    TaskPanicked(String),
}

/// A recognition job failed, or the recognition worker itself failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecognitionError {
    /// The backend reported an error for this job only.
    #[error("OCR job '{id}' failed: {message}")]
    Job { id: String, message: String },

    /// The worker died or its channel closed; every outstanding job is rejected.
    #[error("OCR worker failed: {message}\nThe recognition engine must be reinitialised.")]
    WorkerFailed { message: String },

    /// Loading the recognition models failed.
    #[error("OCR engine initialisation failed: {message}")]
    InitializationFailed { message: String },

    /// An outstanding job already uses this id.
    #[error("OCR job id '{id}' is already outstanding")]
    DuplicateJobId { id: String },

    #[error("OCR job '{id}' timed out after {secs}s")]
    Timeout { id: String, secs: u64 },

    /// The engine was shut down or reinitialised while the job was pending.
    #[error("OCR engine was shut down")]
    Shutdown,
}

impl RecognitionError {
    /// `true` for failures of the worker transport rather than of a single job.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RecognitionError::WorkerFailed { .. } | RecognitionError::Shutdown
        )
    }
}

/// Entity extraction failed after exhausting retries. Never fatal for a document.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    #[error("Entity extraction failed after {attempts} attempt(s): {detail}")]
    Exhausted { attempts: u32, detail: String },

    /// The service answered 2xx but the body was not the expected JSON.
    #[error("Entity extraction returned an unreadable response: {detail}")]
    InvalidResponse { detail: String },

    #[error("Entity extraction client could not be built: {0}")]
    Client(String),
}

/// Save/load against the persistence service failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PersistenceError {
    #[error("{operation} failed after {attempts} attempt(s): {detail}")]
    RequestFailed {
        operation: &'static str,
        attempts: u32,
        detail: String,
    },

    /// The service answered but refused the request (`success: false`).
    #[error("{operation} rejected by the service: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} returned an unreadable response: {detail}")]
    InvalidResponse {
        operation: &'static str,
        detail: String,
    },

    #[error("Persistence client could not be built: {0}")]
    Client(String),
}
