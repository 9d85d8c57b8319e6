//! Document lifecycle tracking across a batch.
//!
//! The orchestrator is the only component holding cross-document state. It
//! owns every submitted [`Document`] together with its status, last error and
//! output, and drives documents through a shared [`Pipeline`] one at a time
//! in submission order.
//!
//! ```text
//!   add ──▶ pending ──process──▶ processing ──▶ completed
//!              ▲                     │
//!              │                     └────────▶ error
//!              └──────── requeue (attempt + 1) ◀┘
//! ```
//!
//! A failure attaches to its own document and never stops its siblings.
//! Nothing is retried automatically; a terminal document re-enters the
//! pipeline only through [`Orchestrator::requeue`].

use crate::error::PattaError;
use crate::extract::Pipeline;
use crate::output::{DocumentStatus, ExtractionOutput};
use crate::pipeline::input::{self, Document};
use crate::progress::ProgressCallback;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A document and everything known about its current attempt.
#[derive(Debug, Clone)]
pub struct DocumentEntry {
    pub document: Document,
    pub status: DocumentStatus,
    /// Message of the failure that moved the document to `error`.
    pub error: Option<String>,
    /// Set once the document reaches `completed`.
    pub output: Option<ExtractionOutput>,
    /// Logical attempt number, starting at 1.
    pub attempt: u32,
}

impl DocumentEntry {
    fn new(document: Document) -> Self {
        Self {
            document,
            status: DocumentStatus::Pending,
            error: None,
            output: None,
            attempt: 1,
        }
    }

    pub fn id(&self) -> &str {
        &self.document.id
    }
}

/// Outcome counts of one [`Orchestrator::process_all`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Error message of a document whose `process` call was dropped mid-run.
pub const CANCELLED: &str = "processing was cancelled";

/// Moves a `processing` entry to `error` if [`Orchestrator::process`] is
/// dropped before the pipeline returns.
struct InFlight<'a> {
    entry: &'a mut DocumentEntry,
    callback: Option<ProgressCallback>,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let entry = &mut *self.entry;
        warn!("Document '{}' cancelled while processing", entry.document.name);
        entry.status = DocumentStatus::Error;
        entry.error = Some(CANCELLED.to_string());
        entry.output = None;
        if let Some(ref cb) = self.callback {
            cb.on_status_change(&entry.document.id, DocumentStatus::Processing, DocumentStatus::Error);
            cb.on_document_error(&entry.document.id, CANCELLED);
        }
    }
}

pub struct Orchestrator {
    pipeline: Arc<Pipeline>,
    entries: Vec<DocumentEntry>,
    callback: Option<ProgressCallback>,
}

impl Orchestrator {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        let callback = pipeline.config().progress_callback.clone();
        Self {
            pipeline,
            entries: Vec::new(),
            callback,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Load and validate `input` (path or URL), then queue it.
    ///
    /// Inputs that fail validation are rejected here and never tracked.
    pub async fn add(&mut self, input: &str) -> Result<String, PattaError> {
        let document = input::load_document(input, self.pipeline.config()).await?;
        self.add_document(document)
    }

    /// Queue an already-validated document. Returns its id.
    pub fn add_document(&mut self, document: Document) -> Result<String, PattaError> {
        if self.position(&document.id).is_some() {
            return Err(PattaError::DuplicateDocument { id: document.id });
        }
        let id = document.id.clone();
        debug!("Queued '{}' as {}", document.name, id);
        self.entries.push(DocumentEntry::new(document));
        Ok(id)
    }

    /// Discard a document and whatever it produced.
    pub fn remove(&mut self, id: &str) -> Result<DocumentEntry, PattaError> {
        let pos = self.find(id)?;
        Ok(self.entries.remove(pos))
    }

    pub fn get(&self, id: &str) -> Option<&DocumentEntry> {
        self.entries.iter().find(|e| e.document.id == id)
    }

    pub fn status(&self, id: &str) -> Result<DocumentStatus, PattaError> {
        Ok(self.entries[self.find(id)?].status)
    }

    /// All documents in submission order.
    pub fn entries(&self) -> &[DocumentEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run a `pending` document through the pipeline.
    ///
    /// Returns the terminal status it reached. Stage failures are recorded on
    /// the document, not returned; `Err` means the request itself was invalid.
    /// If the returned future is dropped mid-run the document moves to
    /// `error` with [`CANCELLED`] as its message, so it can be requeued.
    pub async fn process(&mut self, id: &str) -> Result<DocumentStatus, PattaError> {
        let pos = self.find(id)?;
        let status = self.entries[pos].status;
        if status != DocumentStatus::Pending {
            return Err(PattaError::InvalidTransition {
                id: id.to_string(),
                from: status,
                action: "process",
            });
        }

        self.transition(pos, DocumentStatus::Processing);
        let document = self.entries[pos].document.clone();
        if let Some(ref cb) = self.callback {
            cb.on_document_start(&document.id, &document.name);
        }

        let pipeline = Arc::clone(&self.pipeline);
        let mut in_flight = InFlight {
            entry: &mut self.entries[pos],
            callback: self.callback.clone(),
            armed: true,
        };
        let result = pipeline.run(&document).await;
        in_flight.armed = false;
        drop(in_flight);

        match result {
            Ok(output) => {
                let (pages, confidence) = (output.stats.pages, output.record.ocr_confidence);
                let entry = &mut self.entries[pos];
                entry.output = Some(output);
                entry.error = None;
                self.transition(pos, DocumentStatus::Completed);
                if let Some(ref cb) = self.callback {
                    cb.on_document_complete(id, pages, confidence);
                }
                Ok(DocumentStatus::Completed)
            }
            Err(e) => {
                let message = e.to_string();
                error!("Document '{}' failed: {}", document.name, message);
                let entry = &mut self.entries[pos];
                entry.output = None;
                entry.error = Some(message.clone());
                self.transition(pos, DocumentStatus::Error);
                if let Some(ref cb) = self.callback {
                    cb.on_document_error(id, &message);
                }
                Ok(DocumentStatus::Error)
            }
        }
    }

    /// Process every `pending` document, one at a time, in submission order.
    pub async fn process_all(&mut self) -> BatchSummary {
        let pending: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.status == DocumentStatus::Pending)
            .map(|e| e.document.id.clone())
            .collect();

        let mut summary = BatchSummary::default();
        for id in pending {
            summary.attempted += 1;
            match self.process(&id).await {
                Ok(DocumentStatus::Completed) => summary.completed += 1,
                Ok(_) => summary.failed += 1,
                // Removed or already handled between listing and processing.
                Err(e) => {
                    debug!("Skipping {}: {}", id, e);
                    summary.attempted -= 1;
                }
            }
        }

        info!(
            "Batch done: {}/{} completed, {} failed",
            summary.completed, summary.attempted, summary.failed
        );
        if let Some(ref cb) = self.callback {
            cb.on_batch_complete(summary.attempted, summary.completed);
        }
        summary
    }

    /// Start a new logical attempt for a `completed` or `error` document.
    pub fn requeue(&mut self, id: &str) -> Result<u32, PattaError> {
        let pos = self.find(id)?;
        let status = self.entries[pos].status;
        if !status.is_terminal() {
            return Err(PattaError::InvalidTransition {
                id: id.to_string(),
                from: status,
                action: "requeue",
            });
        }
        let entry = &mut self.entries[pos];
        entry.attempt += 1;
        entry.error = None;
        entry.output = None;
        let attempt = entry.attempt;
        self.transition(pos, DocumentStatus::Pending);
        Ok(attempt)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.document.id == id)
    }

    fn find(&self, id: &str) -> Result<usize, PattaError> {
        self.position(id).ok_or_else(|| PattaError::UnknownDocument { id: id.to_string() })
    }

    fn transition(&mut self, pos: usize, to: DocumentStatus) {
        let entry = &mut self.entries[pos];
        let from = entry.status;
        debug_assert!(from.can_transition_to(to), "{from} -> {to}");
        entry.status = to;
        debug!("{}: {} -> {}", entry.document.id, from, to);
        if let Some(ref cb) = self.callback {
            cb.on_status_change(&entry.document.id, from, to);
        }
    }
}
