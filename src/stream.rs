//! Streaming extraction: emit each document's outcome as soon as it is done.
//!
//! [`crate::orchestrator::Orchestrator`] keeps every result in memory until
//! the caller asks for it. [`extract_stream`] instead yields one
//! [`DocumentOutcome`] per document, in submission order, so a caller can
//! write or upload records while later documents are still in OCR.

use crate::error::PattaError;
use crate::extract::Pipeline;
use crate::output::ExtractionOutput;
use crate::pipeline::input::Document;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// Result of one document in a stream.
#[derive(Debug)]
pub struct DocumentOutcome {
    pub document_id: String,
    pub name: String,
    pub result: Result<ExtractionOutput, PattaError>,
}

/// A boxed stream of per-document outcomes.
pub type DocumentStream = Pin<Box<dyn Stream<Item = DocumentOutcome> + Send>>;

/// Extract `documents` one after another through `pipeline`.
///
/// Documents are processed lazily: nothing starts until the stream is
/// polled, and dropping the stream stops after the current document.
pub fn extract_stream(pipeline: Arc<Pipeline>, documents: Vec<Document>) -> DocumentStream {
    info!("Starting streaming extraction of {} document(s)", documents.len());
    let s = stream::iter(documents).then(move |document| {
        let pipeline = Arc::clone(&pipeline);
        async move {
            let result = pipeline.run(&document).await;
            DocumentOutcome {
                document_id: document.id,
                name: document.name,
                result,
            }
        }
    });
    Box::pin(s)
}
