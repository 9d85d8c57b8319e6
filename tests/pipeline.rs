//! Pipeline and orchestrator tests with an in-process OCR backend and entity
//! source. No tesseract, pdfium or network access is needed: documents are
//! PNGs built in memory.

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use patta_extract::orchestrator::CANCELLED;
use patta_extract::pipeline::recognition::{PageRecognition, ProgressReporter};
use patta_extract::{
    extract_stream, ClaimType, Document, DocumentStatus, EntityLabel, EntitySource, EntitySpan,
    ExtractionConfig, ExtractionError, ExtractionProgressCallback, LanguageSet, Orchestrator,
    PattaError, PattaRecord, Pipeline, RecognitionBackend, RecognitionError,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const OCR_TEXT: &str = "Village: Kurchi\nDistrict: Salem\nIndividual Forest Rights\nArea: 2 acres";

// ── Test doubles ─────────────────────────────────────────────────────────────

/// Returns the same text for every page; can fail, panic or hang on the n-th
/// call.
struct FakeOcr {
    text: String,
    confidence: f32,
    fail_call: Option<usize>,
    panic_call: Option<usize>,
    hang_call: Option<usize>,
    calls: AtomicUsize,
}

impl FakeOcr {
    fn new(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            confidence,
            fail_call: None,
            panic_call: None,
            hang_call: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl RecognitionBackend for FakeOcr {
    fn name(&self) -> &str {
        "fake"
    }

    fn initialize<'a>(&'a self, _languages: &'a LanguageSet) -> BoxFuture<'a, Result<(), String>> {
        async { Ok(()) }.boxed()
    }

    fn recognize<'a>(
        &'a self,
        _image: &'a DynamicImage,
        _languages: &'a LanguageSet,
        progress: &'a ProgressReporter,
    ) -> BoxFuture<'a, Result<PageRecognition, String>> {
        async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.panic_call == Some(call) {
                panic!("backend crashed");
            }
            if self.hang_call == Some(call) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            progress.report(40);
            progress.report(100);
            if self.fail_call == Some(call) {
                return Err("image too dark".to_string());
            }
            Ok(PageRecognition {
                text: self.text.clone(),
                confidence: self.confidence,
                words: Vec::new(),
            })
        }
        .boxed()
    }
}

struct FakeEntities(Result<Vec<EntitySpan>, ExtractionError>);

impl EntitySource for FakeEntities {
    fn extract<'a>(
        &'a self,
        _text: &'a str,
        _locale: &'a str,
    ) -> BoxFuture<'a, Result<Vec<EntitySpan>, ExtractionError>> {
        let result = self.0.clone();
        async move { result }.boxed()
    }
}

/// Records every callback as a string.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl ExtractionProgressCallback for Recorder {
    fn on_document_start(&self, _id: &str, name: &str) {
        self.push(format!("start {name}"));
    }
    fn on_status_change(&self, _id: &str, from: DocumentStatus, to: DocumentStatus) {
        self.push(format!("{from}->{to}"));
    }
    fn on_page_recognized(&self, _id: &str, page: usize, total: usize, _confidence: f32) {
        self.push(format!("page {page}/{total}"));
    }
    fn on_extraction_degraded(&self, _id: &str, _error: &str) {
        self.push("degraded".to_string());
    }
    fn on_batch_complete(&self, attempted: usize, completed: usize) {
        self.push(format!("batch {completed}/{attempted}"));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([250, 250, 245])));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn png_document(name: &str) -> Document {
    Document::from_bytes(name, png_bytes(64, 48), 1 << 20).unwrap()
}

/// Valid PNG signature, undecodable body.
fn corrupt_document(name: &str) -> Document {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(b"not really an image");
    Document::from_bytes(name, bytes, 1 << 20).unwrap()
}

fn span(label: EntityLabel, text: &str, score: f32) -> EntitySpan {
    EntitySpan {
        text: text.to_string(),
        label,
        start: 0,
        end: text.len(),
        score,
    }
}

fn config_with(recorder: Option<Arc<Recorder>>) -> ExtractionConfig {
    let mut builder = ExtractionConfig::builder();
    if let Some(r) = recorder {
        builder = builder.progress_callback(r);
    }
    builder.build().unwrap()
}

fn pipeline(
    ocr: FakeOcr,
    entities: Option<FakeEntities>,
    recorder: Option<Arc<Recorder>>,
) -> Arc<Pipeline> {
    let entities = entities.map(|e| Arc::new(e) as Arc<dyn EntitySource>);
    Arc::new(Pipeline::new(config_with(recorder), Arc::new(ocr), entities))
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn image_document_produces_fused_record() {
    let entities = FakeEntities(Ok(vec![
        span(EntityLabel::Village, "Kurichi", 0.9),
        span(EntityLabel::Person, "Ramu Kannan", 0.75),
    ]));
    let p = pipeline(FakeOcr::new(OCR_TEXT, 88.0), Some(entities), None);

    let output = p.run(&png_document("patta.png")).await.unwrap();

    let record = &output.record;
    assert_eq!(record.village, "Kurichi");
    assert_eq!(record.claimant_name, "Ramu Kannan");
    assert_eq!(record.district, "Salem");
    assert_eq!(record.claim_type, ClaimType::Ifr);
    assert!((record.area.unwrap() - 0.809372).abs() < 1e-9);
    assert_eq!(record.raw_text, OCR_TEXT);
    assert_eq!(record.ocr_confidence, 88.0);
    assert_eq!(output.recognition.pages.len(), 1);
    assert_eq!(output.recognition.pages[0].page_index, 1);
    assert_eq!(output.entities.len(), 2);
    assert!(output.entity_error.is_none());
    assert_eq!(output.stats.pages, 1);
    assert_eq!(output.stats.entities, 2);
}

#[tokio::test]
async fn blank_page_counts_as_zero_confidence() {
    let p = pipeline(FakeOcr::new("   ", 95.0), None, None);

    let output = p.run(&png_document("blank.png")).await.unwrap();

    assert_eq!(output.recognition.overall_confidence, 0.0);
    assert_eq!(
        output.record,
        PattaRecord {
            raw_text: "   ".to_string(),
            ..Default::default()
        }
    );
}

#[tokio::test]
async fn worker_crash_is_recovered_for_next_document() {
    let mut ocr = FakeOcr::new(OCR_TEXT, 80.0);
    ocr.panic_call = Some(1);
    let p = pipeline(ocr, None, None);

    let first = p.run(&png_document("a.png")).await.unwrap_err();
    assert!(
        matches!(
            first,
            PattaError::Recognition(RecognitionError::WorkerFailed { .. })
        ),
        "got {first:?}"
    );

    let second = p.run(&png_document("b.png")).await.unwrap();
    assert_eq!(second.record.district, "Salem");
}

#[tokio::test]
async fn hung_page_fails_only_its_own_document() {
    let mut ocr = FakeOcr::new(OCR_TEXT, 80.0);
    ocr.hang_call = Some(1);
    let config = ExtractionConfig::builder()
        .ocr_job_timeout_secs(1)
        .build()
        .unwrap();
    let p = Arc::new(Pipeline::new(config, Arc::new(ocr), None));
    let mut orch = Orchestrator::new(p);
    let stuck = orch.add_document(png_document("stuck.png")).unwrap();
    let next = orch.add_document(png_document("next.png")).unwrap();

    let summary = orch.process_all().await;

    assert_eq!((summary.completed, summary.failed), (1, 1));
    assert_eq!(orch.status(&stuck).unwrap(), DocumentStatus::Error);
    assert_eq!(orch.status(&next).unwrap(), DocumentStatus::Completed);
    let output = orch.get(&next).unwrap().output.as_ref().unwrap();
    assert_eq!(output.record.district, "Salem");
}

// ── Orchestrator state machine ───────────────────────────────────────────────

#[tokio::test]
async fn extraction_failure_still_completes() {
    let recorder = Arc::new(Recorder::default());
    let entities = FakeEntities(Err(ExtractionError::Exhausted {
        attempts: 3,
        detail: "HTTP 503 Service Unavailable".into(),
    }));
    let mut orch = Orchestrator::new(pipeline(
        FakeOcr::new(OCR_TEXT, 70.0),
        Some(entities),
        Some(Arc::clone(&recorder)),
    ));
    let id = orch.add_document(png_document("scan.png")).unwrap();

    let status = orch.process(&id).await.unwrap();

    assert_eq!(status, DocumentStatus::Completed);
    let entry = orch.get(&id).unwrap();
    assert!(entry.error.is_none());
    let output = entry.output.as_ref().unwrap();
    assert_eq!(output.record.village, "Kurchi");
    assert!(output.entities.is_empty());
    assert!(output.entity_error.as_deref().unwrap().contains("3 attempt"));
    assert!(recorder.events().contains(&"degraded".to_string()));
}

#[tokio::test]
async fn rasterization_failure_never_completes() {
    let ocr = Arc::new(FakeOcr::new(OCR_TEXT, 90.0));
    let p = Arc::new(Pipeline::new(
        config_with(None),
        Arc::clone(&ocr) as Arc<dyn RecognitionBackend>,
        None,
    ));
    let mut orch = Orchestrator::new(p);
    let id = orch.add_document(corrupt_document("broken.png")).unwrap();

    let status = orch.process(&id).await.unwrap();

    assert_eq!(status, DocumentStatus::Error);
    let entry = orch.get(&id).unwrap();
    assert!(entry.output.is_none());
    assert!(entry.error.as_deref().unwrap().contains("broken.png"));
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn recognition_failure_moves_document_to_error() {
    let mut ocr = FakeOcr::new(OCR_TEXT, 90.0);
    ocr.fail_call = Some(1);
    let mut orch = Orchestrator::new(pipeline(ocr, None, None));
    let id = orch.add_document(png_document("dark.png")).unwrap();

    assert_eq!(orch.process(&id).await.unwrap(), DocumentStatus::Error);
    assert!(orch.get(&id).unwrap().error.as_deref().unwrap().contains("image too dark"));
}

#[tokio::test]
async fn status_transitions_are_reported_in_order() {
    let recorder = Arc::new(Recorder::default());
    let mut orch = Orchestrator::new(pipeline(
        FakeOcr::new(OCR_TEXT, 90.0),
        None,
        Some(Arc::clone(&recorder)),
    ));
    let id = orch.add_document(png_document("one.png")).unwrap();

    orch.process(&id).await.unwrap();

    assert_eq!(
        recorder.events(),
        [
            "pending->processing",
            "start one.png",
            "page 1/1",
            "processing->completed"
        ]
    );
}

#[tokio::test]
async fn process_all_runs_pending_in_submission_order() {
    let recorder = Arc::new(Recorder::default());
    let mut orch = Orchestrator::new(pipeline(
        FakeOcr::new(OCR_TEXT, 90.0),
        None,
        Some(Arc::clone(&recorder)),
    ));
    orch.add_document(png_document("first.png")).unwrap();
    orch.add_document(corrupt_document("second.png")).unwrap();
    orch.add_document(png_document("third.png")).unwrap();

    let summary = orch.process_all().await;

    assert_eq!((summary.attempted, summary.completed, summary.failed), (3, 2, 1));
    let starts: Vec<String> = recorder
        .events()
        .into_iter()
        .filter(|e| e.starts_with("start "))
        .collect();
    assert_eq!(starts, ["start first.png", "start second.png", "start third.png"]);
    let statuses: Vec<DocumentStatus> = orch.entries().iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        [
            DocumentStatus::Completed,
            DocumentStatus::Error,
            DocumentStatus::Completed
        ]
    );
    assert_eq!(recorder.events().last().unwrap(), "batch 2/3");

    // Nothing left pending.
    assert_eq!(orch.process_all().await.attempted, 0);
}

#[tokio::test]
async fn only_pending_documents_can_be_processed() {
    let mut orch = Orchestrator::new(pipeline(FakeOcr::new(OCR_TEXT, 90.0), None, None));
    let id = orch.add_document(png_document("done.png")).unwrap();
    orch.process(&id).await.unwrap();

    let err = orch.process(&id).await.unwrap_err();
    assert!(
        matches!(
            err,
            PattaError::InvalidTransition {
                from: DocumentStatus::Completed,
                action: "process",
                ..
            }
        ),
        "got {err:?}"
    );

    let err = orch.process("doc_missing").await.unwrap_err();
    assert!(matches!(err, PattaError::UnknownDocument { .. }), "got {err:?}");
}

#[tokio::test]
async fn requeue_starts_a_new_attempt() {
    let mut ocr = FakeOcr::new(OCR_TEXT, 90.0);
    ocr.fail_call = Some(1);
    let mut orch = Orchestrator::new(pipeline(ocr, None, None));
    let id = orch.add_document(png_document("retry.png")).unwrap();

    assert_eq!(orch.process(&id).await.unwrap(), DocumentStatus::Error);
    assert!(orch.requeue(&id).is_ok());

    let entry = orch.get(&id).unwrap();
    assert_eq!(entry.status, DocumentStatus::Pending);
    assert_eq!(entry.attempt, 2);
    assert!(entry.error.is_none());

    // A pending document cannot be requeued.
    assert!(matches!(
        orch.requeue(&id),
        Err(PattaError::InvalidTransition { action: "requeue", .. })
    ));

    assert_eq!(orch.process(&id).await.unwrap(), DocumentStatus::Completed);
}

#[tokio::test]
async fn cancelled_processing_can_be_requeued() {
    let recorder = Arc::new(Recorder::default());
    let mut ocr = FakeOcr::new(OCR_TEXT, 90.0);
    ocr.hang_call = Some(1);
    let config = ExtractionConfig::builder()
        .ocr_job_timeout_secs(1)
        .progress_callback(Arc::clone(&recorder) as Arc<dyn ExtractionProgressCallback>)
        .build()
        .unwrap();
    let mut orch = Orchestrator::new(Arc::new(Pipeline::new(config, Arc::new(ocr), None)));
    let id = orch.add_document(png_document("slow.png")).unwrap();

    let dropped = tokio::time::timeout(Duration::from_millis(500), orch.process(&id)).await;
    assert!(dropped.is_err());

    let entry = orch.get(&id).unwrap();
    assert_eq!(entry.status, DocumentStatus::Error);
    assert_eq!(entry.error.as_deref(), Some(CANCELLED));
    assert!(recorder.events().contains(&"processing->error".to_string()));

    assert_eq!(orch.requeue(&id).unwrap(), 2);
    assert_eq!(orch.process(&id).await.unwrap(), DocumentStatus::Completed);
}

#[tokio::test]
async fn duplicate_and_removed_documents() {
    let mut orch = Orchestrator::new(pipeline(FakeOcr::new(OCR_TEXT, 90.0), None, None));
    let doc = png_document("dup.png").with_id("doc-1");
    orch.add_document(doc.clone()).unwrap();

    assert!(matches!(
        orch.add_document(doc),
        Err(PattaError::DuplicateDocument { .. })
    ));

    let removed = orch.remove("doc-1").unwrap();
    assert_eq!(removed.document.name, "dup.png");
    assert!(orch.is_empty());
    assert!(matches!(
        orch.status("doc-1"),
        Err(PattaError::UnknownDocument { .. })
    ));
}

// ── Streaming ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stream_yields_outcomes_in_submission_order() {
    let p = pipeline(FakeOcr::new(OCR_TEXT, 90.0), None, None);
    let docs = vec![
        png_document("a.png"),
        corrupt_document("b.png"),
        png_document("c.png"),
    ];

    let outcomes: Vec<_> = extract_stream(p, docs).collect().await;

    let names: Vec<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, ["a.png", "b.png", "c.png"]);
    assert!(outcomes[0].result.is_ok());
    assert!(matches!(
        outcomes[1].result,
        Err(PattaError::Rasterization(_))
    ));
    assert!(outcomes[2].result.is_ok());
}
