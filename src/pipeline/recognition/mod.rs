//! Recognition engine: page image → text + confidence through an
//! asynchronous job protocol.
//!
//! A single worker task owns the [`RecognitionBackend`] and processes jobs in
//! submission order. It talks to the engine only through messages:
//!
//! ```text
//!  submit(job) ──▶ WorkerCommand::Process ──▶ worker ──▶ backend.recognize
//!       ▲                                        │
//!       │ oneshot                                 ▼
//!   pending[id] ◀── router ◀── WorkerEvent::{Progress, Result, Error}
//! ```
//!
//! The router resolves each submit by removing the job's entry from the
//! pending table, so a second terminal event for the same id finds nothing
//! and is dropped. Progress events are only forwarded while the entry is
//! still present, so no progress is ever observed after the terminal event.
//!
//! With a job timeout set, the worker abandons a `recognize` call that runs
//! past it and reports a job error, so a hung page never blocks the jobs
//! queued behind it.
//!
//! If the worker dies (panic, channel closed) every outstanding job is
//! rejected with [`RecognitionError::WorkerFailed`] and the engine refuses new
//! jobs until [`RecognitionEngine::reinitialize`] is called. Each
//! (re)initialisation bumps a generation counter; events from an older
//! generation are ignored.

pub mod tesseract;
pub mod vision;

use crate::config::LanguageSet;
use crate::error::RecognitionError;
use futures::future::BoxFuture;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

pub use tesseract::TesseractBackend;
pub use vision::VisionBackend;

// ── Job protocol ─────────────────────────────────────────────────────────

/// Pixel rectangle of a recognised word, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedWord {
    pub text: String,
    /// 0–100.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// A unit of OCR work. `id` is the sole correlation key and must be unique
/// among outstanding jobs.
#[derive(Clone)]
pub struct RecognitionJob {
    pub id: String,
    pub image: Arc<DynamicImage>,
    pub languages: LanguageSet,
    pub page_number: Option<usize>,
}

impl fmt::Debug for RecognitionJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognitionJob")
            .field("id", &self.id)
            .field("languages", &self.languages)
            .field("page_number", &self.page_number)
            .finish()
    }
}

/// Terminal `result` payload for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    pub id: String,
    pub text: String,
    /// 0–100.
    pub confidence: f32,
    pub words: Vec<RecognizedWord>,
    pub page_number: Option<usize>,
}

/// Messages from the engine to the worker.
#[derive(Debug)]
pub enum WorkerCommand {
    Process(RecognitionJob),
}

/// Messages from the worker to the router.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Initialized,
    InitFailed(String),
    Progress { id: String, percent: u8 },
    Result(JobOutput),
    Error { id: String, message: String },
}

/// What a backend returns for one image.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageRecognition {
    pub text: String,
    pub confidence: f32,
    pub words: Vec<RecognizedWord>,
}

/// Forwards `progress` events for one job, dropping any value that would
/// move backwards.
pub struct ProgressReporter {
    id: String,
    events: mpsc::UnboundedSender<WorkerEvent>,
    last: AtomicU8,
}

impl ProgressReporter {
    fn new(id: String, events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self {
            id,
            events,
            last: AtomicU8::new(0),
        }
    }

    /// Report `percent` (clamped to 100). Values not above the last reported
    /// one are ignored.
    pub fn report(&self, percent: u8) {
        let percent = percent.min(100);
        let prev = self.last.fetch_max(percent, Ordering::SeqCst);
        if percent > prev {
            let _ = self.events.send(WorkerEvent::Progress {
                id: self.id.clone(),
                percent,
            });
        }
    }
}

/// An OCR implementation driven by the engine's worker task.
///
/// Errors are plain messages: they become the `message` of a job `error`
/// event or of an initialisation failure.
pub trait RecognitionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Load models for `languages`. Called once per engine generation.
    fn initialize<'a>(&'a self, languages: &'a LanguageSet) -> BoxFuture<'a, Result<(), String>>;

    fn recognize<'a>(
        &'a self,
        image: &'a DynamicImage,
        languages: &'a LanguageSet,
        progress: &'a ProgressReporter,
    ) -> BoxFuture<'a, Result<PageRecognition, String>>;
}

// ── Engine ───────────────────────────────────────────────────────────────

/// Observable engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Initializing,
    Ready,
    /// Backend initialisation failed.
    InitFailed(String),
    /// The worker died; reinitialise before submitting again.
    Failed(String),
    Shutdown,
}

/// Per-job progress sink, called with non-decreasing percentages.
pub type JobProgress = Arc<dyn Fn(u8) + Send + Sync>;

struct PendingJob {
    reply: oneshot::Sender<Result<JobOutput, RecognitionError>>,
    progress: Option<JobProgress>,
}

struct Inner {
    generation: u64,
    commands: Option<mpsc::UnboundedSender<WorkerCommand>>,
    pending: HashMap<String, PendingJob>,
}

impl Inner {
    fn reject_all(&mut self, error: &RecognitionError) -> usize {
        let n = self.pending.len();
        for (_, job) in self.pending.drain() {
            let _ = job.reply.send(Err(error.clone()));
        }
        n
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears a job's pending entry when its `submit` call ends, including
/// when the caller drops the future before a terminal event arrives.
struct PendingSlot<'a> {
    inner: &'a Mutex<Inner>,
    id: String,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        lock(self.inner).pending.remove(&self.id);
    }
}

static JOB_SEQ: AtomicU64 = AtomicU64::new(0);

/// `ocr_<seq>_<unix-millis>`; unique within the process.
pub fn next_job_id() -> String {
    let seq = JOB_SEQ.fetch_add(1, Ordering::Relaxed) + 1;
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("ocr_{seq}_{millis}")
}

/// Correlates submitted jobs with worker events.
///
/// Must be started inside a Tokio runtime.
pub struct RecognitionEngine {
    backend: Arc<dyn RecognitionBackend>,
    languages: LanguageSet,
    job_timeout: Option<Duration>,
    inner: Arc<Mutex<Inner>>,
    state: Arc<watch::Sender<EngineState>>,
}

impl RecognitionEngine {
    /// Spawn the worker and begin initialising `backend` for `languages`.
    pub fn start(
        backend: Arc<dyn RecognitionBackend>,
        languages: LanguageSet,
        job_timeout: Option<Duration>,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::Initializing);
        let engine = Self {
            backend,
            languages,
            job_timeout,
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                commands: None,
                pending: HashMap::new(),
            })),
            state: Arc::new(state),
        };
        engine.spawn_generation();
        engine
    }

    pub fn languages(&self) -> &LanguageSet {
        &self.languages
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    /// Jobs submitted and not yet resolved.
    pub fn outstanding(&self) -> usize {
        lock(&self.inner).pending.len()
    }

    /// Build a job with a fresh id and the engine's language set.
    pub fn new_job(&self, image: Arc<DynamicImage>, page_number: Option<usize>) -> RecognitionJob {
        RecognitionJob {
            id: next_job_id(),
            image,
            languages: self.languages.clone(),
            page_number,
        }
    }

    /// Wait until initialisation finishes. Fails if it failed, or if the
    /// engine is broken or shut down.
    pub async fn wait_ready(&self) -> Result<(), RecognitionError> {
        let mut rx = self.state.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                EngineState::Ready => return Ok(()),
                EngineState::InitFailed(message) => {
                    return Err(RecognitionError::InitializationFailed { message })
                }
                EngineState::Failed(message) => {
                    return Err(RecognitionError::WorkerFailed { message })
                }
                EngineState::Shutdown => return Err(RecognitionError::Shutdown),
                EngineState::Initializing => {}
            }
            if rx.changed().await.is_err() {
                return Err(RecognitionError::Shutdown);
            }
        }
    }

    /// Submit a job and wait for its terminal event.
    ///
    /// Submits made while the engine initialises wait for it. The pending
    /// entry is removed on every exit path, cancellation included.
    pub async fn submit(
        &self,
        job: RecognitionJob,
        progress: Option<JobProgress>,
    ) -> Result<JobOutput, RecognitionError> {
        self.wait_ready().await?;

        let id = job.id.clone();
        let rx = {
            let mut inner = lock(&self.inner);
            if inner.pending.contains_key(&id) {
                return Err(RecognitionError::DuplicateJobId { id });
            }
            let commands = inner
                .commands
                .clone()
                .ok_or_else(|| RecognitionError::WorkerFailed {
                    message: "engine is not running".to_string(),
                })?;
            let (reply, rx) = oneshot::channel();
            inner
                .pending
                .insert(id.clone(), PendingJob { reply, progress });
            if commands.send(WorkerCommand::Process(job)).is_err() {
                inner.pending.remove(&id);
                return Err(RecognitionError::WorkerFailed {
                    message: "worker channel closed".to_string(),
                });
            }
            rx
        };
        let _slot = PendingSlot {
            inner: &self.inner,
            id: id.clone(),
        };
        debug!("OCR job {} submitted", id);

        let delivered = match self.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(delivered) => delivered,
                Err(_) => {
                    warn!("OCR job {} timed out after {:?}", id, limit);
                    return Err(RecognitionError::Timeout {
                        id,
                        secs: limit.as_secs(),
                    });
                }
            },
            None => rx.await,
        };

        // A dropped reply sender means the engine went away mid-job.
        delivered.unwrap_or(Err(RecognitionError::Shutdown))
    }

    /// Reject all pending jobs, stop the current worker and start a new one.
    pub fn reinitialize(&self) {
        {
            let mut inner = lock(&self.inner);
            let rejected = inner.reject_all(&RecognitionError::Shutdown);
            if rejected > 0 {
                warn!("Reinitialising OCR engine: rejected {} pending job(s)", rejected);
            }
            inner.commands = None;
        }
        self.spawn_generation();
    }

    /// Reject all pending jobs and stop the worker. Later submits fail.
    pub fn shutdown(&self) {
        let mut inner = lock(&self.inner);
        inner.generation += 1;
        inner.commands = None;
        let rejected = inner.reject_all(&RecognitionError::Shutdown);
        self.state.send_replace(EngineState::Shutdown);
        info!("OCR engine shut down ({} pending job(s) rejected)", rejected);
    }

    fn spawn_generation(&self) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let generation = {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            inner.commands = Some(cmd_tx);
            self.state.send_replace(EngineState::Initializing);
            inner.generation
        };
        debug!(
            "Starting OCR worker generation {} ({}, {})",
            generation,
            self.backend.name(),
            self.languages
        );

        tokio::spawn(run_worker(
            Arc::clone(&self.backend),
            self.languages.clone(),
            self.job_timeout,
            cmd_rx,
            event_tx,
        ));
        tokio::spawn(route_events(
            Arc::clone(&self.inner),
            Arc::clone(&self.state),
            generation,
            event_rx,
        ));
    }
}

impl Drop for RecognitionEngine {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        inner.generation += 1;
        inner.commands = None;
        inner.reject_all(&RecognitionError::Shutdown);
    }
}

async fn run_worker(
    backend: Arc<dyn RecognitionBackend>,
    languages: LanguageSet,
    job_timeout: Option<Duration>,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    if let Err(message) = backend.initialize(&languages).await {
        let _ = events.send(WorkerEvent::InitFailed(message));
        return;
    }
    if events.send(WorkerEvent::Initialized).is_err() {
        return;
    }

    while let Some(command) = commands.recv().await {
        match command {
            WorkerCommand::Process(job) => {
                let reporter = ProgressReporter::new(job.id.clone(), events.clone());
                let recognition = backend.recognize(&job.image, &job.languages, &reporter);
                let outcome = match job_timeout {
                    Some(limit) => tokio::time::timeout(limit, recognition)
                        .await
                        .unwrap_or_else(|_| {
                            warn!("OCR job {} abandoned after {:?}", job.id, limit);
                            Err(format!("recognition did not finish within {limit:?}"))
                        }),
                    None => recognition.await,
                };
                let event = match outcome {
                    Ok(page) => WorkerEvent::Result(JobOutput {
                        id: job.id,
                        text: page.text,
                        confidence: page.confidence.clamp(0.0, 100.0),
                        words: page.words,
                        page_number: job.page_number,
                    }),
                    Err(message) => WorkerEvent::Error {
                        id: job.id,
                        message,
                    },
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        }
    }
}

async fn route_events(
    inner: Arc<Mutex<Inner>>,
    state: Arc<watch::Sender<EngineState>>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
) {
    while let Some(event) = events.recv().await {
        let mut guard = lock(&inner);
        if guard.generation != generation {
            debug!("Dropping event from stale OCR worker generation {}", generation);
            continue;
        }
        match event {
            WorkerEvent::Initialized => {
                state.send_replace(EngineState::Ready);
                info!("OCR engine ready");
            }
            WorkerEvent::InitFailed(message) => {
                error!("OCR engine initialisation failed: {}", message);
                guard.commands = None;
                state.send_replace(EngineState::InitFailed(message.clone()));
                guard.reject_all(&RecognitionError::InitializationFailed { message });
            }
            WorkerEvent::Progress { id, percent } => {
                let sink = guard.pending.get(&id).and_then(|job| job.progress.clone());
                drop(guard);
                match sink {
                    Some(sink) => sink(percent),
                    None => debug!("Progress for unknown OCR job {} dropped", id),
                }
            }
            WorkerEvent::Result(output) => match guard.pending.remove(&output.id) {
                Some(job) => {
                    debug!("OCR job {} completed ({:.1}%)", output.id, output.confidence);
                    let _ = job.reply.send(Ok(output));
                }
                None => debug!("Result for unknown OCR job {} dropped", output.id),
            },
            WorkerEvent::Error { id, message } => match guard.pending.remove(&id) {
                Some(job) => {
                    warn!("OCR job {} failed: {}", id, message);
                    let _ = job.reply.send(Err(RecognitionError::Job { id, message }));
                }
                None => debug!("Error for unknown OCR job {} dropped", id),
            },
        }
    }

    // Worker gone. Only a transport failure if this generation is still current.
    let mut guard = lock(&inner);
    if guard.generation == generation && guard.commands.is_some() {
        guard.commands = None;
        let message = "worker stopped unexpectedly".to_string();
        state.send_replace(EngineState::Failed(message.clone()));
        let rejected = guard.reject_all(&RecognitionError::WorkerFailed { message });
        error!("OCR worker failed; rejected {} outstanding job(s)", rejected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use image::RgbImage;
    use std::sync::atomic::AtomicUsize;

    /// Echoes the image width; optional delay, failure and panic switches.
    struct ScriptedBackend {
        delay: Duration,
        init_error: Option<String>,
        fail_width: Option<u32>,
        panic_width: Option<u32>,
        hang_width: Option<u32>,
        progress: Vec<u8>,
        inits: AtomicUsize,
    }

    impl Default for ScriptedBackend {
        fn default() -> Self {
            Self {
                delay: Duration::ZERO,
                init_error: None,
                fail_width: None,
                panic_width: None,
                hang_width: None,
                progress: Vec::new(),
                inits: AtomicUsize::new(0),
            }
        }
    }

    impl RecognitionBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn initialize<'a>(&'a self, _languages: &'a LanguageSet) -> BoxFuture<'a, Result<(), String>> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            let result = match &self.init_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            };
            async move { result }.boxed()
        }

        fn recognize<'a>(
            &'a self,
            image: &'a DynamicImage,
            _languages: &'a LanguageSet,
            progress: &'a ProgressReporter,
        ) -> BoxFuture<'a, Result<PageRecognition, String>> {
            async move {
                for p in &self.progress {
                    progress.report(*p);
                }
                let width = image.width();
                if self.hang_width == Some(width) {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                tokio::time::sleep(self.delay).await;
                if self.panic_width == Some(width) {
                    panic!("backend crashed");
                }
                if self.fail_width == Some(width) {
                    return Err(format!("cannot read {width}"));
                }
                Ok(PageRecognition {
                    text: format!("width {width}"),
                    confidence: width as f32,
                    words: Vec::new(),
                })
            }
            .boxed()
        }
    }

    fn image(width: u32) -> Arc<DynamicImage> {
        Arc::new(DynamicImage::ImageRgb8(RgbImage::new(width, 4)))
    }

    fn engine(backend: ScriptedBackend, timeout: Option<Duration>) -> Arc<RecognitionEngine> {
        Arc::new(RecognitionEngine::start(
            Arc::new(backend),
            LanguageSet::default(),
            timeout,
        ))
    }

    #[tokio::test]
    async fn concurrent_jobs_resolve_with_their_own_results() {
        let engine = engine(ScriptedBackend::default(), None);
        let a = engine.new_job(image(11), Some(1));
        let b = engine.new_job(image(22), Some(2));
        let (a_id, b_id) = (a.id.clone(), b.id.clone());

        let (ra, rb) = tokio::join!(engine.submit(a, None), engine.submit(b, None));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!((ra.id.as_str(), ra.text.as_str()), (a_id.as_str(), "width 11"));
        assert_eq!((rb.id.as_str(), rb.text.as_str()), (b_id.as_str(), "width 22"));
        assert_eq!(rb.page_number, Some(2));
        assert_eq!(engine.outstanding(), 0);
    }

    #[tokio::test]
    async fn progress_is_monotonic() {
        let backend = ScriptedBackend {
            progress: vec![10, 5, 50, 50, 250],
            ..Default::default()
        };
        let engine = engine(backend, None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: JobProgress = Arc::new(move |p| sink.lock().unwrap().push(p));

        engine
            .submit(engine.new_job(image(3), None), Some(cb))
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![10, 50, 100]);
    }

    #[tokio::test]
    async fn job_error_rejects_only_that_job() {
        let backend = ScriptedBackend {
            fail_width: Some(7),
            ..Default::default()
        };
        let engine = engine(backend, None);

        let err = engine
            .submit(engine.new_job(image(7), None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RecognitionError::Job { .. }));

        let ok = engine.submit(engine.new_job(image(8), None), None).await;
        assert_eq!(ok.unwrap().text, "width 8");
    }

    #[tokio::test]
    async fn duplicate_outstanding_id_is_rejected() {
        let backend = ScriptedBackend {
            delay: Duration::from_millis(200),
            ..Default::default()
        };
        let engine = engine(backend, None);
        let job = engine.new_job(image(5), None);
        let dup = job.clone();

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.submit(job, None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = engine.submit(dup, None).await.unwrap_err();
        assert!(matches!(err, RecognitionError::DuplicateJobId { .. }));
        assert_eq!(first.await.unwrap().unwrap().text, "width 5");
    }

    #[tokio::test]
    async fn worker_crash_rejects_outstanding_until_reinitialised() {
        let backend = ScriptedBackend {
            delay: Duration::from_millis(20),
            panic_width: Some(13),
            ..Default::default()
        };
        let engine = engine(backend, None);

        let crash = engine.submit(engine.new_job(image(13), None), None);
        let queued = engine.submit(engine.new_job(image(14), None), None);
        let (crash, queued) = tokio::join!(crash, queued);
        assert!(crash.unwrap_err().is_transport());
        assert!(queued.unwrap_err().is_transport());
        assert_eq!(engine.outstanding(), 0);
        assert!(matches!(engine.state(), EngineState::Failed(_)));

        let refused = engine.submit(engine.new_job(image(2), None), None).await;
        assert!(matches!(refused, Err(RecognitionError::WorkerFailed { .. })));

        engine.reinitialize();
        let ok = engine.submit(engine.new_job(image(2), None), None).await;
        assert_eq!(ok.unwrap().text, "width 2");
    }

    #[tokio::test]
    async fn init_failure_is_reported_to_submitters() {
        let backend = ScriptedBackend {
            init_error: Some("tam.traineddata missing".into()),
            ..Default::default()
        };
        let engine = engine(backend, None);
        let err = engine
            .submit(engine.new_job(image(1), None), None)
            .await
            .unwrap_err();
        match err {
            RecognitionError::InitializationFailed { message } => {
                assert!(message.contains("tam"))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_rejects_pending_and_later_submits() {
        let backend = ScriptedBackend {
            delay: Duration::from_millis(300),
            ..Default::default()
        };
        let engine = engine(backend, None);
        engine.wait_ready().await.unwrap();

        let pending = {
            let engine = engine.clone();
            let job = engine.new_job(image(9), None);
            tokio::spawn(async move { engine.submit(job, None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.shutdown();

        assert_eq!(pending.await.unwrap(), Err(RecognitionError::Shutdown));
        let later = engine.submit(engine.new_job(image(9), None), None).await;
        assert_eq!(later, Err(RecognitionError::Shutdown));
    }

    #[tokio::test]
    async fn timed_out_job_is_removed() {
        let backend = ScriptedBackend {
            delay: Duration::from_millis(500),
            ..Default::default()
        };
        let engine = engine(backend, Some(Duration::from_millis(50)));
        let err = engine
            .submit(engine.new_job(image(4), None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RecognitionError::Timeout { .. }));
        assert_eq!(engine.outstanding(), 0);
    }

    #[tokio::test]
    async fn hung_job_does_not_block_the_next_one() {
        let backend = ScriptedBackend {
            hang_width: Some(1),
            ..Default::default()
        };
        let engine = engine(backend, Some(Duration::from_millis(200)));

        let hung = engine.submit(engine.new_job(image(1), None), None).await;
        assert!(
            matches!(
                hung,
                Err(RecognitionError::Timeout { .. } | RecognitionError::Job { .. })
            ),
            "got {hung:?}"
        );

        let next = engine.submit(engine.new_job(image(2), None), None).await;
        assert_eq!(next.unwrap().text, "width 2");
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.outstanding(), 0);
    }

    #[tokio::test]
    async fn dropped_submit_leaves_no_pending_entry() {
        let backend = ScriptedBackend {
            delay: Duration::from_millis(300),
            ..Default::default()
        };
        let engine = engine(backend, None);
        engine.wait_ready().await.unwrap();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            engine.submit(engine.new_job(image(6), None), None),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(engine.outstanding(), 0);

        let ok = engine.submit(engine.new_job(image(7), None), None).await;
        assert_eq!(ok.unwrap().text, "width 7");
    }

    #[test]
    fn job_ids_are_unique() {
        let a = next_job_id();
        let b = next_job_id();
        assert_ne!(a, b);
        assert!(a.starts_with("ocr_"));
    }
}
