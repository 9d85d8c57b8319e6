//! CLI binary for patta-extract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs every input through an `Orchestrator` and
//! prints or writes the resulting records.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use patta_extract::pipeline::input::{load_all, output_stem};
use patta_extract::pipeline::retry::RetryPolicy;
use patta_extract::{
    write_json_atomic, DocumentEntry, DocumentStatus, ExtractionConfig,
    ExtractionProgressCallback, LanguageSet, Orchestrator, PattaStore, Pipeline,
    ProgressCallback, RecognizerKind,
};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over the batch, with per-page log lines printed above it.
struct CliProgressCallback {
    bar: ProgressBar,
    names: Mutex<HashMap<String, String>>,
}

impl CliProgressCallback {
    fn new(documents: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:36.green/238}] {pos:>2}/{len} docs  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER);

        let bar = ProgressBar::new(documents as u64);
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            names: Mutex::new(HashMap::new()),
        })
    }

    fn name_of(&self, id: &str) -> String {
        self.names
            .lock()
            .ok()
            .and_then(|names| names.get(id).cloned())
            .unwrap_or_else(|| id.to_string())
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_document_start(&self, document_id: &str, name: &str) {
        if let Ok(mut names) = self.names.lock() {
            names.insert(document_id.to_string(), name.to_string());
        }
        self.bar.set_message(format!("{name}: rendering"));
    }

    fn on_ocr_progress(&self, document_id: &str, page: usize, percent: u8) {
        self.bar.set_message(format!(
            "{}: OCR page {page} {percent:>3}%",
            self.name_of(document_id)
        ));
    }

    fn on_page_recognized(&self, document_id: &str, page: usize, total: usize, confidence: f32) {
        self.bar.println(format!(
            "  {} {} page {:>2}/{:<2}  {}",
            dim("·"),
            self.name_of(document_id),
            page,
            total,
            dim(&format!("confidence {confidence:.1}")),
        ));
    }

    fn on_extraction_degraded(&self, document_id: &str, error: &str) {
        self.bar.println(format!(
            "  {} {}  NER unavailable, using pattern rules only: {}",
            yellow("⚠"),
            self.name_of(document_id),
            dim(error)
        ));
    }

    fn on_document_complete(&self, document_id: &str, pages: usize, confidence: f32) {
        self.bar.println(format!(
            "{} {}  {} page(s)  {}",
            green("✓"),
            bold(&self.name_of(document_id)),
            pages,
            dim(&format!("confidence {confidence:.1}")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, document_id: &str, error: &str) {
        let msg = match error.char_indices().nth(100) {
            Some((cut, _)) => format!("{}\u{2026}", &error[..cut]),
            None => error.to_string(),
        };
        self.bar.println(format!(
            "{} {}  {}",
            red("✗"),
            bold(&self.name_of(document_id)),
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, attempted: usize, completed: usize) {
        self.bar.finish_and_clear();
        let failed = attempted.saturating_sub(completed);
        if failed == 0 {
            eprintln!("{} {} document(s) extracted", green("✔"), bold(&completed.to_string()));
        } else {
            eprintln!(
                "{} {}/{} document(s) extracted  ({} failed)",
                if completed == 0 { red("✘") } else { yellow("⚠") },
                bold(&completed.to_string()),
                attempted,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one scan, record JSON on stdout
  patta-extract patta.jpg

  # Several documents, one JSON file each
  patta-extract claims/*.pdf -o out/

  # With the NER service
  patta-extract --ner-endpoint http://localhost:8000/api patta.pdf

  # Save records to the persistence service
  patta-extract --store-url http://localhost:5000/api --save patta.pdf

  # Vision-LLM OCR instead of tesseract
  patta-extract --recognizer vision --provider openai --model gpt-4.1-mini scan.png

  # Check the persistence service
  patta-extract --store-url http://localhost:5000/api --health

ENVIRONMENT VARIABLES:
  PATTA_NER_ENDPOINT      Base URL of the NER service
  PATTA_NER_API_KEY       Bearer token for the NER service
  PATTA_STORE_URL         Base URL of the persistence service
  PATTA_STORE_API_KEY     Bearer token for the persistence service
  OPENAI_API_KEY          OpenAI API key (vision recognizer)
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)

SETUP:
  tesseract must be installed with the eng, hin, tam and tel models:
    apt install tesseract-ocr tesseract-ocr-hin tesseract-ocr-tam tesseract-ocr-tel
"#;

/// Extract structured land-rights records from scanned images and PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "patta-extract",
    version,
    about = "Extract structured land-rights (patta) records from scanned images and PDFs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local image/PDF paths or HTTP/HTTPS URLs.
    #[arg(required_unless_present = "health")]
    inputs: Vec<String>,

    /// Write one `<name>.json` per document into this directory instead of stdout.
    #[arg(short, long, env = "PATTA_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Print only the normalised record, without OCR text and entities.
    #[arg(long)]
    record_only: bool,

    /// OCR backend.
    #[arg(long, env = "PATTA_RECOGNIZER", value_enum, default_value = "tesseract")]
    recognizer: RecognizerArg,

    /// tesseract executable.
    #[arg(long, env = "PATTA_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// OCR languages as tesseract codes, `+` or `,` separated.
    #[arg(long, env = "PATTA_LANGUAGES", default_value = "eng+hin+tam+tel")]
    languages: String,

    /// Vision model ID (vision recognizer only).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Vision provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// NER service base URL. Without it records come from pattern rules only.
    #[arg(long, env = "PATTA_NER_ENDPOINT")]
    ner_endpoint: Option<String>,

    #[arg(long, env = "PATTA_NER_API_KEY", hide_env_values = true)]
    ner_api_key: Option<String>,

    /// Locale sent with general NER requests.
    #[arg(long, env = "PATTA_NER_LOCALE", default_value = "en")]
    ner_locale: String,

    /// Skip the land-record NER model and call general NER directly.
    #[arg(long)]
    no_domain_ner: bool,

    /// Persistence service base URL.
    #[arg(long, env = "PATTA_STORE_URL")]
    store_url: Option<String>,

    #[arg(long, env = "PATTA_STORE_API_KEY", hide_env_values = true)]
    store_api_key: Option<String>,

    /// Upload each completed document and save its record.
    #[arg(long, requires = "store_url")]
    save: bool,

    /// Report persistence service health and exit.
    #[arg(long, requires = "store_url")]
    health: bool,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PATTA_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Pages rendered per PDF; later pages are ignored.
    #[arg(long, env = "PATTA_MAX_PAGES", default_value_t = 20)]
    max_pages: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PATTA_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Per-page OCR timeout in seconds (0 disables).
    #[arg(long, env = "PATTA_OCR_TIMEOUT", default_value_t = 120)]
    ocr_timeout: u64,

    /// Per-request NER timeout in seconds.
    #[arg(long, env = "PATTA_NER_TIMEOUT", default_value_t = 30)]
    ner_timeout: u64,

    /// Attempts per network call, including the first.
    #[arg(long, env = "PATTA_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PATTA_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "PATTA_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PATTA_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PATTA_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RecognizerArg {
    Tesseract,
    Vision,
}

impl From<RecognizerArg> for RecognizerKind {
    fn from(v: RecognizerArg) -> Self {
        match v {
            RecognizerArg::Tesseract => RecognizerKind::Tesseract,
            RecognizerArg::Vision => RecognizerKind::Vision,
        }
    }
}

/// Per-document line of the stdout report.
#[derive(Serialize)]
struct DocumentReport<'a> {
    input: &'a str,
    id: &'a str,
    status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    patta_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<serde_json::Value>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; -v always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.health;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let store = build_store(&cli)?;

    // ── Health-only mode ─────────────────────────────────────────────────
    if cli.health {
        let store = store.context("--health needs --store-url")?;
        let report = store.health_check().await;
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise health report")?
        );
        if !report.is_healthy() {
            anyhow::bail!("persistence service at {} is unhealthy", store.base_url());
        }
        return Ok(());
    }

    // ── Resolve inputs ───────────────────────────────────────────────────
    let config = build_config(&cli, None)?;
    let loaded = load_all(&cli.inputs, &config).await;
    let mut rejected = 0usize;
    let mut documents = Vec::new();
    let mut inputs_by_id = HashMap::new();
    for (input, result) in loaded {
        match result {
            Ok(doc) => {
                inputs_by_id.insert(doc.id.clone(), input);
                documents.push(doc);
            }
            Err(e) => {
                rejected += 1;
                eprintln!("{} {}  {}", red("✗"), bold(&input), red(&e.to_string()));
            }
        }
    }
    if documents.is_empty() {
        anyhow::bail!("no valid input documents");
    }

    // ── Build pipeline ───────────────────────────────────────────────────
    let progress: Option<ProgressCallback> = show_progress
        .then(|| CliProgressCallback::new(documents.len()) as Arc<dyn ExtractionProgressCallback>);
    let config = build_config(&cli, progress)?;
    let pipeline = Pipeline::from_config(config).context("Failed to start the pipeline")?;
    let mut orchestrator = Orchestrator::new(Arc::new(pipeline));
    for doc in documents {
        orchestrator.add_document(doc)?;
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let summary = orchestrator.process_all().await;
    orchestrator.pipeline().engine().shutdown();

    // ── Save and emit ────────────────────────────────────────────────────
    let mut saved: HashMap<String, String> = HashMap::new();
    let mut save_failures = 0usize;
    if cli.save {
        if let Some(ref store) = store {
            for entry in orchestrator.entries() {
                match save_entry(store, entry).await {
                    Ok(Some(patta_id)) => {
                        saved.insert(entry.document.id.clone(), patta_id);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        save_failures += 1;
                        eprintln!(
                            "{} {}  save failed: {}",
                            red("✗"),
                            bold(&entry.document.name),
                            red(&format!("{e:#}"))
                        );
                    }
                }
            }
        }
    }

    if let Some(ref dir) = cli.output_dir {
        for entry in orchestrator.entries() {
            let Some(ref output) = entry.output else {
                continue;
            };
            let path = dir.join(output_stem(&entry.document)).with_extension("json");
            if cli.record_only {
                write_json_atomic(&path, &output.record).await?;
            } else {
                write_json_atomic(&path, output).await?;
            }
            if !cli.quiet {
                eprintln!("  → {}", bold(&path.display().to_string()));
            }
        }
    } else {
        let mut reports = Vec::new();
        for entry in orchestrator.entries() {
            let output = match entry.output {
                Some(ref o) if cli.record_only => Some(serde_json::to_value(&o.record)?),
                Some(ref o) => Some(serde_json::to_value(o)?),
                None => None,
            };
            reports.push(DocumentReport {
                input: inputs_by_id
                    .get(&entry.document.id)
                    .map(String::as_str)
                    .unwrap_or(&entry.document.name),
                id: &entry.document.id,
                status: entry.status,
                error: entry.error.as_deref(),
                patta_id: saved.get(&entry.document.id).map(String::as_str),
                output,
            });
        }
        let json = if reports.len() == 1 {
            serde_json::to_string_pretty(&reports[0])
        } else {
            serde_json::to_string_pretty(&reports)
        }
        .context("Failed to serialise output")?;
        println!("{json}");
    }

    if !cli.quiet && !show_progress {
        eprintln!(
            "Extracted {}/{} document(s)",
            summary.completed, summary.attempted
        );
    }

    let failed = summary.failed + rejected + save_failures;
    if failed > 0 {
        anyhow::bail!("{failed} document(s) failed");
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .max_pages(cli.max_pages)
        .languages(LanguageSet::parse(&cli.languages))
        .recognizer(cli.recognizer.into())
        .tesseract_binary(cli.tesseract.clone())
        .ocr_job_timeout_secs(cli.ocr_timeout)
        .ner_locale(cli.ner_locale.clone())
        .ner_timeout_secs(cli.ner_timeout)
        .max_attempts(cli.max_attempts)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref url) = cli.ner_endpoint {
        builder = builder.ner_endpoint(url.clone());
    }
    if let Some(ref key) = cli.ner_api_key {
        builder = builder.ner_api_key(key.clone());
    }
    if cli.no_domain_ner {
        builder = builder.ner_schema(None);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn build_store(cli: &Cli) -> Result<Option<PattaStore>> {
    let Some(ref url) = cli.store_url else {
        return Ok(None);
    };
    let policy = RetryPolicy::new(cli.max_attempts, Duration::from_millis(500));
    let mut store = PattaStore::new(url.clone(), policy, Duration::from_secs(cli.ner_timeout))
        .context("Failed to build persistence client")?;
    if let Some(ref key) = cli.store_api_key {
        store = store.with_api_key(key.clone());
    }
    Ok(Some(store))
}

/// Upload the source file and save the record of a completed document.
async fn save_entry(store: &PattaStore, entry: &DocumentEntry) -> Result<Option<String>> {
    let Some(ref output) = entry.output else {
        return Ok(None);
    };
    let receipt = store
        .upload(&entry.document.name, &entry.document.bytes)
        .await
        .context("upload")?;
    let patta_id = store
        .save_patta(&output.record, Some(&receipt.file_id))
        .await
        .context("save")?;
    Ok(Some(patta_id))
}
