//! Recognition backend driving the `tesseract` executable.
//!
//! Each page is written to a temporary PNG and recognised with
//! `tesseract <png> stdout -l eng+hin+tam+tel tsv`. The TSV output carries
//! one row per word with its confidence and bounding box; text is rebuilt
//! line by line from those rows.

use super::{BoundingBox, PageRecognition, ProgressReporter, RecognitionBackend, RecognizedWord};
use crate::config::LanguageSet;
use futures::future::BoxFuture;
use futures::FutureExt;
use image::DynamicImage;
use std::io::Cursor;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// TSV row level for individual words.
const WORD_LEVEL: u32 = 5;

pub struct TesseractBackend {
    binary: PathBuf,
}

impl TesseractBackend {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn installed_languages(&self) -> Result<Vec<String>, String> {
        let output = Command::new(&self.binary)
            .arg("--list-langs")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("cannot run '{}': {e}", self.binary.display()))?;
        if !output.status.success() {
            return Err(format!(
                "'{} --list-langs' exited with {}",
                self.binary.display(),
                output.status
            ));
        }
        // Older releases print the list on stderr.
        let mut listing = String::from_utf8_lossy(&output.stdout).into_owned();
        listing.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(parse_language_list(&listing))
    }

    async fn run(&self, image: &DynamicImage, languages: &LanguageSet, progress: &ProgressReporter) -> Result<PageRecognition, String> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| format!("cannot encode page image: {e}"))?;

        let file = tempfile::Builder::new()
            .prefix("patta-page-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| format!("cannot create temp file: {e}"))?;
        tokio::fs::write(file.path(), &png)
            .await
            .map_err(|e| format!("cannot write temp file: {e}"))?;
        progress.report(10);

        let output = Command::new(&self.binary)
            .arg(file.path())
            .arg("stdout")
            .arg("-l")
            .arg(languages.tesseract_arg())
            .arg("tsv")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("cannot run '{}': {e}", self.binary.display()))?;
        progress.report(90);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        let page = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!(
            "tesseract: {} word(s), {:.1}% confidence",
            page.words.len(),
            page.confidence
        );
        progress.report(100);
        Ok(page)
    }
}

impl RecognitionBackend for TesseractBackend {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn initialize<'a>(&'a self, languages: &'a LanguageSet) -> BoxFuture<'a, Result<(), String>> {
        async move {
            let installed = self.installed_languages().await?;
            let missing: Vec<&str> = languages
                .codes()
                .iter()
                .filter(|code| !installed.contains(code))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(format!(
                    "tesseract is missing language data for: {}\n\
Install the matching traineddata files (e.g. tesseract-ocr-{}).",
                    missing.join(", "),
                    missing[0]
                ));
            }
            debug!("tesseract languages available: {}", languages);
            Ok(())
        }
        .boxed()
    }

    fn recognize<'a>(
        &'a self,
        image: &'a DynamicImage,
        languages: &'a LanguageSet,
        progress: &'a ProgressReporter,
    ) -> BoxFuture<'a, Result<PageRecognition, String>> {
        self.run(image, languages, progress).boxed()
    }
}

/// Language codes from `tesseract --list-langs` output.
fn parse_language_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("List of available languages"))
        .map(str::to_string)
        .collect()
}

/// Build a page result from tesseract TSV.
///
/// Confidence is the mean over words with a non-negative score, or 0 when
/// the page has no such words.
pub fn parse_tsv(tsv: &str) -> PageRecognition {
    let mut words = Vec::new();
    let mut lines: Vec<((u32, u32, u32, u32), Vec<String>)> = Vec::new();
    let mut conf_sum = 0.0f32;
    let mut conf_count = 0usize;

    for row in tsv.lines() {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0].parse::<u32>().ok() != Some(WORD_LEVEL) {
            continue;
        }
        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        if conf >= 0.0 {
            conf_sum += conf;
            conf_count += 1;
        }

        let key = (num(1), num(2), num(3), num(4));
        match lines.last_mut() {
            Some((last, line)) if *last == key => line.push(text.to_string()),
            _ => lines.push((key, vec![text.to_string()])),
        }

        let (left, top, width, height) = (num(6), num(7), num(8), num(9));
        words.push(RecognizedWord {
            text: text.to_string(),
            confidence: conf.max(0.0),
            bbox: BoundingBox {
                x0: left,
                y0: top,
                x1: left.saturating_add(width),
                y1: top.saturating_add(height),
            },
        });
    }

    let text = lines
        .into_iter()
        .map(|(_, line)| line.join(" "))
        .collect::<Vec<_>>()
        .join("\n");
    let confidence = if conf_count == 0 {
        0.0
    } else {
        conf_sum / conf_count as f32
    };

    PageRecognition {
        text,
        confidence,
        words,
    }
}
