//! Input resolution: turn a user-supplied path, URL or byte buffer into a
//! validated [`Document`].
//!
//! Validation happens here so nothing downstream sees an empty, oversized or
//! unrecognisable file. The kind is decided from magic bytes, never from the
//! file extension: scans are routinely uploaded as `scan.pdf.jpg` and worse.

use crate::config::ExtractionConfig;
use crate::error::ValidationError;
use crate::output::DocumentKind;
use image::ImageFormat;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

static DOCUMENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// A validated input document. Cheap to clone; the bytes are shared.
#[derive(Clone)]
pub struct Document {
    pub id: String,
    /// Display name (file name or last URL segment).
    pub name: String,
    pub kind: DocumentKind,
    pub bytes: Arc<[u8]>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("size", &self.size())
            .finish()
    }
}

impl Document {
    /// Validate `bytes` and wrap them in a document with a fresh id.
    ///
    /// Rejects empty buffers, buffers over `max_size` bytes, and anything
    /// that is not a PDF, PNG or JPEG.
    pub fn from_bytes(
        name: impl Into<String>,
        bytes: Vec<u8>,
        max_size: u64,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if bytes.is_empty() {
            return Err(ValidationError::Empty { name });
        }
        let size = bytes.len() as u64;
        if size > max_size {
            return Err(ValidationError::TooLarge {
                name,
                size,
                limit: max_size,
            });
        }
        let kind = detect_kind(&bytes).ok_or_else(|| ValidationError::UnsupportedType {
            name: name.clone(),
            magic: bytes.iter().take(8).copied().collect(),
        })?;

        Ok(Self {
            id: next_document_id(),
            name,
            kind,
            bytes: bytes.into(),
        })
    }

    /// Replace the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// `doc_<seq>_<unix-millis>`; unique within the process.
fn next_document_id() -> String {
    let seq = DOCUMENT_SEQ.fetch_add(1, Ordering::Relaxed) + 1;
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("doc_{seq}_{millis}")
}

/// Classify by magic bytes. `None` for anything unsupported.
pub fn detect_kind(bytes: &[u8]) -> Option<DocumentKind> {
    if bytes.starts_with(b"%PDF") {
        return Some(DocumentKind::Paginated);
    }
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) | Ok(ImageFormat::Jpeg) => Some(DocumentKind::Image),
        _ => None,
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load and validate a document from a local path or an HTTP(S) URL.
pub async fn load_document(
    input: &str,
    config: &ExtractionConfig,
) -> Result<Document, ValidationError> {
    if is_url(input) {
        download_url(input, config).await
    } else {
        load_local(Path::new(input), config.max_file_size_bytes).await
    }
}

async fn load_local(path: &Path, max_size: u64) -> Result<Document, ValidationError> {
    let name = display_name(path);
    let map_io = |e: std::io::Error| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ValidationError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ValidationError::FileNotFound {
            path: path.to_path_buf(),
        },
    };

    // Check the size before reading so a huge file is never pulled into memory.
    let meta = tokio::fs::metadata(path).await.map_err(map_io)?;
    if !meta.is_file() {
        return Err(ValidationError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    if meta.len() > max_size {
        return Err(ValidationError::TooLarge {
            name,
            size: meta.len(),
            limit: max_size,
        });
    }

    let bytes = tokio::fs::read(path).await.map_err(map_io)?;
    debug!("Read local document: {} ({} bytes)", path.display(), bytes.len());
    Document::from_bytes(name, bytes, max_size)
}

async fn download_url(url: &str, config: &ExtractionConfig) -> Result<Document, ValidationError> {
    info!("Downloading document from: {}", url);
    let timeout_secs = config.download_timeout_secs;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ValidationError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_send = |e: reqwest::Error| {
        if e.is_timeout() {
            ValidationError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ValidationError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_send)?;

    if !response.status().is_success() {
        return Err(ValidationError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let name = filename_from_url(url);
    if let Some(len) = response.content_length() {
        if len > config.max_file_size_bytes {
            return Err(ValidationError::TooLarge {
                name,
                size: len,
                limit: config.max_file_size_bytes,
            });
        }
    }

    let bytes = response.bytes().await.map_err(map_send)?;
    info!("Downloaded {} bytes from {}", bytes.len(), url);
    Document::from_bytes(name, bytes.to_vec(), config.max_file_size_bytes)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Last non-empty URL path segment, or `downloaded`.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty())
        .unwrap_or_else(|| "downloaded".to_string())
}

/// Resolve a list of CLI inputs, keeping per-input failures.
pub async fn load_all(
    inputs: &[String],
    config: &ExtractionConfig,
) -> Vec<(String, Result<Document, ValidationError>)> {
    let mut out = Vec::with_capacity(inputs.len());
    for input in inputs {
        out.push((input.clone(), load_document(input, config).await));
    }
    out
}

/// Path helper used by the CLI to build per-document output names.
pub fn output_stem(document: &Document) -> PathBuf {
    let stem = Path::new(&document.name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| document.id.clone());
    PathBuf::from(stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10];

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn detects_kind_from_magic_bytes() {
        assert_eq!(detect_kind(b"%PDF-1.7\n"), Some(DocumentKind::Paginated));
        assert_eq!(detect_kind(PNG_MAGIC), Some(DocumentKind::Image));
        assert_eq!(detect_kind(JPEG_MAGIC), Some(DocumentKind::Image));
        assert_eq!(detect_kind(b"GIF89a...."), None);
        assert_eq!(detect_kind(b"hello world"), None);
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert_eq!(
            Document::from_bytes("a.pdf", vec![], 100).unwrap_err(),
            ValidationError::Empty { name: "a.pdf".into() }
        );
        let err = Document::from_bytes("b.pdf", b"%PDF-1.4 padding".to_vec(), 4).unwrap_err();
        assert!(matches!(err, ValidationError::TooLarge { size: 16, limit: 4, .. }));
    }

    #[test]
    fn rejects_unsupported_type_with_magic() {
        let err = Document::from_bytes("notes.txt", b"plain text here".to_vec(), 1024).unwrap_err();
        match err {
            ValidationError::UnsupportedType { magic, .. } => assert_eq!(magic, b"plain te"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn ids_are_unique() {
        let a = Document::from_bytes("a.pdf", b"%PDF-1.4".to_vec(), 1024).unwrap();
        let b = Document::from_bytes("a.pdf", b"%PDF-1.4".to_vec(), 1024).unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("doc_"));
    }

    #[test]
    fn filename_from_url_uses_last_segment() {
        assert_eq!(filename_from_url("https://x.org/files/patta_12.pdf"), "patta_12.pdf");
        assert_eq!(filename_from_url("https://x.org/"), "downloaded");
    }

    #[tokio::test]
    async fn load_local_reads_and_validates() {
        let mut f = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        f.write_all(b"%PDF-1.5\n%%EOF").unwrap();
        let config = ExtractionConfig::default();

        let doc = load_document(f.path().to_str().unwrap(), &config)
            .await
            .unwrap();
        assert_eq!(doc.kind, DocumentKind::Paginated);
        assert_eq!(doc.size(), 14);
    }

    #[tokio::test]
    async fn load_local_missing_file() {
        let err = load_document("/definitely/not/here.pdf", &ExtractionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn load_local_checks_size_before_reading() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[b'x'; 64]).unwrap();
        let config = ExtractionConfig::builder()
            .max_file_size_bytes(32)
            .build()
            .unwrap();
        let err = load_document(f.path().to_str().unwrap(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::TooLarge { size: 64, .. }));
    }
}
