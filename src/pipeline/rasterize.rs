//! Rasterization: turn a [`Document`] into a bounded sequence of page images.
//!
//! PDFs are rendered with pdfium at `dpi / 72` times their native point size,
//! capped at `max_rendered_pixels` on either edge. Single-image documents are
//! decoded as one page. Every page also gets a small JPEG thumbnail; failing
//! to produce it only costs the thumbnail, never the page.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with process-global state and image decoding is
//! CPU-bound; both run on the blocking pool so Tokio workers stay responsive.

use crate::config::ExtractionConfig;
use crate::error::RasterizationError;
use crate::output::DocumentKind;
use crate::pipeline::input::Document;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// JPEG quality for page thumbnails.
const THUMBNAIL_QUALITY: u8 = 80;

/// One rendered page. Dropped once OCR has consumed it.
#[derive(Clone)]
pub struct Page {
    /// 1-based page index.
    pub index: usize,
    pub image: DynamicImage,
    /// JPEG-encoded thumbnail, if encoding succeeded.
    pub thumbnail: Option<Vec<u8>>,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("thumbnail_bytes", &self.thumbnail.as_ref().map(Vec::len))
            .finish()
    }
}

/// Settings copied out of [`ExtractionConfig`] for the blocking task.
#[derive(Debug, Clone)]
struct RenderSettings {
    dpi: u32,
    max_pages: usize,
    max_pixels: u32,
    thumbnail_scale: f32,
    password: Option<String>,
    library_path: Option<PathBuf>,
}

impl RenderSettings {
    fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_pages: config.max_pages,
            max_pixels: config.max_rendered_pixels,
            thumbnail_scale: config.thumbnail_scale,
            password: config.password.clone(),
            library_path: config.pdfium_library_path.clone(),
        }
    }
}

/// Rasterize `document` into at most `config.max_pages` pages.
///
/// `progress` receives the fraction of pages done after each page, so the
/// values are strictly increasing and end at `1.0`.
pub async fn rasterize<P>(
    document: &Document,
    config: &ExtractionConfig,
    progress: P,
) -> Result<Vec<Page>, RasterizationError>
where
    P: Fn(f32) + Send + 'static,
{
    let settings = RenderSettings::from_config(config);
    let bytes = document.bytes.clone();
    let name = document.name.clone();
    let kind = document.kind;

    tokio::task::spawn_blocking(move || match kind {
        DocumentKind::Paginated => render_pdf_blocking(&name, &bytes, &settings, &progress),
        DocumentKind::Image => decode_image_blocking(&name, &bytes, &settings, &progress),
    })
    .await
    .map_err(|e| RasterizationError::TaskPanicked(e.to_string()))?
}

/// Bind pdfium from an explicit file or directory, else the working
/// directory, else the system library path.
pub fn bind_pdfium(library_path: Option<&Path>) -> Result<Pdfium, RasterizationError> {
    let explicit = library_path
        .map(|p| p.to_path_buf())
        .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

    let bindings = match explicit {
        Some(path) if path.is_file() => Pdfium::bind_to_library(&path),
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| RasterizationError::PdfiumUnavailable(format!("{e:?}")))?;

    Ok(Pdfium::new(bindings))
}

fn render_pdf_blocking(
    name: &str,
    bytes: &[u8],
    settings: &RenderSettings,
    progress: &dyn Fn(f32),
) -> Result<Vec<Page>, RasterizationError> {
    let pdfium = bind_pdfium(settings.library_path.as_deref())?;
    let password = settings.password.as_deref();

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| classify_load_error(name, password.is_some(), e))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    if total == 0 {
        return Err(RasterizationError::NoPages {
            name: name.to_string(),
        });
    }
    let count = total.min(settings.max_pages);
    if count < total {
        info!("'{}': {} pages, rendering the first {}", name, total, count);
    } else {
        info!("'{}': rendering {} page(s)", name, count);
    }

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(settings.dpi as f32 / 72.0)
        .set_maximum_width(settings.max_pixels as i32)
        .set_maximum_height(settings.max_pixels as i32);

    let mut out = Vec::with_capacity(count);
    for idx in 0..count {
        let page_number = idx + 1;
        let page = pages
            .get(idx as u16)
            .map_err(|e| RasterizationError::PageFailed {
                page: page_number,
                detail: format!("{e:?}"),
            })?;

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RasterizationError::PageFailed {
                page: page_number,
                detail: format!("{e:?}"),
            })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_number,
            image.width(),
            image.height()
        );

        let thumbnail = make_thumbnail(&image, settings.thumbnail_scale, page_number);
        out.push(Page {
            index: page_number,
            image,
            thumbnail,
        });
        progress(page_number as f32 / count as f32);
    }

    Ok(out)
}

fn decode_image_blocking(
    name: &str,
    bytes: &[u8],
    settings: &RenderSettings,
    progress: &dyn Fn(f32),
) -> Result<Vec<Page>, RasterizationError> {
    let image = image::load_from_memory(bytes).map_err(|e| RasterizationError::ImageDecode {
        name: name.to_string(),
        detail: e.to_string(),
    })?;
    debug!("Decoded '{}' → {}x{} px", name, image.width(), image.height());

    let thumbnail = make_thumbnail(&image, settings.thumbnail_scale, 1);
    progress(1.0);
    Ok(vec![Page {
        index: 1,
        image,
        thumbnail,
    }])
}

fn classify_load_error(name: &str, had_password: bool, e: PdfiumError) -> RasterizationError {
    let detail = format!("{e:?}");
    if detail.to_ascii_lowercase().contains("password") {
        if had_password {
            RasterizationError::WrongPassword {
                name: name.to_string(),
            }
        } else {
            RasterizationError::PasswordRequired {
                name: name.to_string(),
            }
        }
    } else {
        RasterizationError::CorruptDocument {
            name: name.to_string(),
            detail,
        }
    }
}

/// Downscale and JPEG-encode. Any failure yields `None` with a warning.
fn make_thumbnail(image: &DynamicImage, scale: f32, page: usize) -> Option<Vec<u8>> {
    let width = ((image.width() as f32 * scale).round() as u32).max(1);
    let height = ((image.height() as f32 * scale).round() as u32).max(1);
    let small = image.resize(width, height, FilterType::Triangle);

    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buf), THUMBNAIL_QUALITY);
    match DynamicImage::ImageRgb8(small.to_rgb8()).write_with_encoder(encoder) {
        Ok(()) => Some(buf),
        Err(e) => {
            warn!("Page {}: thumbnail encoding failed: {}", page, e);
            None
        }
    }
}
