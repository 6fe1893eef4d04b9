//! PDF rasterisation via pdfium.
//!
//! ## Why `Option`, not `Result`?
//!
//! Every render failure — unparseable document, missing page, bitmap error —
//! is structural: retrying will not fix it, and the step handles them all the
//! same way (pause the job with a per-page message). A sentinel `None` keeps
//! the seam trivially mockable and mirrors that single handling path.
//!
//! ## Why a process-global binding?
//!
//! The pdfium C library is loaded once per process. Binding is attempted on
//! first use and the result — including failure — is cached in a `OnceLock`:
//! if the library is absent, every page render fails identically rather than
//! re-probing the filesystem per page.

use std::sync::OnceLock;

use image::RgbaImage;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

/// Seam for turning PDF bytes + a page number into an image.
///
/// Called inside `spawn_blocking`; implementations may burn CPU freely.
pub trait PageRasterizer: Send + Sync + 'static {
    /// Render a 1-based page to RGBA. `None` means the page cannot be
    /// rendered (bad document, page out of range, bitmap failure).
    fn render_page(&self, pdf: &[u8], page_number: u32) -> Option<RgbaImage>;
}

static PDFIUM: OnceLock<Option<Pdfium>> = OnceLock::new();

/// Bind pdfium once: library next to the executable, then the working
/// directory, then the system library path.
fn pdfium() -> Option<&'static Pdfium> {
    PDFIUM
        .get_or_init(|| {
            let bindings =
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                    .or_else(|_| Pdfium::bind_to_system_library());
            match bindings {
                Ok(bindings) => Some(Pdfium::new(bindings)),
                Err(e) => {
                    warn!(error = ?e, "failed to load the pdfium library; page rendering disabled");
                    None
                }
            }
        })
        .as_ref()
}

/// Production rasterizer over pdfium.
pub struct PdfiumRasterizer {
    scale: f32,
}

impl PdfiumRasterizer {
    /// `scale` multiplies the page's nominal point dimensions; 2.0 gives
    /// 1224×1584 px for a letter page.
    pub fn new(scale: f32) -> Self {
        Self { scale }
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn render_page(&self, pdf: &[u8], page_number: u32) -> Option<RgbaImage> {
        let pdfium = pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf, None)
            .map_err(|e| warn!(error = ?e, "failed to parse PDF document"))
            .ok()?;

        let pages = document.pages();
        if page_number == 0 || page_number > pages.len() as u32 {
            warn!(page = page_number, total = pages.len(), "page out of range");
            return None;
        }

        let page = pages.get((page_number - 1) as u16).ok()?;

        let width = ((page.width().value * self.scale).ceil() as u32).max(1);
        let height = ((page.height().value * self.scale).ceil() as u32).max(1);

        let render_config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_target_height(height as i32)
            .clear_before_rendering(true)
            .set_clear_color(PdfColor::new(255, 255, 255, 255));

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| warn!(page = page_number, error = ?e, "bitmap render failed"))
            .ok()?;

        let bw = bitmap.width() as usize;
        let bh = bitmap.height() as usize;
        let raw = bitmap.as_raw_bytes();
        if bh == 0 || raw.len() < bw * bh * 4 {
            warn!(page = page_number, "bitmap buffer smaller than expected");
            return None;
        }
        let stride = raw.len() / bh;

        // pdfium hands back BGRA rows (possibly padded); repack as tight RGBA.
        let rgba = bgra_to_rgba(&raw, bw, bh, stride);
        debug!(page = page_number, width = bw, height = bh, "rendered page");

        RgbaImage::from_raw(bw as u32, bh as u32, rgba)
    }
}

/// Repack a BGRA buffer with row stride into tightly packed RGBA.
///
/// `stride` is the byte length of one source row, which may exceed
/// `width * 4` when pdfium pads rows.
pub(crate) fn bgra_to_rgba(bgra: &[u8], width: usize, height: usize, stride: usize) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(width * height * 4);
    for row in 0..height {
        let line = &bgra[row * stride..row * stride + width * 4];
        for px in line.chunks_exact(4) {
            rgba.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
        }
    }
    rgba
}
