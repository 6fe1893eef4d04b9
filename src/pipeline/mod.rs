//! The per-page processing pipeline: fetch → render → encode → vision.
//!
//! Each stage is a small module with a trait seam where the step needs to be
//! testable without a network or a pdfium library: [`fetch::SourceFetcher`],
//! [`render::PageRasterizer`], and [`vision::ChatTransport`].

pub mod encode;
pub mod fetch;
pub mod render;
pub mod vision;

pub use fetch::{FetchError, HttpFetcher, SourceFetcher};
pub use render::{PageRasterizer, PdfiumRasterizer};
pub use vision::{ChatTransport, HttpTransport, Transcription, VisionClient};
