//! docsnap
//!
//! Captures a rendered HTML region as a bitmap, paginates it onto A4 pages and
//! exports a PDF; also records freehand signatures as PNG images.
//!
//! # Features
//!
//! - **Rasterizer**: layout, paint and raster of an HTML subtree, with
//!   cross-origin taint checks for images
//! - **Paginator**: redraw-and-shift pagination over a shared source image
//! - **Exporter**: lopdf serialization, object URLs and local saving
//! - **Signature pad**: explicit pen state machine with velocity-based widths
//! - **remote** (default): blocking HTTP image loading, URL downloads and the
//!   async [`PdfService`]
//!
//! # Example
//!
//! ```no_run
//! use docsnap::{ExportConfig, RenderRegion, ResourceCache};
//!
//! # fn main() -> docsnap::Result<()> {
//! let region = RenderRegion::new("<body><h1>Payslip</h1><p>March</p></body>", 600);
//! let config = ExportConfig {
//!     filename: "payslip.pdf".to_string(),
//!     ..Default::default()
//! };
//! let pdf = docsnap::generate_pdf(&region, &config, &ResourceCache::new())?;
//! std::fs::write(&config.filename, pdf.as_bytes()).ok();
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{CaptureFailure, Error, NotificationCategory, Result};

pub mod export;
pub mod rendering;
pub mod signature;

// Async facade over the synchronous pipeline
#[cfg(feature = "remote")]
pub mod async_api;

#[cfg(feature = "remote")]
pub use async_api::PdfService;

pub use export::download::{download, DirectorySaver, FileSaver, ObjectUrl, ObjectUrlRegistry};
#[cfg(feature = "remote")]
pub use export::download::download_from_url;
pub use export::pdf::{decode_page_count, serialize, JpegQuality};
pub use export::{document_filename, paginate, DocumentArtifact, PageSpec, TransferableBlob};
pub use rendering::resources::{ResourceCache, ResourceLoader};
pub use rendering::{capture, Bitmap, CaptureOptions, RenderRegion, TextFont};
pub use signature::{PadOptions, PadState, PointerEvent, SignatureImage, SignaturePad};

/// Settings for one PDF export.
///
/// `quality` is on the 0–1 capture scale; values above 1 select maximum
/// JPEG quality.
///
/// # Examples
///
/// ```
/// let cfg = docsnap::ExportConfig::default();
/// assert_eq!(cfg.scale, 2.0);
/// assert_eq!(cfg.jpeg_quality().value(), 100);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Suggested name of the saved file
    pub filename: String,
    /// Output pixels per CSS pixel
    pub scale: f32,
    /// JPEG quality, 0–1; larger values clamp to the maximum
    pub quality: f32,
    /// Physical page geometry
    pub page: PageSpec,
    /// Request cross-origin images in CORS mode
    pub use_cors: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            filename: "document.pdf".to_string(),
            scale: 2.0,
            quality: 2.0,
            page: PageSpec::A4,
            use_cors: true,
        }
    }
}

impl ExportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.filename.trim().is_empty() {
            return Err(Error::ConfigError("filename must not be empty".into()));
        }
        if !self.quality.is_finite() || self.quality < 0.0 {
            return Err(Error::ConfigError(format!(
                "quality must be a non-negative number, got {}",
                self.quality
            )));
        }
        self.page.validate()?;
        self.capture_options().validate()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("invalid export config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            scale: self.scale,
            use_cors: self.use_cors,
            ..Default::default()
        }
    }

    pub fn jpeg_quality(&self) -> JpegQuality {
        JpegQuality::from_unit(self.quality)
    }
}

/// Capture `region`, paginate it and serialize the pages as a PDF.
pub fn generate_pdf(
    region: &RenderRegion,
    config: &ExportConfig,
    loader: &dyn ResourceLoader,
) -> Result<TransferableBlob> {
    config.validate()?;
    let bitmap = capture(region, &config.capture_options(), loader)?;
    let artifact = paginate(bitmap, config.page, &config.filename);
    let blob = serialize(&artifact, config.jpeg_quality())?;
    debug!(
        "Generated `{}`: {} page(s), {} bytes",
        config.filename,
        artifact.page_count(),
        blob.len()
    );
    Ok(blob)
}
