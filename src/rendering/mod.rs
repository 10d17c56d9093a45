//! Rasterizer: captures an HTML region as a bitmap.
//!
//! The pipeline is layout → paint → raster. Image resources are loaded
//! before layout so intrinsic sizes are known, and taint checks happen
//! before any pixel is drawn.

pub mod layout;
pub mod paint;
pub mod raster;
pub mod resources;

use std::fmt;
use std::sync::Arc;

use image::{Rgb, RgbImage};
use log::debug;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{CaptureFailure, Error, Result};
use resources::ResourceLoader;

/// Handle to the HTML subtree to capture.
///
/// The region's height is whatever its content lays out to at `width`.
#[derive(Debug, Clone)]
pub struct RenderRegion {
    html: String,
    selector: Option<String>,
    base_url: Option<Url>,
    width: u32,
}

impl RenderRegion {
    /// A region covering the document `<body>`, `width` CSS pixels wide.
    pub fn new(html: impl Into<String>, width: u32) -> Self {
        Self {
            html: html.into(),
            selector: None,
            base_url: None,
            width,
        }
    }

    /// Capture the first element matching `selector` instead of `<body>`.
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    /// Set the document URL used to resolve images and decide their origin.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        let url = Url::parse(base_url)
            .map_err(|e| Error::ConfigError(format!("invalid base URL `{}`: {}", base_url, e)))?;
        self.base_url = Some(url);
        Ok(self)
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    fn label(&self) -> &str {
        self.selector().unwrap_or("body")
    }
}

/// An RGB8 pixel buffer with nonzero dimensions.
#[derive(Clone, PartialEq)]
pub struct Bitmap {
    pixels: RgbImage,
}

impl Bitmap {
    pub fn from_image(pixels: RgbImage) -> Result<Self> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(Error::ConfigError(format!(
                "bitmap must have nonzero dimensions, got {}x{}",
                pixels.width(),
                pixels.height()
            )));
        }
        Ok(Self { pixels })
    }

    /// A bitmap filled with one colour.
    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Result<Self> {
        Self::from_image(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbImage {
        self.pixels
    }

    /// SHA-256 over the dimensions and raw pixels, hex encoded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.width().to_be_bytes());
        hasher.update(self.height().to_be_bytes());
        hasher.update(self.pixels.as_raw());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// A TrueType font used for text runs.
#[derive(Clone)]
pub struct TextFont(Arc<rusttype::Font<'static>>);

impl TextFont {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        rusttype::Font::try_from_vec(bytes)
            .map(|font| Self(Arc::new(font)))
            .ok_or_else(|| Error::ConfigError("font data is not a valid TrueType font".into()))
    }

    pub fn font(&self) -> &rusttype::Font<'static> {
        &self.0
    }
}

impl fmt::Debug for TextFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TextFont")
    }
}

/// Options for a single capture.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Output pixels per CSS pixel; must be at least 1
    pub scale: f32,
    /// Request cross-origin images in CORS mode
    pub use_cors: bool,
    /// Canvas fill before painting
    pub background: [u8; 3],
    /// Font for text runs; block glyphs are drawn without one
    pub font: Option<TextFont>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            scale: 2.0,
            use_cors: true,
            background: [255, 255, 255],
            font: None,
        }
    }
}

impl CaptureOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.scale.is_finite() || self.scale < 1.0 {
            return Err(Error::ConfigError(format!(
                "scale must be a finite number >= 1, got {}",
                self.scale
            )));
        }
        Ok(())
    }
}

/// Rasterize `region` into a bitmap.
///
/// Fails with a [`CaptureFailure`] when the region is not attached, not
/// visible, or references cross-origin image data that cannot be read.
pub fn capture(
    region: &RenderRegion,
    options: &CaptureOptions,
    loader: &dyn ResourceLoader,
) -> Result<Bitmap> {
    options.validate()?;

    let document = Html::parse_document(region.html());
    let root = resolve_root(&document, region)?;
    if region.width() == 0 {
        return Err(CaptureFailure::NotVisible(region.label().to_string()).into());
    }

    let images = resources::load_images(root, region, options, loader)?;
    let nodes = layout::layout_region(root, region.width(), &images);
    let height = layout::content_height(&nodes);
    if height == 0 {
        return Err(CaptureFailure::NotVisible(region.label().to_string()).into());
    }
    raster::canvas_size(region.width(), height, options.scale)?;

    let commands = paint::build_display_list(&nodes);
    let bitmap = raster::rasterize(&commands, region.width(), height, options, &images)?;
    debug!(
        "Captured `{}` ({}x{} css px) into {}x{} bitmap, {} commands, digest {}",
        region.label(),
        region.width(),
        height,
        bitmap.width(),
        bitmap.height(),
        commands.len(),
        bitmap.digest()
    );
    Ok(bitmap)
}

/// Find the capture root and check that it and its ancestors are visible.
pub(crate) fn resolve_root<'a>(document: &'a Html, region: &RenderRegion) -> Result<ElementRef<'a>> {
    let selector_text = region.label();
    let selector = Selector::parse(selector_text)
        .map_err(|e| Error::ConfigError(format!("invalid selector `{}`: {:?}", selector_text, e)))?;
    let root = document
        .select(&selector)
        .next()
        .ok_or_else(|| CaptureFailure::Detached(selector_text.to_string()))?;

    let hidden = layout::is_hidden(root)
        || root
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(layout::is_hidden);
    if hidden {
        return Err(CaptureFailure::NotVisible(selector_text.to_string()).into());
    }
    Ok(root)
}
