//! Pagination of captured bitmaps and the exportable document artifact.
//!
//! Pages are produced by redrawing the whole source image on every page,
//! shifted upward by the height already shown; the page's clipping window
//! reveals one band per page. No cropping takes place.

pub mod download;
pub mod pdf;

use std::sync::Arc;

use base64::Engine as _;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rendering::Bitmap;

/// Float drift tolerated when the image height is an exact page multiple
const MM_EPSILON: f64 = 1e-6;

const MM_PER_INCH: f64 = 25.4;
const POINTS_PER_INCH: f64 = 72.0;

/// Physical page geometry in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSpec {
    pub width_mm: f64,
    pub height_mm: f64,
}

impl PageSpec {
    /// ISO A4 portrait, 210 × 297 mm.
    pub const A4: PageSpec = PageSpec {
        width_mm: 210.0,
        height_mm: 297.0,
    };

    pub fn validate(&self) -> Result<()> {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        if !ok(self.width_mm) || !ok(self.height_mm) {
            return Err(Error::ConfigError(format!(
                "page size must be positive, got {}x{} mm",
                self.width_mm, self.height_mm
            )));
        }
        Ok(())
    }

    /// Height in mm of `bitmap` drawn at the full page width.
    pub fn scaled_height_mm(&self, bitmap: &Bitmap) -> f64 {
        bitmap.height() as f64 * self.width_mm / bitmap.width() as f64
    }

    pub fn width_pt(&self) -> f64 {
        mm_to_pt(self.width_mm)
    }

    pub fn height_pt(&self) -> f64 {
        mm_to_pt(self.height_mm)
    }
}

impl Default for PageSpec {
    fn default() -> Self {
        Self::A4
    }
}

pub fn mm_to_pt(mm: f64) -> f64 {
    mm * POINTS_PER_INCH / MM_PER_INCH
}

/// One page: where the full image is drawn relative to the page's top edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PagePlacement {
    pub index: usize,
    /// Vertical offset of the image's top edge in mm; 0 or negative
    pub offset_mm: f64,
}

/// Ordered pages over one shared source image plus the target filename.
#[derive(Debug, Clone)]
pub struct DocumentArtifact {
    image: Arc<Bitmap>,
    pages: Vec<PagePlacement>,
    page: PageSpec,
    image_width_mm: f64,
    image_height_mm: f64,
    filename: String,
}

impl DocumentArtifact {
    pub fn image(&self) -> &Bitmap {
        &self.image
    }

    pub fn pages(&self) -> &[PagePlacement] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_spec(&self) -> PageSpec {
        self.page
    }

    pub fn image_width_mm(&self) -> f64 {
        self.image_width_mm
    }

    pub fn image_height_mm(&self) -> f64 {
        self.image_height_mm
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

/// Split `bitmap` across pages of `page` geometry.
///
/// The image is fitted to the page width. The first page draws it at offset
/// 0; while height remains, each further page draws it at
/// `remaining - scaled_height`.
pub fn paginate(bitmap: Bitmap, page: PageSpec, filename: &str) -> DocumentArtifact {
    let image_width_mm = page.width_mm;
    let image_height_mm = page.scaled_height_mm(&bitmap);

    let mut pages = vec![PagePlacement {
        index: 0,
        offset_mm: 0.0,
    }];
    let mut remaining = image_height_mm - page.height_mm;
    while remaining > MM_EPSILON {
        pages.push(PagePlacement {
            index: pages.len(),
            offset_mm: remaining - image_height_mm,
        });
        remaining -= page.height_mm;
    }

    debug!(
        "Paginated {}x{} bitmap ({:.2} mm tall) into {} page(s)",
        bitmap.width(),
        bitmap.height(),
        image_height_mm,
        pages.len()
    );

    DocumentArtifact {
        image: Arc::new(bitmap),
        pages,
        page,
        image_width_mm,
        image_height_mm,
        filename: filename.to_string(),
    }
}

/// A self-contained byte sequence plus its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferableBlob {
    bytes: Vec<u8>,
    mime: String,
}

impl TransferableBlob {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            mime: mime.into(),
        }
    }

    pub fn pdf(bytes: Vec<u8>) -> Self {
        Self::new(bytes, "application/pdf")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `data:` URI form, suitable for an inline viewer.
    pub fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// Derive a download filename from a document title: lower case, runs of
/// whitespace replaced by `-`, `.pdf` appended.
pub fn document_filename(title: &str) -> String {
    let slug = title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    format!("{}.pdf", sanitize_filename(&slug))
}

/// Strip directory components and characters that are invalid in file names.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') && !c.is_control())
        .collect();
    match cleaned.trim().trim_start_matches('.') {
        "" => "download".to_string(),
        rest => rest.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(w: u32, h: u32) -> Bitmap {
        Bitmap::filled(w, h, [255, 255, 255]).unwrap()
    }

    #[test]
    fn square_bitmap_fits_one_page() {
        let artifact = paginate(bitmap(1000, 1000), PageSpec::A4, "a.pdf");
        assert!((artifact.image_height_mm() - 210.0).abs() < 1e-9);
        assert_eq!(artifact.page_count(), 1);
        assert_eq!(artifact.pages()[0].offset_mm, 0.0);
    }

    #[test]
    fn tall_bitmap_redraws_shifted() {
        let artifact = paginate(bitmap(1000, 4000), PageSpec::A4, "b.pdf");
        assert!((artifact.image_height_mm() - 840.0).abs() < 1e-9);
        let offsets: Vec<f64> = artifact.pages().iter().map(|p| p.offset_mm).collect();
        assert_eq!(offsets.len(), 3);
        assert_eq!(offsets[0], 0.0);
        assert!((offsets[1] + 297.0).abs() < 1e-9);
        assert!((offsets[2] + 594.0).abs() < 1e-9);
    }

    #[test]
    fn exact_page_multiple_does_not_add_blank_page() {
        let page = PageSpec {
            width_mm: 100.0,
            height_mm: 200.0,
        };
        let artifact = paginate(bitmap(100, 400), page, "c.pdf");
        assert_eq!(artifact.page_count(), 2);
    }

    #[test]
    fn page_indices_are_sequential() {
        let artifact = paginate(bitmap(200, 3000), PageSpec::A4, "d.pdf");
        for (i, p) in artifact.pages().iter().enumerate() {
            assert_eq!(p.index, i);
        }
    }

    #[test]
    fn filenames_from_titles() {
        assert_eq!(document_filename("Holerite Março 2025"), "holerite-março-2025.pdf");
        assert_eq!(document_filename("  Contrato   de Trabalho "), "contrato-de-trabalho.pdf");
    }

    #[test]
    fn sanitize_strips_paths() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\docs\\a?.pdf"), "a.pdf");
        assert_eq!(sanitize_filename(".."), "download");
    }

    #[test]
    fn blob_data_uri() {
        let blob = TransferableBlob::pdf(b"%PDF".to_vec());
        assert_eq!(blob.to_data_uri(), "data:application/pdf;base64,JVBERg==");
    }
}
