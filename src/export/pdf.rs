//! PDF serialization of a [`DocumentArtifact`].
//!
//! The source bitmap is JPEG-encoded once and shared by every page as an
//! image XObject; each page's content stream places it at that page's offset.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use log::debug;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use serde::{Deserialize, Serialize};

use super::{mm_to_pt, DocumentArtifact, TransferableBlob};
use crate::error::{Error, Result};
use crate::rendering::Bitmap;

const IMAGE_NAME: &str = "Im0";
const PRODUCER: &str = concat!("docsnap ", env!("CARGO_PKG_VERSION"));

/// JPEG quality on the encoder's 1–100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JpegQuality(u8);

impl JpegQuality {
    pub const MAX: JpegQuality = JpegQuality(100);

    /// Clamp `value` into 1–100.
    pub fn new(value: u8) -> Self {
        Self(value.clamp(1, 100))
    }

    /// Map a capture quality on the 0–1 scale; values above 1 clamp to 100.
    pub fn from_unit(quality: f32) -> Self {
        if !quality.is_finite() {
            return Self::MAX;
        }
        Self::new((quality.clamp(0.0, 1.0) * 100.0).round() as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for JpegQuality {
    fn default() -> Self {
        Self::MAX
    }
}

/// Encode the artifact as a multi-page PDF.
pub fn serialize(artifact: &DocumentArtifact, quality: JpegQuality) -> Result<TransferableBlob> {
    let jpeg = encode_jpeg(artifact.image(), quality)?;
    let page = artifact.page_spec();
    page.validate()?;

    let mut doc = Document::with_version("1.4");
    let pages_id = doc.new_object_id();

    let image = artifact.image();
    let image_stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => image.width() as i64,
            "Height" => image.height() as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        jpeg,
    )
    .with_compression(false);
    let image_id = doc.add_object(image_stream);
    let resources_id = doc.add_object(dictionary! {
        "XObject" => dictionary! {
            IMAGE_NAME => image_id,
        },
    });

    let page_h = page.height_pt();
    let draw_w = mm_to_pt(artifact.image_width_mm());
    let draw_h = mm_to_pt(artifact.image_height_mm());

    let mut kids: Vec<Object> = Vec::with_capacity(artifact.page_count());
    for placement in artifact.pages() {
        // PDF space grows upward from the bottom-left corner.
        let bottom = page_h - mm_to_pt(placement.offset_mm) - draw_h;
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        real(draw_w),
                        real(0.0),
                        real(0.0),
                        real(draw_h),
                        real(0.0),
                        real(bottom),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(IMAGE_NAME.as_bytes().to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => page_count,
            "Kids" => kids,
            "MediaBox" => vec![real(0.0), real(0.0), real(page.width_pt()), real(page_h)],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(artifact.filename()),
        "Producer" => Object::string_literal(PRODUCER),
    });
    doc.trailer.set("Info", info_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| Error::SerializationError(format!("failed to write PDF: {}", e)))?;
    debug!(
        "Serialized `{}`: {} page(s), {} bytes, jpeg quality {}",
        artifact.filename(),
        page_count,
        bytes.len(),
        quality.value()
    );
    Ok(TransferableBlob::pdf(bytes))
}

/// Parse PDF bytes and return the number of pages.
pub fn decode_page_count(bytes: &[u8]) -> Result<usize> {
    let doc = Document::load_mem(bytes)?;
    Ok(doc.get_pages().len())
}

fn encode_jpeg(bitmap: &Bitmap, quality: JpegQuality) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(Cursor::new(&mut out), quality.value());
        encoder
            .encode(
                bitmap.as_image().as_raw(),
                bitmap.width(),
                bitmap.height(),
                ColorType::Rgb8,
            )
            .map_err(|e| Error::SerializationError(format!("JPEG encoding failed: {}", e)))?;
    }
    Ok(out)
}

fn real(value: f64) -> Object {
    Object::Real(value as _)
}
