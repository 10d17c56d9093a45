//! Image resources referenced by a render region.
//!
//! Images are resolved against the region's base URL and loaded through a
//! [`ResourceLoader`]. Pixel data from another origin is only readable when it
//! was requested in CORS mode and the response allowed the region's origin;
//! anything else would taint the canvas and fails the capture.

use std::collections::HashMap;

use base64::Engine as _;
use image::{DynamicImage, GenericImageView};
use log::{debug, warn};
use scraper::{ElementRef, Selector};
use url::Url;

use super::{CaptureOptions, RenderRegion};
use crate::error::{CaptureFailure, Result};

/// Bytes of a fetched resource plus the CORS verdict of its response.
#[derive(Debug, Clone)]
pub struct Resource {
    pub bytes: Vec<u8>,
    /// Whether the response allowed the requesting origin to read it
    pub cors_allowed: bool,
}

/// A single image request issued during capture.
#[derive(Debug, Clone, Copy)]
pub struct ImageRequest<'a> {
    pub url: &'a Url,
    /// Origin sent with a CORS-mode request; `None` for no-cors requests
    pub cors_origin: Option<&'a str>,
}

/// Source of image bytes for capture.
///
/// Loaders return `None` when the resource is unavailable; the rasterizer
/// then paints a placeholder instead of failing.
pub trait ResourceLoader {
    fn load(&self, request: &ImageRequest<'_>) -> Option<Resource>;
}

/// In-memory loader keyed by absolute URL.
///
/// The async facade fills one of these ahead of capture; it is also the
/// loader to use when a region only references `data:` images.
#[derive(Debug, Clone, Default)]
pub struct ResourceCache {
    entries: HashMap<String, Resource>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: &Url, resource: Resource) {
        self.entries.insert(url.as_str().to_string(), resource);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceLoader for ResourceCache {
    fn load(&self, request: &ImageRequest<'_>) -> Option<Resource> {
        self.entries.get(request.url.as_str()).cloned()
    }
}

/// Loader that fetches images over HTTP with a blocking client.
#[cfg(feature = "remote")]
pub struct HttpLoader {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "remote")]
impl HttpLoader {
    pub fn new(timeout_ms: u64) -> crate::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| crate::Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "remote")]
impl ResourceLoader for HttpLoader {
    fn load(&self, request: &ImageRequest<'_>) -> Option<Resource> {
        let mut builder = self.client.get(request.url.as_str());
        if let Some(origin) = request.cors_origin {
            builder = builder.header(reqwest::header::ORIGIN, origin);
        }
        let resp = match builder.send() {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Failed to fetch image {}: {}", request.url, e);
                return None;
            }
        };
        if !resp.status().is_success() {
            warn!("Image {} returned {}", request.url, resp.status());
            return None;
        }
        let cors_allowed = request.cors_origin.is_some_and(|origin| {
            cors_allows(
                resp.headers()
                    .get(reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN)
                    .and_then(|v| v.to_str().ok()),
                origin,
            )
        });
        match resp.bytes() {
            Ok(bytes) => Some(Resource { bytes: bytes.to_vec(), cors_allowed }),
            Err(e) => {
                warn!("Failed to read image body {}: {}", request.url, e);
                None
            }
        }
    }
}

/// Whether an `Access-Control-Allow-Origin` value admits `origin`.
pub fn cors_allows(allow_origin: Option<&str>, origin: &str) -> bool {
    match allow_origin.map(str::trim) {
        Some("*") => true,
        Some(value) => value.eq_ignore_ascii_case(origin),
        None => false,
    }
}

/// Decoded images of a region keyed by their `src` attribute.
#[derive(Debug, Clone, Default)]
pub struct ImageSet {
    images: HashMap<String, DynamicImage>,
}

impl ImageSet {
    pub fn get(&self, src: &str) -> Option<&DynamicImage> {
        self.images.get(src)
    }

    pub fn dimensions(&self, src: &str) -> Option<(u32, u32)> {
        self.images.get(src).map(|img| img.dimensions())
    }

    pub fn insert(&mut self, src: impl Into<String>, image: DynamicImage) {
        self.images.insert(src.into(), image);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// How an `<img>` of the region has to be requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRequest {
    pub src: String,
    pub url: Url,
    pub same_origin: bool,
    pub cors_origin: Option<String>,
}

/// Plan requests for every non-`data:` image the layout under `root` paints.
pub(crate) fn plan_requests(
    root: ElementRef<'_>,
    region: &RenderRegion,
    options: &CaptureOptions,
) -> Vec<PlannedRequest> {
    let img_sel = Selector::parse("img[src]").expect("static selector");
    let mut planned = Vec::new();
    for img in root.select(&img_sel) {
        let Some(src) = img.value().attr("src") else {
            continue;
        };
        if src.trim_start().starts_with("data:") || !super::layout::is_painted(img, root) {
            continue;
        }
        let url = match resolve_url(region.base_url(), src) {
            Some(url) => url,
            None => {
                warn!("Cannot resolve image `{}` without a base URL", src);
                continue;
            }
        };
        let same_origin = region
            .base_url()
            .is_some_and(|base| base.origin() == url.origin());
        let wants_cors = options.use_cors || img.value().attr("crossorigin").is_some();
        let cors_origin = match (same_origin, wants_cors, region.base_url()) {
            (false, true, Some(base)) => Some(base.origin().ascii_serialization()),
            (false, true, None) => Some("null".to_string()),
            _ => None,
        };
        planned.push(PlannedRequest {
            src: src.to_string(),
            url,
            same_origin,
            cors_origin,
        });
    }
    planned
}

/// Load and decode every image the region paints.
///
/// Fails with [`CaptureFailure::Tainted`] when a cross-origin image cannot be
/// read back; unavailable or undecodable images are skipped. Images that are
/// hidden, or sit under a hidden ancestor, are never requested.
pub(crate) fn load_images(
    root: ElementRef<'_>,
    region: &RenderRegion,
    options: &CaptureOptions,
    loader: &dyn ResourceLoader,
) -> Result<ImageSet> {
    let mut set = ImageSet::default();

    let img_sel = Selector::parse("img[src]").expect("static selector");
    for img in root.select(&img_sel) {
        let Some(src) = img.value().attr("src") else {
            continue;
        };
        if !super::layout::is_painted(img, root) {
            continue;
        }
        if let Some(payload) = src.trim_start().strip_prefix("data:") {
            match decode_data_uri(payload).and_then(|b| image::load_from_memory(&b).ok()) {
                Some(decoded) => set.insert(src, decoded),
                None => warn!("Skipping undecodable data URI image"),
            }
        }
    }

    for planned in plan_requests(root, region, options) {
        if set.get(&planned.src).is_some() {
            continue;
        }
        let request = ImageRequest {
            url: &planned.url,
            cors_origin: planned.cors_origin.as_deref(),
        };
        let Some(resource) = loader.load(&request) else {
            warn!("Image {} unavailable; painting placeholder", planned.url);
            continue;
        };
        let readable = planned.same_origin || (planned.cors_origin.is_some() && resource.cors_allowed);
        if !readable {
            return Err(CaptureFailure::Tainted(planned.url.to_string()).into());
        }
        match image::load_from_memory(&resource.bytes) {
            Ok(decoded) => {
                debug!("Loaded image {} ({}x{})", planned.url, decoded.width(), decoded.height());
                set.insert(planned.src, decoded);
            }
            Err(e) => warn!("Failed to decode image {}: {}", planned.url, e),
        }
    }

    Ok(set)
}

fn resolve_url(base: Option<&Url>, src: &str) -> Option<Url> {
    match Url::parse(src) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => base.and_then(|b| b.join(src).ok()),
        Err(_) => None,
    }
}

/// Decode the part of a `data:` URI after the scheme. Only base64 payloads
/// are supported.
pub fn decode_data_uri(payload: &str) -> Option<Vec<u8>> {
    let (meta, data) = payload.split_once(',')?;
    if !meta.ends_with(";base64") {
        return None;
    }
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb, RgbImage};
    use scraper::Html;
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 2, Rgb([10, 20, 30]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    fn first_body(doc: &Html) -> ElementRef<'_> {
        doc.select(&Selector::parse("body").unwrap()).next().unwrap()
    }

    #[test]
    fn cors_header_matching() {
        assert!(cors_allows(Some("*"), "https://app.test"));
        assert!(cors_allows(Some("https://app.test"), "https://app.test"));
        assert!(!cors_allows(Some("https://other.test"), "https://app.test"));
        assert!(!cors_allows(None, "https://app.test"));
    }

    #[test]
    fn data_uri_images_are_always_readable() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes());
        let html = format!(r#"<body><img src="data:image/png;base64,{}"></body>"#, encoded);
        let doc = Html::parse_document(&html);
        let region = RenderRegion::new(html.clone(), 100);
        let set = load_images(
            first_body(&doc),
            &region,
            &CaptureOptions::default(),
            &ResourceCache::new(),
        )
        .unwrap();
        assert_eq!(set.len(), 1);
        let src = format!("data:image/png;base64,{}", encoded);
        assert_eq!(set.dimensions(&src), Some((4, 2)));
    }

    #[test]
    fn cross_origin_without_cors_grant_taints() {
        let html = r#"<body><img src="https://cdn.test/logo.png"></body>"#;
        let doc = Html::parse_document(html);
        let region = RenderRegion::new(html, 100)
            .with_base_url("https://app.test/docs/")
            .unwrap();
        let mut cache = ResourceCache::new();
        cache.insert(
            &Url::parse("https://cdn.test/logo.png").unwrap(),
            Resource { bytes: png_bytes(), cors_allowed: false },
        );
        let err = load_images(first_body(&doc), &region, &CaptureOptions::default(), &cache)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::CaptureError(CaptureFailure::Tainted(ref u)) if u == "https://cdn.test/logo.png"
        ));
    }

    #[test]
    fn images_under_hidden_ancestors_are_not_requested() {
        let html = r#"<body><p>Holerite</p><div style="display:none"><section><img src="https://cdn.test/logo.png"></section></div><div hidden><img src="data:image/png;base64,AAAA"></div></body>"#;
        let doc = Html::parse_document(html);
        let region = RenderRegion::new(html, 100)
            .with_base_url("https://app.test/docs/")
            .unwrap();
        let mut cache = ResourceCache::new();
        cache.insert(
            &Url::parse("https://cdn.test/logo.png").unwrap(),
            Resource { bytes: png_bytes(), cors_allowed: false },
        );
        assert!(plan_requests(first_body(&doc), &region, &CaptureOptions::default()).is_empty());
        let set = load_images(first_body(&doc), &region, &CaptureOptions::default(), &cache)
            .unwrap();
        assert!(set.is_empty());

        let bitmap = crate::capture(&region, &CaptureOptions::default(), &cache).unwrap();
        assert_eq!(bitmap.width(), 200);
    }

    #[test]
    fn same_origin_relative_images_resolve_against_base() {
        let html = r#"<body><img src="img/a.png"></body>"#;
        let doc = Html::parse_document(html);
        let region = RenderRegion::new(html, 100)
            .with_base_url("https://app.test/docs/")
            .unwrap();
        let planned = plan_requests(first_body(&doc), &region, &CaptureOptions::default());
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].url.as_str(), "https://app.test/docs/img/a.png");
        assert!(planned[0].same_origin);
        assert_eq!(planned[0].cors_origin, None);
    }

    #[test]
    fn missing_images_are_skipped() {
        let html = r#"<body><img src="/gone.png"></body>"#;
        let doc = Html::parse_document(html);
        let region = RenderRegion::new(html, 100)
            .with_base_url("https://app.test/")
            .unwrap();
        let set = load_images(
            first_body(&doc),
            &region,
            &CaptureOptions::default(),
            &ResourceCache::new(),
        )
        .unwrap();
        assert!(set.is_empty());
    }
}
