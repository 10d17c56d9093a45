use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, warn};
use scraper::Html;
use tokio::sync::Mutex;
use url::Url;

use crate::export::download::{self, blob_from_body, content_type, FileSaver, ObjectUrl, ObjectUrlRegistry};
use crate::export::{paginate, pdf};
use crate::rendering::resources::{cors_allows, plan_requests, PlannedRequest, Resource, ResourceCache};
use crate::rendering::{self, Bitmap, CaptureOptions, RenderRegion};
use crate::{Error, ExportConfig, Result, TransferableBlob};

/// An async facade over the capture → paginate → serialize pipeline.
///
/// Stages run on the calling task and yield in between. Region images are
/// fetched concurrently before capture. Calls on one service are serialized
/// by an internal gate, so a second export waits for the first.
pub struct PdfService {
    client: reqwest::Client,
    registry: ObjectUrlRegistry,
    saver: Arc<dyn FileSaver + Send + Sync>,
    config: ExportConfig,
    gate: Mutex<()>,
}

impl PdfService {
    /// Create a service that saves downloads through `saver`.
    pub fn new(config: ExportConfig, saver: impl FileSaver + Send + Sync + 'static) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            registry: ObjectUrlRegistry::new(),
            saver: Arc::new(saver),
            config,
            gate: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Registry backing the object URLs this service hands out.
    pub fn registry(&self) -> &ObjectUrlRegistry {
        &self.registry
    }

    /// Rasterize `region`.
    pub async fn capture(&self, region: &RenderRegion) -> Result<Bitmap> {
        let _guard = self.gate.lock().await;
        self.capture_unlocked(region).await
    }

    /// Capture, paginate and serialize `region` into PDF bytes.
    pub async fn generate_pdf(&self, region: &RenderRegion) -> Result<TransferableBlob> {
        let _guard = self.gate.lock().await;
        self.generate_unlocked(region).await
    }

    /// Generate the PDF and register it under a temporary object URL.
    ///
    /// The caller owns the returned URL and must release it.
    pub async fn preview(&self, region: &RenderRegion) -> Result<ObjectUrl> {
        let blob = self.generate_pdf(region).await?;
        Ok(self.registry.create(blob))
    }

    /// Generate the PDF and save it under the configured filename.
    pub async fn download_pdf(&self, region: &RenderRegion) -> Result<PathBuf> {
        let blob = self.generate_pdf(region).await?;
        self.save(blob, &self.config.filename).await
    }

    /// Fetch `url` and save the body as `filename`.
    pub async fn download_from_url(&self, url: &str, filename: &str) -> Result<PathBuf> {
        let _guard = self.gate.lock().await;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::FetchError(format!("GET {} failed: {}", url, e)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::FetchError(format!("GET {} returned {}", url, status)));
        }
        let mime = content_type(resp.headers());
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::FetchError(format!("failed to read body of {}: {}", url, e)))?;
        let blob = blob_from_body(url, body.to_vec(), mime)?;
        self.save(blob, filename).await
    }

    /// Hand `blob` to the saver on the blocking pool.
    async fn save(&self, blob: TransferableBlob, filename: &str) -> Result<PathBuf> {
        let registry = self.registry.clone();
        let saver = Arc::clone(&self.saver);
        let filename = filename.to_string();
        tokio::task::spawn_blocking(move || download::download(&registry, &*saver, blob, &filename))
            .await
            .map_err(|e| Error::SaveError(format!("save task failed: {}", e)))?
    }

    async fn capture_unlocked(&self, region: &RenderRegion) -> Result<Bitmap> {
        let options = self.config.capture_options();
        let cache = self.prefetch(region, &options).await?;
        tokio::task::yield_now().await;
        rendering::capture(region, &options, &cache)
    }

    async fn generate_unlocked(&self, region: &RenderRegion) -> Result<TransferableBlob> {
        let bitmap = self.capture_unlocked(region).await?;
        tokio::task::yield_now().await;
        let artifact = paginate(bitmap, self.config.page, &self.config.filename);
        tokio::task::yield_now().await;
        pdf::serialize(&artifact, self.config.jpeg_quality())
    }

    /// Fetch every remote image of the region concurrently.
    async fn prefetch(&self, region: &RenderRegion, options: &CaptureOptions) -> Result<ResourceCache> {
        let planned = planned_requests(region, options)?;
        let mut cache = ResourceCache::new();
        if planned.is_empty() {
            return Ok(cache);
        }
        let count = planned.len();
        let fetched = join_all(planned.into_iter().map(|p| fetch_image(&self.client, p))).await;
        for (url, resource) in fetched.into_iter().flatten() {
            cache.insert(&url, resource);
        }
        debug!("Prefetched {}/{} image(s)", cache.len(), count);
        Ok(cache)
    }
}

// Html is not Send; keep it out of the async state.
fn planned_requests(region: &RenderRegion, options: &CaptureOptions) -> Result<Vec<PlannedRequest>> {
    options.validate()?;
    let document = Html::parse_document(region.html());
    let root = rendering::resolve_root(&document, region)?;
    Ok(plan_requests(root, region, options))
}

async fn fetch_image(client: &reqwest::Client, planned: PlannedRequest) -> Option<(Url, Resource)> {
    let mut builder = client.get(planned.url.as_str());
    if let Some(origin) = planned.cors_origin.as_deref() {
        builder = builder.header(reqwest::header::ORIGIN, origin);
    }
    let resp = match builder.send().await {
        Ok(resp) => resp,
        Err(e) => {
            warn!("Failed to fetch image {}: {}", planned.url, e);
            return None;
        }
    };
    if !resp.status().is_success() {
        warn!("Image {} returned {}", planned.url, resp.status());
        return None;
    }
    let cors_allowed = planned.cors_origin.as_deref().is_some_and(|origin| {
        cors_allows(
            resp.headers()
                .get(reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            origin,
        )
    });
    match resp.bytes().await {
        Ok(bytes) => Some((
            planned.url,
            Resource {
                bytes: bytes.to_vec(),
                cors_allowed,
            },
        )),
        Err(e) => {
            warn!("Failed to read image body {}: {}", planned.url, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::download::DirectorySaver;
    use crate::error::CaptureFailure;

    fn service() -> PdfService {
        let dir = std::env::temp_dir().join(format!("docsnap-service-{}", std::process::id()));
        PdfService::new(ExportConfig::default(), DirectorySaver::new(dir)).unwrap()
    }

    #[tokio::test]
    async fn generate_without_remote_images() {
        let svc = service();
        let region = RenderRegion::new("<body><h1>Payslip</h1><p>Net pay</p></body>", 300);
        let pdf = svc.generate_pdf(&region).await.unwrap();
        assert_eq!(pdf::decode_page_count(pdf.as_bytes()).unwrap(), 1);
    }

    #[tokio::test]
    async fn preview_url_is_live_until_released() {
        let svc = service();
        let region = RenderRegion::new("<body><p>Preview</p></body>", 200);
        let url = svc.preview(&region).await.unwrap();
        assert_eq!(svc.registry().live_count(), 1);
        assert!(url.blob().unwrap().as_bytes().starts_with(b"%PDF"));
        url.release();
        assert_eq!(svc.registry().live_count(), 0);
    }

    #[tokio::test]
    async fn missing_region_fails_before_fetching() {
        let svc = service();
        let region = RenderRegion::new("<body><p>x</p></body>", 200).with_selector("#gone");
        let err = svc.capture(&region).await.unwrap_err();
        assert!(matches!(err, Error::CaptureError(CaptureFailure::Detached(_))));
    }

    struct ThreadRecorder(Arc<std::sync::Mutex<Option<std::thread::ThreadId>>>);

    impl FileSaver for ThreadRecorder {
        fn save(&self, url: &ObjectUrl, filename: &str) -> Result<PathBuf> {
            assert!(url.blob().is_some());
            *self.0.lock().unwrap() = Some(std::thread::current().id());
            Ok(PathBuf::from(filename))
        }
    }

    #[tokio::test]
    async fn downloads_are_saved_off_the_async_task() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let svc = PdfService::new(ExportConfig::default(), ThreadRecorder(Arc::clone(&seen))).unwrap();
        let region = RenderRegion::new("<body><p>Recibo</p></body>", 200);
        let path = svc.download_pdf(&region).await.unwrap();
        assert_eq!(path, PathBuf::from(&svc.config().filename));
        let saver_thread = seen.lock().unwrap().expect("saver ran");
        assert_ne!(saver_thread, std::thread::current().id());
        assert_eq!(svc.registry().live_count(), 0);
    }

    #[test]
    fn service_rejects_invalid_config() {
        let config = ExportConfig {
            scale: 0.0,
            ..Default::default()
        };
        assert!(PdfService::new(config, DirectorySaver::new("/tmp")).is_err());
    }
}
