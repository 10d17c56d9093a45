//! Local saving of exported blobs through temporary object URLs.
//!
//! An [`ObjectUrl`] is a `blob:` reference to bytes held by an
//! [`ObjectUrlRegistry`]. Every download acquires one, hands it to a
//! [`FileSaver`], and releases it on all exit paths.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use super::{sanitize_filename, TransferableBlob};
use crate::error::{Error, Result};

const URL_PREFIX: &str = "blob:docsnap/";

#[derive(Debug, Default)]
struct RegistryState {
    next_id: u64,
    live: HashMap<u64, Arc<TransferableBlob>>,
}

/// Table of live object URLs. Cloning shares the table.
#[derive(Debug, Clone, Default)]
pub struct ObjectUrlRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `blob` and return a reference to it.
    pub fn create(&self, blob: TransferableBlob) -> ObjectUrl {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.live.insert(id, Arc::new(blob));
        ObjectUrl {
            id,
            url: format!("{}{}", URL_PREFIX, id),
            registry: self.clone(),
            released: false,
        }
    }

    /// Look up the blob behind a live `blob:` URL.
    pub fn resolve(&self, url: &str) -> Option<Arc<TransferableBlob>> {
        let id = url.strip_prefix(URL_PREFIX)?.parse::<u64>().ok()?;
        self.lock().live.get(&id).cloned()
    }

    /// Number of object URLs not yet released.
    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    fn revoke(&self, id: u64) {
        self.lock().live.remove(&id);
    }
}

/// A temporary reference to a registered blob.
///
/// Call [`ObjectUrl::release`] when done. Dropping an unreleased URL revokes
/// it as well and logs a warning.
#[derive(Debug)]
pub struct ObjectUrl {
    id: u64,
    url: String,
    registry: ObjectUrlRegistry,
    released: bool,
}

impl ObjectUrl {
    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn blob(&self) -> Option<Arc<TransferableBlob>> {
        self.registry.resolve(&self.url)
    }

    /// Revoke the URL; the blob is freed once no other holder remains.
    pub fn release(mut self) {
        self.registry.revoke(self.id);
        self.released = true;
    }
}

impl Drop for ObjectUrl {
    fn drop(&mut self) {
        if !self.released {
            warn!("Object URL {} dropped without release; revoking", self.url);
            self.registry.revoke(self.id);
        }
    }
}

/// Platform save mechanism for downloads.
pub trait FileSaver {
    /// Persist the blob behind `url` as `filename`; returns where it landed.
    fn save(&self, url: &ObjectUrl, filename: &str) -> Result<PathBuf>;
}

/// Saves downloads into a directory.
#[derive(Debug, Clone)]
pub struct DirectorySaver {
    dir: PathBuf,
}

impl DirectorySaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FileSaver for DirectorySaver {
    fn save(&self, url: &ObjectUrl, filename: &str) -> Result<PathBuf> {
        let blob = url
            .blob()
            .ok_or_else(|| Error::SaveError(format!("{} is no longer valid", url.as_str())))?;
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::SaveError(format!("cannot create {}: {}", self.dir.display(), e)))?;
        let path = self.dir.join(sanitize_filename(filename));
        std::fs::write(&path, blob.as_bytes())
            .map_err(|e| Error::SaveError(format!("cannot write {}: {}", path.display(), e)))?;
        Ok(path)
    }
}

/// Save `blob` as `filename` through a temporary object URL.
pub fn download(
    registry: &ObjectUrlRegistry,
    saver: &dyn FileSaver,
    blob: TransferableBlob,
    filename: &str,
) -> Result<PathBuf> {
    let url = registry.create(blob);
    let saved = saver.save(&url, filename);
    url.release();
    if let Ok(path) = &saved {
        debug!("Saved {} to {}", filename, path.display());
    }
    saved
}

/// Fetch `url` with a blocking client and save the body as `filename`.
///
/// Network failures, non-success statuses and empty bodies fail with
/// [`Error::FetchError`]; no object URL outlives the call.
#[cfg(feature = "remote")]
pub fn download_from_url(
    client: &reqwest::blocking::Client,
    registry: &ObjectUrlRegistry,
    saver: &dyn FileSaver,
    url: &str,
    filename: &str,
) -> Result<PathBuf> {
    let resp = client
        .get(url)
        .send()
        .map_err(|e| Error::FetchError(format!("GET {} failed: {}", url, e)))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::FetchError(format!("GET {} returned {}", url, status)));
    }
    let mime = content_type(resp.headers());
    let body = resp
        .bytes()
        .map_err(|e| Error::FetchError(format!("failed to read body of {}: {}", url, e)))?;
    let blob = blob_from_body(url, body.to_vec(), mime)?;
    download(registry, saver, blob, filename)
}

#[cfg(feature = "remote")]
pub(crate) fn content_type(headers: &reqwest::header::HeaderMap) -> String {
    headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string()
}

pub(crate) fn blob_from_body(url: &str, body: Vec<u8>, mime: String) -> Result<TransferableBlob> {
    if body.is_empty() {
        return Err(Error::FetchError(format!("{} returned an empty body", url)));
    }
    Ok(TransferableBlob::new(body, mime))
}
