//! Error types for the capture, export and signature pipeline

use thiserror::Error;

/// Result type alias for docsnap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing, exporting or signing
#[derive(Error, Debug)]
pub enum Error {
    /// The render region could not be captured
    #[error("Capture failed: {0}")]
    CaptureError(#[from] CaptureFailure),

    /// A signature export was attempted before any ink was drawn
    #[error("Signature is empty")]
    EmptySignatureError,

    /// Retrieving a remote document failed
    #[error("Download failed: {0}")]
    FetchError(String),

    /// Encoding a page image or the document failed
    #[error("Serialization failed: {0}")]
    SerializationError(String),

    /// Writing a file to the local save location failed
    #[error("Save failed: {0}")]
    SaveError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

/// Reasons a render region cannot be rasterized
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureFailure {
    /// The selector does not resolve to an element of the document
    #[error("region `{0}` is not attached to the document")]
    Detached(String),

    /// The region is hidden or has no layout size
    #[error("region `{0}` is not visible")]
    NotVisible(String),

    /// Cross-origin image data cannot be read back
    #[error("cross-origin image `{0}` taints the canvas")]
    Tainted(String),

    /// The canvas would exceed the maximum size a capture may allocate
    #[error("canvas of {width}x{height} device pixels exceeds the size limit")]
    TooLarge { width: u64, height: u64 },
}

/// Coarse failure classes a caller maps to user notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationCategory {
    /// Generating the document failed (capture or encoding)
    CaptureFailure,
    /// The user tried to save a blank signature
    EmptySignature,
    /// Fetching or saving a file failed
    DownloadFailure,
    /// The caller passed invalid options
    Configuration,
}

impl Error {
    /// Classify the error for the caller's notification layer.
    pub fn category(&self) -> NotificationCategory {
        match self {
            Error::CaptureError(_) | Error::SerializationError(_) => {
                NotificationCategory::CaptureFailure
            }
            Error::EmptySignatureError => NotificationCategory::EmptySignature,
            Error::FetchError(_) | Error::SaveError(_) => NotificationCategory::DownloadFailure,
            Error::ConfigError(_) => NotificationCategory::Configuration,
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<lopdf::Error> for Error {
    fn from(err: lopdf::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

#[cfg(feature = "remote")]
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::FetchError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_distinct_per_failure_class() {
        let capture = Error::from(CaptureFailure::Tainted("https://cdn.test/a.png".into()));
        assert_eq!(capture.category(), NotificationCategory::CaptureFailure);
        assert_eq!(
            Error::EmptySignatureError.category(),
            NotificationCategory::EmptySignature
        );
        assert_eq!(
            Error::FetchError("404".into()).category(),
            NotificationCategory::DownloadFailure
        );
        assert_ne!(capture.category(), Error::EmptySignatureError.category());
    }

    #[test]
    fn capture_failure_display_names_the_region() {
        let err = Error::from(CaptureFailure::Detached("#doc".into()));
        assert_eq!(
            err.to_string(),
            "Capture failed: region `#doc` is not attached to the document"
        );
    }
}
